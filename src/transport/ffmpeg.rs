use super::{DecodedFrame, TransportSession};
use crate::camera::redact_url;
use crate::config::EncoderConfig;
use crate::error::TransportError;
use crate::frame::{FrameFormat, FrameGeometry};
use crate::probe::{is_rtsp, Ffprobe, SourceProbe};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

const FORMAT: FrameFormat = FrameFormat::Rgb24;

/// Decodes a source by piping raw frames out of an `ffmpeg` child process
pub struct FfmpegTransport {
    url: String,
    fallback: FrameGeometry,
    ffmpeg_path: String,
    rtsp_transport: String,
    probe: Ffprobe,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    geometry: FrameGeometry,
    /// First frame read during `open`, handed out by the next `read_frame`
    pending: Option<Vec<u8>>,
}

impl FfmpegTransport {
    pub fn new(url: String, fallback: FrameGeometry, encoder: &EncoderConfig) -> Self {
        Self {
            url,
            fallback,
            ffmpeg_path: encoder.ffmpeg_path.clone(),
            rtsp_transport: encoder.rtsp_transport.clone(),
            probe: Ffprobe::new(encoder),
            child: None,
            stdout: None,
            geometry: fallback,
            pending: None,
        }
    }

    /// Decoder arguments producing packed frames of `geometry` on stdout
    pub(crate) fn decoder_args(&self, geometry: FrameGeometry) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
        ];
        if is_rtsp(&self.url) {
            args.push("-rtsp_transport".into());
            args.push(self.rtsp_transport.clone());
        }
        args.extend([
            "-i".to_string(),
            self.url.clone(),
            "-an".to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            FORMAT.ffmpeg_pix_fmt().to_string(),
            "-s".to_string(),
            format!("{}x{}", geometry.width, geometry.height),
            "pipe:1".to_string(),
        ]);
        args
    }

    async fn read_raw(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let stdout = self.stdout.as_mut().ok_or_else(|| TransportError::ReadFailed {
            details: "transport is not open".to_string(),
        })?;

        let mut buffer = vec![0u8; self.geometry.frame_size(FORMAT)];
        match tokio::time::timeout(timeout, stdout.read_exact(&mut buffer)).await {
            Ok(Ok(_)) => Ok(buffer),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(TransportError::EndOfStream)
            }
            Ok(Err(e)) => Err(TransportError::ReadFailed {
                details: e.to_string(),
            }),
            Err(_) => Err(TransportError::ReadTimeout { timeout }),
        }
    }
}

#[async_trait]
impl TransportSession for FfmpegTransport {
    async fn open(&mut self, timeout: Duration) -> Result<FrameGeometry, TransportError> {
        self.close().await;

        let deadline = Instant::now() + timeout;
        let redacted = redact_url(&self.url);
        info!("Opening stream {}", redacted);

        let geometry = match self.probe.probe_source(&self.url, timeout).await {
            Ok(Some(geometry)) => geometry,
            Ok(None) => {
                debug!("Could not determine geometry of {}; using {:?}", redacted, self.fallback);
                self.fallback
            }
            Err(e) => {
                return Err(TransportError::OpenFailed {
                    url: redacted,
                    details: e.to_string(),
                })
            }
        };

        let mut command = Command::new(&self.ffmpeg_path);
        command
            .args(self.decoder_args(geometry))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| TransportError::Spawn {
            details: e.to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| TransportError::Spawn {
            details: "decoder stdout was not captured".to_string(),
        })?;

        self.child = Some(child);
        self.stdout = Some(stdout);
        self.geometry = geometry;

        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.read_raw(remaining).await {
            Ok(first) => {
                self.pending = Some(first);
                info!(
                    "Stream {} open at {}x{} @ {}fps",
                    redacted, geometry.width, geometry.height, geometry.fps
                );
                Ok(geometry)
            }
            Err(e) => {
                self.close().await;
                Err(match e {
                    TransportError::ReadTimeout { .. } => TransportError::OpenTimeout {
                        url: redacted,
                        timeout,
                    },
                    other => TransportError::OpenFailed {
                        url: redacted,
                        details: other.to_string(),
                    },
                })
            }
        }
    }

    async fn read_frame(&mut self, timeout: Duration) -> Result<DecodedFrame, TransportError> {
        let data = match self.pending.take() {
            Some(data) => data,
            None => self.read_raw(timeout).await?,
        };

        Ok(DecodedFrame {
            data,
            width: self.geometry.width,
            height: self.geometry.height,
            format: FORMAT,
        })
    }

    async fn close(&mut self) {
        self.stdout = None;
        self.pending = None;

        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                debug!("Decoder already exited: {}", e);
            }
            if tokio::time::timeout(Duration::from_secs(2), child.wait())
                .await
                .is_err()
            {
                warn!("Decoder for {} did not exit after kill", redact_url(&self.url));
            }
        }
    }
}
