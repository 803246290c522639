use super::{EncoderLauncher, EncoderProcess, EncoderRequest, QuitSignal, StopOutcome};
use crate::camera::redact_url;
use crate::config::EncoderConfig;
use crate::error::EncoderError;
use crate::probe::is_rtsp;
use async_trait::async_trait;
use std::fs::File;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Launches `ffmpeg` reading the camera directly and writing a fragmented
/// container, so a segment is playable while it is still being written
#[derive(Debug, Clone)]
pub struct FfmpegLauncher {
    config: EncoderConfig,
}

impl FfmpegLauncher {
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }

    /// Full argument list for one segment
    pub fn build_args(&self, request: &EncoderRequest) -> Vec<String> {
        let config = &self.config;
        let mut args: Vec<String> = vec!["-hide_banner".into(), "-y".into()];

        if is_rtsp(&request.source_url) {
            args.push("-rtsp_transport".into());
            args.push(config.rtsp_transport.clone());
        }

        args.extend([
            "-i".to_string(),
            request.source_url.clone(),
            "-an".to_string(),
            "-c:v".to_string(),
            config.video_codec.clone(),
            "-preset".to_string(),
            config.preset.clone(),
            "-crf".to_string(),
            config.crf.to_string(),
            "-g".to_string(),
            config.keyframe_interval.to_string(),
            "-f".to_string(),
            config.container.clone(),
        ]);

        if !config.movflags.is_empty() {
            args.push("-movflags".into());
            args.push(config.movflags.clone());
        }

        args.push(request.output.to_string_lossy().to_string());
        args
    }

    fn log_sinks(request: &EncoderRequest) -> Result<(Stdio, Stdio), EncoderError> {
        let Some(path) = &request.log_path else {
            return Ok((Stdio::null(), Stdio::null()));
        };

        let file = File::create(path).map_err(|e| EncoderError::Spawn {
            details: format!("Failed to create log file {}: {}", path.display(), e),
        })?;
        let clone = file.try_clone().map_err(|e| EncoderError::Spawn {
            details: format!("Failed to share log file {}: {}", path.display(), e),
        })?;
        Ok((Stdio::from(file), Stdio::from(clone)))
    }
}

#[async_trait]
impl EncoderLauncher for FfmpegLauncher {
    async fn launch(
        &self,
        request: &EncoderRequest,
    ) -> Result<Box<dyn EncoderProcess>, EncoderError> {
        let (stdout, stderr) = Self::log_sinks(request)?;

        let mut command = Command::new(&self.config.ffmpeg_path);
        command
            .args(self.build_args(request))
            .stdin(Stdio::piped())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| EncoderError::Spawn {
            details: format!("{}: {}", self.config.ffmpeg_path, e),
        })?;

        info!(
            "Encoder started (pid {:?}) recording {} to {}",
            child.id(),
            redact_url(&request.source_url),
            request.output.display()
        );

        Ok(Box::new(FfmpegEncoder::from_child(
            child,
            request.output.display().to_string(),
        )))
    }
}

pub struct FfmpegEncoder {
    child: Child,
    quit: QuitSignal,
    output: String,
}

impl FfmpegEncoder {
    /// Wrap a spawned child whose stdin was piped
    pub(crate) fn from_child(mut child: Child, output: String) -> Self {
        let quit = child
            .stdin
            .take()
            .map(QuitSignal::new)
            .unwrap_or_default();
        Self {
            child,
            quit,
            output,
        }
    }
}

#[async_trait]
impl EncoderProcess for FfmpegEncoder {
    async fn wait_exit(&mut self) -> Result<Option<i32>, EncoderError> {
        let status = self.child.wait().await.map_err(|e| EncoderError::Wait {
            details: e.to_string(),
        })?;
        Ok(status.code())
    }

    async fn finish(&mut self, timeout: Duration) -> Result<StopOutcome, EncoderError> {
        if let Ok(Some(status)) = self.child.try_wait() {
            debug!("Encoder for {} already exited ({})", self.output, status);
            return Ok(StopOutcome::AlreadyExited);
        }

        let deadline = Instant::now() + timeout;

        // `q` on stdin makes ffmpeg flush and finalize the container
        if self.quit.is_sent() {
            debug!("Quit already sent to encoder for {}", self.output);
        } else if self.quit.send(timeout).await {
            debug!("Sent quit to encoder for {}", self.output);
        } else {
            warn!("Could not send quit to encoder for {}", self.output);
        }

        match tokio::time::timeout_at(deadline, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!("Encoder for {} exited ({})", self.output, status);
                Ok(StopOutcome::Graceful)
            }
            Ok(Err(e)) => Err(EncoderError::Wait {
                details: e.to_string(),
            }),
            Err(_) => {
                warn!(
                    "Encoder for {} hung after {:?}; forcing kill",
                    self.output, timeout
                );
                self.child.kill().await.map_err(|e| EncoderError::Wait {
                    details: format!("kill failed: {}", e),
                })?;
                Ok(StopOutcome::Killed)
            }
        }
    }

    fn quit_signal(&self) -> QuitSignal {
        self.quit.clone()
    }
}
