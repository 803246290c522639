use super::{DecodedFrame, TransportSession};
use crate::camera::redact_url;
use crate::config::EncoderConfig;
use crate::error::TransportError;
use crate::frame::{FrameFormat, FrameGeometry};
use async_trait::async_trait;
use gstreamer::prelude::*;
use gstreamer::Pipeline;
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

/// Decodes a source in-process with an `rtspsrc ! decodebin ! appsink` pipeline
pub struct GstTransport {
    url: String,
    geometry: FrameGeometry,
    protocols: String,
    pipeline: Option<Pipeline>,
    samples: Option<mpsc::Receiver<gstreamer::Sample>>,
    /// First frame decoded during `open`, handed out by the next `read_frame`
    pending: Option<DecodedFrame>,
}

impl GstTransport {
    pub fn new(url: String, geometry: FrameGeometry, encoder: &EncoderConfig) -> Self {
        Self {
            url,
            geometry,
            protocols: encoder.rtsp_transport.clone(),
            pipeline: None,
            samples: None,
            pending: None,
        }
    }

    fn build_pipeline_string(&self) -> String {
        format!(
            "rtspsrc location=\"{}\" protocols={} latency=200 ! \
             decodebin ! videoconvert ! videoscale ! \
             video/x-raw,format=RGB,width={},height={} ! \
             appsink name=sink sync=false max-buffers=2 drop=true emit-signals=false",
            self.url, self.protocols, self.geometry.width, self.geometry.height
        )
    }

    fn start_pipeline(&mut self) -> Result<(), TransportError> {
        let redacted = redact_url(&self.url);
        let open_failed = |details: String| TransportError::OpenFailed {
            url: redacted.clone(),
            details,
        };

        gstreamer::init().map_err(|e| open_failed(format!("Failed to initialize GStreamer: {}", e)))?;

        let pipeline = gstreamer::parse::launch(&self.build_pipeline_string())
            .map_err(|e| open_failed(format!("Failed to create pipeline: {}", e)))?
            .downcast::<Pipeline>()
            .map_err(|_| open_failed("Failed to downcast to Pipeline".to_string()))?;

        let appsink = pipeline
            .by_name("sink")
            .and_then(|element| element.downcast::<AppSink>().ok())
            .ok_or_else(|| open_failed("Pipeline has no appsink".to_string()))?;

        let (tx, rx) = mpsc::channel(2);
        appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink
                        .pull_sample()
                        .map_err(|_| gstreamer::FlowError::Eos)?;
                    // A full channel means the reader is behind; drop this frame
                    let _ = tx.try_send(sample);
                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .build(),
        );

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| open_failed(format!("Failed to start pipeline: {}", e)))?;

        self.pipeline = Some(pipeline);
        self.samples = Some(rx);
        Ok(())
    }

    fn sample_to_frame(sample: gstreamer::Sample) -> Result<DecodedFrame, TransportError> {
        let read_failed = |details: String| TransportError::ReadFailed { details };

        let buffer = sample
            .buffer()
            .ok_or_else(|| read_failed("No buffer in sample".to_string()))?;
        let caps = sample
            .caps()
            .ok_or_else(|| read_failed("No caps in sample".to_string()))?;
        let video_info = VideoInfo::from_caps(caps)
            .map_err(|e| read_failed(format!("Failed to get video info: {}", e)))?;
        let map = buffer
            .map_readable()
            .map_err(|e| read_failed(format!("Failed to map buffer: {}", e)))?;

        let width = video_info.width();
        let height = video_info.height();
        let row = width as usize * FrameFormat::Rgb24.bytes_per_pixel();
        let stride = video_info.stride()[0] as usize;

        // Rows may be padded; repack to a tight layout
        let data = if stride == row {
            map.as_slice().to_vec()
        } else {
            map.as_slice()
                .chunks(stride)
                .take(height as usize)
                .flat_map(|line| line[..row.min(line.len())].iter().copied())
                .collect()
        };

        trace!("Decoded frame {}x{} ({} bytes)", width, height, data.len());

        Ok(DecodedFrame {
            data,
            width,
            height,
            format: FrameFormat::Rgb24,
        })
    }
}

#[async_trait]
impl TransportSession for GstTransport {
    async fn open(&mut self, timeout: Duration) -> Result<FrameGeometry, TransportError> {
        self.close().await;

        let redacted = redact_url(&self.url);
        info!("Opening GStreamer stream {}", redacted);
        self.start_pipeline()?;

        let first = match self.samples.as_mut() {
            Some(rx) => tokio::time::timeout(timeout, rx.recv()).await,
            None => Ok(None),
        };

        match first {
            Ok(Some(sample)) => match Self::sample_to_frame(sample) {
                Ok(frame) => {
                    let geometry =
                        FrameGeometry::new(frame.width, frame.height, self.geometry.fps);
                    info!("GStreamer stream {} open at {}x{}", redacted, frame.width, frame.height);
                    self.pending = Some(frame);
                    Ok(geometry)
                }
                Err(e) => {
                    self.close().await;
                    Err(e)
                }
            },
            Ok(None) => {
                self.close().await;
                Err(TransportError::OpenFailed {
                    url: redacted,
                    details: "pipeline ended before the first frame".to_string(),
                })
            }
            Err(_) => {
                self.close().await;
                Err(TransportError::OpenTimeout {
                    url: redacted,
                    timeout,
                })
            }
        }
    }

    async fn read_frame(&mut self, timeout: Duration) -> Result<DecodedFrame, TransportError> {
        if let Some(frame) = self.pending.take() {
            return Ok(frame);
        }

        let rx = self.samples.as_mut().ok_or_else(|| TransportError::ReadFailed {
            details: "transport is not open".to_string(),
        })?;

        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(sample)) => Self::sample_to_frame(sample),
            Ok(None) => Err(TransportError::EndOfStream),
            Err(_) => Err(TransportError::ReadTimeout { timeout }),
        }
    }

    async fn close(&mut self) {
        self.samples = None;
        self.pending = None;
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(e) = pipeline.set_state(gstreamer::State::Null) {
                error!("Failed to stop GStreamer pipeline: {}", e);
            } else {
                debug!("GStreamer pipeline for {} stopped", redact_url(&self.url));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(fill: u8) -> DecodedFrame {
        DecodedFrame {
            data: vec![fill; 12],
            width: 2,
            height: 2,
            format: FrameFormat::Rgb24,
        }
    }

    #[tokio::test]
    async fn test_first_frame_from_open_is_read_first() {
        let mut transport = GstTransport::new(
            "rtsp://10.0.0.1/stream".to_string(),
            FrameGeometry::new(2, 2, 25),
            &EncoderConfig::default(),
        );
        let (tx, rx) = mpsc::channel(2);
        transport.samples = Some(rx);
        transport.pending = Some(frame(7));
        drop(tx);

        let first = transport.read_frame(Duration::from_secs(1)).await.unwrap();
        assert_eq!(first.data, vec![7; 12]);
        assert!(matches!(
            transport.read_frame(Duration::from_secs(1)).await,
            Err(TransportError::EndOfStream)
        ));
    }

    #[tokio::test]
    async fn test_close_discards_the_held_frame() {
        let mut transport = GstTransport::new(
            "rtsp://10.0.0.1/stream".to_string(),
            FrameGeometry::new(2, 2, 25),
            &EncoderConfig::default(),
        );
        transport.pending = Some(frame(1));
        transport.close().await;

        assert!(matches!(
            transport.read_frame(Duration::from_secs(1)).await,
            Err(TransportError::ReadFailed { .. })
        ));
    }
}
