//! Network video transports that turn a camera URL into decoded frames.

mod ffmpeg;
#[cfg(all(feature = "gstreamer", target_os = "linux"))]
mod gst;


pub use ffmpeg::FfmpegTransport;
#[cfg(all(feature = "gstreamer", target_os = "linux"))]
pub use gst::GstTransport;

use crate::camera::CameraIdentity;
use crate::config::{EncoderConfig, StreamConfig, TransportBackend};
use crate::error::TransportError;
use crate::frame::{FrameFormat, FrameGeometry};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Lifecycle of a stream worker's connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    Connecting,
    Streaming,
    Reconnecting,
    /// Gave up after the maximum number of consecutive failures
    Failed,
    Stopped,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportState::Idle => "idle",
            TransportState::Connecting => "connecting",
            TransportState::Streaming => "streaming",
            TransportState::Reconnecting => "reconnecting",
            TransportState::Failed => "failed",
            TransportState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Raw pixels of one decoded frame, before the worker stamps it
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
}

/// One connection to one source. Not shared: the owning worker loop opens,
/// reads and closes it.
#[async_trait]
pub trait TransportSession: Send {
    /// Connect and confirm that frames flow, bounded by `timeout`
    async fn open(&mut self, timeout: Duration) -> Result<FrameGeometry, TransportError>;

    /// Next decoded frame, bounded by `timeout`
    async fn read_frame(&mut self, timeout: Duration) -> Result<DecodedFrame, TransportError>;

    /// Release the connection; safe to call more than once
    async fn close(&mut self);
}

/// Creates sessions for cameras
pub trait TransportFactory: Send + Sync {
    fn create(&self, camera: &CameraIdentity) -> Box<dyn TransportSession>;
}

/// Factory selecting the configured backend
pub struct DefaultTransportFactory {
    stream: StreamConfig,
    encoder: EncoderConfig,
}

impl DefaultTransportFactory {
    pub fn new(stream: StreamConfig, encoder: EncoderConfig) -> Self {
        if stream.backend == TransportBackend::Gstreamer
            && !cfg!(all(feature = "gstreamer", target_os = "linux"))
        {
            warn!("GStreamer transport requested but not compiled in; using ffmpeg");
        }
        Self { stream, encoder }
    }

    pub fn shared(stream: StreamConfig, encoder: EncoderConfig) -> Arc<dyn TransportFactory> {
        Arc::new(Self::new(stream, encoder))
    }

    fn default_geometry(&self) -> FrameGeometry {
        FrameGeometry::new(
            self.stream.default_width,
            self.stream.default_height,
            self.stream.default_fps,
        )
    }
}

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, camera: &CameraIdentity) -> Box<dyn TransportSession> {
        #[cfg(all(feature = "gstreamer", target_os = "linux"))]
        if self.stream.backend == TransportBackend::Gstreamer {
            return Box::new(GstTransport::new(
                camera.rtsp_url.clone(),
                self.default_geometry(),
                &self.encoder,
            ));
        }

        Box::new(FfmpegTransport::new(
            camera.rtsp_url.clone(),
            self.default_geometry(),
            &self.encoder,
        ))
    }
}
