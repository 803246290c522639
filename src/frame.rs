use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::camera::CameraId;

/// Pixel layout of decoded frames handed to consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameFormat {
    /// Packed 8-bit RGB, 3 bytes per pixel
    Rgb24,
    /// Packed 8-bit BGR, 3 bytes per pixel
    Bgr24,
}

impl FrameFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            FrameFormat::Rgb24 | FrameFormat::Bgr24 => 3,
        }
    }

    /// Name understood by ffmpeg's `-pix_fmt`
    pub fn ffmpeg_pix_fmt(&self) -> &'static str {
        match self {
            FrameFormat::Rgb24 => "rgb24",
            FrameFormat::Bgr24 => "bgr24",
        }
    }
}

/// Width, height and rate of a video source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl FrameGeometry {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self { width, height, fps }
    }

    /// Size in bytes of one frame in the given format
    pub fn frame_size(&self, format: FrameFormat) -> usize {
        self.width as usize * self.height as usize * format.bytes_per_pixel()
    }

    /// Nominal interval between frames
    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.fps.max(1) as u64)
    }
}

/// One decoded frame from a camera
#[derive(Debug, Clone)]
pub struct FrameData {
    /// Monotonic per-worker frame counter
    pub id: u64,
    pub camera_id: CameraId,
    pub timestamp: SystemTime,
    /// Shared so fan-out to several consumers never copies pixels
    pub data: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
}

impl FrameData {
    pub fn new(
        id: u64,
        camera_id: CameraId,
        timestamp: SystemTime,
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: FrameFormat,
    ) -> Self {
        Self {
            id,
            camera_id,
            timestamp,
            data: Arc::new(data),
            width,
            height,
            format,
        }
    }

    pub fn expected_size(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }

    pub fn validate_size(&self) -> bool {
        self.data.len() == self.expected_size()
    }

    pub fn age(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.timestamp)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size_matches_geometry() {
        let geometry = FrameGeometry::new(640, 360, 15);
        assert_eq!(geometry.frame_size(FrameFormat::Rgb24), 640 * 360 * 3);

        let frame = FrameData::new(
            1,
            CameraId::new(2),
            SystemTime::now(),
            vec![0u8; geometry.frame_size(FrameFormat::Rgb24)],
            640,
            360,
            FrameFormat::Rgb24,
        );
        assert!(frame.validate_size());
        assert_eq!(frame.format.ffmpeg_pix_fmt(), "rgb24");
    }

    #[test]
    fn test_frame_interval_never_divides_by_zero() {
        assert_eq!(
            FrameGeometry::new(1, 1, 25).frame_interval(),
            Duration::from_millis(40)
        );
        assert_eq!(
            FrameGeometry::new(1, 1, 0).frame_interval(),
            Duration::from_secs(1)
        );
    }
}
