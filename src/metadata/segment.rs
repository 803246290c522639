use super::layout::SegmentPaths;
use crate::camera::CameraId;
use chrono::NaiveDateTime;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// Being written; end time and duration unknown
    Open,
    Closed,
    /// The writer went away without closing it
    Orphaned,
}

impl fmt::Display for SegmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SegmentState::Open => "open",
            SegmentState::Closed => "closed",
            SegmentState::Orphaned => "orphaned",
        })
    }
}

/// A segment written by a recorder
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSegment {
    pub camera_id: CameraId,
    pub file_path: PathBuf,
    pub sidecar_path: PathBuf,
    pub start_time: NaiveDateTime,
    pub end_time: Option<NaiveDateTime>,
    pub duration_seconds: Option<f64>,
    pub state: SegmentState,
}

impl RecordingSegment {
    pub fn open(camera_id: CameraId, paths: &SegmentPaths, start_time: NaiveDateTime) -> Self {
        Self {
            camera_id,
            file_path: paths.media.clone(),
            sidecar_path: paths.sidecar.clone(),
            start_time,
            end_time: None,
            duration_seconds: None,
            state: SegmentState::Open,
        }
    }

    pub fn close(&mut self, end_time: NaiveDateTime, duration_seconds: f64) {
        self.end_time = Some(end_time);
        self.duration_seconds = Some(duration_seconds);
        self.state = SegmentState::Closed;
    }
}
