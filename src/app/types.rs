use crate::camera::CameraId;
use std::fmt;

/// Component lifecycle states
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

/// System shutdown reason
#[derive(Debug, Clone)]
pub enum ShutdownReason {
    Signal(String),
    Error(String),
    UserRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    Stream,
    Recorder,
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WorkerKind::Stream => "stream",
            WorkerKind::Recorder => "recorder",
        })
    }
}

/// Snapshot of one registered worker
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerStatus {
    pub camera_id: CameraId,
    pub kind: WorkerKind,
    pub running: bool,
    /// Transport state for streams, current segment file for recorders
    pub detail: String,
}
