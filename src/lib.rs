pub mod app;
pub mod camera;
pub mod clock;
pub mod config;
pub mod encoder;
pub mod error;
pub mod events;
pub mod frame;
pub mod metadata;
pub mod probe;
pub mod recorder;
pub mod recovery;
pub mod stream;
pub mod transport;

mod worker;

pub use app::{
    CamwallOrchestrator, ComponentState, ShutdownReason, ShutdownTrigger, SystemStatus,
    WorkerKind, WorkerRegistry, WorkerStatus,
};
pub use camera::{CameraConfigStore, CameraId, CameraIdentity, JsonCameraStore, MemoryCameraStore};
pub use clock::{Clock, SystemClock, TokioClock};
pub use config::CamwallConfig;
pub use encoder::{
    EncoderLauncher, EncoderProcess, EncoderRequest, FfmpegLauncher, QuitSignal, StopOutcome,
};
pub use error::{CamwallError, EncoderError, MetadataError, Result, TransportError};
pub use events::{CameraEvent, EventBus};
pub use frame::{FrameData, FrameFormat, FrameGeometry};
pub use metadata::{
    repair_orphans, ClipExtractor, ClipLocator, ClipMatch, MetadataStore, RecordingLayout,
    RecordingSegment, SegmentEntry, SegmentState, SidecarRecord,
};
pub use probe::{DurationProbe, Ffprobe, SourceProbe};
pub use recorder::{rollover_deadline, RecorderServices, RecorderSettings, RecorderWorker};
pub use recovery::{Backoff, RecoveryAction, RetryPolicy};
pub use stream::StreamWorker;
pub use transport::{DefaultTransportFactory, TransportFactory, TransportSession, TransportState};
