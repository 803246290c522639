//! Sidecar metadata, the recordings tree, orphan repair and playback lookup.

mod extract;
mod layout;
mod locator;
mod repair;
mod segment;
mod sidecar;
pub mod timefmt;


pub use extract::ClipExtractor;
pub use layout::{is_sidecar, RecordingLayout, SegmentPaths, SIDECAR_SUFFIX};
pub use locator::{ClipLocator, ClipMatch, SegmentEntry};
pub use repair::{repair_orphans, RepairReport, RepairedSidecar};
pub use segment::{RecordingSegment, SegmentState};
pub use sidecar::{round_duration, MetadataStore, SidecarRecord};
