use super::timefmt;
use crate::error::MetadataError;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, error};

/// On-disk sidecar. `end_time`/`duration_seconds` are absent while the
/// segment is being written, and stay absent if the writer died.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SidecarRecord {
    #[serde(with = "timefmt::required")]
    pub start_time: NaiveDateTime,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "timefmt::optional"
    )]
    pub end_time: Option<NaiveDateTime>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

impl SidecarRecord {
    pub fn open(start_time: NaiveDateTime) -> Self {
        Self {
            start_time,
            end_time: None,
            duration_seconds: None,
        }
    }

    /// Closed at `start + duration`
    pub fn closed(start_time: NaiveDateTime, duration_seconds: f64) -> Self {
        let duration_seconds = round_duration(duration_seconds);
        Self {
            start_time,
            end_time: Some(start_time + seconds(duration_seconds)),
            duration_seconds: Some(duration_seconds),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.duration_seconds.is_some()
    }

    /// `start_time + duration_seconds` for complete records
    pub fn computed_end(&self) -> Option<NaiveDateTime> {
        self.duration_seconds
            .map(|duration| self.start_time + seconds(duration))
    }
}

/// Durations are stored with two decimals
pub fn round_duration(duration: f64) -> f64 {
    (duration * 100.0).round() / 100.0
}

pub(crate) fn seconds(value: f64) -> chrono::Duration {
    chrono::Duration::microseconds((value * 1_000_000.0).round() as i64)
}

/// Reads and writes sidecar files
#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataStore;

impl MetadataStore {
    pub fn new() -> Self {
        Self
    }

    /// Create the sidecar for a segment that just started
    pub fn write_start(&self, path: &Path, start_time: NaiveDateTime) -> Result<(), MetadataError> {
        self.write(path, &SidecarRecord::open(start_time))?;
        debug!("Sidecar opened: {}", path.display());
        Ok(())
    }

    /// Record the end of a segment. The duration is rounded to two decimals.
    pub fn finalize(
        &self,
        path: &Path,
        start_time: NaiveDateTime,
        end_time: NaiveDateTime,
        duration_seconds: f64,
    ) -> Result<SidecarRecord, MetadataError> {
        let record = SidecarRecord {
            start_time,
            end_time: Some(end_time),
            duration_seconds: Some(round_duration(duration_seconds)),
        };
        self.write(path, &record)?;
        debug!(
            "Sidecar closed: {} ({:.2}s)",
            path.display(),
            duration_seconds
        );
        Ok(record)
    }

    pub fn read(&self, path: &Path) -> Result<SidecarRecord, MetadataError> {
        let contents = std::fs::read_to_string(path).map_err(|source| MetadataError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|e| MetadataError::Parse {
            path: path.to_path_buf(),
            details: e.to_string(),
        })
    }

    /// Replace the sidecar atomically so a crash never leaves half a file
    pub fn write(&self, path: &Path, record: &SidecarRecord) -> Result<(), MetadataError> {
        let json = serde_json::to_string_pretty(record)?;
        let tmp = path.with_extension("json.tmp");

        let result = std::fs::write(&tmp, json).and_then(|_| std::fs::rename(&tmp, path));
        result.map_err(|source| {
            error!("Failed to write metadata to {}: {}", path.display(), source);
            let _ = std::fs::remove_file(&tmp);
            MetadataError::Io {
                path: path.to_path_buf(),
                source,
            }
        })
    }
}
