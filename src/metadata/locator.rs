use super::layout::{is_sidecar, RecordingLayout};
use super::segment::SegmentState;
use super::sidecar::{seconds, MetadataStore, SidecarRecord};
use crate::camera::sanitize_filename;
use crate::clock::Clock;
use crate::error::MetadataError;
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One segment as seen by playback
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentEntry {
    pub media_path: PathBuf,
    pub sidecar_path: PathBuf,
    pub start: NaiveDateTime,
    /// Effective end; for an unfinished segment this is the next segment's
    /// start, the current time, or the end of its day
    pub end: NaiveDateTime,
    pub state: SegmentState,
}

impl SegmentEntry {
    pub fn file_name(&self) -> String {
        self.media_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    pub fn is_finished(&self) -> bool {
        self.state == SegmentState::Closed
    }

    fn overlaps(&self, start: NaiveDateTime, end: NaiveDateTime) -> bool {
        self.start < end && self.end > start
    }
}

/// A segment overlapping a requested window, with the overlapping part
#[derive(Debug, Clone, PartialEq)]
pub struct ClipMatch {
    pub segment: SegmentEntry,
    pub clip_start: NaiveDateTime,
    pub clip_end: NaiveDateTime,
}

impl ClipMatch {
    /// Position of the clip inside the segment's media
    pub fn offset(&self) -> Duration {
        (self.clip_start - self.segment.start)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn duration(&self) -> Duration {
        (self.clip_end - self.clip_start)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Finds recorded segments for playback
pub struct ClipLocator {
    layout: RecordingLayout,
    store: MetadataStore,
    clock: Arc<dyn Clock>,
}

impl ClipLocator {
    pub fn new(layout: RecordingLayout, clock: Arc<dyn Clock>) -> Self {
        Self {
            layout,
            store: MetadataStore::new(),
            clock,
        }
    }

    pub fn layout(&self) -> &RecordingLayout {
        &self.layout
    }

    /// Segments overlapping `[start, end]` on `date`.
    ///
    /// An `end` earlier than `start` means the window runs past midnight into
    /// the next day's folder.
    pub fn find(
        &self,
        camera: &str,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<Vec<ClipMatch>, MetadataError> {
        let query_start = date.and_time(start);
        let query_end = if end > start {
            date.and_time(end)
        } else {
            date.and_time(end) + ChronoDuration::days(1)
        };

        let mut dates = vec![date];
        if query_end.date() != date {
            dates.push(query_end.date());
        }

        let mut matches = Vec::new();
        for day in dates {
            for segment in self.list_segments(camera, day)? {
                if segment.overlaps(query_start, query_end) {
                    matches.push(ClipMatch {
                        clip_start: segment.start.max(query_start),
                        clip_end: segment.end.min(query_end),
                        segment,
                    });
                }
            }
        }

        debug!(
            "Found {} segment(s) for {} between {} and {}",
            matches.len(),
            camera,
            query_start,
            query_end
        );
        Ok(matches)
    }

    /// All readable segments for a camera on one day, by start time
    pub fn list_segments(
        &self,
        camera: &str,
        date: NaiveDate,
    ) -> Result<Vec<SegmentEntry>, MetadataError> {
        let dir = self.layout.camera_dir(&sanitize_filename(camera), date);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&dir).map_err(|source| MetadataError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut records: Vec<(PathBuf, SidecarRecord)> = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !is_sidecar(&path) {
                continue;
            }
            match self.store.read(&path) {
                Ok(record) => records.push((path, record)),
                Err(e) => warn!("Failed to read metadata: {}", e),
            }
        }
        records.sort_by_key(|(_, record)| record.start_time);

        let now = self.clock.now();
        let day_end = date.and_time(NaiveTime::default()) + ChronoDuration::days(1);
        let next_starts: Vec<Option<NaiveDateTime>> = records
            .iter()
            .skip(1)
            .map(|(_, r)| Some(r.start_time))
            .chain(std::iter::once(None))
            .collect();

        let segments = records
            .into_iter()
            .zip(next_starts)
            .filter_map(|((sidecar_path, record), next_start)| {
                let media_path = self.layout.media_for_sidecar(&sidecar_path)?;
                let (end, state) = match record.duration_seconds {
                    Some(duration) => (record.start_time + seconds(duration), SegmentState::Closed),
                    // Only the newest segment of a day still in progress can be live
                    None if next_start.is_none() && now < day_end => {
                        (now.max(record.start_time), SegmentState::Open)
                    }
                    None => {
                        let bound = next_start.unwrap_or(day_end).min(day_end);
                        (now.min(bound).max(record.start_time), SegmentState::Orphaned)
                    }
                };
                Some(SegmentEntry {
                    media_path,
                    sidecar_path,
                    start: record.start_time,
                    end,
                    state,
                })
            })
            .collect();

        Ok(segments)
    }

    /// Dates that have a folder for `camera`, oldest first
    pub fn available_dates(&self, camera: &str) -> Result<Vec<NaiveDate>, MetadataError> {
        let camera = sanitize_filename(camera);
        let mut dates: Vec<NaiveDate> = self
            .date_folders()?
            .into_iter()
            .filter(|date| self.layout.camera_dir(&camera, *date).is_dir())
            .collect();
        dates.sort();
        Ok(dates)
    }

    /// Camera folder names found under any date, sorted
    pub fn recorded_cameras(&self) -> Result<Vec<String>, MetadataError> {
        let mut cameras = BTreeSet::new();
        for date in self.date_folders()? {
            let dir = self.layout.date_dir(date);
            let entries = std::fs::read_dir(&dir).map_err(|source| MetadataError::Io {
                path: dir.clone(),
                source,
            })?;
            for entry in entries.flatten() {
                if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    cameras.insert(entry.file_name().to_string_lossy().to_string());
                }
            }
        }
        Ok(cameras.into_iter().collect())
    }

    /// Log every sidecar for a camera and day; used when a lookup finds nothing
    pub fn log_metadata_listing(&self, camera: &str, date: NaiveDate) {
        let dir = self.layout.camera_dir(&sanitize_filename(camera), date);
        info!("Listing metadata for {} on {} in {}", camera, date, dir.display());

        match self.list_segments(camera, date) {
            Ok(segments) if segments.is_empty() => info!("No metadata files found"),
            Ok(segments) => {
                for segment in segments {
                    info!(
                        "  {}: {} -> {}",
                        segment.file_name(),
                        segment.start.format("%H:%M:%S"),
                        match segment.state {
                            SegmentState::Open => "ongoing".to_string(),
                            SegmentState::Orphaned => "unfinished".to_string(),
                            SegmentState::Closed => segment.end.format("%H:%M:%S").to_string(),
                        }
                    );
                }
            }
            Err(e) => warn!("Failed to list metadata: {}", e),
        }
    }

    fn date_folders(&self) -> Result<Vec<NaiveDate>, MetadataError> {
        let root = self.layout.root();
        if !root.is_dir() {
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(root).map_err(|source| MetadataError::Io {
            path: root.to_path_buf(),
            source,
        })?;

        Ok(entries
            .flatten()
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|entry| {
                RecordingLayout::parse_date_folder(&entry.file_name().to_string_lossy())
            })
            .collect())
    }
}
