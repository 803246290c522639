use chrono::{NaiveDate, NaiveDateTime};
use std::path::{Path, PathBuf};

pub const SIDECAR_SUFFIX: &str = "_metadata.json";
const DATE_FOLDER_FORMAT: &str = "%Y_%m_%d";
const TIME_FORMAT: &str = "%H_%M_%S";

/// Files belonging to one segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentPaths {
    pub dir: PathBuf,
    pub media: PathBuf,
    pub sidecar: PathBuf,
    pub log: PathBuf,
}

/// The `<root>/<date>/<camera>/` recordings tree.
///
/// Segments are named `<camera>_<date>_<time>.<ext>`; the sidecar shares the
/// stem with a `_metadata.json` suffix and the encoder log uses `.log`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingLayout {
    root: PathBuf,
    extension: String,
}

impl RecordingLayout {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into().trim_start_matches('.').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn date_folder(date: NaiveDate) -> String {
        date.format(DATE_FOLDER_FORMAT).to_string()
    }

    /// Parse a `YYYY_MM_DD` folder name
    pub fn parse_date_folder(name: &str) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(name, DATE_FOLDER_FORMAT).ok()
    }

    pub fn date_dir(&self, date: NaiveDate) -> PathBuf {
        self.root.join(Self::date_folder(date))
    }

    pub fn camera_dir(&self, camera_folder: &str, date: NaiveDate) -> PathBuf {
        self.date_dir(date).join(camera_folder)
    }

    /// Paths for a segment of `camera_folder` starting at `start`
    pub fn segment_paths(&self, camera_folder: &str, start: NaiveDateTime) -> SegmentPaths {
        let date = Self::date_folder(start.date());
        let stem = format!(
            "{}_{}_{}",
            camera_folder,
            date,
            start.format(TIME_FORMAT)
        );
        let dir = self.camera_dir(camera_folder, start.date());

        SegmentPaths {
            media: dir.join(format!("{}.{}", stem, self.extension)),
            sidecar: dir.join(format!("{}{}", stem, SIDECAR_SUFFIX)),
            log: dir.join(format!("{}.log", stem)),
            dir,
        }
    }

    /// Media file paired with a sidecar, or `None` if the name is not a sidecar
    pub fn media_for_sidecar(&self, sidecar: &Path) -> Option<PathBuf> {
        let name = sidecar.file_name()?.to_str()?;
        let stem = name.strip_suffix(SIDECAR_SUFFIX)?;
        Some(sidecar.with_file_name(format!("{}.{}", stem, self.extension)))
    }
}

pub fn is_sidecar(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.ends_with(SIDECAR_SUFFIX))
        .unwrap_or(false)
}
