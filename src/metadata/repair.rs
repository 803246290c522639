use super::layout::{is_sidecar, RecordingLayout};
use super::sidecar::{MetadataStore, SidecarRecord};
use crate::error::MetadataError;
use crate::probe::DurationProbe;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Outcome of an orphan repair pass
#[derive(Debug, Default, Clone)]
pub struct RepairReport {
    pub scanned: usize,
    pub complete: usize,
    /// Sidecars that were (or, in a dry run, would be) backfilled
    pub repaired: Vec<RepairedSidecar>,
    /// Sidecars left untouched, with the reason
    pub unrepairable: Vec<(PathBuf, String)>,
}

#[derive(Debug, Clone)]
pub struct RepairedSidecar {
    pub sidecar: PathBuf,
    pub record: SidecarRecord,
}

impl RepairReport {
    pub fn summary(&self) -> String {
        format!(
            "{} sidecars scanned, {} complete, {} repaired, {} unrepairable",
            self.scanned,
            self.complete,
            self.repaired.len(),
            self.unrepairable.len()
        )
    }
}

/// Backfill `end_time`/`duration_seconds` for sidecars whose writer died.
///
/// Each orphan's media file is probed; a positive duration closes the
/// sidecar at `start_time + duration`. Missing or unplayable media leaves
/// the sidecar as it is and is reported.
pub async fn repair_orphans(
    layout: &RecordingLayout,
    probe: &dyn DurationProbe,
    dry_run: bool,
) -> Result<RepairReport, MetadataError> {
    let store = MetadataStore::new();
    let mut report = RepairReport::default();

    let sidecars = collect_sidecars(layout.root())?;
    info!(
        "Scanning {} sidecars under {} for orphaned segments",
        sidecars.len(),
        layout.root().display()
    );

    for sidecar in sidecars {
        report.scanned += 1;

        let record = match store.read(&sidecar) {
            Ok(record) => record,
            Err(e) => {
                warn!("Skipping unreadable sidecar: {}", e);
                report.unrepairable.push((sidecar, e.to_string()));
                continue;
            }
        };

        if record.is_complete() {
            report.complete += 1;
            continue;
        }

        let Some(media) = layout.media_for_sidecar(&sidecar) else {
            continue;
        };

        let duration = match probe.probe_duration(&media).await {
            Ok(duration) => duration,
            Err(e) => {
                warn!("Cannot repair {}: {}", sidecar.display(), e);
                report.unrepairable.push((sidecar, e.to_string()));
                continue;
            }
        };

        let repaired = SidecarRecord::closed(record.start_time, duration);
        if dry_run {
            info!(
                "Would repair {} with duration {:.2}s",
                sidecar.display(),
                duration
            );
        } else {
            if let Err(e) = store.write(&sidecar, &repaired) {
                warn!("Cannot write repaired {}: {}", sidecar.display(), e);
                report.unrepairable.push((sidecar, e.to_string()));
                continue;
            }
            info!("Repaired {} with duration {:.2}s", sidecar.display(), duration);
        }

        report.repaired.push(RepairedSidecar {
            sidecar,
            record: repaired,
        });
    }

    info!("Orphan repair finished: {}", report.summary());
    Ok(report)
}

/// All sidecar files below `root`, sorted by path
fn collect_sidecars(root: &Path) -> Result<Vec<PathBuf>, MetadataError> {
    let mut found = Vec::new();
    if !root.exists() {
        debug!("Recordings root {} does not exist", root.display());
        return Ok(found);
    }

    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = std::fs::read_dir(&dir).map_err(|source| MetadataError::Io {
            path: dir.clone(),
            source,
        })?;

        for entry in entries.flatten() {
            let path = entry.path();
            match entry.file_type() {
                Ok(kind) if kind.is_dir() => pending.push(path),
                Ok(kind) if kind.is_file() && is_sidecar(&path) => found.push(path),
                _ => {}
            }
        }
    }

    found.sort();
    Ok(found)
}
