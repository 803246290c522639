use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use camwall::{
    metadata::{repair_orphans, ClipExtractor, ClipLocator, ClipMatch, RecordingLayout},
    CamwallConfig, Ffprobe, SystemClock,
};
use chrono::{NaiveDate, NaiveTime};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

/// Offline tooling over a camwall recordings tree.
#[derive(Parser, Debug)]
#[command(name = "segtool")]
#[command(about = "Query and repair camwall recordings")]
struct Args {
    /// Path to camwall configuration file (for recording and encoder settings)
    #[arg(short = 'c', long, default_value = "camwall.toml")]
    config: PathBuf,

    /// Recordings root (defaults to recording.root in config)
    #[arg(short, long)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Camera folders present under any date
    Cameras,
    /// Dates that have recordings for a camera
    Dates {
        camera: String,
    },
    /// Every segment of a camera on one day
    List {
        camera: String,
        /// Day as YYYY_MM_DD
        date: String,
    },
    /// Segments overlapping a time window
    Find {
        camera: String,
        /// Day as YYYY_MM_DD
        date: String,
        /// Window start as HH:MM or HH:MM:SS
        start: String,
        /// Window end; earlier than start means the next day
        end: String,
    },
    /// Copy a time window out of the recordings without re-encoding
    Extract {
        camera: String,
        date: String,
        start: String,
        end: String,
        /// Directory for the extracted clips
        #[arg(short, long, default_value = "clips")]
        output: PathBuf,
    },
    /// Backfill end time and duration of sidecars left open by a crash
    Repair {
        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = CamwallConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;

    let root = args
        .root
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.recording.root));
    let layout = RecordingLayout::new(root, &config.recording.extension);
    let locator = ClipLocator::new(layout.clone(), Arc::new(SystemClock));

    match args.command {
        Command::Cameras => {
            for camera in locator.recorded_cameras()? {
                println!("{}", camera);
            }
        }
        Command::Dates { camera } => {
            for date in locator.available_dates(&camera)? {
                println!("{}", RecordingLayout::date_folder(date));
            }
        }
        Command::List { camera, date } => {
            let date = parse_date(&date)?;
            let segments = locator.list_segments(&camera, date)?;
            if segments.is_empty() {
                return Err(anyhow!("No segments for {} on {}", camera, date));
            }
            for segment in segments {
                println!(
                    "{}\t{}\t{}\t{}",
                    segment.file_name(),
                    segment.start,
                    segment.end,
                    segment.state
                );
            }
        }
        Command::Find {
            camera,
            date,
            start,
            end,
        } => {
            for clip in find_clips(&locator, &camera, &date, &start, &end)? {
                println!(
                    "{}\t+{:.1}s\t{:.1}s\t{}",
                    clip.segment.file_name(),
                    clip.offset().as_secs_f64(),
                    clip.duration().as_secs_f64(),
                    clip.segment.state
                );
            }
        }
        Command::Extract {
            camera,
            date,
            start,
            end,
            output,
        } => {
            let clips = find_clips(&locator, &camera, &date, &start, &end)?;
            let extractor = ClipExtractor::new(&config.encoder.ffmpeg_path);

            let mut failures = 0;
            for clip in &clips {
                let target = output.join(clip_file_name(clip, layout.extension()));
                match extractor.extract(clip, &target).await {
                    Ok(()) => println!("{}", target.display()),
                    Err(e) => {
                        error!("Failed to extract {}: {}", clip.segment.file_name(), e);
                        failures += 1;
                    }
                }
            }

            if failures > 0 {
                return Err(anyhow!("{} of {} clip(s) failed", failures, clips.len()));
            }
        }
        Command::Repair { dry_run } => {
            let probe = Ffprobe::new(&config.encoder);
            let report = repair_orphans(&layout, &probe, dry_run).await?;
            for repaired in &report.repaired {
                println!(
                    "{}{}\t{:.2}s",
                    if dry_run { "would repair " } else { "repaired " },
                    repaired.sidecar.display(),
                    repaired.record.duration_seconds.unwrap_or_default()
                );
            }
            for (sidecar, reason) in &report.unrepairable {
                warn!("Unrepairable {}: {}", sidecar.display(), reason);
            }
            info!("{}", report.summary());
        }
    }

    Ok(())
}

fn find_clips(
    locator: &ClipLocator,
    camera: &str,
    date: &str,
    start: &str,
    end: &str,
) -> Result<Vec<ClipMatch>> {
    let date = parse_date(date)?;
    let start = parse_time(start)?;
    let end = parse_time(end)?;

    let clips = locator.find(camera, date, start, end)?;
    if clips.is_empty() {
        locator.log_metadata_listing(camera, date);
        return Err(anyhow!(
            "No recordings for {} on {} between {} and {}",
            camera,
            date,
            start,
            end
        ));
    }
    Ok(clips)
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    RecordingLayout::parse_date_folder(value)
        .ok_or_else(|| anyhow!("Invalid date '{}', expected YYYY_MM_DD", value))
}

fn parse_time(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map_err(|_| anyhow!("Invalid time '{}', expected HH:MM or HH:MM:SS", value))
}

fn clip_file_name(clip: &ClipMatch, extension: &str) -> String {
    let stem = clip
        .segment
        .media_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "clip".to_string());
    format!(
        "{}_clip_{}-{}.{}",
        stem,
        clip.clip_start.format("%H_%M_%S"),
        clip.clip_end.format("%H_%M_%S"),
        extension
    )
}
