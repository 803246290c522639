use super::locator::ClipMatch;
use crate::error::{CamwallError, EncoderError, Result};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::info;

/// Copies a time range out of a recorded segment without re-encoding
#[derive(Debug, Clone)]
pub struct ClipExtractor {
    ffmpeg_path: String,
    timeout: Duration,
}

impl ClipExtractor {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            timeout: Duration::from_secs(300),
        }
    }

    pub fn build_args(clip: &ClipMatch, output: &Path) -> Vec<String> {
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-y".into(),
            "-ss".into(),
            format!("{:.3}", clip.offset().as_secs_f64()),
            "-i".into(),
            clip.segment.media_path.to_string_lossy().to_string(),
            "-t".into(),
            format!("{:.3}", clip.duration().as_secs_f64()),
            "-c".into(),
            "copy".into(),
            "-avoid_negative_ts".into(),
            "make_zero".into(),
            output.to_string_lossy().to_string(),
        ]
    }

    /// Write the clip to `output`
    pub async fn extract(&self, clip: &ClipMatch, output: &Path) -> Result<()> {
        if clip.duration().is_zero() {
            return Err(CamwallError::component(
                "clip_extractor",
                format!(
                    "Clip {} -> {} has no duration",
                    clip.clip_start, clip.clip_end
                ),
            ));
        }

        if !clip.segment.media_path.exists() {
            return Err(CamwallError::component(
                "clip_extractor",
                format!("Media file {} not found", clip.segment.media_path.display()),
            ));
        }

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        info!(
            "Extracting {:.1}s from {} at {:.1}s to {}",
            clip.duration().as_secs_f64(),
            clip.segment.media_path.display(),
            clip.offset().as_secs_f64(),
            output.display()
        );

        let mut command = Command::new(&self.ffmpeg_path);
        command
            .args(Self::build_args(clip, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let result = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| EncoderError::Wait {
                details: format!("clip extraction timed out after {:?}", self.timeout),
            })?
            .map_err(|e| EncoderError::Spawn {
                details: format!("{}: {}", self.ffmpeg_path, e),
            })?;

        if !result.status.success() {
            return Err(EncoderError::Wait {
                details: format!(
                    "ffmpeg exited with {}: {}",
                    result.status,
                    String::from_utf8_lossy(&result.stderr).trim()
                ),
            }
            .into());
        }

        info!("Clip written to {}", output.display());
        Ok(())
    }
}
