use crate::camera::redact_url;
use crate::config::EncoderConfig;
use crate::error::{EncoderError, MetadataError};
use crate::frame::FrameGeometry;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Confirms a live source is reachable and reports its geometry
#[async_trait]
pub trait SourceProbe: Send + Sync {
    /// `Ok(None)` means reachable but the geometry could not be determined
    async fn probe_source(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<Option<FrameGeometry>, EncoderError>;
}

/// Measures the playable duration of a finished or partial container file
#[async_trait]
pub trait DurationProbe: Send + Sync {
    async fn probe_duration(&self, media: &Path) -> Result<f64, MetadataError>;
}

/// `ffprobe` based implementation of both probes
#[derive(Debug, Clone)]
pub struct Ffprobe {
    ffprobe_path: String,
    rtsp_transport: String,
    duration_timeout: Duration,
}

impl Ffprobe {
    pub fn new(config: &EncoderConfig) -> Self {
        Self {
            ffprobe_path: config.ffprobe_path.clone(),
            rtsp_transport: config.rtsp_transport.clone(),
            duration_timeout: Duration::from_secs(30),
        }
    }

    /// Arguments for a stream-geometry probe of `url`
    pub(crate) fn source_args(&self, url: &str) -> Vec<String> {
        let mut args: Vec<String> = vec!["-v".into(), "error".into()];
        if is_rtsp(url) {
            args.push("-rtsp_transport".into());
            args.push(self.rtsp_transport.clone());
        }
        args.extend(
            [
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,r_frame_rate",
                "-of",
                "csv=p=0",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args.push(url.to_string());
        args
    }

    async fn run(&self, args: &[String], timeout: Duration) -> Result<String, String> {
        let mut command = Command::new(&self.ffprobe_path);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_| format!("ffprobe timed out after {:?}", timeout))?
            .map_err(|e| format!("Failed to run ffprobe: {}", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("ffprobe failed: {}", stderr.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl SourceProbe for Ffprobe {
    async fn probe_source(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<Option<FrameGeometry>, EncoderError> {
        debug!("Probing source {}", redact_url(url));
        let stdout = self
            .run(&self.source_args(url), timeout)
            .await
            .map_err(|details| EncoderError::Probe {
                details: redact_details(&details, url),
            })?;

        if stdout.is_empty() {
            return Err(EncoderError::Probe {
                details: "source has no video stream".to_string(),
            });
        }

        Ok(parse_geometry(&stdout))
    }
}

#[async_trait]
impl DurationProbe for Ffprobe {
    async fn probe_duration(&self, media: &Path) -> Result<f64, MetadataError> {
        if !media.exists() {
            return Err(MetadataError::MissingMedia(media.to_path_buf()));
        }

        let args: Vec<String> = vec![
            "-v".into(),
            "error".into(),
            "-show_entries".into(),
            "format=duration".into(),
            "-of".into(),
            "default=noprint_wrappers=1:nokey=1".into(),
            media.to_string_lossy().to_string(),
        ];

        let stdout = self
            .run(&args, self.duration_timeout)
            .await
            .map_err(|details| MetadataError::Unplayable {
                path: media.to_path_buf(),
                details,
            })?;

        parse_duration(&stdout).ok_or_else(|| MetadataError::Unplayable {
            path: media.to_path_buf(),
            details: format!("unexpected ffprobe output: {:?}", stdout),
        })
    }
}

pub(crate) fn is_rtsp(url: &str) -> bool {
    let lower = url.trim_start().to_ascii_lowercase();
    lower.starts_with("rtsp://") || lower.starts_with("rtsps://")
}

fn redact_details(details: &str, url: &str) -> String {
    details.replace(url, &redact_url(url))
}

/// Parse `width,height,num/den` as printed by `-of csv=p=0`
pub(crate) fn parse_geometry(output: &str) -> Option<FrameGeometry> {
    let line = output.lines().next()?.trim();
    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() < 3 {
        return None;
    }

    let width: u32 = parts[0].trim().parse().ok()?;
    let height: u32 = parts[1].trim().parse().ok()?;
    if width == 0 || height == 0 {
        return None;
    }

    let fps_parts: Vec<&str> = parts[2].trim().split('/').collect();
    let fps = if fps_parts.len() == 2 {
        let num: f64 = fps_parts[0].parse().unwrap_or(0.0);
        let den: f64 = fps_parts[1].parse().unwrap_or(1.0);
        if den > 0.0 {
            num / den
        } else {
            0.0
        }
    } else {
        parts[2].trim().parse().unwrap_or(0.0)
    };

    Some(FrameGeometry::new(width, height, fps.round().max(1.0) as u32))
}

/// Parse a positive duration in seconds; `N/A` and zero yield `None`
pub(crate) fn parse_duration(output: &str) -> Option<f64> {
    let value: f64 = output.lines().next()?.trim().parse().ok()?;
    (value.is_finite() && value > 0.0).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_geometry() {
        assert_eq!(
            parse_geometry("1920,1080,25/1\n"),
            Some(FrameGeometry::new(1920, 1080, 25))
        );
        assert_eq!(
            parse_geometry("1280,720,30000/1001"),
            Some(FrameGeometry::new(1280, 720, 30))
        );
        // Unknown rate still yields a usable geometry
        assert_eq!(
            parse_geometry("640,480,0/0"),
            Some(FrameGeometry::new(640, 480, 1))
        );
        assert_eq!(parse_geometry("N/A,N/A,0/0"), None);
        assert_eq!(parse_geometry(""), None);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("125.400000\n"), Some(125.4));
        assert_eq!(parse_duration("N/A"), None);
        assert_eq!(parse_duration("0.000000"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn test_rtsp_transport_only_for_rtsp_sources() {
        let probe = Ffprobe::new(&EncoderConfig::default());

        let args = probe.source_args("rtsp://cam/1");
        assert!(args.windows(2).any(|w| w[0] == "-rtsp_transport" && w[1] == "tcp"));
        assert_eq!(args.last().map(String::as_str), Some("rtsp://cam/1"));

        let args = probe.source_args("/tmp/sample.mp4");
        assert!(!args.iter().any(|a| a == "-rtsp_transport"));
    }

    #[test]
    fn test_probe_errors_do_not_leak_credentials() {
        let url = "rtsp://admin:pw@cam/1";
        let details = redact_details(&format!("{}: Connection refused", url), url);
        assert!(!details.contains("pw@"));
    }

    #[tokio::test]
    async fn test_missing_media_is_reported_without_running_ffprobe() {
        let probe = Ffprobe::new(&EncoderConfig::default());
        let result = probe
            .probe_duration(Path::new("/nonexistent/segment.mp4"))
            .await;
        assert!(matches!(result, Err(MetadataError::MissingMedia(_))));
    }
}
