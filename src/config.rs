use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CamwallConfig {
    pub recording: RecordingConfig,
    pub encoder: EncoderConfig,
    pub stream: StreamConfig,
    pub cameras: CamerasConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RecordingConfig {
    /// Root of the `<date>/<camera>/` recordings tree
    #[serde(default = "default_recording_root")]
    pub root: String,

    /// Container file extension for segments
    #[serde(default = "default_recording_extension")]
    pub extension: String,

    /// Upper bound on a single segment, in hours
    #[serde(default = "default_max_segment_hours")]
    pub max_segment_hours: u32,

    /// Delay before retrying an unreachable source or a failed segment
    #[serde(default = "default_recording_retry_delay")]
    pub retry_delay_ms: u64,

    /// How long a quitting encoder may take before it is killed
    #[serde(default = "default_encoder_stop_timeout")]
    pub encoder_stop_timeout_ms: u64,

    /// Bound on the source probe run before each segment
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    /// Close a segment whose file stops growing for this long (0 disables)
    #[serde(default)]
    pub stall_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EncoderConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,

    /// RTSP lower transport handed to ffmpeg (tcp or udp)
    #[serde(default = "default_rtsp_transport")]
    pub rtsp_transport: String,

    #[serde(default = "default_video_codec")]
    pub video_codec: String,

    #[serde(default = "default_preset")]
    pub preset: String,

    #[serde(default = "default_crf")]
    pub crf: u32,

    /// Forced keyframe interval in frames
    #[serde(default = "default_keyframe_interval")]
    pub keyframe_interval: u32,

    /// Output muxer name
    #[serde(default = "default_container")]
    pub container: String,

    /// Fragmented container flags so an open segment stays playable
    #[serde(default = "default_movflags")]
    pub movflags: String,

    /// Write encoder stderr to a `.log` file next to each segment
    #[serde(default = "default_write_logs")]
    pub write_logs: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StreamConfig {
    /// Consecutive failures before a stream worker gives up
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    #[serde(default = "default_stream_retry_delay")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_stream_max_retry_delay")]
    pub max_retry_delay_ms: u64,

    #[serde(default)]
    pub exponential_backoff: bool,

    #[serde(default = "default_open_timeout")]
    pub open_timeout_ms: u64,

    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// Frame geometry used when the source cannot be probed
    #[serde(default = "default_frame_width")]
    pub default_width: u32,

    #[serde(default = "default_frame_height")]
    pub default_height: u32,

    #[serde(default = "default_frame_fps")]
    pub default_fps: u32,

    #[serde(default)]
    pub backend: TransportBackend,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CamerasConfig {
    /// Per-camera JSON store keyed by camera id
    #[serde(default = "default_streams_path")]
    pub streams_path: String,

    /// Global camera settings (camera count)
    #[serde(default = "default_settings_path")]
    pub settings_path: String,

    /// Camera count used when the settings file has none
    #[serde(default = "default_camera_count")]
    pub default_count: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Collective deadline for stopping every worker
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,

    /// Directory for rolling log files (None logs to stdout only)
    #[serde(default = "default_log_dir")]
    pub log_dir: Option<String>,

    /// Run the orphaned sidecar repair pass before recording starts
    #[serde(default = "default_repair_on_startup")]
    pub repair_on_startup: bool,

    /// How often the supervisor re-checks recorders
    #[serde(default = "default_supervise_interval")]
    pub supervise_interval_ms: u64,

    /// Also run a decoding stream worker per enabled camera
    #[serde(default)]
    pub live_streams: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportBackend {
    #[default]
    Ffmpeg,
    Gstreamer,
}

impl CamwallConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("camwall.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("recording.root", default_recording_root())?
            .set_default("recording.extension", default_recording_extension())?
            .set_default("recording.max_segment_hours", default_max_segment_hours())?
            .set_default("recording.retry_delay_ms", default_recording_retry_delay())?
            .set_default(
                "recording.encoder_stop_timeout_ms",
                default_encoder_stop_timeout(),
            )?
            .set_default("recording.probe_timeout_ms", default_probe_timeout())?
            .set_default("recording.stall_timeout_secs", 0)?
            .set_default("encoder.ffmpeg_path", default_ffmpeg_path())?
            .set_default("encoder.ffprobe_path", default_ffprobe_path())?
            .set_default("encoder.rtsp_transport", default_rtsp_transport())?
            .set_default("encoder.video_codec", default_video_codec())?
            .set_default("encoder.preset", default_preset())?
            .set_default("encoder.crf", default_crf())?
            .set_default("encoder.keyframe_interval", default_keyframe_interval())?
            .set_default("encoder.container", default_container())?
            .set_default("encoder.movflags", default_movflags())?
            .set_default("encoder.write_logs", default_write_logs())?
            .set_default(
                "stream.max_reconnect_attempts",
                default_max_reconnect_attempts(),
            )?
            .set_default("stream.retry_delay_ms", default_stream_retry_delay())?
            .set_default(
                "stream.max_retry_delay_ms",
                default_stream_max_retry_delay(),
            )?
            .set_default("stream.exponential_backoff", false)?
            .set_default("stream.open_timeout_ms", default_open_timeout())?
            .set_default("stream.read_timeout_ms", default_read_timeout())?
            .set_default("stream.default_width", default_frame_width())?
            .set_default("stream.default_height", default_frame_height())?
            .set_default("stream.default_fps", default_frame_fps())?
            .set_default("stream.backend", "ffmpeg")?
            .set_default("cameras.streams_path", default_streams_path())?
            .set_default("cameras.settings_path", default_settings_path())?
            .set_default("cameras.default_count", default_camera_count())?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .set_default("system.shutdown_timeout_ms", default_shutdown_timeout())?
            .set_default("system.log_dir", "logs")?
            .set_default("system.repair_on_startup", default_repair_on_startup())?
            .set_default(
                "system.supervise_interval_ms",
                default_supervise_interval(),
            )?
            .set_default("system.live_streams", false)?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables with CAMWALL__ prefix, e.g. CAMWALL__RECORDING__ROOT
            .add_source(
                Environment::with_prefix("CAMWALL")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let config: CamwallConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.recording.root.trim().is_empty() {
            return Err(ConfigError::Message(
                "Recording root must not be empty".to_string(),
            ));
        }

        if self.recording.extension.trim().is_empty() || self.recording.extension.contains('.') {
            return Err(ConfigError::Message(
                "Recording extension must be a bare extension such as \"mp4\"".to_string(),
            ));
        }

        if self.recording.max_segment_hours == 0 || self.recording.max_segment_hours > 24 {
            return Err(ConfigError::Message(
                "Recording max_segment_hours must be between 1 and 24".to_string(),
            ));
        }

        if self.recording.retry_delay_ms == 0 {
            return Err(ConfigError::Message(
                "Recording retry delay must be greater than 0".to_string(),
            ));
        }

        if self.recording.encoder_stop_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Encoder stop timeout must be greater than 0".to_string(),
            ));
        }

        if !matches!(self.encoder.rtsp_transport.as_str(), "tcp" | "udp") {
            return Err(ConfigError::Message(format!(
                "Unsupported RTSP transport: {}",
                self.encoder.rtsp_transport
            )));
        }

        if self.encoder.keyframe_interval == 0 {
            return Err(ConfigError::Message(
                "Encoder keyframe interval must be greater than 0".to_string(),
            ));
        }

        // A zero delay would let a mistyped URL spin the CPU
        if self.stream.retry_delay_ms == 0 {
            return Err(ConfigError::Message(
                "Stream retry delay must be greater than 0".to_string(),
            ));
        }

        if self.stream.max_retry_delay_ms < self.stream.retry_delay_ms {
            return Err(ConfigError::Message(
                "Stream max retry delay must not be below the base retry delay".to_string(),
            ));
        }

        if self.stream.read_timeout_ms == 0 || self.stream.open_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Stream open/read timeouts must be greater than 0".to_string(),
            ));
        }

        if self.stream.default_width == 0
            || self.stream.default_height == 0
            || self.stream.default_fps == 0
        {
            return Err(ConfigError::Message(
                "Default frame geometry must be greater than 0".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        if self.system.supervise_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Supervise interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl RecordingConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn encoder_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.encoder_stop_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn stall_timeout(&self) -> Option<Duration> {
        (self.stall_timeout_secs > 0).then(|| Duration::from_secs(self.stall_timeout_secs))
    }
}

impl StreamConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl SystemConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn supervise_interval(&self) -> Duration {
        Duration::from_millis(self.supervise_interval_ms)
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            root: default_recording_root(),
            extension: default_recording_extension(),
            max_segment_hours: default_max_segment_hours(),
            retry_delay_ms: default_recording_retry_delay(),
            encoder_stop_timeout_ms: default_encoder_stop_timeout(),
            probe_timeout_ms: default_probe_timeout(),
            stall_timeout_secs: 0,
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            rtsp_transport: default_rtsp_transport(),
            video_codec: default_video_codec(),
            preset: default_preset(),
            crf: default_crf(),
            keyframe_interval: default_keyframe_interval(),
            container: default_container(),
            movflags: default_movflags(),
            write_logs: default_write_logs(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: default_max_reconnect_attempts(),
            retry_delay_ms: default_stream_retry_delay(),
            max_retry_delay_ms: default_stream_max_retry_delay(),
            exponential_backoff: false,
            open_timeout_ms: default_open_timeout(),
            read_timeout_ms: default_read_timeout(),
            default_width: default_frame_width(),
            default_height: default_frame_height(),
            default_fps: default_frame_fps(),
            backend: TransportBackend::default(),
        }
    }
}

impl Default for CamerasConfig {
    fn default() -> Self {
        Self {
            streams_path: default_streams_path(),
            settings_path: default_settings_path(),
            default_count: default_camera_count(),
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            event_bus_capacity: default_event_bus_capacity(),
            shutdown_timeout_ms: default_shutdown_timeout(),
            log_dir: default_log_dir(),
            repair_on_startup: default_repair_on_startup(),
            supervise_interval_ms: default_supervise_interval(),
            live_streams: false,
        }
    }
}

impl Default for CamwallConfig {
    fn default() -> Self {
        Self {
            recording: RecordingConfig::default(),
            encoder: EncoderConfig::default(),
            stream: StreamConfig::default(),
            cameras: CamerasConfig::default(),
            system: SystemConfig::default(),
        }
    }
}

// Default value functions
fn default_recording_root() -> String {
    "recordings".to_string()
}
fn default_recording_extension() -> String {
    "mp4".to_string()
}
fn default_max_segment_hours() -> u32 {
    24
}
fn default_recording_retry_delay() -> u64 {
    5_000
}
fn default_encoder_stop_timeout() -> u64 {
    10_000
}
fn default_probe_timeout() -> u64 {
    10_000
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}
fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}
fn default_rtsp_transport() -> String {
    "tcp".to_string()
}
fn default_video_codec() -> String {
    "libx264".to_string()
}
fn default_preset() -> String {
    "ultrafast".to_string()
}
fn default_crf() -> u32 {
    23
}
fn default_keyframe_interval() -> u32 {
    25
}
fn default_container() -> String {
    "mp4".to_string()
}
fn default_movflags() -> String {
    "+faststart+frag_keyframe+empty_moov".to_string()
}
fn default_write_logs() -> bool {
    true
}

fn default_max_reconnect_attempts() -> u32 {
    3
}
fn default_stream_retry_delay() -> u64 {
    3_000
}
fn default_stream_max_retry_delay() -> u64 {
    30_000
}
fn default_open_timeout() -> u64 {
    5_000
}
fn default_read_timeout() -> u64 {
    3_000
}
fn default_frame_width() -> u32 {
    640
}
fn default_frame_height() -> u32 {
    360
}
fn default_frame_fps() -> u32 {
    15
}

fn default_streams_path() -> String {
    "camera_streams.json".to_string()
}
fn default_settings_path() -> String {
    "camera_config.json".to_string()
}
fn default_camera_count() -> u32 {
    4
}

fn default_event_bus_capacity() -> usize {
    100
}
fn default_shutdown_timeout() -> u64 {
    15_000
}
fn default_log_dir() -> Option<String> {
    Some("logs".to_string())
}
fn default_repair_on_startup() -> bool {
    true
}
fn default_supervise_interval() -> u64 {
    5_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = CamwallConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.recording.root, "recordings");
        assert_eq!(config.stream.max_reconnect_attempts, 3);
        assert_eq!(config.encoder.movflags, "+faststart+frag_keyframe+empty_moov");
    }

    #[test]
    fn test_config_validation() {
        let mut config = CamwallConfig::default();

        config.stream.retry_delay_ms = 0;
        assert!(config.validate().is_err());
        config.stream.retry_delay_ms = 3_000;

        config.recording.max_segment_hours = 25;
        assert!(config.validate().is_err());
        config.recording.max_segment_hours = 24;

        config.recording.extension = ".mp4".to_string();
        assert!(config.validate().is_err());
        config.recording.extension = "mkv".to_string();

        config.encoder.rtsp_transport = "http".to_string();
        assert!(config.validate().is_err());
        config.encoder.rtsp_transport = "udp".to_string();

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[recording]\nroot = \"/srv/nvr\"\nstall_timeout_secs = 30\n\n[stream]\nmax_reconnect_attempts = 5\nbackend = \"gstreamer\"\n"
        )
        .unwrap();

        let config = CamwallConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.recording.root, "/srv/nvr");
        assert_eq!(config.recording.stall_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.stream.max_reconnect_attempts, 5);
        assert_eq!(config.stream.backend, TransportBackend::Gstreamer);
        // Untouched sections keep defaults
        assert_eq!(config.encoder.crf, 23);
        assert_eq!(config.cameras.default_count, 4);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = CamwallConfig::load_from_file("/nonexistent/camwall.toml").unwrap();
        assert_eq!(config.recording.extension, "mp4");
        assert_eq!(config.recording.stall_timeout(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_serializes_to_toml() {
        let rendered = toml::to_string_pretty(&CamwallConfig::default()).unwrap();
        assert!(rendered.contains("[recording]"));
        assert!(rendered.contains("ffmpeg_path"));
    }
}
