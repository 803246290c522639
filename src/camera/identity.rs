use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Camera identifier as used by the configuration store (1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(u32);

impl CameraId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for CameraId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Immutable snapshot of one camera's configuration.
///
/// Workers hold a copy for their whole lifetime; a settings change means the
/// worker is torn down and recreated with a fresh snapshot.
#[derive(Clone, PartialEq, Eq)]
pub struct CameraIdentity {
    pub id: CameraId,
    pub name: String,
    pub rtsp_url: String,
    pub enabled: bool,
    pub record: bool,
}

impl CameraIdentity {
    pub fn new(id: CameraId, name: impl Into<String>, rtsp_url: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            rtsp_url: rtsp_url.into(),
            enabled: true,
            record: false,
        }
    }

    pub fn with_record(mut self, record: bool) -> Self {
        self.record = record;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn has_url(&self) -> bool {
        !self.rtsp_url.trim().is_empty()
    }

    /// Enabled with a URL: a live tile is wanted
    pub fn should_stream(&self) -> bool {
        self.enabled && self.has_url()
    }

    /// Enabled, recording requested and a URL to record from
    pub fn should_record(&self) -> bool {
        self.enabled && self.record && self.has_url()
    }

    /// Filesystem-safe name used for folders and segment files
    pub fn folder_name(&self) -> String {
        let sanitized = sanitize_filename(&self.name);
        if sanitized.is_empty() {
            format!("Camera_{}", self.id)
        } else {
            sanitized
        }
    }

    /// URL with any embedded credentials masked, for logging
    pub fn redacted_url(&self) -> String {
        redact_url(&self.rtsp_url)
    }
}

impl fmt::Debug for CameraIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraIdentity")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("rtsp_url", &self.redacted_url())
            .field("enabled", &self.enabled)
            .field("record", &self.record)
            .finish()
    }
}

/// Replace characters that are invalid in file names on common platforms
pub fn sanitize_filename(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            ' ' | '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c => c,
        })
        .collect()
}

/// Mask the userinfo part of a URL so credentials never reach the logs
pub fn redact_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            if !parsed.username().is_empty() {
                let _ = parsed.set_username("***");
            }
            parsed.to_string()
        }
        // Unparseable input may still carry `user:pass@`; strip it by hand
        Err(_) => match (raw.find("://"), raw.rfind('@')) {
            (Some(scheme_end), Some(at)) if at > scheme_end => {
                format!("{}***@{}", &raw[..scheme_end + 3], &raw[at + 1..])
            }
            _ => raw.to_string(),
        },
    }
}
