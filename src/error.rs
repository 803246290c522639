use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CamwallError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

/// Failures opening or reading a network video source
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Failed to open source {url}: {details}")]
    OpenFailed { url: String, details: String },

    #[error("Source {url} did not open within {timeout:?}")]
    OpenTimeout { url: String, timeout: Duration },

    #[error("Frame read failed: {details}")]
    ReadFailed { details: String },

    #[error("No frame received within {timeout:?}")]
    ReadTimeout { timeout: Duration },

    #[error("Source ended the stream")]
    EndOfStream,

    #[error("Failed to spawn transport process: {details}")]
    Spawn { details: String },
}

/// Failures of the external encoder subprocess
#[derive(Error, Debug, Clone)]
pub enum EncoderError {
    #[error("Failed to start encoder: {details}")]
    Spawn { details: String },

    #[error("Failed to write to encoder: {details}")]
    Write { details: String },

    #[error("Failed waiting for encoder: {details}")]
    Wait { details: String },

    #[error("Probe failed: {details}")]
    Probe { details: String },
}

/// Sidecar read/write/repair failures
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Sidecar IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid sidecar {path}: {details}")]
    Parse { path: PathBuf, details: String },

    #[error("Failed to serialize sidecar: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Media file missing for sidecar {0}")]
    MissingMedia(PathBuf),

    #[error("Media file {path} is unplayable: {details}")]
    Unplayable { path: PathBuf, details: String },
}

impl CamwallError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<C: Into<String>, M: Into<String>>(component: C, message: M) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CamwallError>;
