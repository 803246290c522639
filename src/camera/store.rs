use super::identity::{CameraId, CameraIdentity};
use crate::error::{CamwallError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Read access to per-camera configuration, keyed by camera id
pub trait CameraConfigStore: Send + Sync {
    /// Number of configured camera slots; ids run from 1 to this value
    fn camera_count(&self) -> u32;

    /// Snapshot for one camera; unknown ids yield a disabled-by-default entry
    fn get_camera_config(&self, id: CameraId) -> CameraIdentity;

    /// Re-read the backing storage
    fn reload(&self) -> Result<()> {
        Ok(())
    }

    fn camera_ids(&self) -> Vec<CameraId> {
        (1..=self.camera_count()).map(CameraId::new).collect()
    }
}

/// On-disk record for one camera, compatible with older `rtsp` key files
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredCamera {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, alias = "rtsp_url", skip_serializing_if = "Option::is_none")]
    rtsp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    record: Option<bool>,
}

impl StoredCamera {
    fn to_identity(&self, id: CameraId) -> CameraIdentity {
        CameraIdentity {
            id,
            name: self
                .name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| format!("Camera {}", id)),
            rtsp_url: self.rtsp.clone().unwrap_or_default(),
            enabled: self.enabled.unwrap_or(true),
            record: self.record.unwrap_or(false),
        }
    }

    fn from_identity(identity: &CameraIdentity) -> Self {
        Self {
            name: Some(identity.name.clone()),
            rtsp: Some(identity.rtsp_url.clone()),
            enabled: Some(identity.enabled),
            record: Some(identity.record),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CameraSettings {
    #[serde(default)]
    camera_count: u32,
}

#[derive(Debug, Default)]
struct StoreState {
    cameras: BTreeMap<String, StoredCamera>,
    camera_count: u32,
}

/// JSON file backed camera store.
///
/// `streams_path` holds `{"<id>": {"name", "rtsp", "enabled", "record"}}`;
/// `settings_path` holds `{"camera_count": N}`.
pub struct JsonCameraStore {
    streams_path: PathBuf,
    settings_path: PathBuf,
    default_count: u32,
    state: RwLock<StoreState>,
}

impl JsonCameraStore {
    pub fn open(
        streams_path: impl Into<PathBuf>,
        settings_path: impl Into<PathBuf>,
        default_count: u32,
    ) -> Self {
        let store = Self {
            streams_path: streams_path.into(),
            settings_path: settings_path.into(),
            default_count,
            state: RwLock::new(StoreState::default()),
        };
        store.load_state();
        store
    }

    fn load_state(&self) {
        let cameras = read_json_or_default(&self.streams_path);
        let settings = read_json_or_default(&self.settings_path);
        self.apply(cameras, settings);
    }

    fn apply(&self, cameras: BTreeMap<String, StoredCamera>, settings: CameraSettings) {
        let camera_count = if settings.camera_count == 0 {
            self.default_count
        } else {
            settings.camera_count
        };

        debug!(
            "Loaded {} camera entries ({} slots) from {}",
            cameras.len(),
            camera_count,
            self.streams_path.display()
        );

        let mut state = self.state.write();
        state.cameras = cameras;
        state.camera_count = camera_count;
    }

    /// Store one camera's settings and persist the streams file
    pub fn set_camera_config(&self, identity: &CameraIdentity) -> Result<()> {
        let snapshot = {
            let mut state = self.state.write();
            state.cameras.insert(
                identity.id.to_string(),
                StoredCamera::from_identity(identity),
            );
            state.cameras.clone()
        };
        write_json(&self.streams_path, &snapshot)?;
        debug!("Saved configuration for camera {}", identity.id);
        Ok(())
    }

    /// Change the number of camera slots and persist the settings file
    pub fn set_camera_count(&self, count: u32) -> Result<()> {
        self.state.write().camera_count = count;
        write_json(
            &self.settings_path,
            &CameraSettings {
                camera_count: count,
            },
        )?;
        info!("Camera count set to {}", count);
        Ok(())
    }
}

impl CameraConfigStore for JsonCameraStore {
    fn camera_count(&self) -> u32 {
        self.state.read().camera_count
    }

    fn get_camera_config(&self, id: CameraId) -> CameraIdentity {
        let state = self.state.read();
        state
            .cameras
            .get(&id.to_string())
            .cloned()
            .unwrap_or_default()
            .to_identity(id)
    }

    /// Unlike `open`, a file that cannot be read or parsed is an error and
    /// the previously loaded settings stay in effect
    fn reload(&self) -> Result<()> {
        let cameras = read_json(&self.streams_path)?;
        let settings = read_json(&self.settings_path)?;
        self.apply(cameras, settings);
        Ok(())
    }
}

/// In-memory store for embedding and tests
#[derive(Default)]
pub struct MemoryCameraStore {
    cameras: RwLock<BTreeMap<CameraId, CameraIdentity>>,
    camera_count: RwLock<u32>,
}

impl MemoryCameraStore {
    pub fn new(count: u32) -> Self {
        Self {
            cameras: RwLock::new(BTreeMap::new()),
            camera_count: RwLock::new(count),
        }
    }

    pub fn insert(&self, identity: CameraIdentity) {
        self.cameras.write().insert(identity.id, identity);
    }

    pub fn remove(&self, id: CameraId) {
        self.cameras.write().remove(&id);
    }

    pub fn set_camera_count(&self, count: u32) {
        *self.camera_count.write() = count;
    }
}

impl CameraConfigStore for MemoryCameraStore {
    fn camera_count(&self) -> u32 {
        *self.camera_count.read()
    }

    fn get_camera_config(&self, id: CameraId) -> CameraIdentity {
        self.cameras
            .read()
            .get(&id)
            .cloned()
            .unwrap_or_else(|| StoredCamera::default().to_identity(id))
    }
}

fn read_json<T>(path: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Default,
{
    if !path.exists() {
        return Ok(T::default());
    }

    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|e| {
        CamwallError::component(
            "camera_store",
            format!("Failed to parse {}: {}", path.display(), e),
        )
    })
}

fn read_json_or_default<T>(path: &Path) -> T
where
    T: for<'de> Deserialize<'de> + Default,
{
    read_json(path).unwrap_or_else(|e| {
        error!("Failed to load {}: {}", path.display(), e);
        T::default()
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| {
        CamwallError::component("camera_store", &format!("Failed to serialize: {}", e))
    })?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, json)?;
    Ok(())
}
