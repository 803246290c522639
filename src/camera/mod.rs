mod identity;
mod store;
#[cfg(test)]
mod tests;

pub use identity::{redact_url, sanitize_filename, CameraId, CameraIdentity};
pub use store::{CameraConfigStore, JsonCameraStore, MemoryCameraStore};
