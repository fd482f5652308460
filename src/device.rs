//! The local device record and its persistence.
//!
//! The record (identifier, secret, stored tokens, client identity) is the
//! single source of truth for "who is this installation". It is owned by
//! the activation machine: all mutation happens inside the driver's serial
//! context, and other SDK components read it through the same boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by a device store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading from or writing to the backing storage failed
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The stored device record could not be decoded
    #[error("Corrupt device record: {0}")]
    Corrupt(String),
}

/// A platform-issued push token, keyed by transport type so one record can
/// hold tokens for more than one push transport.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct PushToken {
    /// Transport this token routes through, e.g. `"apns"` or `"fcm"`.
    pub transport: String,
    /// The opaque token issued by the platform.
    pub token: String,
}

/// The credential issued by the service on successful registration, used to
/// authenticate subsequent update and deregister calls.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct IdentityTokenDetails {
    /// The opaque identity token.
    pub token: String,
    /// When the token was issued.
    pub issued_at: DateTime<Utc>,
}

impl IdentityTokenDetails {
    /// Wrap a freshly issued token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            issued_at: Utc::now(),
        }
    }
}

/// The persisted identity of this installation, independent of the
/// activation machine's own checkpoint.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct LocalDevice {
    /// Generated device identifier; empty until first activation.
    pub id: String,
    /// Generated device secret paired with the id.
    pub secret: String,
    /// Client identity the device was registered under, if any.
    pub client_id: Option<String>,
    /// Push tokens by transport type.
    pub push_tokens: HashMap<String, String>,
    /// Identity token from the last successful registration.
    pub identity_token: Option<IdentityTokenDetails>,
}

impl LocalDevice {
    /// Whether a device identity (id and secret) has been created.
    pub fn has_identity(&self) -> bool {
        !self.id.is_empty()
    }

    /// Whether the device holds an identity token, i.e. has registered.
    pub fn is_registered(&self) -> bool {
        self.identity_token.is_some()
    }

    /// Whether any push token is known.
    pub fn has_push_token(&self) -> bool {
        !self.push_tokens.is_empty()
    }

    /// Create the id and secret if absent. Returns true if anything changed.
    pub fn ensure_identity(&mut self) -> bool {
        if self.has_identity() {
            return false;
        }
        self.id = Uuid::new_v4().to_string();
        self.secret = Uuid::new_v4().to_string();
        true
    }

    /// Store a push token, replacing any previous token for its transport.
    pub fn set_push_token(&mut self, token: PushToken) {
        self.push_tokens.insert(token.transport, token.token);
    }

    /// Forget everything: id, secret, tokens, client identity.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Persistence for the device record and the machine's checkpoint blob,
/// independent of each other.
pub trait DeviceStore: Send + Sync {
    /// Load the stored device record, if one exists.
    fn load_device(&self) -> Result<Option<LocalDevice>, StoreError>;

    /// Persist the device record.
    fn save_device(&self, device: &LocalDevice) -> Result<(), StoreError>;

    /// Load the machine's checkpoint blob, if one exists.
    fn load_state(&self) -> Result<Option<Vec<u8>>, StoreError>;

    /// Persist the machine's checkpoint blob.
    fn save_state(&self, blob: &[u8]) -> Result<(), StoreError>;
}

/// In-memory store, for tests and hosts that manage persistence themselves.
#[derive(Default)]
pub struct MemoryDeviceStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    device: Option<LocalDevice>,
    state: Option<Vec<u8>>,
}

impl MemoryDeviceStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceStore for MemoryDeviceStore {
    fn load_device(&self) -> Result<Option<LocalDevice>, StoreError> {
        Ok(self.inner.lock().unwrap_or_else(|e| e.into_inner()).device.clone())
    }

    fn save_device(&self, device: &LocalDevice) -> Result<(), StoreError> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).device = Some(device.clone());
        Ok(())
    }

    fn load_state(&self) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.inner.lock().unwrap_or_else(|e| e.into_inner()).state.clone())
    }

    fn save_state(&self, blob: &[u8]) -> Result<(), StoreError> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).state = Some(blob.to_vec());
        Ok(())
    }
}

/// File-backed store: the device record as JSON, the checkpoint blob as
/// raw bytes. Writes go to a temp file first and are renamed into place so
/// a crash mid-write cannot corrupt either file.
pub struct FsDeviceStore {
    device_path: PathBuf,
    state_path: PathBuf,
}

impl FsDeviceStore {
    /// Create a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            device_path: dir.join("device.json"),
            state_path: dir.join("activation.state"),
        })
    }

    fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl DeviceStore for FsDeviceStore {
    fn load_device(&self) -> Result<Option<LocalDevice>, StoreError> {
        match std::fs::read(&self.device_path) {
            Ok(bytes) => {
                let device = serde_json::from_slice(&bytes)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?;
                Ok(Some(device))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save_device(&self, device: &LocalDevice) -> Result<(), StoreError> {
        let json =
            serde_json::to_vec_pretty(device).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Self::write_atomic(&self.device_path, &json)
    }

    fn load_state(&self) -> Result<Option<Vec<u8>>, StoreError> {
        match std::fs::read(&self.state_path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save_state(&self, blob: &[u8]) -> Result<(), StoreError> {
        Self::write_atomic(&self.state_path, blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_identity_is_idempotent() {
        let mut device = LocalDevice::default();
        assert!(!device.has_identity());

        assert!(device.ensure_identity());
        let id = device.id.clone();
        let secret = device.secret.clone();
        assert!(device.has_identity());
        assert_ne!(id, secret);

        assert!(!device.ensure_identity());
        assert_eq!(device.id, id);
        assert_eq!(device.secret, secret);
    }

    #[test]
    fn push_token_replaces_per_transport() {
        let mut device = LocalDevice::default();
        device.set_push_token(PushToken {
            transport: "apns".into(),
            token: "first".into(),
        });
        device.set_push_token(PushToken {
            transport: "apns".into(),
            token: "second".into(),
        });
        device.set_push_token(PushToken {
            transport: "fcm".into(),
            token: "other".into(),
        });

        assert_eq!(device.push_tokens.get("apns").map(String::as_str), Some("second"));
        assert_eq!(device.push_tokens.len(), 2);
    }

    #[test]
    fn reset_clears_everything() {
        let mut device = LocalDevice::default();
        device.ensure_identity();
        device.client_id = Some("client".into());
        device.identity_token = Some(IdentityTokenDetails::new("tok"));
        device.set_push_token(PushToken {
            transport: "apns".into(),
            token: "t".into(),
        });

        device.reset();
        assert_eq!(device, LocalDevice::default());
    }

    #[test]
    fn memory_store_roundtrips() {
        let store = MemoryDeviceStore::new();
        assert!(store.load_device().unwrap().is_none());
        assert!(store.load_state().unwrap().is_none());

        let mut device = LocalDevice::default();
        device.ensure_identity();
        store.save_device(&device).unwrap();
        store.save_state(&[1, 2, 3]).unwrap();

        assert_eq!(store.load_device().unwrap(), Some(device));
        assert_eq!(store.load_state().unwrap(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn fs_store_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDeviceStore::new(dir.path()).unwrap();
        assert!(store.load_device().unwrap().is_none());

        let mut device = LocalDevice::default();
        device.ensure_identity();
        device.identity_token = Some(IdentityTokenDetails::new("tok"));
        store.save_device(&device).unwrap();
        store.save_state(&[9, 9]).unwrap();

        // A fresh store over the same directory sees the same data.
        let reopened = FsDeviceStore::new(dir.path()).unwrap();
        assert_eq!(reopened.load_device().unwrap(), Some(device));
        assert_eq!(reopened.load_state().unwrap(), Some(vec![9, 9]));
    }

    #[test]
    fn fs_store_rejects_corrupt_device_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDeviceStore::new(dir.path()).unwrap();
        std::fs::write(dir.path().join("device.json"), b"not json").unwrap();

        assert!(matches!(store.load_device(), Err(StoreError::Corrupt(_))));
    }
}
