//! Persistence port for the service collection

use crate::errors::{MonitorError, Result};
use crate::service::Service;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

pub const SCHEMA_VERSION: u32 = 1;

/// Whole-collection read/write.
pub trait ServiceRepository: Send + Sync {
    fn load(&self) -> Result<Vec<Service>>;
    fn save(&self, services: &[Service]) -> Result<()>;
}

#[derive(Serialize)]
struct DocumentRef<'a> {
    version: u32,
    services: &'a [Service],
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredDocument {
    Versioned { version: u32, services: Vec<Service> },
    /// Bare array written before documents carried a version
    Legacy(Vec<Service>),
}

pub fn encode_document(services: &[Service]) -> Result<String> {
    let document = DocumentRef {
        version: SCHEMA_VERSION,
        services,
    };
    Ok(serde_json::to_string(&document)?)
}

/// Decode a stored document. Anything unreadable is an empty collection.
pub fn decode_document(raw: &str) -> Vec<Service> {
    parse_document(raw).unwrap_or_default()
}

/// `None` when a non-empty document is rejected.
fn parse_document(raw: &str) -> Option<Vec<Service>> {
    if raw.trim().is_empty() {
        return Some(Vec::new());
    }

    match serde_json::from_str::<StoredDocument>(raw) {
        Ok(StoredDocument::Versioned { version, services }) if version == SCHEMA_VERSION => {
            Some(services)
        }
        Ok(StoredDocument::Versioned { version, .. }) => {
            warn!(
                "Ignoring stored services with unsupported schema version {}",
                version
            );
            None
        }
        Ok(StoredDocument::Legacy(services)) => {
            debug!("Loaded {} services from unversioned document", services.len());
            Some(services)
        }
        Err(e) => {
            warn!("Stored services are malformed, starting empty: {}", e);
            None
        }
    }
}

/// Stores the collection as `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(dir: impl AsRef<Path>, key: &str) -> Self {
        Self {
            path: dir.as_ref().join(format!("{}.json", key)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where a rejected document is copied before it can be overwritten
    pub fn rejected_path(&self) -> PathBuf {
        self.path.with_extension("json.rejected")
    }

    fn keep_rejected(&self) {
        let backup = self.rejected_path();
        match fs::copy(&self.path, &backup) {
            Ok(_) => warn!(
                "Unreadable services document at {} kept as {}",
                self.path.display(),
                backup.display()
            ),
            Err(e) => warn!(
                "Unreadable services document at {} could not be kept: {}",
                self.path.display(),
                e
            ),
        }
    }

    /// Remove the stored document, destroying the whole collection
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MonitorError::Io(e)),
        }
    }
}

impl ServiceRepository for JsonFileStorage {
    fn load(&self) -> Result<Vec<Service>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No stored services at {}", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(MonitorError::Io(e)),
        };

        let parsed = match std::str::from_utf8(&bytes) {
            Ok(raw) => parse_document(raw),
            Err(e) => {
                warn!(
                    "Stored services at {} are not valid UTF-8: {}",
                    self.path.display(),
                    e
                );
                None
            }
        };

        match parsed {
            Some(services) => Ok(services),
            None => {
                self.keep_rejected();
                Ok(Vec::new())
            }
        }
    }

    fn save(&self, services: &[Service]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let payload = encode_document(services)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, payload)?;
        fs::rename(&tmp, &self.path)?;

        debug!("Wrote {} services to {}", services.len(), self.path.display());
        Ok(())
    }
}

/// In-memory storage holding the serialized document.
///
/// Clones share the same slot, so a test can keep a handle and inspect
/// what the store wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    slot: Arc<Mutex<Option<String>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_raw(raw: impl Into<String>) -> Self {
        let storage = Self::default();
        if let Ok(mut slot) = storage.slot.lock() {
            *slot = Some(raw.into());
        }
        storage
    }

    pub fn raw(&self) -> Option<String> {
        self.slot.lock().ok().and_then(|slot| slot.clone())
    }

    pub fn clear(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }

    /// Make subsequent writes fail, as a full or read-only disk would
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl ServiceRepository for MemoryStorage {
    fn load(&self) -> Result<Vec<Service>> {
        let slot = self
            .slot
            .lock()
            .map_err(|_| MonitorError::Storage("memory slot poisoned".to_string()))?;
        Ok(slot.as_deref().map(decode_document).unwrap_or_default())
    }

    fn save(&self, services: &[Service]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(MonitorError::Storage("writes are disabled".to_string()));
        }

        let payload = encode_document(services)?;
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| MonitorError::Storage("memory slot poisoned".to_string()))?;
        *slot = Some(payload);
        Ok(())
    }
}
