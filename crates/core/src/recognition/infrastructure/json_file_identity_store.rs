use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::recognition::domain::identity::{Descriptor, Identity};
use crate::recognition::domain::identity_store::{
    validate_append, IdentityStore, SaveReceipt, StoreError,
};

/// Identity store backed by a single pretty-printed JSON array on disk.
///
/// Every operation re-reads the file so external edits are picked up.
/// Writes go through a temp file and rename, serialized by `lock`.
pub struct JsonFileIdentityStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileIdentityStore {
    /// Opens `path`, creating it as an empty list if it does not exist.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| io_error("open", e))?;
            }
            write_atomic(path, &[])?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            lock: Mutex::new(()),
        })
    }

    /// Platform data location, e.g. `~/.local/share/CrowdSight/users.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("CrowdSight").join("users.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Vec<Identity>, StoreError> {
        let json = fs::read_to_string(&self.path).map_err(|e| io_error("read", e))?;
        serde_json::from_str(&json).map_err(|e| StoreError::Malformed(e.to_string()))
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, ()>, StoreError> {
        self.lock
            .lock()
            .map_err(|e| StoreError::Unavailable {
                operation: "lock",
                reason: format!("Lock poisoned: {e}"),
            })
    }
}

fn io_error(operation: &'static str, e: std::io::Error) -> StoreError {
    StoreError::Unavailable {
        operation,
        reason: e.to_string(),
    }
}

/// One past the highest `userN` suffix, so ids stay unique even when the
/// file holds gaps or hand-added entries.
fn next_user_id(identities: &[Identity]) -> String {
    let highest = identities
        .iter()
        .filter_map(|i| i.id.strip_prefix("user")?.parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    let mut n = highest.max(identities.len() as u64) + 1;
    while identities.iter().any(|i| i.id == format!("user{n}")) {
        n += 1;
    }
    format!("user{n}")
}

fn write_atomic(path: &Path, identities: &[Identity]) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(identities)
        .map_err(|e| StoreError::Malformed(e.to_string()))?;
    let temp_path = path.with_extension("json.part");
    fs::write(&temp_path, json).map_err(|e| io_error("write", e))?;
    fs::rename(&temp_path, path).map_err(|e| io_error("write", e))
}

impl IdentityStore for JsonFileIdentityStore {
    fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
        let _guard = self.guard()?;
        self.read()
    }

    fn allocate_identity(&self) -> Result<String, StoreError> {
        let _guard = self.guard()?;
        let mut identities = self.read()?;
        let id = next_user_id(&identities);
        identities.push(Identity::new(id.clone(), Vec::new()));
        write_atomic(&self.path, &identities)?;
        Ok(id)
    }

    fn append_descriptor(
        &self,
        id: &str,
        descriptor: &Descriptor,
    ) -> Result<SaveReceipt, StoreError> {
        validate_append(id, descriptor)?;
        let _guard = self.guard()?;
        let mut identities = self.read()?;
        match identities.iter_mut().find(|i| i.id == id) {
            Some(existing) => existing.descriptors.push(descriptor.clone()),
            None => identities.push(Identity::new(id, vec![descriptor.clone()])),
        }
        write_atomic(&self.path, &identities)?;
        Ok(SaveReceipt {
            ok: true,
            total_identity_count: identities.len(),
        })
    }
}
