use std::fs;
use std::path::{Path, PathBuf};

use crate::demographics::domain::category_publisher::{CategoryPublisher, CategoryUpdate};

/// Keeps the latest verdict in a JSON file that other processes can poll.
///
/// Each publish replaces the file atomically; write failures are logged and
/// never reach the detection loop.
pub struct JsonFileCategoryPublisher {
    path: PathBuf,
}

impl JsonFileCategoryPublisher {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    fn write(&self, update: &CategoryUpdate) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(update)?;
        let temp_path = self.path.with_extension("json.part");
        fs::write(&temp_path, json)?;
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

impl CategoryPublisher for JsonFileCategoryPublisher {
    fn publish(&mut self, update: &CategoryUpdate) {
        if let Err(e) = self.write(update) {
            log::warn!("Failed to publish category to {}: {e}", self.path.display());
        }
    }
}
