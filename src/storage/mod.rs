// src/storage/mod.rs
use crate::utils::error::StorageError;
use std::fs;
use std::path::{Path, PathBuf};

pub struct StorageManager {
    base_dir: PathBuf,
}

impl StorageManager {
    /// Creates a new StorageManager under the given base directory
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Result<Self, StorageError> {
        let base_path = base_dir.as_ref().to_path_buf();

        // Create the base directory if it doesn't exist
        if !base_path.exists() {
            fs::create_dir_all(&base_path).map_err(StorageError::IoError)?;
        }

        Ok(Self { base_dir: base_path })
    }

    /// Saves one extraction's rendered output as `<name>.json`.
    pub fn save_output(
        &self,
        name: &str,
        output: &serde_json::Value,
        pretty: bool,
    ) -> Result<PathBuf, StorageError> {
        let file_path = self.base_dir.join(format!("{}.json", name));

        let serialized = if pretty {
            serde_json::to_string_pretty(output)
        } else {
            serde_json::to_string(output)
        }
        .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        fs::write(&file_path, serialized).map_err(StorageError::IoError)?;

        tracing::info!("Saved output to {}", file_path.display());
        Ok(file_path)
    }

    /// Saves metadata about the extraction as `<name>_meta.json`.
    pub fn save_metadata(
        &self,
        name: &str,
        source: &str,
        record_count: usize,
    ) -> Result<PathBuf, StorageError> {
        let file_path = self.base_dir.join(format!("{}_meta.json", name));

        let metadata = serde_json::json!({
            "name": name,
            "source": source,
            "record_count": record_count,
            "extraction_timestamp": chrono::Utc::now().to_rfc3339(),
        });

        let serialized = serde_json::to_string_pretty(&metadata)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        fs::write(&file_path, serialized).map_err(StorageError::IoError)?;

        tracing::info!("Saved metadata to {}", file_path.display());
        Ok(file_path)
    }
}
