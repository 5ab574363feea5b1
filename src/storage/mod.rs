//! Persistent storage
//!
//! Settings and the downloaded-model cache live under the application data
//! directory.

use std::path::PathBuf;
use thiserror::Error;

pub mod models;
pub mod settings;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to access data directory: {0}")]
    DataDirError(String),
    #[error("Failed to read file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to serialize/deserialize JSON: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Get the application data directory
///
/// - Windows: `C:\Users\{user}\AppData\Roaming\PocketGen\PocketGen\data`
/// - macOS: `/Users/{user}/Library/Application Support/com.PocketGen.PocketGen`
/// - Linux: `/home/{user}/.local/share/pocketgen`
pub fn get_data_dir() -> Result<PathBuf, StorageError> {
    directories::ProjectDirs::from("com", "PocketGen", "PocketGen")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| StorageError::DataDirError("Could not determine data directory".to_string()))
}

/// Default location of the model cache
pub fn default_models_dir() -> PathBuf {
    get_data_dir()
        .map(|d| d.join("models"))
        .unwrap_or_else(|_| PathBuf::from("./models"))
}

/// Creates the data directory and the given models directory
pub fn init_storage(models_dir: &std::path::Path) -> Result<(), StorageError> {
    let data_dir = get_data_dir()?;
    std::fs::create_dir_all(&data_dir)?;
    std::fs::create_dir_all(models_dir)?;

    tracing::info!("Initialized storage at: {}", data_dir.display());
    Ok(())
}
