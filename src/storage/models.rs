//! Model cache listing
//!
//! Downloaded models live at `{models_dir}/{owner--repo}/{file}.gguf`.

use crate::inference::validate_gguf;
use crate::storage::StorageError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// A GGUF file found in the model cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedModel {
    /// Full path to the model file
    pub path: PathBuf,
    /// Cache folder the file sits in (flattened repository id)
    pub repo_dir: String,
    /// Filename of the model
    pub filename: String,
    /// File size in bytes
    pub size_bytes: u64,
}

impl CachedModel {
    fn from_path(path: PathBuf) -> Result<Self, std::io::Error> {
        let metadata = fs::metadata(&path)?;
        let name_of = |p: Option<&Path>| {
            p.and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
                .unwrap_or("unknown")
                .to_string()
        };

        Ok(Self {
            repo_dir: name_of(path.parent()),
            filename: name_of(Some(&path)),
            size_bytes: metadata.len(),
            path,
        })
    }

    /// Get a human-readable size string
    pub fn size_string(&self) -> String {
        format_size(self.size_bytes)
    }
}

pub fn format_size(size_bytes: u64) -> String {
    let bytes = size_bytes as f64;

    if bytes < 1024.0 {
        format!("{} B", bytes)
    } else if bytes < 1024.0 * 1024.0 {
        format!("{:.2} KB", bytes / 1024.0)
    } else if bytes < 1024.0 * 1024.0 * 1024.0 {
        format!("{:.2} MB", bytes / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes / (1024.0 * 1024.0 * 1024.0))
    }
}

fn is_gguf(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case("gguf"))
            .unwrap_or(false)
}

/// Lists every `.gguf` file one level below `directory`.
///
/// Partial downloads (`.gguf.part`) are skipped.
pub fn scan_models_directory(directory: &Path) -> Result<Vec<CachedModel>, StorageError> {
    if !directory.is_dir() {
        tracing::debug!("Models directory does not exist: {}", directory.display());
        return Ok(vec![]);
    }

    let mut models = vec![];

    for repo in fs::read_dir(directory)? {
        let repo = repo?.path();
        if !repo.is_dir() {
            continue;
        }
        for entry in fs::read_dir(&repo)? {
            let path = entry?.path();
            if !is_gguf(&path) {
                continue;
            }
            match CachedModel::from_path(path.clone()) {
                Ok(model) => models.push(model),
                Err(e) => tracing::warn!("Failed to read model file {:?}: {}", path, e),
            }
        }
    }

    models.sort_by(|a, b| (&a.repo_dir, &a.filename).cmp(&(&b.repo_dir, &b.filename)));
    tracing::debug!("Found {} cached model(s) in {}", models.len(), directory.display());

    Ok(models)
}

/// Finds the cache entry at `path`, if it has been downloaded.
///
/// A file whose GGUF header does not validate counts as not downloaded,
/// since the next load would fetch it again.
pub fn find_cached(directory: &Path, path: &Path) -> Option<CachedModel> {
    let model = scan_models_directory(directory)
        .ok()?
        .into_iter()
        .find(|m| m.path == path)?;

    match validate_gguf(&model.path) {
        Ok(_) => Some(model),
        Err(e) => {
            tracing::debug!("Cached file {} is not usable: {}", model.path.display(), e);
            None
        }
    }
}

/// Short status line for the model at `path`
pub fn cache_status(directory: &Path, path: &Path) -> String {
    match find_cached(directory, path) {
        Some(model) => format!("Cached ({})", model.size_string()),
        None => "Not downloaded yet".to_string(),
    }
}
