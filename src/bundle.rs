//! Packaging
//!
//! Stages the engine's execution assets into a distribution directory so
//! they are served at the paths the asset map advertises.

use std::fs;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

use crate::inference::{AssetPaths, ExecutionVariant};

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("Asset not found: {0}")]
    MissingSource(PathBuf),

    #[error("No path configured for asset {0}")]
    UnmappedAsset(String),

    #[error("Refusing to write outside the output directory: {0}")]
    UnsafeTarget(String),

    #[error("Refusing to clean {0}: it holds the asset sources or the working directory")]
    UnsafeClean(PathBuf),

    #[error("Failed to stage {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One file copied into the output directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleEntry {
    pub from: PathBuf,
    /// Destination relative to the output directory
    pub to: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundlePlan {
    pub out_dir: PathBuf,
    /// Empty the output directory before staging
    pub clean: bool,
    pub entries: Vec<BundleEntry>,
}

impl BundlePlan {
    /// Plans one copy per execution variant.
    ///
    /// Sources are read from `{source_root}/{asset name}`; each lands at its
    /// served path with `public_path` stripped.
    pub fn for_assets(
        source_root: &Path,
        out_dir: &Path,
        assets: &AssetPaths,
        public_path: &str,
    ) -> Result<Self, BundleError> {
        let mut entries = Vec::new();
        for variant in ExecutionVariant::ALL {
            let name = variant.asset_name();
            let served = assets
                .resolve(variant)
                .ok_or_else(|| BundleError::UnmappedAsset(name.to_string()))?;
            entries.push(BundleEntry {
                from: source_root.join(name),
                to: relative_target(served, public_path)?,
            });
        }

        Ok(Self {
            out_dir: out_dir.to_path_buf(),
            clean: true,
            entries,
        })
    }
}

/// Maps a served URL path to a path relative to the output directory
pub fn relative_target(served: &str, public_path: &str) -> Result<PathBuf, BundleError> {
    let prefix = public_path.trim_matches('/');
    let trimmed = served.trim_start_matches('/');
    let relative = if prefix.is_empty() {
        trimmed
    } else {
        trimmed
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(trimmed)
    };

    let path = PathBuf::from(relative);
    let safe = !relative.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !safe {
        return Err(BundleError::UnsafeTarget(served.to_string()));
    }
    Ok(path)
}

/// Rejects cleaning a directory that contains a source or `cwd`.
///
/// All paths must already be canonical.
fn check_clean_target(out_dir: &Path, sources: &[PathBuf], cwd: &Path) -> Result<(), BundleError> {
    let holds_source = sources.iter().any(|source| source.starts_with(out_dir));
    if holds_source || cwd.starts_with(out_dir) {
        tracing::error!("Not cleaning {}", out_dir.display());
        return Err(BundleError::UnsafeClean(out_dir.to_path_buf()));
    }
    Ok(())
}

/// Executes a plan and returns the paths written
pub fn stage(plan: &BundlePlan) -> Result<Vec<PathBuf>, BundleError> {
    for entry in &plan.entries {
        if !entry.from.is_file() {
            return Err(BundleError::MissingSource(entry.from.clone()));
        }
    }

    let io = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| BundleError::Io { path, source }
    };

    if plan.clean && plan.out_dir.exists() {
        let out_dir = plan.out_dir.canonicalize().map_err(io(&plan.out_dir))?;
        let cwd = std::env::current_dir().map_err(io(Path::new(".")))?;
        let cwd = cwd.canonicalize().map_err(io(&cwd))?;
        let mut sources = Vec::with_capacity(plan.entries.len());
        for entry in &plan.entries {
            sources.push(entry.from.canonicalize().map_err(io(&entry.from))?);
        }
        check_clean_target(&out_dir, &sources, &cwd)?;

        fs::remove_dir_all(&plan.out_dir).map_err(io(&plan.out_dir))?;
        tracing::debug!("Cleaned {}", plan.out_dir.display());
    }

    let mut written = Vec::with_capacity(plan.entries.len());
    for entry in &plan.entries {
        let dest = plan.out_dir.join(&entry.to);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(io(parent))?;
        }
        fs::copy(&entry.from, &dest).map_err(io(&dest))?;
        tracing::info!("Staged {} -> {}", entry.from.display(), dest.display());
        written.push(dest);
    }

    Ok(written)
}
