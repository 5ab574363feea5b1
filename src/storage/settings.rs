//! Settings storage
//!
//! Manages persistence of engine, model and sampling preferences.

use crate::inference::{
    AssetPaths, CompletionOptions, EngineOptions, ModelSource, DEFAULT_HUB_ENDPOINT,
};
use crate::storage::{default_models_dir, get_data_dir, StorageError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Model fetched by the load action
    pub model: ModelSource,
    /// Model hub base URL
    pub hub_endpoint: String,
    /// Where each engine execution variant is served from
    pub assets: AssetPaths,
    /// URL prefix the assets are served under
    pub public_path: String,
    pub engine: EngineOptions,
    /// Defaults for generate
    pub completion: CompletionOptions,
    /// Directory downloaded models are cached in
    pub models_directory: PathBuf,
    /// UI theme: "dark" or "light"
    pub theme: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            model: ModelSource::default(),
            hub_endpoint: DEFAULT_HUB_ENDPOINT.to_string(),
            assets: AssetPaths::default(),
            public_path: "/gpt/".to_string(),
            engine: EngineOptions::default(),
            completion: CompletionOptions::default(),
            models_directory: default_models_dir(),
            theme: "dark".to_string(),
        }
    }
}

impl AppSettings {
    /// Validate settings values
    ///
    /// Ensures all parameters are within acceptable ranges
    pub fn validate(&mut self) {
        self.completion = self.completion.normalized();
        self.completion.sampling.temp = self.completion.sampling.temp.min(2.0);

        if self.engine.n_threads == 0 {
            self.engine.n_threads = 1;
        }

        if self.engine.context_size == 0 {
            self.engine.context_size = 2048;
        }

        if self.hub_endpoint.trim().is_empty() {
            self.hub_endpoint = DEFAULT_HUB_ENDPOINT.to_string();
        }

        if self.theme != "dark" && self.theme != "light" {
            self.theme = "dark".to_string();
        }
    }

    pub fn is_dark(&self) -> bool {
        self.theme != "light"
    }

    /// Switches between the dark and light themes
    pub fn toggle_theme(&mut self) {
        self.theme = if self.is_dark() { "light" } else { "dark" }.to_string();
    }
}

/// Get the settings file path
fn get_settings_path() -> Result<PathBuf, StorageError> {
    Ok(get_data_dir()?.join("settings.json"))
}

/// Load settings from disk
///
/// Returns default settings if the file doesn't exist or is corrupted
pub fn load_settings() -> AppSettings {
    match get_settings_path().and_then(|path| load_settings_from(&path)) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Failed to load settings, using defaults: {}", e);
            AppSettings::default()
        }
    }
}

/// Loads and validates settings from `path`, defaulting when it is absent
pub fn load_settings_from(path: &Path) -> Result<AppSettings, StorageError> {
    if !path.exists() {
        tracing::info!("Settings file not found, using defaults");
        return Ok(AppSettings::default());
    }

    let json = fs::read_to_string(path)?;
    let mut settings: AppSettings = serde_json::from_str(&json)?;
    settings.validate();

    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

/// Save settings to disk
pub fn save_settings(settings: &AppSettings) -> Result<(), StorageError> {
    save_settings_to(settings, &get_settings_path()?)
}

pub fn save_settings_to(settings: &AppSettings, path: &Path) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json)?;

    tracing::debug!("Saved settings to {}", path.display());
    Ok(())
}
