//! Root Dioxus application component
//!
//! Builds the session and playground once and shares them with the UI tree.

use std::path::PathBuf;
use std::rc::Rc;

use dioxus::prelude::*;

use crate::inference::{LlamaEngine, ModelFetcher};
use crate::playground::{Playground, PlaygroundConfig};
use crate::session::Session;
use crate::storage::init_storage;
use crate::storage::models::cache_status;
use crate::storage::settings::{load_settings, AppSettings};
use crate::ui::presenter::{use_presenter, DioxusPresenter};
use crate::ui::Layout;

pub type DesktopPlayground = Playground<LlamaEngine, DioxusPresenter>;

/// State shared across components
#[derive(Clone)]
pub struct AppState {
    pub playground: Rc<DesktopPlayground>,
    pub presenter: DioxusPresenter,
    pub settings: Signal<AppSettings>,
    /// Whether the configured model is already downloaded
    pub cache_status: Signal<String>,
    models_dir: PathBuf,
    model_path: PathBuf,
}

impl AppState {
    /// Re-reads the model cache, e.g. after a load
    pub fn refresh_cache_status(&self) {
        let mut status = self.cache_status;
        status.set(cache_status(&self.models_dir, &self.model_path));
    }
}

#[component]
pub fn App() -> Element {
    let presenter = use_presenter();
    let settings = use_signal(load_settings);
    let cache = use_signal(String::new);

    let app_state = use_hook(move || {
        let current = settings.peek().clone();
        if let Err(e) = init_storage(&current.models_directory) {
            tracing::warn!("Storage unavailable: {}", e);
        }

        let fetcher = ModelFetcher::new(
            current.hub_endpoint.clone(),
            current.models_directory.clone(),
        );
        let models_dir = fetcher.cache_dir().to_path_buf();
        let model_path = fetcher.cache_path(&current.model);

        let session = Session::new(LlamaEngine::new(fetcher));
        tracing::info!("AppState initialized (session {})", session.id());

        let state = AppState {
            playground: Rc::new(Playground::new(
                session,
                presenter,
                PlaygroundConfig::from(&current),
            )),
            presenter,
            settings,
            cache_status: cache,
            models_dir,
            model_path,
        };
        state.refresh_cache_status();
        state
    });
    use_context_provider(|| app_state);

    rsx! {
        Layout {}
    }
}
