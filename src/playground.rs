//! Load/generate control flow
//!
//! [`Playground`] drives a [`Session`] from two user actions and reports
//! everything through a [`Presenter`], so the same flow serves the desktop
//! window and the terminal.
//!
//! UI states: `Idle` (load enabled, generate disabled) → `Loading` (both
//! disabled) → `Ready` (generate enabled). Each generate click passes through
//! a transient `Generating` state with generate disabled until it settles.
//!
//! Each action is split into a synchronous `start_*` step, which claims the
//! action and disables its control, and an async `complete_*` step. A UI can
//! run the first inside its click handler so a second click is ignored even
//! before the spawned future is polled.

use std::cell::Cell;
use std::fmt::Display;

use crate::inference::{
    AssetPaths, CompletionOptions, EngineError, EngineOptions, InferenceEngine, LoadEvent,
    ModelSource,
};
use crate::session::{Phase, Session};
use crate::storage::settings::AppSettings;

pub const MSG_INITIALIZING: &str = "Initializing...";
pub const MSG_DOWNLOAD_STARTED: &str = "Downloading model...";
pub const MSG_MODEL_LOADED: &str = "Model loaded!";
pub const MSG_EMPTY_PROMPT: &str = "Please enter a prompt!";
pub const MSG_GENERATING: &str = "Generating...";

/// A user-facing control whose enabled state the flow manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    LoadModel,
    Generate,
}

/// What a UI toolkit must provide to host the playground
pub trait Presenter {
    fn render_progress(&self, text: &str);
    fn render_output(&self, text: &str);
    fn set_control_enabled(&self, control: Control, enabled: bool);
}

/// Everything the flow needs besides the session itself
#[derive(Debug, Clone, PartialEq)]
pub struct PlaygroundConfig {
    pub assets: AssetPaths,
    pub engine: EngineOptions,
    pub model: ModelSource,
    pub completion: CompletionOptions,
}

impl Default for PlaygroundConfig {
    fn default() -> Self {
        Self {
            assets: AssetPaths::default(),
            engine: EngineOptions::default(),
            model: ModelSource::default(),
            completion: CompletionOptions::default(),
        }
    }
}

impl From<&AppSettings> for PlaygroundConfig {
    fn from(settings: &AppSettings) -> Self {
        Self {
            assets: settings.assets.clone(),
            engine: settings.engine.clone(),
            model: settings.model.clone(),
            completion: settings.completion,
        }
    }
}

pub fn progress_message(percent: u8) -> String {
    format!("Downloading... {percent}%")
}

pub fn error_message(error: &dyn Display) -> String {
    format!("Error: {error}")
}

pub struct Playground<E, P> {
    session: Session<E>,
    presenter: P,
    config: PlaygroundConfig,
    loading: Cell<bool>,
    generating: Cell<bool>,
}

impl<E: InferenceEngine, P: Presenter> Playground<E, P> {
    /// Wires the controls into their idle state
    pub fn new(session: Session<E>, presenter: P, config: PlaygroundConfig) -> Self {
        presenter.set_control_enabled(Control::LoadModel, true);
        presenter.set_control_enabled(Control::Generate, false);
        Self {
            session,
            presenter,
            config,
            loading: Cell::new(false),
            generating: Cell::new(false),
        }
    }

    pub fn session(&self) -> &Session<E> {
        &self.session
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn config(&self) -> &PlaygroundConfig {
        &self.config
    }

    /// Handles a click on the load button. Returns whether the model loaded.
    pub async fn load_model(&self) -> bool {
        if !self.start_load() {
            return false;
        }
        self.complete_load().await
    }

    /// Claims the load action. Returns false while a load is in flight.
    pub fn start_load(&self) -> bool {
        if self.loading.replace(true) {
            tracing::debug!("Load already in flight, ignoring click");
            return false;
        }
        self.presenter.set_control_enabled(Control::LoadModel, false);
        self.presenter.render_progress(MSG_INITIALIZING);
        true
    }

    /// Runs a load claimed by [`Playground::start_load`]
    pub async fn complete_load(&self) -> bool {
        let loaded = self.run_load().await;
        self.loading.set(false);
        loaded
    }

    async fn run_load(&self) -> bool {
        if let Err(e) = self
            .session
            .initialize(&self.config.assets, &self.config.engine)
            .await
        {
            self.fail_load(&e);
            return false;
        }

        self.presenter.render_progress(MSG_DOWNLOAD_STARTED);

        let mut task = match self.session.load_model(self.config.model.clone()) {
            Ok(task) => task,
            Err(e) => {
                self.fail_load(&e);
                return false;
            }
        };

        while let Some(event) = task.next_event().await {
            match event {
                LoadEvent::Progress(progress) => {
                    if let Some(percent) = progress.percent() {
                        self.presenter.render_progress(&progress_message(percent));
                    }
                }
                LoadEvent::Loaded(info) => {
                    tracing::info!("Model ready: {}", info.path);
                    self.presenter.render_progress(MSG_MODEL_LOADED);
                    self.presenter.set_control_enabled(Control::Generate, true);
                    return true;
                }
                LoadEvent::Failed(e) => {
                    self.fail_load(&e);
                    return false;
                }
            }
        }

        self.fail_load(&EngineError::WorkerError(
            "load ended without a result".to_string(),
        ));
        false
    }

    /// Handles a click on the generate button with the current input text.
    ///
    /// The input is never modified. Returns the generated text on success.
    pub async fn generate(&self, input: &str) -> Option<String> {
        let prompt = self.start_generate(input)?;
        self.complete_generate(&prompt).await
    }

    /// Claims the generate action and returns the trimmed prompt.
    ///
    /// Returns `None` for an empty prompt or while a generation is in flight.
    pub fn start_generate(&self, input: &str) -> Option<String> {
        if self.generating.get() {
            tracing::debug!("Generation already in flight, ignoring click");
            return None;
        }
        let prompt = input.trim();
        if prompt.is_empty() {
            self.presenter.render_output(MSG_EMPTY_PROMPT);
            return None;
        }
        self.generating.set(true);

        self.presenter.set_control_enabled(Control::Generate, false);
        self.presenter.render_output(MSG_GENERATING);
        Some(prompt.to_string())
    }

    /// Runs a generation claimed by [`Playground::start_generate`]
    pub async fn complete_generate(&self, prompt: &str) -> Option<String> {
        let result = self
            .session
            .generate(prompt, &self.config.completion)
            .await;

        let output = match result {
            Ok(text) => {
                self.presenter.render_output(&text);
                Some(text)
            }
            Err(e) => {
                tracing::error!("Generation failed: {}", e);
                self.presenter.render_output(&error_message(&e));
                None
            }
        };

        // Stays disabled until a model is loaded
        let ready = self.session.phase() == Phase::Ready;
        self.presenter.set_control_enabled(Control::Generate, ready);
        self.generating.set(false);
        output
    }

    fn fail_load(&self, error: &dyn Display) {
        tracing::error!("Model load failed: {}", error);
        self.presenter.render_progress(&error_message(error));
        self.presenter.set_control_enabled(Control::LoadModel, true);
    }
}
