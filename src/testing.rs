//! Test doubles for the engine and presenter seams.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::inference::{
    AssetPaths, CompletionOptions, EngineError, EngineOptions, InferenceEngine, LoadedModelInfo,
    ModelSource, ProgressSink, StopSignal,
};
use crate::playground::{Control, Presenter};

const STORY: &str = "there lived a tiny llama who loved to count tokens by the river";

#[derive(Debug, Default)]
pub(crate) struct FakeState {
    pub initialized: bool,
    pub options: Option<EngineOptions>,
    pub progress: Vec<(u64, u64)>,
    pub init_error: Option<EngineError>,
    pub load_error: Option<EngineError>,
    pub complete_error: Option<EngineError>,
    pub model_loaded: bool,
    pub loads: usize,
    pub completions: Vec<String>,
    pub completion_options: Vec<CompletionOptions>,
}

/// Scriptable engine. Clones share state so a test can inspect it after
/// handing the engine to a session.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeEngine {
    state: Arc<Mutex<FakeState>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_progress(self, steps: &[(u64, u64)]) -> Self {
        self.state().progress = steps.to_vec();
        self
    }

    pub fn failing_init(self, error: EngineError) -> Self {
        self.state().init_error = Some(error);
        self
    }

    pub fn failing_load(self, error: EngineError) -> Self {
        self.state().load_error = Some(error);
        self
    }

    pub fn failing_complete(self, error: EngineError) -> Self {
        self.state().complete_error = Some(error);
        self
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl InferenceEngine for FakeEngine {
    async fn initialize(&mut self, _assets: &AssetPaths) -> Result<(), EngineError> {
        let mut state = self.state();
        if let Some(e) = state.init_error.clone() {
            return Err(e);
        }
        state.initialized = true;
        Ok(())
    }

    fn set_options(&mut self, options: EngineOptions) {
        self.state().options = Some(options);
    }

    async fn load_model(
        &mut self,
        source: &ModelSource,
        progress: &ProgressSink,
        stop: &StopSignal,
    ) -> Result<LoadedModelInfo, EngineError> {
        let steps = {
            let mut state = self.state();
            if !state.initialized {
                return Err(EngineError::BackendNotInitialized);
            }
            state.loads += 1;
            state.progress.clone()
        };

        if stop.is_stopped() {
            return Err(EngineError::Cancelled);
        }
        for (loaded, total) in steps {
            progress.report(loaded, total);
            tokio::task::yield_now().await;
            if stop.is_stopped() {
                return Err(EngineError::Cancelled);
            }
        }

        let mut state = self.state();
        if let Some(e) = state.load_error.clone() {
            return Err(e);
        }
        state.model_loaded = true;
        Ok(LoadedModelInfo {
            path: format!("/cache/{}", source.file_name),
            vocab_size: 151_936,
            embedding_dim: 1536,
            context_length: 131_072,
            param_count: 1_777_088_000,
            size_bytes: 752_874_880,
        })
    }

    async fn complete(
        &mut self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, EngineError> {
        let mut state = self.state();
        if !state.model_loaded {
            return Err(EngineError::NoModelLoaded);
        }
        state.completions.push(prompt.to_string());
        state.completion_options.push(*options);
        if let Some(e) = state.complete_error.clone() {
            return Err(e);
        }

        let words: Vec<&str> = STORY
            .split_whitespace()
            .take(options.n_predict as usize)
            .collect();
        Ok(format!(" {}", words.join(" ")))
    }
}

/// Presenter that remembers everything it was told
#[derive(Debug, Default)]
pub(crate) struct RecordingPresenter {
    progress: RefCell<Vec<String>>,
    output: RefCell<Vec<String>>,
    controls: RefCell<HashMap<Control, Vec<bool>>>,
}

impl RecordingPresenter {
    pub fn progress_history(&self) -> Vec<String> {
        self.progress.borrow().clone()
    }

    pub fn output_history(&self) -> Vec<String> {
        self.output.borrow().clone()
    }

    pub fn last_progress(&self) -> Option<String> {
        self.progress.borrow().last().cloned()
    }

    pub fn last_output(&self) -> Option<String> {
        self.output.borrow().last().cloned()
    }

    pub fn control_history(&self, control: Control) -> Vec<bool> {
        self.controls
            .borrow()
            .get(&control)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_enabled(&self, control: Control) -> bool {
        self.control_history(control).last().copied().unwrap_or(false)
    }
}

impl Presenter for RecordingPresenter {
    fn render_progress(&self, text: &str) {
        self.progress.borrow_mut().push(text.to_string());
    }

    fn render_output(&self, text: &str) {
        self.output.borrow_mut().push(text.to_string());
    }

    fn set_control_enabled(&self, control: Control, enabled: bool) {
        self.controls
            .borrow_mut()
            .entry(control)
            .or_default()
            .push(enabled);
    }
}
