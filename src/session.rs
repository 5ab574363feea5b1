//! Model session lifecycle
//!
//! A [`Session`] wraps one inference engine and enforces the call order
//! initialize → load → generate. Sessions are plain values: create as many as
//! needed, each with its own engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use uuid::Uuid;

use crate::inference::{
    AssetPaths, CompletionOptions, EngineError, EngineOptions, InferenceEngine, LoadTask,
    ModelSource, ProgressSink, StopSignal,
};
use crate::truncate_str;

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Initialized,
    Loading,
    Ready,
}

/// Which lifecycle step was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Uninitialized {
    #[error("engine not initialized")]
    Engine,
    #[error("model not loaded")]
    Model,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("Session not ready: {0}")]
    NotInitialized(Uninitialized),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub struct Session<E> {
    id: Uuid,
    engine: Arc<Mutex<E>>,
    phase: Arc<watch::Sender<Phase>>,
    /// Set once any load has succeeded
    model_loaded: Arc<AtomicBool>,
}

impl<E> Clone for Session<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            engine: Arc::clone(&self.engine),
            phase: Arc::clone(&self.phase),
            model_loaded: Arc::clone(&self.model_loaded),
        }
    }
}

impl<E: InferenceEngine> Session<E> {
    pub fn new(engine: E) -> Self {
        let (phase, _) = watch::channel(Phase::Uninitialized);
        let id = Uuid::new_v4();
        tracing::debug!("Session {} created", id);
        Self {
            id,
            engine: Arc::new(Mutex::new(engine)),
            phase: Arc::new(phase),
            model_loaded: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Watches phase changes
    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Brings the engine up and applies its options.
    ///
    /// Calling this again on a live session re-applies the options and keeps
    /// any loaded model.
    pub async fn initialize(
        &self,
        assets: &AssetPaths,
        options: &EngineOptions,
    ) -> Result<(), SessionError> {
        {
            let mut engine = self.engine.lock().await;
            engine.initialize(assets).await?;
            engine.set_options(options.clone());
        }

        self.phase.send_if_modified(|phase| {
            if *phase == Phase::Uninitialized {
                *phase = Phase::Initialized;
                true
            } else {
                false
            }
        });
        tracing::info!("Session {} initialized", self.id);
        Ok(())
    }

    /// Starts loading `source` in the background.
    ///
    /// Must be called from within a tokio runtime. The returned task yields
    /// progress and then exactly one terminal event.
    pub fn load_model(&self, source: ModelSource) -> Result<LoadTask, SessionError> {
        if self.phase() == Phase::Uninitialized {
            return Err(SessionError::NotInitialized(Uninitialized::Engine));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let sink = ProgressSink::new(tx);
        let stop = StopSignal::new();

        let id = self.id;
        let engine = Arc::clone(&self.engine);
        let phase = Arc::clone(&self.phase);
        let model_loaded = Arc::clone(&self.model_loaded);
        let task_stop = stop.clone();

        self.phase.send_replace(Phase::Loading);
        tracing::info!("Session {} loading {}", id, source);

        tokio::spawn(async move {
            let result = {
                let mut engine = engine.lock().await;
                engine.load_model(&source, &sink, &task_stop).await
            };

            match &result {
                Ok(info) => {
                    model_loaded.store(true, Ordering::Release);
                    phase.send_replace(Phase::Ready);
                    tracing::info!("Session {} ready with {}", id, info.path);
                }
                Err(e) => {
                    let fallback = if model_loaded.load(Ordering::Acquire) {
                        Phase::Ready
                    } else {
                        Phase::Initialized
                    };
                    phase.send_replace(fallback);
                    tracing::warn!("Session {} failed to load {}: {}", id, source, e);
                }
            }

            sink.finish(result);
        });

        Ok(LoadTask::new(rx, stop))
    }

    /// Runs a completion against the loaded model
    pub async fn generate(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, SessionError> {
        if self.phase() == Phase::Uninitialized {
            return Err(SessionError::NotInitialized(Uninitialized::Engine));
        }
        if !self.model_loaded.load(Ordering::Acquire) {
            return Err(SessionError::NotInitialized(Uninitialized::Model));
        }

        tracing::debug!(
            "Session {} generating (n_predict={}) for {:?}",
            self.id,
            options.n_predict,
            truncate_str(prompt, 64)
        );

        let mut engine = self.engine.lock().await;
        let text = engine.complete(prompt, options).await?;
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{LoadEvent, LoadProgress};
    use crate::testing::FakeEngine;
    use futures::StreamExt;

    async fn initialized(engine: FakeEngine) -> Session<FakeEngine> {
        let session = Session::new(engine);
        session
            .initialize(&AssetPaths::default(), &EngineOptions::default())
            .await
            .unwrap();
        session
    }

    #[tokio::test]
    async fn test_generate_before_initialize() {
        let session = Session::new(FakeEngine::new());
        let result = session
            .generate("hello", &CompletionOptions::default())
            .await;
        assert_eq!(
            result,
            Err(SessionError::NotInitialized(Uninitialized::Engine))
        );
    }

    #[tokio::test]
    async fn test_load_before_initialize() {
        let session = Session::new(FakeEngine::new());
        let result = session.load_model(ModelSource::default());
        assert!(matches!(
            result,
            Err(SessionError::NotInitialized(Uninitialized::Engine))
        ));
        assert_eq!(session.phase(), Phase::Uninitialized);
    }

    #[tokio::test]
    async fn test_generate_before_load() {
        let engine = FakeEngine::new();
        let session = initialized(engine.clone()).await;
        assert_eq!(session.phase(), Phase::Initialized);

        let result = session
            .generate("hello", &CompletionOptions::default())
            .await;
        assert_eq!(
            result,
            Err(SessionError::NotInitialized(Uninitialized::Model))
        );
        assert!(engine.state().completions.is_empty());
    }

    #[tokio::test]
    async fn test_initialize_applies_options() {
        let engine = FakeEngine::new();
        let options = EngineOptions {
            n_threads: 2,
            ..EngineOptions::default()
        };
        let session = Session::new(engine.clone());
        session
            .initialize(&AssetPaths::default(), &options)
            .await
            .unwrap();

        let state = engine.state();
        assert!(state.initialized);
        assert_eq!(state.options, Some(options));
    }

    #[tokio::test]
    async fn test_initialize_failure_propagates() {
        let engine = FakeEngine::new()
            .failing_init(EngineError::BackendInit("no backend".to_string()));
        let session = Session::new(engine);
        let result = session
            .initialize(&AssetPaths::default(), &EngineOptions::default())
            .await;
        assert_eq!(
            result,
            Err(SessionError::Engine(EngineError::BackendInit(
                "no backend".to_string()
            )))
        );
        assert_eq!(session.phase(), Phase::Uninitialized);
    }

    #[tokio::test]
    async fn test_load_streams_progress_then_result() {
        let engine = FakeEngine::new().with_progress(&[(0, 300), (150, 300), (300, 300)]);
        let session = initialized(engine).await;

        let task = session.load_model(ModelSource::default()).unwrap();
        assert_eq!(session.phase(), Phase::Loading);

        let events: Vec<LoadEvent> = task.collect().await;
        assert_eq!(events.len(), 4);
        assert!(matches!(
            events[1],
            LoadEvent::Progress(LoadProgress {
                loaded: 150,
                total: 300
            })
        ));
        assert!(matches!(events[3], LoadEvent::Loaded(_)));
        assert_eq!(session.phase(), Phase::Ready);
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let engine = FakeEngine::new();
        let session = initialized(engine.clone()).await;
        session
            .load_model(ModelSource::default())
            .unwrap()
            .wait()
            .await
            .unwrap();

        let text = session
            .generate("Once upon a time", &CompletionOptions::default())
            .await
            .unwrap();
        assert!(!text.is_empty());
        assert_eq!(engine.state().completions, vec!["Once upon a time"]);
    }

    #[tokio::test]
    async fn test_failed_load_reverts_phase() {
        let engine = FakeEngine::new()
            .failing_load(EngineError::Download("connection reset".to_string()));
        let session = initialized(engine).await;

        let result = session
            .load_model(ModelSource::default())
            .unwrap()
            .wait()
            .await;
        assert_eq!(
            result,
            Err(EngineError::Download("connection reset".to_string()))
        );
        assert_eq!(session.phase(), Phase::Initialized);

        let generate = session
            .generate("hello", &CompletionOptions::default())
            .await;
        assert_eq!(
            generate,
            Err(SessionError::NotInitialized(Uninitialized::Model))
        );
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_previous_model() {
        let engine = FakeEngine::new();
        let session = initialized(engine.clone()).await;
        session
            .load_model(ModelSource::default())
            .unwrap()
            .wait()
            .await
            .unwrap();

        engine.state().load_error = Some(EngineError::Download("connection reset".to_string()));
        let result = session
            .load_model(ModelSource::new("someone/other-GGUF", "other.gguf"))
            .unwrap()
            .wait()
            .await;
        assert_eq!(
            result,
            Err(EngineError::Download("connection reset".to_string()))
        );
        assert_eq!(session.phase(), Phase::Ready);
        assert_eq!(engine.state().loads, 2);

        let text = session
            .generate("Once upon a time", &CompletionOptions::default())
            .await
            .unwrap();
        assert!(!text.is_empty());
    }

    #[tokio::test]
    async fn test_engine_rejection_propagates_unchanged() {
        let engine = FakeEngine::new()
            .failing_complete(EngineError::Inference("out of memory".to_string()));
        let session = initialized(engine).await;
        session
            .load_model(ModelSource::default())
            .unwrap()
            .wait()
            .await
            .unwrap();

        let result = session
            .generate("hello", &CompletionOptions::default())
            .await;
        assert_eq!(
            result,
            Err(SessionError::Engine(EngineError::Inference(
                "out of memory".to_string()
            )))
        );
        assert_eq!(
            result.unwrap_err().to_string(),
            "Inference failed: out of memory"
        );
    }

    #[tokio::test]
    async fn test_cancel_load() {
        let engine = FakeEngine::new().with_progress(&[(1, 10), (5, 10), (10, 10)]);
        let session = initialized(engine).await;

        let task = session.load_model(ModelSource::default()).unwrap();
        task.cancel();
        assert_eq!(task.wait().await, Err(EngineError::Cancelled));
        assert_eq!(session.phase(), Phase::Initialized);
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let first = initialized(FakeEngine::new()).await;
        let second = Session::new(FakeEngine::new());

        first
            .load_model(ModelSource::default())
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert_ne!(first.id(), second.id());
        assert_eq!(first.phase(), Phase::Ready);
        assert_eq!(second.phase(), Phase::Uninitialized);
    }

    #[tokio::test]
    async fn test_subscribe_sees_ready() {
        let session = initialized(FakeEngine::new()).await;
        let mut phases = session.subscribe();

        let task = session.load_model(ModelSource::default()).unwrap();
        phases
            .wait_for(|phase| *phase == Phase::Ready)
            .await
            .unwrap();
        assert!(task.wait().await.is_ok());
    }
}
