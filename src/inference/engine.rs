//! Inference engine
//!
//! [`InferenceEngine`] is the request/response surface the session talks to.
//! [`LlamaEngine`] implements it on top of llama-cpp-2.
//!
//! # Architecture
//!
//! llama-cpp-2 types (`LlamaBackend`, `LlamaModel`, `LlamaContext`) contain
//! raw pointers that are not `Send`, so every llama-cpp call runs on a
//! dedicated worker thread. The async side sends commands over a channel and
//! awaits replies on tokio channels, never blocking the runtime.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self as std_mpsc, Receiver, Sender};
use std::thread::{self, JoinHandle};

use async_trait::async_trait;
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::inference::download::ModelFetcher;
use crate::inference::model::{validate_gguf, ModelError};
use crate::inference::options::{
    AssetPaths, CompletionOptions, EngineOptions, ExecutionVariant, ModelSource,
};
use crate::inference::progress::{ProgressSink, StopSignal};
use crate::inference::streaming::{StreamToken, Utf8Assembler};

/// Errors raised by an inference engine
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("Backend not initialized")]
    BackendNotInitialized,

    #[error("No model loaded")]
    NoModelLoaded,

    #[error("Failed to initialize backend: {0}")]
    BackendInit(String),

    #[error("No engine asset configured for {0}")]
    MissingAsset(String),

    #[error("Model download failed: {0}")]
    Download(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Model load cancelled")]
    Cancelled,

    #[error("Model validation failed: {0}")]
    ModelValidation(String),

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Worker thread error: {0}")]
    WorkerError(String),
}

impl From<ModelError> for EngineError {
    fn from(e: ModelError) -> Self {
        EngineError::ModelValidation(e.to_string())
    }
}

/// Model information after loading
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedModelInfo {
    /// Path to the loaded model
    pub path: String,
    /// Vocabulary size
    pub vocab_size: i32,
    /// Embedding dimension
    pub embedding_dim: i32,
    /// Training context length
    pub context_length: u32,
    /// Total parameter count
    pub param_count: u64,
    /// Model size in bytes
    pub size_bytes: u64,
}

/// The engine surface a session drives.
///
/// Calls are made in lifecycle order: `initialize`, `set_options`,
/// `load_model`, then any number of `complete`s.
#[async_trait]
pub trait InferenceEngine: Send + 'static {
    /// Binds the engine to its execution assets and brings the backend up
    async fn initialize(&mut self, assets: &AssetPaths) -> Result<(), EngineError>;

    /// Applies threading and runtime options
    fn set_options(&mut self, options: EngineOptions);

    /// Fetches and loads a model, reporting download progress to `progress`
    async fn load_model(
        &mut self,
        source: &ModelSource,
        progress: &ProgressSink,
        stop: &StopSignal,
    ) -> Result<LoadedModelInfo, EngineError>;

    /// Runs a completion and returns the generated text
    async fn complete(
        &mut self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, EngineError>;
}

/// Per-generation settings derived from engine options
#[derive(Debug, Clone, Copy)]
struct RuntimeParams {
    n_threads: u32,
    embeddings: bool,
    context_size: u32,
}

impl From<&EngineOptions> for RuntimeParams {
    fn from(options: &EngineOptions) -> Self {
        Self {
            n_threads: options.effective_threads().max(1),
            embeddings: options.embeddings,
            context_size: options.context_size,
        }
    }
}

/// Commands sent to the worker thread
enum WorkerCommand {
    Init {
        response_tx: oneshot::Sender<Result<(), EngineError>>,
    },
    LoadModel {
        path: PathBuf,
        gpu_layers: u32,
        response_tx: oneshot::Sender<Result<LoadedModelInfo, EngineError>>,
    },
    Generate {
        prompt: String,
        options: CompletionOptions,
        runtime: RuntimeParams,
        token_tx: mpsc::UnboundedSender<StreamToken>,
    },
    Shutdown,
}

/// llama-cpp-2 backed engine
pub struct LlamaEngine {
    fetcher: ModelFetcher,
    /// Channel to the worker thread
    command_tx: Option<Sender<WorkerCommand>>,
    worker_handle: Option<JoinHandle<()>>,
    assets: Option<AssetPaths>,
    options: EngineOptions,
    model_info: Option<LoadedModelInfo>,
}

impl LlamaEngine {
    /// Creates an uninitialized engine that downloads models with `fetcher`
    pub fn new(fetcher: ModelFetcher) -> Self {
        Self {
            fetcher,
            command_tx: None,
            worker_handle: None,
            assets: None,
            options: EngineOptions::default(),
            model_info: None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.command_tx.is_some()
    }

    pub fn is_model_loaded(&self) -> bool {
        self.model_info.is_some()
    }

    pub fn model_info(&self) -> Option<&LoadedModelInfo> {
        self.model_info.as_ref()
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    fn send(&self, command: WorkerCommand) -> Result<(), EngineError> {
        self.command_tx
            .as_ref()
            .ok_or(EngineError::BackendNotInitialized)?
            .send(command)
            .map_err(|e| EngineError::WorkerError(e.to_string()))
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.command_tx.take() {
            let _ = tx.send(WorkerCommand::Shutdown);
        }
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
        self.model_info = None;
    }
}

#[async_trait]
impl InferenceEngine for LlamaEngine {
    async fn initialize(&mut self, assets: &AssetPaths) -> Result<(), EngineError> {
        if let Some(variant) = assets.missing().first() {
            return Err(EngineError::MissingAsset(variant.asset_name().to_string()));
        }
        self.assets = Some(assets.clone());

        if self.is_initialized() {
            return Ok(());
        }

        let (command_tx, command_rx) = std_mpsc::channel::<WorkerCommand>();
        let handle = thread::Builder::new()
            .name("llama-worker".to_string())
            .spawn(move || worker_thread_main(command_rx))
            .map_err(|e| EngineError::WorkerError(e.to_string()))?;
        self.command_tx = Some(command_tx);
        self.worker_handle = Some(handle);

        let (response_tx, response_rx) = oneshot::channel();
        self.send(WorkerCommand::Init { response_tx })?;

        let result = response_rx
            .await
            .map_err(|e| EngineError::WorkerError(e.to_string()))
            .and_then(|r| r);

        match result {
            Ok(()) => {
                tracing::info!("LlamaEngine worker thread started");
                Ok(())
            }
            Err(e) => {
                tracing::error!("Engine initialization failed: {}", e);
                self.shutdown();
                Err(e)
            }
        }
    }

    fn set_options(&mut self, options: EngineOptions) {
        let variant = ExecutionVariant::for_options(&options);
        let asset = self
            .assets
            .as_ref()
            .and_then(|a| a.resolve(variant))
            .unwrap_or("<unset>");
        tracing::info!(
            "Engine options: {} variant ({}), {} thread(s), embeddings={}, gpu_layers={}",
            variant,
            asset,
            options.effective_threads(),
            options.embeddings,
            options.gpu_layers
        );
        self.options = options;
    }

    async fn load_model(
        &mut self,
        source: &ModelSource,
        progress: &ProgressSink,
        stop: &StopSignal,
    ) -> Result<LoadedModelInfo, EngineError> {
        if !self.is_initialized() {
            return Err(EngineError::BackendNotInitialized);
        }

        let path = self.fetcher.fetch(source, progress, stop).await?;
        if stop.is_stopped() {
            return Err(EngineError::Cancelled);
        }

        let header = validate_gguf(&path)?;
        tracing::debug!(
            "GGUF v{} with {} tensors at {:?}",
            header.version,
            header.tensor_count,
            path
        );

        let (response_tx, response_rx) = oneshot::channel();
        self.send(WorkerCommand::LoadModel {
            path,
            gpu_layers: self.options.gpu_layers,
            response_tx,
        })?;

        let info = response_rx
            .await
            .map_err(|e| EngineError::WorkerError(e.to_string()))??;

        self.model_info = Some(info.clone());
        Ok(info)
    }

    async fn complete(
        &mut self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, EngineError> {
        if !self.is_initialized() {
            return Err(EngineError::BackendNotInitialized);
        }
        if !self.is_model_loaded() {
            return Err(EngineError::NoModelLoaded);
        }

        let (token_tx, mut token_rx) = mpsc::unbounded_channel();
        self.send(WorkerCommand::Generate {
            prompt: prompt.to_string(),
            options: options.normalized(),
            runtime: RuntimeParams::from(&self.options),
            token_tx,
        })?;

        let mut text = String::new();
        while let Some(token) = token_rx.recv().await {
            match token {
                StreamToken::Token(piece) => text.push_str(&piece),
                StreamToken::Done => return Ok(text),
                StreamToken::Error(e) => return Err(EngineError::Inference(e)),
            }
        }
        Err(EngineError::WorkerError(
            "worker stopped before generation finished".to_string(),
        ))
    }
}

impl Drop for LlamaEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Worker thread main loop
///
/// Owns the LlamaBackend and LlamaModel, processes commands from the engine.
fn worker_thread_main(command_rx: Receiver<WorkerCommand>) {
    let mut backend: Option<LlamaBackend> = None;
    let mut model: Option<LlamaModel> = None;

    loop {
        match command_rx.recv() {
            Ok(WorkerCommand::Init { response_tx }) => {
                if backend.is_some() {
                    let _ = response_tx.send(Ok(()));
                    continue;
                }
                let result = match LlamaBackend::init() {
                    Ok(b) => {
                        backend = Some(b);
                        tracing::info!("LlamaBackend initialized in worker thread");
                        Ok(())
                    }
                    Err(e) => Err(EngineError::BackendInit(e.to_string())),
                };
                let _ = response_tx.send(result);
            }
            Ok(WorkerCommand::LoadModel {
                path,
                gpu_layers,
                response_tx,
            }) => {
                let result = match backend.as_ref() {
                    Some(b) => match load_model_internal(b, &path, gpu_layers) {
                        Ok((loaded, info)) => {
                            model = Some(loaded);
                            Ok(info)
                        }
                        Err(e) => Err(e),
                    },
                    None => Err(EngineError::BackendNotInitialized),
                };
                let _ = response_tx.send(result);
            }
            Ok(WorkerCommand::Generate {
                prompt,
                options,
                runtime,
                token_tx,
            }) => match (&backend, &model) {
                (Some(b), Some(m)) => {
                    if let Err(e) = run_generation(b, m, &prompt, options, runtime, &token_tx) {
                        tracing::error!("Generation failed: {}", e);
                        let _ = token_tx.send(StreamToken::Error(e));
                    }
                }
                _ => {
                    let _ = token_tx.send(StreamToken::Error("No model loaded".to_string()));
                }
            },
            Ok(WorkerCommand::Shutdown) => {
                tracing::info!("Worker thread shutting down");
                break;
            }
            Err(_) => {
                tracing::debug!("Command channel closed, worker exiting");
                break;
            }
        }
    }
}

fn load_model_internal(
    backend: &LlamaBackend,
    path: &Path,
    gpu_layers: u32,
) -> Result<(LlamaModel, LoadedModelInfo), EngineError> {
    let model_params = LlamaModelParams::default().with_n_gpu_layers(gpu_layers);

    let model = LlamaModel::load_from_file(backend, path, &model_params)
        .map_err(|e| EngineError::ModelLoad(e.to_string()))?;

    let info = LoadedModelInfo {
        path: path.to_string_lossy().to_string(),
        vocab_size: model.n_vocab(),
        embedding_dim: model.n_embd(),
        context_length: model.n_ctx_train(),
        param_count: model.n_params() as u64,
        size_bytes: model.size() as u64,
    };

    tracing::info!(
        "Model loaded: {} ({} params, {} vocab, {} ctx)",
        info.path,
        info.param_count,
        info.vocab_size,
        info.context_length
    );

    Ok((model, info))
}

/// Runs a raw completion (called from the worker thread)
fn run_generation(
    backend: &LlamaBackend,
    model: &LlamaModel,
    prompt: &str,
    options: CompletionOptions,
    runtime: RuntimeParams,
    tx: &mpsc::UnboundedSender<StreamToken>,
) -> Result<(), String> {
    let tokens = model
        .str_to_token(prompt, AddBos::Always)
        .map_err(|e| format!("Failed to tokenize: {}", e))?;
    if tokens.is_empty() {
        return Err("Prompt produced no tokens".to_string());
    }
    tracing::debug!("Tokenized prompt into {} tokens", tokens.len());

    // Room for the prompt plus the whole token budget
    let needed = tokens.len() as u32 + options.n_predict;
    let n_ctx = runtime
        .context_size
        .min(model.n_ctx_train())
        .max(needed);
    let n_batch = (tokens.len() as u32).max(512);

    let ctx_params = LlamaContextParams::default()
        .with_n_ctx(NonZeroU32::new(n_ctx))
        .with_n_batch(n_batch)
        .with_n_threads(runtime.n_threads as i32)
        .with_n_threads_batch(runtime.n_threads as i32)
        .with_embeddings(runtime.embeddings);

    let mut ctx = model
        .new_context(backend, ctx_params)
        .map_err(|e| format!("Failed to create context: {}", e))?;

    run_inference(&mut ctx, model, tokens, n_batch as usize, options, tx)
}

/// Runs the decode loop
fn run_inference(
    ctx: &mut LlamaContext,
    model: &LlamaModel,
    prompt_tokens: Vec<llama_cpp_2::token::LlamaToken>,
    n_batch: usize,
    options: CompletionOptions,
    tx: &mpsc::UnboundedSender<StreamToken>,
) -> Result<(), String> {
    let mut batch = LlamaBatch::new(n_batch, 1);

    let last = prompt_tokens.len() - 1;
    for (i, token) in prompt_tokens.iter().enumerate() {
        batch
            .add(*token, i as i32, &[0], i == last)
            .map_err(|e| format!("Failed to add token to batch: {}", e))?;
    }

    ctx.decode(&mut batch)
        .map_err(|e| format!("Failed to decode prompt: {}", e))?;

    let sampling = options.sampling;
    let mut sampler = if sampling.temp < 0.01 {
        LlamaSampler::greedy()
    } else {
        LlamaSampler::chain_simple([
            LlamaSampler::top_k(sampling.top_k as i32),
            LlamaSampler::top_p(sampling.top_p, 1),
            LlamaSampler::temp(sampling.temp),
            LlamaSampler::dist(rand_seed()),
        ])
    };

    let mut n_decoded = prompt_tokens.len() as i32;
    let mut text = Utf8Assembler::new();

    for _ in 0..options.n_predict {
        let new_token = sampler.sample(ctx, batch.n_tokens() - 1);
        sampler.accept(new_token);

        if model.is_eog_token(new_token) {
            tracing::debug!("End of generation token encountered");
            break;
        }

        let bytes = model
            .token_to_bytes(new_token, Special::Tokenize)
            .map_err(|e| format!("Failed to convert token to bytes: {}", e))?;

        if let Some(piece) = text.push(&bytes) {
            if tx.send(StreamToken::Token(piece)).is_err() {
                tracing::debug!("Receiver dropped, stopping generation");
                return Ok(());
            }
        }

        batch.clear();
        batch
            .add(new_token, n_decoded, &[0], true)
            .map_err(|e| format!("Failed to add token to batch: {}", e))?;

        ctx.decode(&mut batch)
            .map_err(|e| format!("Failed to decode: {}", e))?;

        n_decoded += 1;
    }

    if let Some(piece) = text.finish() {
        let _ = tx.send(StreamToken::Token(piece));
    }
    let _ = tx.send(StreamToken::Done);

    Ok(())
}

/// Generates a random seed using system entropy
fn rand_seed() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish() as u32
}
