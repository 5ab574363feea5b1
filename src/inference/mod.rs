//! LLM inference engine
//!
//! This module handles all interaction with llama-cpp: fetching a model,
//! loading it, and running completions.

pub mod download;
pub mod engine;
pub mod model;
pub mod options;
pub mod progress;
pub mod streaming;

// Re-export main types for convenience
pub use download::{ModelFetcher, DEFAULT_HUB_ENDPOINT};
pub use engine::{EngineError, InferenceEngine, LlamaEngine, LoadedModelInfo};
pub use model::{validate_gguf, GgufHeader, ModelError, GGUF_MAGIC};
pub use options::{
    AssetPaths, CompletionOptions, EngineOptions, ExecutionVariant, ModelSource, SamplingParams,
};
pub use progress::{LoadEvent, LoadProgress, LoadTask, ProgressSink, StopSignal};
pub use streaming::StreamToken;
