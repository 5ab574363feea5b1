//! Engine and completion options
//!
//! Plain configuration values passed from settings into the engine.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Execution variant of the engine backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionVariant {
    SingleThread,
    MultiThread,
}

impl ExecutionVariant {
    pub const ALL: [ExecutionVariant; 2] =
        [ExecutionVariant::SingleThread, ExecutionVariant::MultiThread];

    /// Logical asset name for this variant
    pub fn asset_name(&self) -> &'static str {
        match self {
            ExecutionVariant::SingleThread => "single-thread/wllama.wasm",
            ExecutionVariant::MultiThread => "multi-thread/wllama.wasm",
        }
    }

    /// Picks the variant matching the given engine options
    pub fn for_options(options: &EngineOptions) -> Self {
        if options.use_multi_thread && options.n_threads > 1 {
            ExecutionVariant::MultiThread
        } else {
            ExecutionVariant::SingleThread
        }
    }
}

impl fmt::Display for ExecutionVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionVariant::SingleThread => write!(f, "single-thread"),
            ExecutionVariant::MultiThread => write!(f, "multi-thread"),
        }
    }
}

/// Mapping from logical engine asset names to the paths they are served from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetPaths(BTreeMap<String, String>);

impl AssetPaths {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.0.insert(name.into(), path.into());
        self
    }

    /// Served path for a variant, if configured
    pub fn resolve(&self, variant: ExecutionVariant) -> Option<&str> {
        self.0.get(variant.asset_name()).map(String::as_str)
    }

    /// Variants that have no configured path
    pub fn missing(&self) -> Vec<ExecutionVariant> {
        ExecutionVariant::ALL
            .into_iter()
            .filter(|v| self.resolve(*v).is_none())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl Default for AssetPaths {
    fn default() -> Self {
        Self::new()
            .with(
                ExecutionVariant::SingleThread.asset_name(),
                "/gpt/wllama/single-thread/wllama.wasm",
            )
            .with(
                ExecutionVariant::MultiThread.asset_name(),
                "/gpt/wllama/multi-thread/wllama.wasm",
            )
    }
}

/// Engine runtime options, applied after initialization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Use the multi-threaded execution variant
    pub use_multi_thread: bool,
    /// Worker threads used for decoding
    pub n_threads: u32,
    /// Produce embeddings alongside logits
    pub embeddings: bool,
    /// Number of layers to offload to GPU (0 = CPU only)
    pub gpu_layers: u32,
    /// Context window size
    pub context_size: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            use_multi_thread: true,
            n_threads: 4,
            embeddings: false,
            gpu_layers: 0,
            context_size: 2048,
        }
    }
}

impl EngineOptions {
    /// Thread count the engine should actually use
    pub fn effective_threads(&self) -> u32 {
        match ExecutionVariant::for_options(self) {
            ExecutionVariant::SingleThread => 1,
            ExecutionVariant::MultiThread => self.n_threads,
        }
    }
}

/// Remote location of a GGUF model file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSource {
    /// Hub repository id, e.g. `owner/name`
    pub repo_id: String,
    /// File inside the repository
    pub file_name: String,
}

impl ModelSource {
    pub fn new(repo_id: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            file_name: file_name.into(),
        }
    }
}

impl Default for ModelSource {
    fn default() -> Self {
        Self::new(
            "mradermacher/DeepSeek-R1-Distill-Qwen-1.5B-Abliterated-dpo-GGUF",
            "DeepSeek-R1-Distill-Qwen-1.5B-Abliterated-dpo.Q2_K.gguf",
        )
    }
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.repo_id, self.file_name)
    }
}

/// Sampling knobs controlling next-token selection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    /// Temperature (0.0 = greedy)
    pub temp: f32,
    /// Top-k (0 = disabled)
    pub top_k: u32,
    /// Top-p nucleus threshold
    pub top_p: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temp: 0.5,
            top_k: 40,
            top_p: 0.9,
        }
    }
}

/// A completion request's options
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionOptions {
    /// Maximum number of tokens to generate
    pub n_predict: u32,
    pub sampling: SamplingParams,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            n_predict: 50,
            sampling: SamplingParams::default(),
        }
    }
}

impl CompletionOptions {
    /// Returns a copy with every knob inside the engine's accepted range
    pub fn normalized(mut self) -> Self {
        if !self.sampling.temp.is_finite() || self.sampling.temp < 0.0 {
            self.sampling.temp = 0.0;
        }
        self.sampling.top_p = if self.sampling.top_p.is_finite() {
            self.sampling.top_p.clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.n_predict = self.n_predict.max(1);
        self
    }
}
