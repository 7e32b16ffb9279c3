use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::generate::{GenerationParams, SamplingParams};
use crate::models::FieldWeights;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_name")]
    pub name: String,
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Base URL of the Elasticsearch cluster, required when `backend = "elasticsearch"`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_bulk_batch_size")]
    pub bulk_batch_size: usize,
    #[serde(default = "default_index_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            name: default_index_name(),
            backend: default_backend(),
            url: None,
            bulk_batch_size: default_bulk_batch_size(),
            timeout_secs: default_index_timeout_secs(),
        }
    }
}

fn default_index_name() -> String {
    "course_qa".to_string()
}
fn default_backend() -> String {
    "sqlite".to_string()
}
fn default_bulk_batch_size() -> usize {
    500
}
fn default_index_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
    #[serde(default)]
    pub weights: FieldWeights,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_top_k: default_max_top_k(),
            weights: FieldWeights::default(),
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_max_top_k() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Name of the environment variable holding the bearer token, if any.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// `tokenizer.json` of the generation model. Prompt and answer bounds
    /// count this tokenizer's tokens; without it they count words.
    #[serde(default)]
    pub tokenizer: Option<PathBuf>,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: usize,
    #[serde(default = "default_min_output_tokens")]
    pub min_output_tokens: usize,
    #[serde(default = "default_true")]
    pub early_stop: bool,
    #[serde(default)]
    pub sampling: SamplingConfig,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            url: None,
            model: None,
            api_key_env: None,
            tokenizer: None,
            timeout_secs: default_generation_timeout_secs(),
            max_input_tokens: default_max_input_tokens(),
            max_output_tokens: default_max_output_tokens(),
            min_output_tokens: default_min_output_tokens(),
            early_stop: true,
            sampling: SamplingConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SamplingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_beam_count")]
    pub beam_count: usize,
    #[serde(default = "default_no_repeat_ngram_size")]
    pub no_repeat_ngram_size: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            beam_count: default_beam_count(),
            no_repeat_ngram_size: default_no_repeat_ngram_size(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_generation_timeout_secs() -> u64 {
    120
}
fn default_max_input_tokens() -> usize {
    512
}
fn default_max_output_tokens() -> usize {
    1024
}
fn default_min_output_tokens() -> usize {
    100
}
fn default_beam_count() -> usize {
    4
}
fn default_no_repeat_ngram_size() -> usize {
    3
}
fn default_true() -> bool {
    true
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Per-call generation parameters derived from this section.
    pub fn params(&self) -> GenerationParams {
        GenerationParams {
            max_input_tokens: self.max_input_tokens,
            max_output_tokens: self.max_output_tokens,
            min_output_tokens: self.min_output_tokens,
            sampling: SamplingParams {
                enabled: self.sampling.enabled,
                beam_count: self.sampling.beam_count,
                no_repeat_ngram_size: self.sampling.no_repeat_ngram_size,
            },
            early_stop: self.early_stop,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

impl Config {
    /// A config rooted at `dir`, with every optional section at its default.
    pub fn minimal(dir: &Path) -> Self {
        Self {
            db: DbConfig {
                path: dir.join("assist.sqlite"),
            },
            corpus: CorpusConfig {
                path: dir.join("data.csv"),
            },
            index: IndexConfig::default(),
            retrieval: RetrievalConfig::default(),
            generation: GenerationConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate index
    if !crate::index::is_valid_index_name(&config.index.name) {
        bail!(
            "index.name '{}' must be 1-64 chars of [a-z0-9_] starting with a letter",
            config.index.name
        );
    }
    match config.index.backend.as_str() {
        "sqlite" => {}
        "elasticsearch" => {
            if config.index.url.is_none() {
                bail!("index.url must be set when backend is 'elasticsearch'");
            }
        }
        other => bail!(
            "Unknown index backend: '{}'. Must be sqlite or elasticsearch.",
            other
        ),
    }
    if config.index.bulk_batch_size == 0 {
        bail!("index.bulk_batch_size must be > 0");
    }

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.max_top_k < config.retrieval.top_k {
        bail!("retrieval.max_top_k must be >= retrieval.top_k");
    }
    let w = &config.retrieval.weights;
    if [w.question, w.answer, w.topic, w.title]
        .iter()
        .any(|v| !v.is_finite() || *v < 0.0)
    {
        bail!("retrieval.weights must be finite and non-negative");
    }
    if w.answer <= 0.0 || w.question < 2.0 * w.answer {
        bail!(
            "retrieval.weights.question ({}) must be at least twice retrieval.weights.answer ({})",
            w.question,
            w.answer
        );
    }

    // Validate generation
    config
        .generation
        .params()
        .validate()
        .map_err(|e| anyhow::anyhow!("generation: {}", e))?;

    match config.generation.provider.as_str() {
        "disabled" => {}
        "huggingface" => {
            if config.generation.url.is_none() {
                bail!("generation.url must be set when provider is 'huggingface'");
            }
        }
        other => bail!(
            "Unknown generation provider: '{}'. Must be disabled or huggingface.",
            other
        ),
    }
    if let Some(path) = &config.generation.tokenizer {
        if !path.is_file() {
            bail!("generation.tokenizer '{}' does not exist", path.display());
        }
    }

    Ok(())
}
