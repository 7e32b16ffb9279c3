//! Answer generation.
//!
//! Defines the [`Generator`] trait and its implementations:
//! - **[`DisabledGenerator`]**: always fails; used when no generation runtime
//!   is configured.
//! - **[`HuggingFaceGenerator`]**: calls an HTTP text-generation runtime that
//!   speaks the Hugging Face inference contract.
//!
//! Lengths are counted by a [`TokenBudget`]: the generation model's own
//! tokenizer when `generation.tokenizer` points at its `tokenizer.json`, and
//! whitespace-delimited words otherwise. The prompt is cut from the end
//! before it is sent; the answer has control markers stripped and is capped.
//! Failures are reported once as [`RagError::GenerationFailure`]; nothing is
//! retried.

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokenizers::Tokenizer;
use tracing::{debug, instrument, warn};

use crate::config::GenerationConfig;
use crate::error::{RagError, Result};

/// Decoding controls for one generation call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplingParams {
    pub enabled: bool,
    pub beam_count: usize,
    pub no_repeat_ngram_size: usize,
}

/// Input/output bounds and decoding controls for one generation call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationParams {
    pub max_input_tokens: usize,
    pub max_output_tokens: usize,
    /// Passed to the runtime; enforcing it is the runtime's job.
    pub min_output_tokens: usize,
    pub sampling: SamplingParams,
    pub early_stop: bool,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_input_tokens: 512,
            max_output_tokens: 1024,
            min_output_tokens: 100,
            sampling: SamplingParams {
                enabled: true,
                beam_count: 4,
                no_repeat_ngram_size: 3,
            },
            early_stop: true,
        }
    }
}

impl GenerationParams {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_input_tokens == 0 {
            return Err("max_input_tokens must be > 0".to_string());
        }
        if self.max_output_tokens == 0 {
            return Err("max_output_tokens must be > 0".to_string());
        }
        if self.min_output_tokens == 0 {
            return Err("min_output_tokens must be > 0".to_string());
        }
        if self.min_output_tokens > self.max_output_tokens {
            return Err(format!(
                "min_output_tokens ({}) must be <= max_output_tokens ({})",
                self.min_output_tokens, self.max_output_tokens
            ));
        }
        if self.sampling.beam_count == 0 {
            return Err("sampling.beam_count must be >= 1".to_string());
        }
        Ok(())
    }
}

/// A decoded answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    /// Whether the prompt exceeded `max_input_tokens` and was cut.
    pub prompt_truncated: bool,
}

/// A text-generation runtime.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Provider identifier used in logs and errors (e.g. `"huggingface"`).
    fn provider(&self) -> &str;

    /// Generate one answer for `prompt`.
    ///
    /// # Errors
    ///
    /// [`RagError::GenerationFailure`] for any runtime failure, and
    /// [`RagError::InvalidArgument`] when `params` are inconsistent.
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<Generation>;
}

/// How prompt and answer lengths are counted.
pub enum TokenBudget {
    /// Whitespace-delimited words. A run of text without whitespace (CJK, a
    /// long URL) counts as one word, so this bound is approximate.
    Words,
    /// Tokens of the generation model's tokenizer.
    Model(Box<Tokenizer>),
}

impl TokenBudget {
    /// Load a Hugging Face `tokenizer.json`. Any truncation configured in the
    /// file is switched off so that counts are exact.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let mut tokenizer = Tokenizer::from_file(path)
            .map_err(|e| anyhow::anyhow!("Load tokenizer {}: {}", path.display(), e))?;
        tokenizer
            .with_truncation(None)
            .map_err(|e| anyhow::anyhow!("Disable tokenizer truncation: {}", e))?;
        Ok(Self::Model(Box::new(tokenizer)))
    }

    pub fn from_config(config: &GenerationConfig) -> anyhow::Result<Self> {
        match &config.tokenizer {
            Some(path) => Self::from_file(path),
            None => Ok(Self::Words),
        }
    }

    /// Keep at most `max_tokens` tokens of `prompt`, cutting from the end.
    /// The flag reports whether anything was cut.
    pub fn bound_prompt(&self, prompt: &str, max_tokens: usize) -> anyhow::Result<(String, bool)> {
        match self {
            Self::Words => Ok(bound_prompt(prompt, max_tokens)),
            Self::Model(tokenizer) => match prefix_end(tokenizer, prompt, max_tokens)? {
                Some(end) => Ok((prompt[..end].trim_end().to_string(), true)),
                None => Ok((prompt.to_string(), false)),
            },
        }
    }

    /// Strip control markers, collapse whitespace, and cap at `max_tokens`.
    pub fn finish_output(&self, raw: &str, max_tokens: usize) -> anyhow::Result<String> {
        match self {
            Self::Words => Ok(finish_output(raw, max_tokens)),
            Self::Model(tokenizer) => {
                let text = collapse_whitespace(&strip_control_markers(raw));
                match prefix_end(tokenizer, &text, max_tokens)? {
                    Some(end) => Ok(text[..end].trim_end().to_string()),
                    None => Ok(text),
                }
            }
        }
    }
}

/// Byte offset where the first `max_tokens` tokens of `text` end, or `None`
/// when all of `text` fits.
fn prefix_end(tokenizer: &Tokenizer, text: &str, max_tokens: usize) -> anyhow::Result<Option<usize>> {
    let encoding = tokenizer
        .encode(text, false)
        .map_err(|e| anyhow::anyhow!("Tokenize: {}", e))?;
    let offsets = encoding.get_offsets();
    if offsets.len() <= max_tokens {
        return Ok(None);
    }
    let mut end = offsets[..max_tokens]
        .iter()
        .map(|&(_, end)| end)
        .max()
        .unwrap_or(0)
        .min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    Ok(Some(end))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Word-count fallback: keep at most `max_tokens` whitespace-delimited words
/// of `prompt`, cutting from the end. The kept prefix is returned verbatim,
/// including its line breaks. The flag reports whether anything was cut.
pub fn bound_prompt(prompt: &str, max_tokens: usize) -> (String, bool) {
    let mut seen = 0;
    let mut in_token = false;
    for (i, c) in prompt.char_indices() {
        if c.is_whitespace() {
            in_token = false;
        } else if !in_token {
            in_token = true;
            seen += 1;
            if seen > max_tokens {
                return (prompt[..i].trim_end().to_string(), true);
            }
        }
    }
    (prompt.to_string(), false)
}

/// Whether the text between `<` and `>` is a model control marker.
fn is_control_marker(inner: &str) -> bool {
    match inner {
        "pad" | "s" | "/s" | "unk" => true,
        _ => {
            if let Some(n) = inner.strip_prefix("extra_id_") {
                return !n.is_empty() && n.chars().all(|c| c.is_ascii_digit());
            }
            inner.len() >= 2 && inner.starts_with('|') && inner.ends_with('|')
        }
    }
}

/// Remove `<pad>`, `<s>`, `</s>`, `<unk>`, `<extra_id_N>` and `<|...|>`
/// markers. Other angle-bracket text is left alone.
pub fn strip_control_markers(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('>') {
            Some(end) if is_control_marker(&after[..end]) => {
                out.push(' ');
                rest = &after[end + 1..];
            }
            _ => {
                out.push('<');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Word-count fallback: strip control markers, collapse whitespace, and cap
/// at `max_tokens` words.
pub fn finish_output(raw: &str, max_tokens: usize) -> String {
    strip_control_markers(raw)
        .split_whitespace()
        .take(max_tokens)
        .collect::<Vec<_>>()
        .join(" ")
}

// ============ Disabled Generator ============

/// Fails every call. Used when `generation.provider = "disabled"`.
pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn provider(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &str, _params: &GenerationParams) -> Result<Generation> {
        Err(RagError::GenerationFailure {
            provider: "disabled".to_string(),
            message: "generation is disabled; set [generation] provider in the config".to_string(),
        })
    }
}

// ============ Hugging Face Generator ============

/// Calls `POST {generation.url}` with the Hugging Face inference payload.
///
/// An optional bearer token is read from the environment variable named by
/// `generation.api_key_env` when the generator is created.
pub struct HuggingFaceGenerator {
    client: reqwest::Client,
    url: String,
    model: Option<String>,
    token: Option<String>,
    budget: TokenBudget,
}

impl HuggingFaceGenerator {
    /// # Errors
    ///
    /// Fails if `generation.url` is unset, if `api_key_env` names a variable
    /// that is not set, if `generation.tokenizer` cannot be loaded, or if the
    /// HTTP client cannot be built.
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.url required for huggingface provider"))?;

        let token = match &config.api_key_env {
            Some(var) => Some(
                std::env::var(var)
                    .with_context(|| format!("{} environment variable not set", var))?,
            ),
            None => None,
        };

        let budget = TokenBudget::from_config(config)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url,
            model: config.model.clone(),
            token,
            budget,
        })
    }

    fn failure(&self, message: impl Into<String>) -> RagError {
        RagError::GenerationFailure {
            provider: self.provider().to_string(),
            message: message.into(),
        }
    }
}

/// Request payload for the inference endpoint.
pub fn request_body(prompt: &str, params: &GenerationParams) -> serde_json::Value {
    serde_json::json!({
        "inputs": prompt,
        "parameters": {
            "max_new_tokens": params.max_output_tokens,
            "min_new_tokens": params.min_output_tokens,
            "do_sample": params.sampling.enabled,
            "num_beams": params.sampling.beam_count,
            "no_repeat_ngram_size": params.sampling.no_repeat_ngram_size,
            "early_stopping": params.early_stop,
            "truncate": params.max_input_tokens,
            "return_full_text": false,
        },
        "options": {
            "wait_for_model": true,
        },
    })
}

/// Extract `generated_text` from `[{"generated_text": ...}]` or
/// `{"generated_text": ...}`. An `{"error": ...}` body is an error.
pub fn parse_response(json: &serde_json::Value) -> anyhow::Result<String> {
    if let Some(err) = json.get("error") {
        let message = err.as_str().map(String::from).unwrap_or_else(|| err.to_string());
        anyhow::bail!("runtime error: {}", message);
    }

    let item = match json {
        serde_json::Value::Array(items) => items
            .first()
            .ok_or_else(|| anyhow::anyhow!("empty response array"))?,
        other => other,
    };

    item.get("generated_text")
        .and_then(|t| t.as_str())
        .map(String::from)
        .ok_or_else(|| anyhow::anyhow!("response missing generated_text"))
}

#[async_trait]
impl Generator for HuggingFaceGenerator {
    fn provider(&self) -> &str {
        "huggingface"
    }

    #[instrument(skip(self, prompt, params), fields(model = self.model.as_deref().unwrap_or("default")))]
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<Generation> {
        params.validate().map_err(RagError::InvalidArgument)?;

        let (bounded, prompt_truncated) = self
            .budget
            .bound_prompt(prompt, params.max_input_tokens)
            .map_err(|e| self.failure(format!("{:#}", e)))?;
        if prompt_truncated {
            warn!(
                max_input_tokens = params.max_input_tokens,
                "prompt exceeds input bound; truncated"
            );
        }

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&request_body(&bounded, params));
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.failure(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.failure(format!("HTTP {}: {}", status, body)));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| self.failure(format!("invalid JSON response: {}", e)))?;
        let raw = parse_response(&json).map_err(|e| self.failure(e.to_string()))?;

        let text = self
            .budget
            .finish_output(&raw, params.max_output_tokens)
            .map_err(|e| self.failure(format!("{:#}", e)))?;
        if text.is_empty() {
            return Err(self.failure("runtime returned an empty answer"));
        }
        debug!(chars = text.chars().count(), "generated");

        Ok(Generation {
            text,
            prompt_truncated,
        })
    }
}

/// Create the generator selected by `config.provider`.
pub fn create_generator(config: &GenerationConfig) -> anyhow::Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "huggingface" => Ok(Arc::new(HuggingFaceGenerator::new(config)?)),
        other => anyhow::bail!("Unknown generation provider: {}", other),
    }
}
