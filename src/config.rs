use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub encyclopedia: EncyclopediaConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub disambiguation: DisambiguationConfig,
    #[serde(default)]
    pub digest: DigestConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Base URL override (OpenAI-compatible proxy, or the Ollama host).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            url: None,
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_llm_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct EncyclopediaConfig {
    #[serde(default = "default_language")]
    pub language: String,
    /// Full Action API endpoint; derived from `language` when unset.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_wiki_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for EncyclopediaConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            url: None,
            max_results: default_max_results(),
            timeout_secs: default_wiki_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl EncyclopediaConfig {
    pub fn api_url(&self) -> String {
        self.url
            .clone()
            .unwrap_or_else(|| format!("https://{}.wikipedia.org/w/api.php", self.language))
    }
}

fn default_language() -> String {
    "en".to_string()
}
fn default_max_results() -> usize {
    5
}
fn default_wiki_timeout_secs() -> u64 {
    20
}
fn default_user_agent() -> String {
    format!("wiki-digest/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResolverConfig {
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Highest confidence a bare single-name query may keep.
    #[serde(default = "default_bare_name_cap")]
    pub bare_name_cap: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            bare_name_cap: default_bare_name_cap(),
        }
    }
}

fn default_confidence_threshold() -> f64 {
    0.7
}
fn default_bare_name_cap() -> f64 {
    0.5
}

/// What to do when a clarification reply cannot be matched to one option.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionFallback {
    /// Ask the user again.
    #[default]
    Ask,
    /// Pick the option with the highest confidence, when options carry one.
    HighestConfidence,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DisambiguationConfig {
    #[serde(default)]
    pub selection_fallback: SelectionFallback,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DigestConfig {
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_retry_chunk_chars")]
    pub retry_chunk_chars: usize,
    #[serde(default = "default_retry_chunk_overlap")]
    pub retry_chunk_overlap: usize,
    #[serde(default = "default_map_words")]
    pub map_words: usize,
    #[serde(default = "default_max_words")]
    pub max_words: usize,
    #[serde(default = "default_map_concurrency")]
    pub map_concurrency: usize,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            chunk_chars: default_chunk_chars(),
            chunk_overlap: default_chunk_overlap(),
            retry_chunk_chars: default_retry_chunk_chars(),
            retry_chunk_overlap: default_retry_chunk_overlap(),
            map_words: default_map_words(),
            max_words: default_max_words(),
            map_concurrency: default_map_concurrency(),
        }
    }
}

fn default_chunk_chars() -> usize {
    2000
}
fn default_chunk_overlap() -> usize {
    100
}
fn default_retry_chunk_chars() -> usize {
    1000
}
fn default_retry_chunk_overlap() -> usize {
    50
}
fn default_map_words() -> usize {
    100
}
fn default_max_words() -> usize {
    300
}
fn default_map_concurrency() -> usize {
    1
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PipelineConfig {
    /// Stop at `needs_confirmation` instead of summarizing a confident topic.
    #[serde(default)]
    pub require_confirmation: bool,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    match config.llm.provider.as_str() {
        "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be openai or ollama.",
            other
        ),
    }
    if config.llm.model.trim().is_empty() {
        anyhow::bail!("llm.model must not be empty");
    }
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
    }

    if config.encyclopedia.max_results == 0 {
        anyhow::bail!("encyclopedia.max_results must be > 0");
    }

    let r = &config.resolver;
    if !(0.0..=1.0).contains(&r.confidence_threshold) {
        anyhow::bail!("resolver.confidence_threshold must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&r.bare_name_cap) || r.bare_name_cap >= r.confidence_threshold {
        anyhow::bail!("resolver.bare_name_cap must be in [0.0, confidence_threshold)");
    }

    let d = &config.digest;
    if d.chunk_chars == 0 || d.retry_chunk_chars == 0 {
        anyhow::bail!("digest.chunk_chars and digest.retry_chunk_chars must be > 0");
    }
    if d.chunk_overlap >= d.chunk_chars || d.retry_chunk_overlap >= d.retry_chunk_chars {
        anyhow::bail!("digest chunk overlap must be smaller than the chunk size");
    }
    if d.retry_chunk_chars >= d.chunk_chars {
        anyhow::bail!("digest.retry_chunk_chars must be smaller than digest.chunk_chars");
    }
    if d.max_words == 0 || d.map_words == 0 {
        anyhow::bail!("digest.max_words and digest.map_words must be > 0");
    }
    if d.map_concurrency == 0 {
        anyhow::bail!("digest.map_concurrency must be >= 1");
    }

    Ok(())
}
