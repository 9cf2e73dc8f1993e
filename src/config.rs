//! Pipeline configuration
//!
//! Loads settings from config.yml. Without a file, defaults are derived from
//! the environment once, here, and passed explicitly to every factory.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::graph::IdStrategy;
use crate::text::ChunkingStrategy;
use crate::{Error, Result};

/// Default config file name
pub const CONFIG_FILE: &str = "config.yml";
/// Environment variable pointing at an alternative config file
pub const CONFIG_ENV: &str = "DOCGRAPH_CONFIG";

pub const DEFAULT_TEMPERATURE: f32 = 0.0;
pub const DEFAULT_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1000;
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
pub const DEFAULT_PARSE_ATTEMPTS: u32 = 2;
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;
pub const DEFAULT_LOCAL_DIMENSION: usize = 384;
pub const DEFAULT_EMBEDDING_BATCH: usize = 64;
pub const DEFAULT_NEO4J_URI: &str = "bolt://localhost:7687";
pub const DEFAULT_NEO4J_USER: &str = "neo4j";
pub const DEFAULT_OUTPUT_DIR: &str = "outputs";

/// Completion backend family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    Groq,
    #[serde(alias = "open_ai")]
    OpenAi,
    Ollama,
}

impl ProviderKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::Groq => "groq",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Ollama => "ollama",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini-2.0-flash",
            ProviderKind::Groq => "openai/gpt-oss-120b",
            ProviderKind::OpenAi => "gpt-4o-mini",
            ProviderKind::Ollama => "llama3.1",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            ProviderKind::Groq => "https://api.groq.com/openai/v1",
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Ollama => "http://localhost:11434",
        }
    }

    pub fn requires_key(&self) -> bool {
        !matches!(self, ProviderKind::Ollama)
    }
}

/// One configured completion backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

impl ProviderSettings {
    pub fn new(kind: ProviderKind, api_key: Option<String>) -> Self {
        Self {
            kind,
            api_key,
            base_url: kind.default_base_url().to_string(),
            model: kind.default_model().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmSettings {
    /// Backends in preference order
    pub providers: Vec<ProviderSettings>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub chunking: ChunkingStrategy,
    /// Attempts per extraction stage when the response does not parse
    pub parse_attempts: u32,
    pub id_strategy: IdStrategy,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            chunking: ChunkingStrategy::Characters,
            parse_attempts: DEFAULT_PARSE_ATTEMPTS,
            id_strategy: IdStrategy::Random,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    #[serde(alias = "open_ai")]
    OpenAi,
    Local,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingSettings {
    pub backend: EmbeddingBackend,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: String,
    pub dimension: usize,
    pub local_dimension: usize,
    pub batch_size: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Local,
            api_key: None,
            base_url: None,
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimension: DEFAULT_EMBEDDING_DIMENSION,
            local_dimension: DEFAULT_LOCAL_DIMENSION,
            batch_size: DEFAULT_EMBEDDING_BATCH,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Neo4jSettings {
    pub uri: String,
    pub user: String,
    pub password: Option<String>,
    pub database: Option<String>,
}

impl Default for Neo4jSettings {
    fn default() -> Self {
        Self {
            uri: DEFAULT_NEO4J_URI.to_string(),
            user: DEFAULT_NEO4J_USER.to_string(),
            password: None,
            database: None,
        }
    }
}

impl Neo4jSettings {
    /// Export is only attempted with a password.
    pub fn is_configured(&self) -> bool {
        self.password.as_deref().is_some_and(|p| !p.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputSettings {
    pub dir: PathBuf,
    pub graphml_layout: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            graphml_layout: true,
        }
    }
}

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub llm: LlmSettings,
    pub extraction: ExtractionSettings,
    pub embeddings: EmbeddingSettings,
    pub neo4j: Neo4jSettings,
    pub output: OutputSettings,
}

// === YAML structures ===

#[derive(Debug, Default, Deserialize)]
struct YamlConfig {
    llm: Option<YamlLlm>,
    extraction: Option<YamlExtraction>,
    embeddings: Option<YamlEmbeddings>,
    neo4j: Option<YamlNeo4j>,
    output: Option<YamlOutput>,
}

#[derive(Debug, Default, Deserialize)]
struct YamlLlm {
    providers: Option<Vec<YamlProvider>>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    retry_base_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct YamlProvider {
    kind: ProviderKind,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct YamlExtraction {
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
    chunking: Option<ChunkingStrategy>,
    parse_attempts: Option<u32>,
    id_strategy: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct YamlEmbeddings {
    backend: Option<EmbeddingBackend>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    dimension: Option<usize>,
    local_dimension: Option<usize>,
    batch_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct YamlNeo4j {
    uri: Option<String>,
    user: Option<String>,
    password: Option<String>,
    database: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct YamlOutput {
    dir: Option<String>,
    graphml_layout: Option<bool>,
}

impl Config {
    /// Load from an explicit path, `DOCGRAPH_CONFIG`, `config.yml`, or the
    /// environment, in that order.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_dotenv();

        if let Some(path) = path {
            return Self::load_from_file(path);
        }
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            return Self::load_from_file(env_path);
        }
        if Path::new(CONFIG_FILE).exists() {
            return Self::load_from_file(CONFIG_FILE);
        }

        debug!("No {} found, using environment defaults", CONFIG_FILE);
        Ok(Self::from_env())
    }

    /// Load .env file into environment variables using dotenvy
    fn load_dotenv() {
        if dotenvy::dotenv().is_err() {
            let _ = dotenvy::from_filename("../.env");
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let config = Self::from_yaml_str(&content)?;
        info!("Loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    /// Parse YAML; sections that are absent fall back to environment defaults.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let yaml: YamlConfig = serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;
        let env = Self::from_env();

        let llm = match yaml.llm {
            Some(section) => Self::llm_from_yaml(section, env.llm)?,
            None => env.llm,
        };
        let extraction = match yaml.extraction {
            Some(section) => Self::extraction_from_yaml(section)?,
            None => env.extraction,
        };
        let embeddings = match yaml.embeddings {
            Some(section) => Self::embeddings_from_yaml(section, env.embeddings),
            None => env.embeddings,
        };
        let neo4j = match yaml.neo4j {
            Some(section) => Neo4jSettings {
                uri: resolve_env(section.uri).unwrap_or(env.neo4j.uri),
                user: resolve_env(section.user).unwrap_or(env.neo4j.user),
                password: resolve_env(section.password).or(env.neo4j.password),
                database: resolve_env(section.database).or(env.neo4j.database),
            },
            None => env.neo4j,
        };
        let output = match yaml.output {
            Some(section) => OutputSettings {
                dir: resolve_env(section.dir)
                    .map(PathBuf::from)
                    .unwrap_or(env.output.dir),
                graphml_layout: section.graphml_layout.unwrap_or(true),
            },
            None => env.output,
        };

        Ok(Self {
            llm,
            extraction,
            embeddings,
            neo4j,
            output,
        })
    }

    fn llm_from_yaml(section: YamlLlm, env: LlmSettings) -> Result<LlmSettings> {
        let providers = match section.providers {
            Some(list) => list
                .into_iter()
                .filter_map(|p| {
                    let api_key = resolve_env(p.api_key);
                    if p.kind.requires_key() && api_key.is_none() {
                        debug!("Skipping {} provider without API key", p.kind.name());
                        return None;
                    }
                    let mut settings = ProviderSettings::new(p.kind, api_key);
                    if let Some(url) = resolve_env(p.base_url) {
                        settings.base_url = url;
                    }
                    if let Some(model) = resolve_env(p.model) {
                        settings.model = model;
                    }
                    Some(settings)
                })
                .collect(),
            None => env.providers,
        };

        let temperature = section.temperature.unwrap_or(DEFAULT_TEMPERATURE);
        if !(0.0..=2.0).contains(&temperature) {
            return Err(Error::Config(format!(
                "llm.temperature must be within 0..2, got {}",
                temperature
            )));
        }

        Ok(LlmSettings {
            providers,
            temperature,
            max_tokens: section.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            timeout_secs: section.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            max_retries: section.max_retries.unwrap_or(DEFAULT_MAX_RETRIES).max(1),
            retry_base_delay_ms: section
                .retry_base_delay_ms
                .unwrap_or(DEFAULT_RETRY_BASE_DELAY_MS),
        })
    }

    fn extraction_from_yaml(section: YamlExtraction) -> Result<ExtractionSettings> {
        let id_strategy = match section.id_strategy {
            Some(raw) => IdStrategy::parse(&raw).ok_or_else(|| {
                Error::Config(format!(
                    "extraction.id_strategy must be 'random' or 'content', got '{}'",
                    raw
                ))
            })?,
            None => IdStrategy::Random,
        };
        let chunk_size = section.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE);
        let chunk_overlap = section.chunk_overlap.unwrap_or(DEFAULT_CHUNK_OVERLAP);
        if chunk_size == 0 || chunk_overlap >= chunk_size {
            return Err(Error::Config(format!(
                "extraction.chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }

        Ok(ExtractionSettings {
            chunk_size,
            chunk_overlap,
            chunking: section.chunking.unwrap_or_default(),
            parse_attempts: section.parse_attempts.unwrap_or(DEFAULT_PARSE_ATTEMPTS).max(1),
            id_strategy,
        })
    }

    fn embeddings_from_yaml(section: YamlEmbeddings, env: EmbeddingSettings) -> EmbeddingSettings {
        let api_key = resolve_env(section.api_key).or(env.api_key);
        let backend = section.backend.unwrap_or(if api_key.is_some() {
            EmbeddingBackend::OpenAi
        } else {
            EmbeddingBackend::Local
        });
        EmbeddingSettings {
            backend,
            api_key,
            base_url: resolve_env(section.base_url).or(env.base_url),
            model: resolve_env(section.model).unwrap_or(env.model),
            dimension: section.dimension.unwrap_or(env.dimension),
            local_dimension: section.local_dimension.unwrap_or(env.local_dimension),
            batch_size: section.batch_size.unwrap_or(env.batch_size).max(1),
        }
    }

    /// Defaults derived from the environment.
    pub fn from_env() -> Self {
        let mut providers = Vec::new();
        for (kind, key) in [
            (ProviderKind::Gemini, "GOOGLE_API_KEY"),
            (ProviderKind::Groq, "GROQ_API_KEY"),
            (ProviderKind::OpenAi, "OPENAI_API_KEY"),
        ] {
            if let Some(api_key) = env_non_empty(key) {
                providers.push(ProviderSettings::new(kind, Some(api_key)));
            }
        }
        if let Some(url) = env_non_empty("OLLAMA_URL") {
            let mut ollama = ProviderSettings::new(ProviderKind::Ollama, None);
            ollama.base_url = url;
            providers.push(ollama);
        }

        let openai_key = env_non_empty("OPENAI_API_KEY");
        let embeddings = EmbeddingSettings {
            backend: if openai_key.is_some() {
                EmbeddingBackend::OpenAi
            } else {
                EmbeddingBackend::Local
            },
            api_key: openai_key,
            ..EmbeddingSettings::default()
        };

        let neo4j = Neo4jSettings {
            uri: env_non_empty("NEO4J_URI").unwrap_or_else(|| DEFAULT_NEO4J_URI.to_string()),
            user: env_non_empty("NEO4J_USER").unwrap_or_else(|| DEFAULT_NEO4J_USER.to_string()),
            password: env_non_empty("NEO4J_PASSWORD"),
            database: env_non_empty("NEO4J_DATABASE"),
        };

        Self {
            llm: LlmSettings {
                providers,
                ..LlmSettings::default()
            },
            extraction: ExtractionSettings::default(),
            embeddings,
            neo4j,
            output: OutputSettings::default(),
        }
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Resolve a value: `${VAR}` reads the environment, anything else is taken
/// as is. Unset variables and empty strings resolve to `None`.
fn resolve_env(value: Option<String>) -> Option<String> {
    let value = value?;
    let trimmed = value.trim();
    if let Some(var_name) = trimmed
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
    {
        return env_non_empty(var_name);
    }
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
