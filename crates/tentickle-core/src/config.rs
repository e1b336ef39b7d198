use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const PROTOCOL_VERSION: u32 = 1;
pub const DEFAULT_PORT: u16 = 18790;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const MAX_PAYLOAD_BYTES: usize = 128 * 1024; // 128 KB hard cap per frame
pub const MAX_BUFFERED_BYTES: usize = 1024 * 1024; // 1 MB: slow consumer threshold
pub const HANDSHAKE_TIMEOUT_MS: u64 = 10_000; // close if client doesn't auth in 10s
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30; // tick event cadence
pub const DAEMON_GRACE_PERIOD_SECS: u64 = 5; // drain window on SIGTERM (spec §4.2)
pub const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 120; // spec §5
pub const GIT_PROBE_TIMEOUT_SECS: u64 = 3; // spec §5

/// Top-level config (`tentickle.toml` + `TENTICKLE_*` env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TentickleConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    /// Opaque per-plugin config blobs, keyed by channel/plugin name. Kept
    /// generic because connector protocol parsing is out of scope (spec §1)
    /// — concrete plugins own their own config schema.
    #[serde(default)]
    pub channels: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl Default for TentickleConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            agent: AgentConfig::default(),
            database: DatabaseConfig::default(),
            providers: ProvidersConfig::default(),
            channels: HashMap::new(),
            memory: MemoryConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Unix socket path override. Defaults to `<data_dir>/daemon.sock`.
    pub socket_path: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            auth: AuthConfig::default(),
            socket_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    pub token: Option<String>,
    pub password: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::None,
            token: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    Token,
    Password,
    TrustedProxy,
    #[default]
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_model")]
    pub model: String,
    /// Absolute ceiling on ticks per execution (spec §9 open question 1:
    /// `maxTicks` is an absolute ceiling regardless of continuation policy).
    #[serde(default = "default_max_ticks")]
    pub max_ticks: u32,
    #[serde(default = "default_model_timeout_secs")]
    pub model_timeout_secs: u64,
    #[serde(default = "default_model_retries")]
    pub model_retries: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_ticks: default_max_ticks(),
            model_timeout_secs: default_model_timeout_secs(),
            model_retries: default_model_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    pub anthropic: Option<AnthropicConfig>,
    pub openai: Option<OpenAiProviderConfig>,
    pub ollama: Option<OllamaConfig>,
    /// Additional OpenAI-compatible providers, tried in order after the
    /// primary slots above.
    #[serde(default)]
    pub openai_compat: Vec<OpenAiCompatEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiCompatEntry {
    pub id: String,
    pub api_key: String,
    pub base_url: String,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiProviderConfig {
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    pub api_key: String,
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
}

/// Memory subsystem configuration (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Enables vector search and dedup-on-write. FTS-only recall when false.
    #[serde(default)]
    pub vector_search_enabled: bool,
    /// Vector dimensionality; must match the embedding provider.
    #[serde(default = "default_vector_dim")]
    pub vector_dim: usize,
    /// Time-decay lambda, default 0.005 (spec §4.5 step 5). 0 disables decay.
    #[serde(default = "default_decay_lambda")]
    pub decay_lambda: f64,
    /// Cosine similarity dedup threshold, default 0.90. 0 disables dedup.
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f64,
    /// Backfill batch size for un-embedded memories, default 10.
    #[serde(default = "default_backfill_batch")]
    pub backfill_batch: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            vector_search_enabled: false,
            vector_dim: default_vector_dim(),
            decay_lambda: default_decay_lambda(),
            dedup_threshold: default_dedup_threshold(),
            backfill_batch: default_backfill_batch(),
        }
    }
}

/// Scheduler configuration (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_jobs_dir")]
    pub jobs_dir: String,
    #[serde(default = "default_triggers_dir")]
    pub triggers_dir: String,
    /// Default target session key for triggers that don't specify one.
    pub default_target: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            jobs_dir: default_jobs_dir(),
            triggers_dir: default_triggers_dir(),
            default_target: None,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_model() -> String {
    "claude-sonnet-4-6".to_string()
}
fn default_max_ticks() -> u32 {
    50
}
fn default_model_timeout_secs() -> u64 {
    DEFAULT_MODEL_TIMEOUT_SECS
}
fn default_model_retries() -> u32 {
    3
}
fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_vector_dim() -> usize {
    1536
}
fn default_decay_lambda() -> f64 {
    0.005
}
fn default_dedup_threshold() -> f64 {
    0.90
}
fn default_backfill_batch() -> usize {
    10
}
fn default_db_path() -> String {
    format!("{}/tentickle.db", data_dir())
}
fn default_jobs_dir() -> String {
    format!("{}/jobs", data_dir())
}
fn default_triggers_dir() -> String {
    format!("{}/triggers", data_dir())
}

/// Platform-conventional data directory: `~/.tentickle`.
pub fn data_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.tentickle")
}

impl TentickleConfig {
    /// Load config from a TOML file with `TENTICKLE_*` env var overrides.
    ///
    /// Checks, in order: an explicit path argument, then
    /// `~/.tentickle/tentickle.toml`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: TentickleConfig = Figment::from(Serialized::defaults(
            TentickleConfig::default(),
        ))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("TENTICKLE_").split("_"))
        .extract()
        .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    format!("{}/tentickle.toml", data_dir())
}
