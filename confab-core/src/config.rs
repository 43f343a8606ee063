// ABOUTME: Configuration loading and validation for confab
// ABOUTME: Loads from a TOML file with env var overrides for every tunable

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub line: LineConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct LineConfig {
    /// Channel access token for the messaging API. Required.
    #[serde(default)]
    pub channel_access_token: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            channel_access_token: String::new(),
            api_base: default_api_base(),
        }
    }
}

// Manual Debug so the token never lands in logs.
impl std::fmt::Debug for LineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineConfig")
            .field("channel_access_token", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .finish()
    }
}

/// How settled bursts are handed to the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchMode {
    /// One backend call per merged turn
    #[default]
    Turn,
    /// One backend call per buffered event; the backend serializes them
    /// itself and every image gets its own fetchable message id
    PerEvent,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Command to execute for each dispatch. Required.
    #[serde(default)]
    pub command: String,
    /// Fixed arguments placed before the positional contract
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_backend_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub dispatch_mode: DispatchMode,
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            timeout_secs: default_backend_timeout_secs(),
            dispatch_mode: DispatchMode::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_dedup_ttl_ms")]
    pub dedup_ttl_ms: u64,
}

impl PipelineConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_millis(self.dedup_ttl_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            dedup_ttl_ms: default_dedup_ttl_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccessConfig {
    /// Conversation ids whose messages carry the write flag
    #[serde(default)]
    pub allowed_conversations: Vec<String>,
    /// Conversation id to project work directory
    #[serde(default)]
    pub projects: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LivenessConfig {
    /// Refresh cadence; must stay under the indicator duration so the
    /// indicator never lapses between refreshes
    #[serde(default = "default_liveness_refresh_secs")]
    pub refresh_secs: u64,
    #[serde(default = "default_liveness_duration_secs")]
    pub duration_secs: u64,
}

impl LivenessConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }

    pub fn indicator_duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            refresh_secs: default_liveness_refresh_secs(),
            duration_secs: default_liveness_duration_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_chunks: default_max_chunks(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_api_base() -> String {
    "https://api.line.me/v2/bot".to_string()
}

fn default_backend_timeout_secs() -> u64 {
    300
}

fn default_debounce_ms() -> u64 {
    3000
}

fn default_dedup_ttl_ms() -> u64 {
    300_000
}

fn default_liveness_refresh_secs() -> u64 {
    55
}

fn default_liveness_duration_secs() -> u64 {
    60
}

fn default_chunk_size() -> usize {
    2000
}

fn default_max_chunks() -> usize {
    5
}

impl Config {
    /// Loads config from the discovered file (CONFAB_CONFIG_PATH, then
    /// ./config.toml), then applies env var overrides. Works with no file
    /// at all when env vars supply the required values.
    pub fn load() -> Result<Self> {
        Self::load_from(find_config_file().as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut config: Config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                toml::from_str(&contents)
                    .with_context(|| format!("failed to parse config file {}", path.display()))?
            }
            None => Config::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.line.channel_access_token.is_empty() {
            bail!("line.channel_access_token is required (or set LINE_CHANNEL_ACCESS_TOKEN)");
        }
        if self.backend.command.is_empty() {
            bail!("backend.command is required (or set BACKEND_COMMAND)");
        }
        if self.backend.timeout_secs == 0 {
            bail!("backend.timeout_secs must be positive");
        }
        if self.pipeline.debounce_ms == 0 {
            bail!("pipeline.debounce_ms must be positive");
        }
        if self.delivery.chunk_size == 0 {
            bail!("delivery.chunk_size must be positive");
        }
        if self.delivery.max_chunks == 0 {
            bail!("delivery.max_chunks must be positive");
        }
        if self.liveness.refresh_secs >= self.liveness.duration_secs {
            bail!("liveness.refresh_secs must be shorter than liveness.duration_secs");
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("HOST") {
            self.server.host = host;
        }
        if let Some(port) = env_parse::<u16>("PORT") {
            self.server.port = port;
        }
        if let Ok(token) = std::env::var("LINE_CHANNEL_ACCESS_TOKEN") {
            self.line.channel_access_token = token;
        }
        if let Ok(base) = std::env::var("LINE_API_BASE") {
            self.line.api_base = base;
        }
        if let Ok(command) = std::env::var("BACKEND_COMMAND") {
            self.backend.command = command;
        }
        if let Ok(args) = std::env::var("BACKEND_ARGS") {
            self.backend.args = parse_list(&args);
        }
        if let Some(secs) = env_parse::<u64>("BACKEND_TIMEOUT_SECS") {
            self.backend.timeout_secs = secs;
        }
        if let Ok(mode) = std::env::var("DISPATCH_MODE") {
            match mode.as_str() {
                "turn" => self.backend.dispatch_mode = DispatchMode::Turn,
                "per-event" => self.backend.dispatch_mode = DispatchMode::PerEvent,
                other => tracing::warn!(mode = %other, "ignoring unknown DISPATCH_MODE"),
            }
        }
        if let Some(ms) = env_parse::<u64>("DEBOUNCE_MS") {
            self.pipeline.debounce_ms = ms;
        }
        if let Some(ms) = env_parse::<u64>("DEDUP_TTL_MS") {
            self.pipeline.dedup_ttl_ms = ms;
        }
        if let Ok(allowed) = std::env::var("ALLOWED_CONVERSATIONS") {
            self.access.allowed_conversations = parse_list(&allowed);
        }
        if let Ok(projects) = std::env::var("PROJECT_MAP") {
            self.access.projects = parse_project_map(&projects);
        }
        if let Some(secs) = env_parse::<u64>("LIVENESS_REFRESH_SECS") {
            self.liveness.refresh_secs = secs;
        }
        if let Some(secs) = env_parse::<u64>("LIVENESS_DURATION_SECS") {
            self.liveness.duration_secs = secs;
        }
        if let Some(size) = env_parse::<usize>("CHUNK_SIZE") {
            self.delivery.chunk_size = size;
        }
        if let Some(count) = env_parse::<usize>("MAX_CHUNKS") {
            self.delivery.max_chunks = count;
        }
    }
}

fn find_config_file() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CONFAB_CONFIG_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
        tracing::warn!(path = %path.display(), "CONFAB_CONFIG_PATH points at a missing file");
    }

    let local = PathBuf::from("config.toml");
    if local.exists() {
        return Some(local);
    }

    None
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring unparseable env override");
            None
        }
    }
}

/// Comma-separated list, entries trimmed, empties dropped.
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|entry| entry.trim().to_string())
        .filter(|entry| !entry.is_empty())
        .collect()
}

/// Comma-separated `conversation=path` pairs; malformed pairs are dropped.
fn parse_project_map(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (id, path) = pair.split_once('=')?;
            let id = id.trim();
            let path = path.trim();
            if id.is_empty() || path.is_empty() {
                return None;
            }
            Some((id.to_string(), path.to_string()))
        })
        .collect()
}
