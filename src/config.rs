use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Environment override tracking
// ---------------------------------------------------------------------------

/// Tracks which configuration settings are overridden by environment
/// variables, so logs and diagnostics can show where a value came from.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    overrides: HashMap<String, String>,
}

impl EnvOverrides {
    /// Check whether a setting key (e.g. "server.host") is overridden.
    pub fn is_overridden(&self, key: &str) -> bool {
        self.overrides.contains_key(key)
    }

    /// Get the env var name that overrides the given setting key.
    pub fn env_var_for(&self, key: &str) -> Option<&str> {
        self.overrides.get(key).map(String::as_str)
    }

    fn record(&mut self, key: &str, env_var: &str) {
        self.overrides.insert(key.to_string(), env_var.to_string());
    }
}

// ---------------------------------------------------------------------------
// Main configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Env var overrides are not serialized to TOML.
    #[serde(skip)]
    pub env_overrides: EnvOverrides,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_base_url")]
    pub base_url: String,
    /// Bearer credential. Usually supplied via `PERPLEXITY_API_KEY`;
    /// its absence is only reported when an operation is invoked.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_ask_model")]
    pub ask_model: String,
    #[serde(default = "default_deep_research_model")]
    pub deep_research_model: String,
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,
    /// Wall-clock budget for a streamed completion, in seconds.
    #[serde(default = "default_stream_deadline_secs")]
    pub stream_deadline_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_upstream_base_url(),
            api_key: None,
            ask_model: default_ask_model(),
            deep_research_model: default_deep_research_model(),
            default_max_tokens: default_max_tokens(),
            stream_deadline_secs: default_stream_deadline_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_base_url")]
    pub base_url: String,
    /// Vendor identity reported on every settlement.
    #[serde(default = "default_vendor_id")]
    pub vendor_id: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            base_url: default_ledger_base_url(),
            vendor_id: default_vendor_id(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_host() -> String {
    "127.0.0.1".to_string()
}
const fn default_port() -> u16 {
    8410
}
fn default_upstream_base_url() -> String {
    "https://api.perplexity.ai".to_string()
}
fn default_ask_model() -> String {
    "sonar".to_string()
}
fn default_deep_research_model() -> String {
    "sonar-deep-research".to_string()
}
const fn default_max_tokens() -> u32 {
    8_192
}
const fn default_stream_deadline_secs() -> u64 {
    55
}
fn default_ledger_base_url() -> String {
    "http://127.0.0.1:8420".to_string()
}
fn default_vendor_id() -> String {
    "sonargate".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("sonargate.db")
}
fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Config loading and env overrides
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a TOML file, then apply environment variable
    /// overrides. Any setting with a `SONARGATE_*` env var (plus
    /// `PERPLEXITY_API_KEY` for the credential) takes precedence over the
    /// file value and is tracked in `env_overrides`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Validate constraints the serde defaults cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        url::Url::parse(&self.upstream.base_url)
            .map_err(|e| anyhow::anyhow!("invalid upstream.base_url: {e}"))?;
        url::Url::parse(&self.ledger.base_url)
            .map_err(|e| anyhow::anyhow!("invalid ledger.base_url: {e}"))?;
        if self.upstream.stream_deadline_secs == 0 {
            anyhow::bail!("upstream.stream_deadline_secs must be positive");
        }
        Ok(())
    }

    /// Apply environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        let mut ov = EnvOverrides::default();

        macro_rules! env_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = val;
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_parse {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    if let Ok(parsed) = val.parse() {
                        $field = parsed;
                        ov.record($key, $env);
                    }
                }
            };
        }
        macro_rules! env_opt_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = if val.is_empty() { None } else { Some(val) };
                    ov.record($key, $env);
                }
            };
        }

        // -- Server --
        env_str!("server.host", "SONARGATE_SERVER_HOST", self.server.host);
        env_parse!("server.port", "SONARGATE_SERVER_PORT", self.server.port);

        // -- Upstream --
        env_str!(
            "upstream.base_url",
            "SONARGATE_UPSTREAM_URL",
            self.upstream.base_url
        );
        env_opt_str!(
            "upstream.api_key",
            "PERPLEXITY_API_KEY",
            self.upstream.api_key
        );
        env_str!(
            "upstream.ask_model",
            "SONARGATE_ASK_MODEL",
            self.upstream.ask_model
        );
        env_str!(
            "upstream.deep_research_model",
            "SONARGATE_DEEP_RESEARCH_MODEL",
            self.upstream.deep_research_model
        );
        env_parse!(
            "upstream.default_max_tokens",
            "SONARGATE_DEFAULT_MAX_TOKENS",
            self.upstream.default_max_tokens
        );
        env_parse!(
            "upstream.stream_deadline_secs",
            "SONARGATE_STREAM_DEADLINE_SECS",
            self.upstream.stream_deadline_secs
        );

        // -- Ledger --
        env_str!(
            "ledger.base_url",
            "SONARGATE_LEDGER_URL",
            self.ledger.base_url
        );
        env_str!(
            "ledger.vendor_id",
            "SONARGATE_VENDOR_ID",
            self.ledger.vendor_id
        );

        // -- Store --
        if let Ok(val) = std::env::var("SONARGATE_STORE_PATH") {
            self.store.path = PathBuf::from(val);
            ov.record("store.path", "SONARGATE_STORE_PATH");
        }

        // -- Logging --
        env_str!("logging.level", "SONARGATE_LOG_LEVEL", self.logging.level);

        self.env_overrides = ov;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
