use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::GraphError;

// ---------------------------------------------------------------------------
// Environment override tracking
// ---------------------------------------------------------------------------

/// Tracks which configuration settings are overridden by environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    overrides: HashMap<String, String>,
}

impl EnvOverrides {
    /// Check whether a setting key (e.g. "auth.tenant") is overridden by an env var.
    pub fn is_overridden(&self, key: &str) -> bool {
        self.overrides.contains_key(key)
    }

    /// Get the env var name that overrides the given setting key.
    pub fn env_var_for(&self, key: &str) -> Option<&str> {
        self.overrides.get(key).map(String::as_str)
    }

    pub fn all(&self) -> &HashMap<String, String> {
        &self.overrides
    }

    fn record(&mut self, key: &str, env_var: &str) {
        self.overrides.insert(key.to_string(), env_var.to_string());
    }
}

// ---------------------------------------------------------------------------
// Main configuration
// ---------------------------------------------------------------------------

/// Session configuration. Treated as immutable once a session is built.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub chaos: ChaosConfig,
    #[serde(default)]
    pub interactive: InteractiveConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Env var overrides are not serialized to TOML.
    #[serde(skip)]
    pub env_overrides: EnvOverrides,
}

/// How the session obtains its bearer token.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Username/password. Not supported by Graph app registrations; always fails.
    Basic,
    /// Confidential client using a secret or a certificate (application permissions).
    #[default]
    #[serde(alias = "app_permissions")]
    ClientCredentials,
    /// Browser sign-in with a loopback redirect (delegated permissions).
    #[serde(alias = "delegated_permissions")]
    Interactive,
    /// Token pair issued elsewhere and persisted in the token file.
    #[serde(alias = "jwt_access_token")]
    ExternalJwt,
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Basic => write!(f, "basic"),
            Self::ClientCredentials => write!(f, "client_credentials"),
            Self::Interactive => write!(f, "interactive"),
            Self::ExternalJwt => write!(f, "external_jwt"),
        }
    }
}

impl FromStr for AuthMethod {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "basic" => Ok(Self::Basic),
            "client_credentials" | "app_permissions" | "oauthapppermissions" => {
                Ok(Self::ClientCredentials)
            }
            "interactive" | "delegated_permissions" | "oauthdelegatedpermissions" => {
                Ok(Self::Interactive)
            }
            "external_jwt" | "jwt_access_token" | "oauthjwtaccesstoken" => Ok(Self::ExternalJwt),
            _ => Err(format!("Unknown auth method: {s}")),
        }
    }
}

#[derive(Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub method: AuthMethod,
    /// Authority template; `{tenant}` (or `{0}`) is replaced by the tenant.
    #[serde(default = "default_instance")]
    pub instance: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default)]
    pub tenant: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// PEM bundle holding the certificate and its RSA private key.
    #[serde(default)]
    pub certificate_path: Option<PathBuf>,
    #[serde(default = "default_token_path")]
    pub token_path: PathBuf,
    /// Base64 AES-256 key for the token file. Generated into
    /// `{token_path}.key` when unset.
    #[serde(default)]
    pub token_key: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("method", &self.method)
            .field("instance", &self.instance)
            .field("api_url", &self.api_url)
            .field("api_version", &self.api_version)
            .field("tenant", &self.tenant)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &if self.client_secret.is_empty() { "" } else { "[REDACTED]" },
            )
            .field("certificate_path", &self.certificate_path)
            .field("token_path", &self.token_path)
            .field("token_key", &self.token_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl AuthConfig {
    /// Authority URL with the tenant substituted and no trailing slash.
    pub fn authority(&self) -> String {
        self.instance
            .replace("{tenant}", &self.tenant)
            .replace("{0}", &self.tenant)
            .trim_end_matches('/')
            .to_string()
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}/oauth2/v2.0/token", self.authority())
    }

    pub fn authorize_endpoint(&self) -> String {
        format!("{}/oauth2/v2.0/authorize", self.authority())
    }

    /// The `.default` scope for application permissions on the API.
    pub fn default_scope(&self) -> String {
        format!("{}/.default", self.api_url.trim_end_matches('/'))
    }

    /// Base for relative Graph request paths, e.g. `https://graph.microsoft.com/v1.0/`.
    pub fn api_base(&self) -> String {
        format!(
            "{}/{}/",
            self.api_url.trim_end_matches('/'),
            self.api_version.trim_matches('/')
        )
    }

    pub fn has_client_secret(&self) -> bool {
        !self.client_secret.trim().is_empty()
    }

    pub fn has_certificate(&self) -> bool {
        self.certificate_path
            .as_ref()
            .is_some_and(|p| !p.as_os_str().is_empty())
    }

    pub fn token_key_path(&self) -> PathBuf {
        let mut name = self.token_path.as_os_str().to_owned();
        name.push(".key");
        PathBuf::from(name)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            method: AuthMethod::default(),
            instance: default_instance(),
            api_url: default_api_url(),
            api_version: default_api_version(),
            tenant: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            certificate_path: None,
            token_path: default_token_path(),
            token_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub default_delay_secs: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            default_delay_secs: default_retry_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Timeout for the transfer client used by large downloads and uploads.
    #[serde(default = "default_transfer_timeout_secs")]
    pub transfer_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            transfer_timeout_secs: default_transfer_timeout_secs(),
        }
    }
}

/// Synthetic failure injection for exercising throttling paths.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChaosConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_chaos_percent")]
    pub percent: u8,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            percent: default_chaos_percent(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InteractiveConfig {
    /// Loopback port for the redirect. `0` picks a free port.
    #[serde(default)]
    pub redirect_port: u16,
    #[serde(default = "default_interactive_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_delegated_scopes")]
    pub scopes: Vec<String>,
    /// Write the signed-in token pair to `auth.token_path`.
    #[serde(default)]
    pub persist_token: bool,
}

impl Default for InteractiveConfig {
    fn default() -> Self {
        Self {
            redirect_port: 0,
            timeout_secs: default_interactive_timeout_secs(),
            scopes: default_delegated_scopes(),
            persist_token: false,
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

fn default_instance() -> String {
    "https://login.microsoftonline.com/{tenant}".to_string()
}
fn default_api_url() -> String {
    "https://graph.microsoft.com/".to_string()
}
fn default_api_version() -> String {
    "v1.0".to_string()
}
fn default_token_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("graph-gate")
        .join("token.json")
}
const fn default_max_attempts() -> u32 {
    crate::retry::DEFAULT_MAX_ATTEMPTS
}
const fn default_retry_delay_secs() -> u64 {
    1
}
const fn default_max_delay_secs() -> u64 {
    300
}
const fn default_connect_timeout_secs() -> u64 {
    10
}
const fn default_request_timeout_secs() -> u64 {
    100
}
const fn default_transfer_timeout_secs() -> u64 {
    3 * 60 * 60
}
const fn default_chaos_percent() -> u8 {
    50
}
const fn default_interactive_timeout_secs() -> u64 {
    300
}
fn default_delegated_scopes() -> Vec<String> {
    [
        "Files.Read.All",
        "Group.Read.All",
        "Sites.Read.All",
        "User.Read.All",
        "Mail.Read.Shared",
    ]
    .iter()
    .map(|s| format!("https://graph.microsoft.com/{s}"))
    .chain(std::iter::once("offline_access".to_string()))
    .collect()
}
fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Config loading, env overrides, validation
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a TOML file, then apply environment variable
    /// overrides. Any setting prefixed with `GRAPH_GATE_` takes precedence over
    /// the file value and is tracked in `env_overrides`.
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

    /// Check that the selected auth method has everything it needs.
    ///
    /// Runs before any network activity so misconfiguration fails fast.
    pub fn validate(&self) -> Result<(), GraphError> {
        let auth = &self.auth;

        if self.chaos.percent > 100 {
            return Err(GraphError::Config(format!(
                "chaos.percent must be between 0 and 100, got {}",
                self.chaos.percent
            )));
        }

        if auth.method == AuthMethod::Basic {
            return Ok(());
        }

        if auth.tenant.trim().is_empty() {
            return Err(GraphError::Config("auth.tenant is required".into()));
        }
        if auth.client_id.trim().is_empty() {
            return Err(GraphError::Config("auth.client_id is required".into()));
        }

        match auth.method {
            AuthMethod::ClientCredentials if !auth.has_client_secret() && !auth.has_certificate() => {
                Err(GraphError::Config(
                    "choose either a client secret or a certificate for client credentials".into(),
                ))
            }
            AuthMethod::ExternalJwt if auth.token_path.as_os_str().is_empty() => Err(
                GraphError::Config("auth.token_path is required for external_jwt".into()),
            ),
            _ => Ok(()),
        }
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
        macro_rules! env_bool {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
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
        macro_rules! env_path {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = PathBuf::from(val);
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_opt_path {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = if val.is_empty() { None } else { Some(PathBuf::from(val)) };
                    ov.record($key, $env);
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

        // -- Auth --
        env_parse!("auth.method", "GRAPH_GATE_AUTH_METHOD", self.auth.method);
        env_str!("auth.instance", "GRAPH_GATE_INSTANCE", self.auth.instance);
        env_str!("auth.api_url", "GRAPH_GATE_API_URL", self.auth.api_url);
        env_str!("auth.tenant", "GRAPH_GATE_TENANT", self.auth.tenant);
        env_str!("auth.client_id", "GRAPH_GATE_CLIENT_ID", self.auth.client_id);
        env_str!(
            "auth.client_secret",
            "GRAPH_GATE_CLIENT_SECRET",
            self.auth.client_secret
        );
        env_opt_path!(
            "auth.certificate_path",
            "GRAPH_GATE_CERTIFICATE_PATH",
            self.auth.certificate_path
        );
        env_path!("auth.token_path", "GRAPH_GATE_TOKEN_PATH", self.auth.token_path);
        env_opt_str!("auth.token_key", "GRAPH_GATE_TOKEN_KEY", self.auth.token_key);

        // -- Retry --
        env_parse!(
            "retry.max_attempts",
            "GRAPH_GATE_RETRY_MAX_ATTEMPTS",
            self.retry.max_attempts
        );
        env_parse!(
            "retry.default_delay_secs",
            "GRAPH_GATE_RETRY_DELAY_SECS",
            self.retry.default_delay_secs
        );

        // -- HTTP --
        env_parse!(
            "http.request_timeout_secs",
            "GRAPH_GATE_HTTP_TIMEOUT_SECS",
            self.http.request_timeout_secs
        );
        env_parse!(
            "http.transfer_timeout_secs",
            "GRAPH_GATE_HTTP_TRANSFER_TIMEOUT_SECS",
            self.http.transfer_timeout_secs
        );

        // -- Chaos --
        env_bool!("chaos.enabled", "GRAPH_GATE_CHAOS_ENABLED", self.chaos.enabled);
        env_parse!("chaos.percent", "GRAPH_GATE_CHAOS_PERCENT", self.chaos.percent);

        // -- Interactive --
        env_parse!(
            "interactive.redirect_port",
            "GRAPH_GATE_REDIRECT_PORT",
            self.interactive.redirect_port
        );

        // -- Logging --
        env_str!("logging.level", "GRAPH_GATE_LOG_LEVEL", self.logging.level);
        env_bool!("logging.json", "GRAPH_GATE_LOG_JSON", self.logging.json);

        self.env_overrides = ov;
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auth: AuthConfig::default(),
            retry: RetryConfig::default(),
            http: HttpConfig::default(),
            chaos: ChaosConfig::default(),
            interactive: InteractiveConfig::default(),
            logging: LoggingConfig::default(),
            env_overrides: EnvOverrides::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
