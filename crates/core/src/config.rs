use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub marketplace: MarketplaceConfig,
    pub llm: LlmConfig,
    pub billing: BillingConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// OAuth and API endpoints of the external marketplace plus our client
/// registration with it.
#[derive(Clone, Debug)]
pub struct MarketplaceConfig {
    pub auth_url: String,
    pub token_url: String,
    pub api_url: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_uri: String,
    pub scope: String,
    pub webhook_base_url: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub max_attempts: u32,
}

#[derive(Clone, Debug)]
pub struct BillingConfig {
    pub bot_daily_cost_cents: i64,
    pub sweep_interval_secs: u64,
    pub trial_days: u32,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub marketplace_client_id: Option<String>,
    pub marketplace_client_secret: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_model: Option<String>,
    pub bot_daily_cost_cents: Option<i64>,
    pub sweep_interval_secs: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://marketbot.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            marketplace: MarketplaceConfig {
                auth_url: "https://marketplace.example/oauth".to_string(),
                token_url: "https://marketplace.example/token".to_string(),
                api_url: "https://api.marketplace.example".to_string(),
                client_id: String::new(),
                client_secret: String::new().into(),
                redirect_uri: "http://localhost:8088/oauth/marketplace/callback".to_string(),
                scope: "messenger:read,messenger:write,items:info".to_string(),
                webhook_base_url: "http://localhost:8088".to_string(),
                timeout_secs: 30,
            },
            llm: LlmConfig {
                base_url: "http://localhost:11434/v1".to_string(),
                api_key: None,
                model: "llama3.1".to_string(),
                temperature: 1.0,
                timeout_secs: 30,
                max_attempts: 2,
            },
            billing: BillingConfig {
                bot_daily_cost_cents: 5_000,
                sweep_interval_secs: 86_400,
                trial_days: 14,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8088,
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("marketbot.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(marketplace) = patch.marketplace {
            if let Some(auth_url) = marketplace.auth_url {
                self.marketplace.auth_url = auth_url;
            }
            if let Some(token_url) = marketplace.token_url {
                self.marketplace.token_url = token_url;
            }
            if let Some(api_url) = marketplace.api_url {
                self.marketplace.api_url = api_url;
            }
            if let Some(client_id) = marketplace.client_id {
                self.marketplace.client_id = client_id;
            }
            if let Some(client_secret_value) = marketplace.client_secret {
                self.marketplace.client_secret = secret_value(client_secret_value);
            }
            if let Some(redirect_uri) = marketplace.redirect_uri {
                self.marketplace.redirect_uri = redirect_uri;
            }
            if let Some(scope) = marketplace.scope {
                self.marketplace.scope = scope;
            }
            if let Some(webhook_base_url) = marketplace.webhook_base_url {
                self.marketplace.webhook_base_url = webhook_base_url;
            }
            if let Some(timeout_secs) = marketplace.timeout_secs {
                self.marketplace.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_attempts) = llm.max_attempts {
                self.llm.max_attempts = max_attempts;
            }
        }

        if let Some(billing) = patch.billing {
            if let Some(bot_daily_cost_cents) = billing.bot_daily_cost_cents {
                self.billing.bot_daily_cost_cents = bot_daily_cost_cents;
            }
            if let Some(sweep_interval_secs) = billing.sweep_interval_secs {
                self.billing.sweep_interval_secs = sweep_interval_secs;
            }
            if let Some(trial_days) = billing.trial_days {
                self.billing.trial_days = trial_days;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("MARKETBOT_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("MARKETBOT_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("MARKETBOT_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("MARKETBOT_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("MARKETBOT_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("MARKETBOT_MARKETPLACE_AUTH_URL") {
            self.marketplace.auth_url = value;
        }
        if let Some(value) = read_env("MARKETBOT_MARKETPLACE_TOKEN_URL") {
            self.marketplace.token_url = value;
        }
        if let Some(value) = read_env("MARKETBOT_MARKETPLACE_API_URL") {
            self.marketplace.api_url = value;
        }
        if let Some(value) = read_env("MARKETBOT_MARKETPLACE_CLIENT_ID") {
            self.marketplace.client_id = value;
        }
        if let Some(value) = read_env("MARKETBOT_MARKETPLACE_CLIENT_SECRET") {
            self.marketplace.client_secret = secret_value(value);
        }
        if let Some(value) = read_env("MARKETBOT_MARKETPLACE_REDIRECT_URI") {
            self.marketplace.redirect_uri = value;
        }
        if let Some(value) = read_env("MARKETBOT_MARKETPLACE_SCOPE") {
            self.marketplace.scope = value;
        }
        if let Some(value) = read_env("MARKETBOT_MARKETPLACE_WEBHOOK_BASE_URL") {
            self.marketplace.webhook_base_url = value;
        }
        if let Some(value) = read_env("MARKETBOT_MARKETPLACE_TIMEOUT_SECS") {
            self.marketplace.timeout_secs =
                parse_u64("MARKETBOT_MARKETPLACE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("MARKETBOT_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = read_env("MARKETBOT_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("MARKETBOT_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("MARKETBOT_LLM_TEMPERATURE") {
            self.llm.temperature = parse_f32("MARKETBOT_LLM_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("MARKETBOT_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("MARKETBOT_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("MARKETBOT_LLM_MAX_ATTEMPTS") {
            self.llm.max_attempts = parse_u32("MARKETBOT_LLM_MAX_ATTEMPTS", &value)?;
        }

        if let Some(value) = read_env("MARKETBOT_BILLING_BOT_DAILY_COST_CENTS") {
            self.billing.bot_daily_cost_cents =
                parse_i64("MARKETBOT_BILLING_BOT_DAILY_COST_CENTS", &value)?;
        }
        if let Some(value) = read_env("MARKETBOT_BILLING_SWEEP_INTERVAL_SECS") {
            self.billing.sweep_interval_secs =
                parse_u64("MARKETBOT_BILLING_SWEEP_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("MARKETBOT_BILLING_TRIAL_DAYS") {
            self.billing.trial_days = parse_u32("MARKETBOT_BILLING_TRIAL_DAYS", &value)?;
        }

        if let Some(value) = read_env("MARKETBOT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("MARKETBOT_SERVER_PORT") {
            self.server.port = parse_u16("MARKETBOT_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("MARKETBOT_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("MARKETBOT_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("MARKETBOT_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("MARKETBOT_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("MARKETBOT_LOGGING_LEVEL").or_else(|| read_env("MARKETBOT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("MARKETBOT_LOGGING_FORMAT").or_else(|| read_env("MARKETBOT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(client_id) = overrides.marketplace_client_id {
            self.marketplace.client_id = client_id;
        }
        if let Some(client_secret) = overrides.marketplace_client_secret {
            self.marketplace.client_secret = secret_value(client_secret);
        }
        if let Some(base_url) = overrides.llm_base_url {
            self.llm.base_url = base_url;
        }
        if let Some(model) = overrides.llm_model {
            self.llm.model = model;
        }
        if let Some(cost) = overrides.bot_daily_cost_cents {
            self.billing.bot_daily_cost_cents = cost;
        }
        if let Some(interval) = overrides.sweep_interval_secs {
            self.billing.sweep_interval_secs = interval;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_marketplace(&self.marketplace)?;
        validate_llm(&self.llm)?;
        validate_billing(&self.billing)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("marketbot.toml"), PathBuf::from("config/marketbot.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_marketplace(marketplace: &MarketplaceConfig) -> Result<(), ConfigError> {
    if marketplace.client_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "marketplace.client_id is required (the application registration id)".to_string(),
        ));
    }

    if marketplace.client_secret.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "marketplace.client_secret is required".to_string(),
        ));
    }

    for (key, value) in [
        ("marketplace.auth_url", &marketplace.auth_url),
        ("marketplace.token_url", &marketplace.token_url),
        ("marketplace.api_url", &marketplace.api_url),
        ("marketplace.redirect_uri", &marketplace.redirect_uri),
        ("marketplace.webhook_base_url", &marketplace.webhook_base_url),
    ] {
        if !value.starts_with("http://") && !value.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "{key} must start with http:// or https://"
            )));
        }
    }

    if marketplace.scope.trim().is_empty() {
        return Err(ConfigError::Validation("marketplace.scope must not be empty".to_string()));
    }

    if marketplace.timeout_secs == 0 || marketplace.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "marketplace.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if !llm.base_url.starts_with("http://") && !llm.base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "llm.base_url must start with http:// or https://".to_string(),
        ));
    }

    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.max_attempts == 0 {
        return Err(ConfigError::Validation(
            "llm.max_attempts must be greater than zero".to_string(),
        ));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    Ok(())
}

fn validate_billing(billing: &BillingConfig) -> Result<(), ConfigError> {
    if billing.bot_daily_cost_cents <= 0 {
        return Err(ConfigError::Validation(
            "billing.bot_daily_cost_cents must be greater than zero".to_string(),
        ));
    }

    if billing.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "billing.sweep_interval_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation(
            "server.port must be greater than zero".to_string(),
        ));
    }

    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.port == server.health_check_port {
        return Err(ConfigError::Validation(
            "server.port and server.health_check_port must differ".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_i64(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.parse::<i64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.parse::<f32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    marketplace: Option<MarketplacePatch>,
    llm: Option<LlmPatch>,
    billing: Option<BillingPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct MarketplacePatch {
    auth_url: Option<String>,
    token_url: Option<String>,
    api_url: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    redirect_uri: Option<String>,
    scope: Option<String>,
    webhook_base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    base_url: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    timeout_secs: Option<u64>,
    max_attempts: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct BillingPatch {
    bot_daily_cost_cents: Option<i64>,
    sweep_interval_secs: Option<u64>,
    trial_days: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn set_required_vars() {
        env::set_var("MARKETBOT_MARKETPLACE_CLIENT_ID", "client-test");
        env::set_var("MARKETBOT_MARKETPLACE_CLIENT_SECRET", "secret-test");
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    const REQUIRED_VARS: &[&str] =
        &["MARKETBOT_MARKETPLACE_CLIENT_ID", "MARKETBOT_MARKETPLACE_CLIENT_SECRET"];

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        // The file alone provides the required credentials here, so the env
        // override pass cannot shadow the interpolated value under test.
        env::set_var("TEST_MARKETPLACE_SECRET", "interpolated-secret");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("marketbot.toml");
            fs::write(
                &path,
                r#"
[marketplace]
client_id = "client-from-file"
client_secret = "${TEST_MARKETPLACE_SECRET}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.marketplace.client_id == "client-from-file",
                "client id should come from the file",
            )?;
            ensure(
                config.marketplace.client_secret.expose_secret() == "interpolated-secret",
                "client secret should be interpolated from environment",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_MARKETPLACE_SECRET"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        set_required_vars();
        env::set_var("MARKETBOT_LOG_LEVEL", "warn");
        env::set_var("MARKETBOT_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warn log level should come from the alias")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty log format should come from the alias",
            )?;
            Ok(())
        })();

        clear_vars(REQUIRED_VARS);
        clear_vars(&["MARKETBOT_LOG_LEVEL", "MARKETBOT_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        set_required_vars();
        env::set_var("MARKETBOT_DATABASE_URL", "sqlite://from-env.db");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("marketbot.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "programmatic override should win over env and file",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            Ok(())
        })();

        clear_vars(REQUIRED_VARS);
        clear_vars(&["MARKETBOT_DATABASE_URL"]);
        result
    }

    #[test]
    fn validation_fails_fast_without_marketplace_credentials() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(REQUIRED_VARS);

        let error = match AppConfig::load(LoadOptions::default()) {
            Ok(_) => return Err("expected validation failure but load succeeded".to_string()),
            Err(error) => error,
        };
        let has_message = matches!(
            error,
            ConfigError::Validation(ref message) if message.contains("marketplace.client_id")
        );
        ensure(has_message, "validation failure should mention marketplace.client_id")
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        set_required_vars();
        env::set_var("MARKETBOT_MARKETPLACE_CLIENT_SECRET", "super-secret-value");
        env::set_var("MARKETBOT_LLM_API_KEY", "llm-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("super-secret-value"),
                "debug output should not contain the client secret",
            )?;
            ensure(
                !debug.contains("llm-secret-value"),
                "debug output should not contain the llm api key",
            )?;
            Ok(())
        })();

        clear_vars(REQUIRED_VARS);
        clear_vars(&["MARKETBOT_LLM_API_KEY"]);
        result
    }

    #[test]
    fn llm_retry_budget_must_be_positive() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        set_required_vars();
        env::set_var("MARKETBOT_LLM_MAX_ATTEMPTS", "0");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("zero llm attempts should be rejected".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(error, ConfigError::Validation(ref message) if message.contains("llm.max_attempts")),
                "validation failure should mention llm.max_attempts",
            )
        })();

        clear_vars(REQUIRED_VARS);
        clear_vars(&["MARKETBOT_LLM_MAX_ATTEMPTS"]);
        result
    }
}
