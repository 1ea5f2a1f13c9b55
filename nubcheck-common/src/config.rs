//! Configuration loading
//!
//! Resolution priority per key:
//! 1. Command-line argument (applied by the binary)
//! 2. Environment variable (`NUBCHECK_<SECTION>_<KEY>`)
//! 3. TOML config file
//! 4. Compiled default
//!
//! The resulting [`AppConfig`] is built once at startup and handed to each
//! component. Nothing below the binary reads the environment.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "NUBCHECK_CONFIG";

/// Complete service configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub payments: PaymentsConfig,
    pub classifier: ClassifierConfig,
    pub review: ReviewConfig,
    pub email: EmailConfig,
    pub images: ImagesConfig,
    pub admin: AdminConfig,
    pub jobs: JobsConfig,
    pub polling: PollingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to bind
    pub listen: String,
    /// Externally reachable base URL (used for signed image URLs and email links)
    pub public_base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:5780".to_string(),
            public_base_url: "http://127.0.0.1:5780".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file; defaults to `<data dir>/nubcheck.db`
    pub path: Option<PathBuf>,
    /// Upper bound for retrying "database is locked"
    pub max_lock_wait_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_lock_wait_ms: 5000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaymentsConfig {
    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub stripe_api_base: String,
    /// Maximum webhook timestamp skew in seconds
    pub signature_tolerance_secs: i64,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            stripe_secret_key: None,
            stripe_webhook_secret: None,
            stripe_api_base: "https://api.stripe.com".to_string(),
            signature_tolerance_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub api_base: String,
    pub timeout_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-3-flash-preview".to_string(),
            api_base: "https://generativelanguage.googleapis.com".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    /// Shared secret expected in the bot callback header
    pub telegram_webhook_secret: Option<String>,
    pub telegram_api_base: String,
    /// Confidence at or above which BOY/GIRL verdicts resolve without a human.
    /// Unset means every case waits for a reviewer.
    pub auto_resolve_confidence: Option<f64>,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            telegram_bot_token: None,
            telegram_chat_id: None,
            telegram_webhook_secret: None,
            telegram_api_base: "https://api.telegram.org".to_string(),
            auto_resolve_confidence: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub resend_api_key: Option<String>,
    pub from: String,
    pub api_base: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            resend_api_key: None,
            from: "Nub Prediction <results@nubcheck.local>".to_string(),
            api_base: "https://api.resend.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    /// Directory holding uploaded scans; defaults to `<data dir>/images`
    pub directory: Option<PathBuf>,
    pub signing_secret: Option<String>,
    /// Lifetime of signed read URLs
    pub url_ttl_secs: i64,
    pub max_bytes: usize,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            directory: None,
            signing_secret: None,
            url_ttl_secs: 86_400,
            max_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Bearer token for admin endpoints; unset disables admin auth
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub poll_interval_ms: u64,
    pub max_attempts: i64,
    /// How long a claimed job stays invisible to other workers
    pub lease_secs: i64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            max_attempts: 8,
            lease_secs: 120,
            backoff_base_ms: 2000,
            backoff_max_ms: 600_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Upper bound for a single wait-for-result request
    pub max_wait_secs: u64,
    /// Age after which a pending prediction is reported as under expert review
    pub review_notice_after_secs: i64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            max_wait_secs: 25,
            review_notice_after_secs: 180,
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// `explicit_path` comes from the command line and must exist when given.
    /// `env` looks up environment variables (injected for testability).
    pub fn load<F>(explicit_path: Option<&Path>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = match explicit_path {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::Config(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                Some(path.to_path_buf())
            }
            None => match env(CONFIG_ENV_VAR) {
                Some(path) => Some(PathBuf::from(path)),
                None => discover_config_file(),
            },
        };

        let mut config = match path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(&path)?;
                let config = Self::from_toml_str(&content).map_err(|e| {
                    Error::Config(format!("Parse {} failed: {}", path.display(), e))
                })?;
                info!("Loaded config file: {}", path.display());
                config
            }
            Some(path) => {
                warn!("Config file {} not found, using defaults", path.display());
                Self::default()
            }
            None => {
                warn!("No config file found, using defaults");
                Self::default()
            }
        };

        config.apply_env(env);
        Ok(config)
    }

    /// Parse TOML text; every section and key is optional
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Overlay `NUBCHECK_<SECTION>_<KEY>` environment variables
    pub fn apply_env<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = &env;

        set_string(env, "NUBCHECK_SERVER_LISTEN", &mut self.server.listen);
        set_string(env, "NUBCHECK_SERVER_PUBLIC_BASE_URL", &mut self.server.public_base_url);

        set_path(env, "NUBCHECK_DATABASE_PATH", &mut self.database.path);
        set_parsed(env, "NUBCHECK_DATABASE_MAX_LOCK_WAIT_MS", &mut self.database.max_lock_wait_ms);

        set_string(env, "NUBCHECK_LOGGING_LEVEL", &mut self.logging.level);

        set_secret(env, "NUBCHECK_PAYMENTS_STRIPE_SECRET_KEY", &mut self.payments.stripe_secret_key);
        set_secret(
            env,
            "NUBCHECK_PAYMENTS_STRIPE_WEBHOOK_SECRET",
            &mut self.payments.stripe_webhook_secret,
        );
        set_string(env, "NUBCHECK_PAYMENTS_STRIPE_API_BASE", &mut self.payments.stripe_api_base);
        set_parsed(
            env,
            "NUBCHECK_PAYMENTS_SIGNATURE_TOLERANCE_SECS",
            &mut self.payments.signature_tolerance_secs,
        );

        set_secret(env, "NUBCHECK_CLASSIFIER_API_KEY", &mut self.classifier.api_key);
        set_string(env, "NUBCHECK_CLASSIFIER_MODEL", &mut self.classifier.model);
        set_string(env, "NUBCHECK_CLASSIFIER_API_BASE", &mut self.classifier.api_base);
        set_parsed(env, "NUBCHECK_CLASSIFIER_TIMEOUT_SECS", &mut self.classifier.timeout_secs);

        set_secret(env, "NUBCHECK_REVIEW_TELEGRAM_BOT_TOKEN", &mut self.review.telegram_bot_token);
        set_secret(env, "NUBCHECK_REVIEW_TELEGRAM_CHAT_ID", &mut self.review.telegram_chat_id);
        set_secret(
            env,
            "NUBCHECK_REVIEW_TELEGRAM_WEBHOOK_SECRET",
            &mut self.review.telegram_webhook_secret,
        );
        set_string(env, "NUBCHECK_REVIEW_TELEGRAM_API_BASE", &mut self.review.telegram_api_base);
        if let Some(value) = env("NUBCHECK_REVIEW_AUTO_RESOLVE_CONFIDENCE") {
            match value.trim().parse::<f64>() {
                Ok(threshold) => self.review.auto_resolve_confidence = Some(threshold),
                Err(_) => warn!(
                    "Ignoring NUBCHECK_REVIEW_AUTO_RESOLVE_CONFIDENCE: not a number ({})",
                    value
                ),
            }
        }

        set_secret(env, "NUBCHECK_EMAIL_RESEND_API_KEY", &mut self.email.resend_api_key);
        set_string(env, "NUBCHECK_EMAIL_FROM", &mut self.email.from);
        set_string(env, "NUBCHECK_EMAIL_API_BASE", &mut self.email.api_base);

        set_path(env, "NUBCHECK_IMAGES_DIRECTORY", &mut self.images.directory);
        set_secret(env, "NUBCHECK_IMAGES_SIGNING_SECRET", &mut self.images.signing_secret);
        set_parsed(env, "NUBCHECK_IMAGES_URL_TTL_SECS", &mut self.images.url_ttl_secs);
        set_parsed(env, "NUBCHECK_IMAGES_MAX_BYTES", &mut self.images.max_bytes);

        set_secret(env, "NUBCHECK_ADMIN_TOKEN", &mut self.admin.token);

        set_parsed(env, "NUBCHECK_JOBS_POLL_INTERVAL_MS", &mut self.jobs.poll_interval_ms);
        set_parsed(env, "NUBCHECK_JOBS_MAX_ATTEMPTS", &mut self.jobs.max_attempts);

        set_parsed(env, "NUBCHECK_POLLING_MAX_WAIT_SECS", &mut self.polling.max_wait_secs);
    }

    /// Data directory for the database and images when not configured explicitly
    pub fn data_dir(&self) -> PathBuf {
        default_data_dir()
    }

    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| self.data_dir().join("nubcheck.db"))
    }

    pub fn images_dir(&self) -> PathBuf {
        self.images
            .directory
            .clone()
            .unwrap_or_else(|| self.data_dir().join("images"))
    }

    /// Report missing secrets; affected endpoints fail closed at runtime
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.payments.stripe_webhook_secret.is_none() {
            warnings.push("payments.stripe_webhook_secret not set: payment webhooks will be rejected".to_string());
        }
        if self.payments.stripe_secret_key.is_none() {
            warnings.push("payments.stripe_secret_key not set: uploads cannot be verified".to_string());
        }
        if self.review.telegram_webhook_secret.is_none() {
            warnings.push("review.telegram_webhook_secret not set: bot callbacks will fail closed".to_string());
        }
        if self.review.telegram_bot_token.is_none() || self.review.telegram_chat_id.is_none() {
            warnings.push("review.telegram_bot_token/telegram_chat_id not set: review prompts cannot be delivered".to_string());
        }
        if self.classifier.api_key.is_none() {
            warnings.push("classifier.api_key not set: classification will fail and fall back to manual review".to_string());
        }
        if self.email.resend_api_key.is_none() {
            warnings.push("email.resend_api_key not set: customer emails cannot be delivered".to_string());
        }
        if self.images.signing_secret.is_none() {
            warnings.push("images.signing_secret not set: a random per-process secret is used".to_string());
        }
        if self.admin.token.is_none() {
            warnings.push("admin.token not set: admin endpoints are unauthenticated".to_string());
        }
        if let Some(threshold) = self.review.auto_resolve_confidence {
            if !(0.0..=100.0).contains(&threshold) {
                warnings.push(format!(
                    "review.auto_resolve_confidence {} outside 0-100",
                    threshold
                ));
            }
        }

        warnings
    }
}

fn set_string<F: Fn(&str) -> Option<String>>(env: &F, key: &str, target: &mut String) {
    if let Some(value) = env(key) {
        *target = value;
    }
}

fn set_secret<F: Fn(&str) -> Option<String>>(env: &F, key: &str, target: &mut Option<String>) {
    if let Some(value) = env(key) {
        if !value.trim().is_empty() {
            *target = Some(value);
        }
    }
}

fn set_path<F: Fn(&str) -> Option<String>>(env: &F, key: &str, target: &mut Option<PathBuf>) {
    if let Some(value) = env(key) {
        *target = Some(PathBuf::from(value));
    }
}

fn set_parsed<F, T>(env: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(value) = env(key) {
        match value.trim().parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!("Ignoring {}: cannot parse '{}'", key, value),
        }
    }
}

/// First existing config file in the platform search order
fn discover_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("nubcheck").join("config.toml"));
    let system_config = PathBuf::from("/etc/nubcheck/config.toml");

    user_config
        .into_iter()
        .chain(std::iter::once(system_config))
        .find(|path| path.exists())
}

/// OS-dependent default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("nubcheck"))
        .unwrap_or_else(|| PathBuf::from("./nubcheck_data"))
}
