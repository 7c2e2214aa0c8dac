//! Bot configuration.
//!
//! Settings come from an optional TOML file and are then overridden by
//! environment variables. Every setting has a default, so the bot starts
//! with no file at all (it will simply answer no chat until the allow-list
//! is filled in).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use autosticker_net::RetryPolicy;
use autosticker_shared::constants::{
    DEFAULT_BRIDGE_URL, DEFAULT_FRESHNESS_THRESHOLD_SECS, DEFAULT_MEDIA_DIR,
    DEFAULT_SHUTDOWN_GRACE_SECS, DEFAULT_UPLOAD_BACKOFF_MS, DEFAULT_UPLOAD_MAX_ATTEMPTS,
    DEFAULT_UPLOAD_TIMEOUT_SECS,
};
use autosticker_shared::types::{RecipientIdentity, RecipientKind};

use crate::dispatcher::DispatcherSettings;
use crate::error::ConfigError;
use crate::policy::{AllowEntry, AllowList};

/// Env var naming the config file.
pub const CONFIG_PATH_ENV: &str = "AUTOSTICKER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "autosticker.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BotConfig {
    /// Base URL of the protocol bridge.
    /// Env: `BRIDGE_URL`
    /// Default: `http://127.0.0.1:8088`
    pub bridge_url: String,

    /// Directory the stickers are picked from.
    /// Env: `MEDIA_DIR`
    /// Default: `stickers`
    pub media_dir: PathBuf,

    /// Credential database. `None` uses the platform data directory.
    /// Env: `DATABASE_PATH`
    pub database_path: Option<PathBuf>,

    /// Maximum age, in seconds, of a message that still gets a reply.
    /// Env: `FRESHNESS_THRESHOLD_SECS`
    /// Default: `20`
    pub freshness_threshold_secs: u64,

    /// Per-attempt upload timeout.
    /// Env: `UPLOAD_TIMEOUT_SECS`
    /// Default: `30`
    pub upload_timeout_secs: u64,

    /// Upload attempts, including the first.
    /// Env: `UPLOAD_MAX_ATTEMPTS`
    /// Default: `3`
    pub upload_max_attempts: u32,

    /// Delay before the first upload retry; doubled for each further one.
    /// Default: `500`
    pub upload_backoff_ms: u64,

    /// How long in-flight replies may run after a shutdown signal.
    /// Env: `SHUTDOWN_GRACE_SECS`
    /// Default: `5`
    pub shutdown_grace_secs: u64,

    /// Seed for reproducible sticker picks. Unset means entropy.
    /// Env: `DISPATCH_SEED`
    pub dispatch_seed: Option<u64>,

    /// Chats that may receive stickers.
    /// Env: `ALLOWED_CHATS` (comma separated identities, kind inferred from
    /// the server part; replaces the file's list)
    pub allow: Vec<AllowEntry>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            bridge_url: DEFAULT_BRIDGE_URL.to_string(),
            media_dir: PathBuf::from(DEFAULT_MEDIA_DIR),
            database_path: None,
            freshness_threshold_secs: DEFAULT_FRESHNESS_THRESHOLD_SECS,
            upload_timeout_secs: DEFAULT_UPLOAD_TIMEOUT_SECS,
            upload_max_attempts: DEFAULT_UPLOAD_MAX_ATTEMPTS,
            upload_backoff_ms: DEFAULT_UPLOAD_BACKOFF_MS,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
            dispatch_seed: None,
            allow: Vec::new(),
        }
    }
}

impl BotConfig {
    /// Load the config file (if any) and apply environment overrides.
    ///
    /// A missing default file is fine; a missing file named explicitly via
    /// `AUTOSTICKER_CONFIG` is an error.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var(CONFIG_PATH_ENV).ok();
        let path = PathBuf::from(explicit.as_deref().unwrap_or(DEFAULT_CONFIG_PATH));

        let mut config = if explicit.is_some() || path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "Read config file");

        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Override settings from `var`, normally `std::env::var`. Unparseable
    /// values are logged and ignored.
    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = var("BRIDGE_URL") {
            self.bridge_url = url;
        }

        if let Some(dir) = var("MEDIA_DIR") {
            self.media_dir = PathBuf::from(dir);
        }

        if let Some(path) = var("DATABASE_PATH") {
            if !path.is_empty() {
                self.database_path = Some(PathBuf::from(path));
            }
        }

        if let Some(val) = var("FRESHNESS_THRESHOLD_SECS") {
            match val.parse() {
                Ok(n) => self.freshness_threshold_secs = n,
                Err(_) => tracing::warn!(value = %val, "Invalid FRESHNESS_THRESHOLD_SECS, using default"),
            }
        }

        if let Some(val) = var("UPLOAD_TIMEOUT_SECS") {
            match val.parse() {
                Ok(n) => self.upload_timeout_secs = n,
                Err(_) => tracing::warn!(value = %val, "Invalid UPLOAD_TIMEOUT_SECS, using default"),
            }
        }

        if let Some(val) = var("UPLOAD_MAX_ATTEMPTS") {
            match val.parse() {
                Ok(n) => self.upload_max_attempts = n,
                Err(_) => tracing::warn!(value = %val, "Invalid UPLOAD_MAX_ATTEMPTS, using default"),
            }
        }

        if let Some(val) = var("SHUTDOWN_GRACE_SECS") {
            match val.parse() {
                Ok(n) => self.shutdown_grace_secs = n,
                Err(_) => tracing::warn!(value = %val, "Invalid SHUTDOWN_GRACE_SECS, using default"),
            }
        }

        if let Some(val) = var("DISPATCH_SEED") {
            match val.parse() {
                Ok(seed) => self.dispatch_seed = Some(seed),
                Err(_) => tracing::warn!(value = %val, "Invalid DISPATCH_SEED, picks stay random"),
            }
        }

        if let Some(list) = var("ALLOWED_CHATS") {
            self.allow = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(infer_entry)
                .collect();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bridge_url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "bridge_url",
                reason: "must not be empty".to_string(),
            });
        }
        if self.upload_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "upload_timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        self.allow_list()?;
        Ok(())
    }

    pub fn allow_list(&self) -> Result<AllowList, ConfigError> {
        Ok(AllowList::from_entries(&self.allow)?)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.upload_max_attempts,
            base_delay: Duration::from_millis(self.upload_backoff_ms),
        }
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn dispatcher_settings(&self) -> DispatcherSettings {
        DispatcherSettings {
            freshness_threshold_secs: self.freshness_threshold_secs,
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
            seed: self.dispatch_seed,
        }
    }
}

// Entries whose kind can't be inferred are kept as `user` entries so that
// validation reports them instead of silently dropping them.
fn infer_entry(raw: &str) -> AllowEntry {
    let kind = RecipientIdentity::parse(raw)
        .ok()
        .and_then(|id| id.kind())
        .unwrap_or(RecipientKind::User);
    AllowEntry {
        identity: raw.to_string(),
        kind,
    }
}
