//! Application configuration.
//!
//! Sources are merged in order, later ones overriding earlier ones:
//!
//! 1. Built-in defaults ([`Config::default`])
//! 2. The YAML file given by `-f` / `MARKET_CONFIG` (skipped if it does not exist)
//! 3. Environment variables prefixed with `MARKET_`, using `__` for nesting
//!    (e.g. `MARKET_PRESENCE__ONLINE_WINDOW_SECS=90`)
//! 4. `DATABASE_URL`, which overrides `database_url`
//!
//! A `.env` file is loaded into the environment before any of this happens.

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "MARKET_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server
    #[arg(long)]
    pub validate: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// SQLite connection string, e.g. `sqlite://market.db?mode=rwc`
    pub database_url: String,
    /// Directory listing images are written to and served from
    pub upload_dir: PathBuf,
    /// Largest accepted multipart request body, in bytes
    pub max_upload_bytes: usize,
    /// Mark the session cookie `Secure` (enable behind HTTPS)
    pub session_cookie_secure: bool,
    /// Bootstrap admin account, created or promoted at startup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin: Option<AdminConfig>,
    pub presence: PresenceConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AdminConfig {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PresenceConfig {
    /// How long after the last heartbeat a user still counts as online
    pub online_window_secs: u64,
    /// How often stale users are swept to offline
    pub sweep_interval_secs: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            online_window_secs: 60,
            sweep_interval_secs: 30,
        }
    }
}

impl PresenceConfig {
    /// One week.
    pub const MAX_ONLINE_WINDOW_SECS: u64 = 7 * 24 * 60 * 60;

    pub fn online_window(&self) -> chrono::Duration {
        let secs = self.online_window_secs.min(Self::MAX_ONLINE_WINDOW_SECS);
        chrono::Duration::seconds(secs as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            database_url: "sqlite://market.db?mode=rwc".to_string(),
            upload_dir: PathBuf::from("uploads"),
            max_upload_bytes: 10 * 1024 * 1024,
            session_cookie_secure: false,
            admin: None,
            presence: PresenceConfig::default(),
        }
    }
}

impl Config {
    pub fn load(args: &Args) -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();
        let config: Config = Self::figment(args).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Yaml::file(&args.config))
            .merge(Env::prefixed("MARKET_").split("__").ignore(&["config"]))
            .merge(
                Env::raw()
                    .only(&["DATABASE_URL"])
                    .map(|_| "database_url".into()),
            )
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be non-zero");
        }
        if self.database_url.trim().is_empty() {
            anyhow::bail!("database_url must be set");
        }
        if self.presence.sweep_interval_secs == 0 {
            anyhow::bail!("presence.sweep_interval_secs must be greater than zero");
        }
        if !(1..=PresenceConfig::MAX_ONLINE_WINDOW_SECS).contains(&self.presence.online_window_secs) {
            anyhow::bail!(
                "presence.online_window_secs must be between 1 and {}",
                PresenceConfig::MAX_ONLINE_WINDOW_SECS
            );
        }
        if let Some(admin) = &self.admin {
            if admin.password.chars().count() < crate::manager::login_manager::MIN_PASSWORD_LEN {
                anyhow::bail!("admin.password is too short");
            }
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
