use crate::config::AppConfig;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};

/// Default location of the TOML configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/Config.toml";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration by merging defaults, the TOML file, and `QTRADE_` environment variables.
    ///
    /// Nested keys use a double underscore, e.g. `QTRADE_TRADING__POSITION_SIZE=50`.
    /// Brokerage credentials fall back to the standard `APCA_*` variables when
    /// they are not set through the file or `QTRADE_` variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be parsed.
    pub fn load(path: &str) -> Result<AppConfig> {
        let mut config: AppConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("QTRADE_").split("__"))
            .extract()
            .with_context(|| format!("Failed to load configuration from {path}"))?;

        Self::apply_alpaca_env(&mut config);
        tracing::debug!(path, broker = ?config.broker.kind, "configuration loaded");
        Ok(config)
    }

    /// Loads configuration with a profile overlay (`config/Config.{profile}.toml`).
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be parsed.
    pub fn load_with_profile(path: &str, profile: &str) -> Result<AppConfig> {
        let profile_path = match path.strip_suffix(".toml") {
            Some(stem) => format!("{stem}.{profile}.toml"),
            None => format!("{path}.{profile}"),
        };

        let mut config: AppConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Toml::file(&profile_path))
            .merge(Env::prefixed("QTRADE_").split("__"))
            .extract()
            .with_context(|| format!("Failed to load configuration profile {profile}"))?;

        Self::apply_alpaca_env(&mut config);
        tracing::debug!(path, profile, "configuration profile loaded");
        Ok(config)
    }

    fn apply_alpaca_env(config: &mut AppConfig) {
        if config.broker.key_id.is_empty() {
            if let Ok(key) = std::env::var("APCA_API_KEY_ID") {
                config.broker.key_id = key;
            }
        }
        if config.broker.secret_key.is_empty() {
            if let Ok(secret) = std::env::var("APCA_API_SECRET_KEY") {
                config.broker.secret_key = secret;
            }
        }
        if let Ok(url) = std::env::var("APCA_API_BASE_URL") {
            config.broker.api_url = url;
        }
    }
}
