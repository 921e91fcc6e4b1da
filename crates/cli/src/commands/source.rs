//! Shared config and brokerage setup for every command.

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use qtrade_alpaca::{RateLimiters, RequestExecutor};
use qtrade_core::{AppConfig, BrokerApi, BrokerKind, ConfigLoader, Shutdown, DEFAULT_CONFIG_PATH};
use std::sync::Arc;

/// Brokerage selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BrokerChoice {
    Alpaca,
    Paper,
}

impl From<BrokerChoice> for BrokerKind {
    fn from(choice: BrokerChoice) -> Self {
        match choice {
            BrokerChoice::Alpaca => Self::Alpaca,
            BrokerChoice::Paper => Self::Paper,
        }
    }
}

/// Where configuration comes from.
#[derive(Args, Debug)]
pub struct ConfigSource {
    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,

    /// Profile overlay, e.g. `live` reads `config/Config.live.toml` on top
    #[arg(long)]
    pub profile: Option<String>,

    /// Override the configured brokerage
    #[arg(long, value_enum)]
    pub broker: Option<BrokerChoice>,
}

impl ConfigSource {
    /// Loads the configuration and applies the broker override.
    pub fn load(&self) -> Result<AppConfig> {
        let mut config = match &self.profile {
            Some(profile) => ConfigLoader::load_with_profile(&self.config, profile)?,
            None => ConfigLoader::load(&self.config)?,
        };
        if let Some(broker) = self.broker {
            config.broker.kind = broker.into();
        }
        Ok(config)
    }
}

/// Brokerage plus the executor every call goes through.
pub struct Connection {
    pub broker: Arc<dyn BrokerApi>,
    pub executor: Arc<RequestExecutor>,
}

impl Connection {
    pub fn open(config: &AppConfig, shutdown: Shutdown) -> Result<Self> {
        let broker = qtrade_alpaca::connect(&config.broker)
            .context("failed to create brokerage client")?;
        let limiters = Arc::new(RateLimiters::from_config(&config.rate_limits));
        let executor = Arc::new(RequestExecutor::new(
            limiters,
            config.retry.clone(),
            shutdown,
        ));

        tracing::info!(broker = ?config.broker.kind, "brokerage connection ready");
        Ok(Self { broker, executor })
    }
}
