pub mod broker;
pub mod config;
pub mod config_loader;
pub mod error;
pub mod events;
pub mod position;
pub mod shutdown;

pub use broker::{
    Account, Asset, BrokerApi, BrokerPosition, OrderAck, OrderRequest, OrderSide, OrderType,
    TimeInForce,
};
pub use config::{
    AgentConfig, AppConfig, BalanceConfig, BrokerConfig, BrokerKind, BucketConfig,
    RateLimitsConfig, RetryConfig, ServerConfig, TradingConfig,
};
pub use config_loader::{ConfigLoader, DEFAULT_CONFIG_PATH};
pub use error::{BrokerError, BrokerResult, ErrorClass};
pub use events::{
    AgentStats, BalanceUpdate, BotEvent, CycleSummary, DecisionUpdate, PortfolioUpdate,
    TradeAction, TradeUpdate,
};
pub use position::PositionLedger;
pub use shutdown::{Shutdown, ShutdownTrigger};
