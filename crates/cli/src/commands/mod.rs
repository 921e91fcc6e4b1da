//! CLI commands for the Q-learning trader.

pub mod account;
pub mod run;
pub mod source;

pub use account::{run_check_account, run_list_assets, AccountArgs, ListAssetsArgs};
pub use run::{run_trader, RunArgs};
pub use source::BrokerChoice;
