//! One-shot account and asset inspection.

use super::source::{ConfigSource, Connection};
use anyhow::{bail, Context, Result};
use clap::Args;
use qtrade_alpaca::EndpointClass;
use qtrade_core::{Account, Shutdown};

#[derive(Args, Debug)]
pub struct AccountArgs {
    #[command(flatten)]
    pub source: ConfigSource,
}

#[derive(Args, Debug)]
pub struct ListAssetsArgs {
    #[command(flatten)]
    pub source: ConfigSource,

    /// Maximum number of symbols to print
    #[arg(long, default_value = "20")]
    pub limit: usize,
}

/// Fetches the account through the executor.
pub async fn fetch_account(connection: &Connection) -> Result<Account> {
    let broker = connection.broker.as_ref();
    connection
        .executor
        .execute(EndpointClass::Account, "get_account", move || broker.get_account())
        .await
        .context("failed to fetch account")?
        .context("account request rejected by brokerage")
}

/// Prints account status and balances; fails if the account is not active.
pub async fn run_check_account(args: AccountArgs) -> Result<()> {
    let config = args.source.load()?;
    config.validate()?;
    let connection = Connection::open(&config, Shutdown::never())?;

    let account = fetch_account(&connection).await?;

    println!("Account:      {}", account.id);
    println!("Status:       {}", account.status);
    println!("Cash:         {}", account.cash);
    println!("Equity:       {}", account.equity);
    println!("Portfolio:    {}", account.portfolio_value);
    println!("Buying power: {}", account.buying_power);

    if !account.is_active() {
        bail!("account is not active (status {})", account.status);
    }
    Ok(())
}

/// Prints tradable symbols.
pub async fn run_list_assets(args: ListAssetsArgs) -> Result<()> {
    let config = args.source.load()?;
    config.validate()?;
    let connection = Connection::open(&config, Shutdown::never())?;

    let broker = connection.broker.as_ref();
    let assets = connection
        .executor
        .execute(EndpointClass::Account, "list_assets", move || broker.list_assets())
        .await
        .context("failed to list assets")?
        .context("asset listing rejected by brokerage")?;

    let tradable: Vec<_> = assets.into_iter().filter(|asset| asset.tradable).collect();
    for asset in tradable.iter().take(args.limit) {
        println!("{:<8} {}", asset.symbol, asset.name);
    }
    println!("{} tradable assets", tradable.len());

    Ok(())
}
