use clap::{Parser, Subcommand};

mod commands;

use commands::{AccountArgs, ListAssetsArgs, RunArgs};

#[derive(Parser)]
#[command(name = "qtrade")]
#[command(about = "Q-learning paper trader for Alpaca", long_about = None)]
struct Cli {
    /// Optional log file path (logs to file instead of stderr)
    #[arg(long, global = true)]
    log_file: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trading loop, balance tracker and dashboard API
    Run(RunArgs),
    /// Print account status and balances
    CheckAccount(AccountArgs),
    /// List tradable assets
    ListAssets(ListAssetsArgs),
}

fn init_logging(log_file: Option<&str>) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref())?;

    match cli.command {
        Commands::Run(args) => commands::run_trader(args).await?,
        Commands::CheckAccount(args) => commands::run_check_account(args).await?,
        Commands::ListAssets(args) => commands::run_list_assets(args).await?,
    }

    Ok(())
}
