//! Regime trader - main entry point
//!
//! This binary provides three subcommands:
//! - live: Run the polling loop (paper or real)
//! - webhook: Serve the alert webhook
//! - backtest: Replay a candle CSV through the strategy

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "regime-trader")]
#[command(about = "Regime-adaptive trading engine with live trading, webhook alerts and backtesting", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the live trading loop
    Live {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/btcusdt_1h.json")]
        config: String,

        /// Paper trading mode (simulated fills on live prices)
        #[arg(long)]
        paper: bool,

        /// Live trading mode (CAUTION - REAL MONEY!)
        #[arg(long)]
        live: bool,
    },

    /// Serve the alert webhook
    Webhook {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/btcusdt_1h.json")]
        config: String,

        /// Listen address (overrides config file)
        #[arg(long)]
        bind: Option<String>,

        /// Execute alerts against simulated accounts
        #[arg(long)]
        paper: bool,
    },

    /// Run a backtest on a candle CSV
    Backtest {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/btcusdt_1h.json")]
        config: String,

        /// Candle CSV (datetime,open,high,low,close[,volume])
        #[arg(short, long)]
        data: PathBuf,

        /// Write the trade list to this CSV file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Initial balance (overrides config file)
        #[arg(long)]
        capital: Option<f64>,
    },
}

fn setup_logging(verbose: bool, command_name: &str) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    // {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    // Filter out noisy HTTP crates
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn,tower_http=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

    // Same format without ANSI colors
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("Logging initialized");
    info!("Log file: {}", log_path.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    dotenv::dotenv().ok();

    let command_name = match &cli.command {
        Commands::Live { .. } => "live",
        Commands::Webhook { .. } => "webhook",
        Commands::Backtest { .. } => "backtest",
    };
    setup_logging(cli.verbose, command_name)?;

    match cli.command {
        Commands::Live {
            config,
            paper,
            live,
        } => commands::live::run(config, paper, live),

        Commands::Webhook {
            config,
            bind,
            paper,
        } => commands::webhook::run(config, bind, paper),

        Commands::Backtest {
            config,
            data,
            output,
            capital,
        } => commands::backtest::run(config, data, output, capital),
    }
}
