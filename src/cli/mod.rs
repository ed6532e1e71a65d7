use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use crate::config::Config;

pub mod commands;

#[derive(Parser)]
#[command(
    name = "chartpilot",
    about = "Multi-timeframe chart generation and cascade analysis",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sort interval labels from the highest timeframe to the lowest
    Sort {
        /// Interval labels, e.g. 15m 1D 4h
        #[arg(required = true)]
        intervals: Vec<String>,
    },

    /// List exchanges supported by the chart API (cached)
    Exchanges {
        /// Bypass the cache
        #[arg(long)]
        refresh: bool,
    },

    /// List symbols for one exchange (cached)
    Symbols {
        /// Exchange identifier, e.g. BINANCE
        #[arg(short, long)]
        exchange: String,

        /// Bypass the cache
        #[arg(long)]
        refresh: bool,
    },

    /// Render charts for a symbol, optionally running the cascade on them
    Generate {
        /// Symbol in EXCHANGE:TICKER form
        #[arg(short, long)]
        symbol: String,

        /// Intervals to render
        #[arg(short, long, value_delimiter = ',', required = true)]
        intervals: Vec<String>,

        /// Studies to draw on every chart
        #[arg(long, value_delimiter = ',')]
        studies: Vec<String>,

        /// Run the cascade analysis on the rendered charts
        #[arg(short, long)]
        analyze: bool,

        /// Custom trading rules for the analysis
        #[arg(short, long)]
        rules: Option<String>,
    },

    /// Run the cascade analysis over charts described in a JSON file
    Analyze {
        /// Path to a JSON array of charts
        #[arg(short, long)]
        charts: PathBuf,

        /// Always order by interval duration, ignoring legacy role tags
        #[arg(short, long)]
        flexible: bool,

        /// Custom trading rules for the analysis
        #[arg(short, long)]
        rules: Option<String>,
    },
}

/// Execute CLI command with loaded configuration
pub async fn run(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Commands::Sort { intervals } => {
            commands::sort(intervals)?;
        }
        Commands::Exchanges { refresh } => {
            info!("Listing exchanges");
            commands::exchanges(&config, refresh).await?;
        }
        Commands::Symbols { exchange, refresh } => {
            info!("Listing symbols for {}", exchange);
            commands::symbols(&config, exchange, refresh).await?;
        }
        Commands::Generate {
            symbol,
            intervals,
            studies,
            analyze,
            rules,
        } => {
            info!("Generating {} charts for {}", intervals.len(), symbol);
            commands::generate(&config, symbol, intervals, studies, analyze, rules).await?;
        }
        Commands::Analyze { charts, flexible, rules } => {
            info!("Running cascade analysis from {}", charts.display());
            commands::analyze(&config, charts, flexible, rules).await?;
        }
    }
    Ok(())
}
