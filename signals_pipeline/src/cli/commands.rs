use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::transform::IndicatorFamily;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the pipeline config file (signals.toml)
    #[arg(short, long, default_value = "signals.toml")]
    pub config: PathBuf,

    /// Log level for the pipeline crates (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Authenticate with the key pair from SIGNALS_ACCESS_KEY_ID /
    /// SIGNALS_SECRET_ACCESS_KEY instead of the ambient role
    #[arg(long)]
    pub local: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Fetch daily prices and replace the raw day partitions
    Load {
        /// First day to fetch, as YYMMDD (e.g. 220301)
        #[arg(long)]
        start: String,

        /// First day not fetched, as YYMMDD
        #[arg(long)]
        end: String,

        /// Only load this price-API symbol
        #[arg(long)]
        ticker: Option<String>,

        /// Only load the first N symbols of the universe
        #[arg(long)]
        ntickers: Option<usize>,
    },

    /// Compute indicator features and replace the per-ticker partitions
    Transform {
        /// Indicator family to compute
        #[arg(long, value_enum)]
        family: IndicatorFamily,

        /// Number of lagged copies per indicator (defaults to transform.lags)
        #[arg(long)]
        lags: Option<usize>,

        /// Re-run the raw-table query before transforming
        #[arg(long)]
        reload: bool,
    },

    /// Run the configured catalog crawler and wait for it to finish
    Crawl,
}
