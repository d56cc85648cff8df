//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Harvest hotel listings from a single travel catalog across multiple locales.
///
/// Reads pending URLs from the queue store, scrapes each through every
/// configured locale (the default locale first), and persists structured
/// records and images. Configuration not overridden here is read from the
/// environment (see `Config::load`).
#[derive(Parser, Debug)]
#[command(name = "harvester")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// URL(s) to enqueue before dispatching, in addition to anything already
    /// pending in the queue store.
    pub urls: Vec<String>,

    /// Override `DATA_ROOT` (database + default data location).
    #[arg(long)]
    pub data_root: Option<PathBuf>,

    /// Override `IMAGES_ROOT`.
    #[arg(long)]
    pub images_root: Option<PathBuf>,

    /// Run a bounded number of dispatch ticks then exit, instead of running
    /// until interrupted. Useful for scripted or one-shot runs.
    #[arg(long)]
    pub ticks: Option<u32>,

    /// Exit once the pending queue is empty and no workers are in flight,
    /// instead of polling forever.
    #[arg(long)]
    pub until_empty: bool,

    /// Show a live spinner summarizing dispatch progress while running.
    #[arg(short = 'p', long)]
    pub progress: bool,
}
