use clap::Parser;
use std::path::PathBuf;

use crate::config::ProfilerSettings;
use crate::entities::{ColumnId, ViewMode};

// Build version with target info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "Engine: built-in simulation\n",
    "Target: ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Live per-source performance viewer
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    /// View mode: scene, scene-nested, source, filter, transition, all
    #[arg(short = 'm', long = "mode", value_name = "MODE")]
    pub mode: Option<ViewMode>,

    /// Sampling interval in milliseconds (clamped to 500..=10000)
    #[arg(short = 'i', long = "interval", value_name = "MS")]
    pub interval: Option<u64>,

    /// Only show rows whose name (or a descendant's) matches this regex
    #[arg(short = 'f', long = "filter", value_name = "PATTERN")]
    pub filter: Option<String>,

    /// Sort by column (name, tick, render, render_gpu, ...)
    #[arg(short = 's', long = "sort", value_name = "COLUMN")]
    pub sort: Option<ColumnId>,

    /// Reverse the column's default sort direction
    #[arg(short = 'r', long = "reverse", requires = "sort")]
    pub reverse: bool,

    /// Only mirror sources that are live in program output
    #[arg(short = 'a', long = "active-only")]
    pub active_only: bool,

    /// Number of sampling passes to print before exiting
    #[arg(short = 'n', long = "passes", value_name = "N", default_value_t = 3)]
    pub passes: u32,

    /// Hide a column (can be specified multiple times)
    #[arg(long = "hide", value_name = "COLUMN")]
    pub hide: Vec<ColumnId>,

    /// Show a column hidden by default or by saved settings
    #[arg(long = "show", value_name = "COLUMN")]
    pub show: Vec<ColumnId>,

    /// Print the final pass as JSON instead of a table
    #[arg(long = "json")]
    pub json: bool,

    /// Do not write settings back on exit
    #[arg(long = "no-save")]
    pub no_save: bool,

    /// Enable debug logging to file (default: profview.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,
}

impl Args {
    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbosity {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }

    /// Overlay command-line choices on persisted settings
    pub fn apply(&self, settings: &mut ProfilerSettings) {
        if let Some(mode) = self.mode {
            settings.view_mode = mode;
        }
        if let Some(interval) = self.interval {
            settings.refresh_interval_ms = interval;
        }
        if self.active_only {
            settings.active_only = true;
        }
        settings.hidden_columns.extend(self.hide.iter().copied());
        settings.hidden_columns.retain(|c| !self.show.contains(c));
    }
}
