use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{parse_load_mode, parse_time_slice, EngineConfig};
use crate::logging::LogLevel;

/// resload - packaged content loader and cache
#[derive(Parser, Debug, Default)]
#[command(name = "resload")]
#[command(version)]
#[command(about = "Resolve, load and version packaged game content", long_about = None)]
pub struct Cli {
    /// Configuration file (key = value)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log file path (default: stderr)
    #[arg(short, long, value_name = "FILE")]
    pub logfile: Option<PathBuf>,

    /// Log level (nothing, user, error, warning, info, debug, all)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Build directory holding packages and the manifest
    #[arg(short, long, value_name = "DIR")]
    pub build_dir: Option<PathBuf>,

    /// Upload mirror directory
    #[arg(short, long, value_name = "DIR")]
    pub upload_dir: Option<PathBuf>,

    /// Loose source directory used in direct mode
    #[arg(short, long, value_name = "DIR")]
    pub source_dir: Option<PathBuf>,

    /// Manifest name
    #[arg(short, long, value_name = "NAME")]
    pub manifest: Option<String>,

    /// Load mode (packaged, direct)
    #[arg(long, value_name = "MODE")]
    pub mode: Option<String>,

    /// Per-frame loading time slice in milliseconds
    #[arg(long = "time-slice", value_name = "MS")]
    pub time_slice: Option<String>,

    /// Maximum work items per frame (0 = unlimited)
    #[arg(long = "max-items", value_name = "N")]
    pub max_items: Option<usize>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show the package files an address needs
    Resolve {
        address: String,
    },

    /// Load an address frame by frame and report the result
    Load {
        address: String,

        /// Load as a scene instead of an asset
        #[arg(long)]
        scene: bool,

        /// Activate the scene additively
        #[arg(long, requires = "scene")]
        additive: bool,

        /// Load as a raw file
        #[arg(long, conflicts_with = "scene")]
        raw: bool,

        /// Finish synchronously instead of frame by frame
        #[arg(long)]
        immediate: bool,

        /// Give up after this many frames
        #[arg(long = "max-frames", default_value_t = 600)]
        max_frames: usize,
    },

    /// Inspect or change published versions
    Version {
        #[command(subcommand)]
        action: VersionAction,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum VersionAction {
    /// Print the current version record
    Show,
    /// Publish the next version of the manifest's content
    Publish,
    /// Rename a published version
    Rename { from: u32, to: u32 },
}

impl Cli {
    /// Merge CLI arguments into the loaded configuration
    pub fn merge_into_config(&self, mut config: EngineConfig) -> Result<EngineConfig> {
        if let Some(ref dir) = self.build_dir {
            config.build_dir = dir.clone();
        }
        if let Some(ref dir) = self.upload_dir {
            config.upload_dir = dir.clone();
        }
        if let Some(ref dir) = self.source_dir {
            config.source_dir = dir.clone();
        }
        if let Some(ref name) = self.manifest {
            if name.is_empty() {
                anyhow::bail!("Manifest name must not be empty");
            }
            config.manifest_name = name.clone();
        }
        if let Some(ref mode) = self.mode {
            config.load_mode = parse_load_mode(mode)?;
        }
        if let Some(ref ms) = self.time_slice {
            config.time_slice = parse_time_slice(ms).context("Invalid --time-slice")?;
        }
        if let Some(max) = self.max_items {
            config.max_items_per_frame = (max > 0).then_some(max);
        }
        Ok(config)
    }

    pub fn log_level(&self) -> Result<LogLevel> {
        LogLevel::parse(&self.log_level)
    }
}
