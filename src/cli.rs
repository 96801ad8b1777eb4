//! Command-line arguments for the `solc-broker` binary.

use crate::config::BrokerConfig;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "solc-broker")]
#[command(about = "Serve versioned Solidity compilers to many clients from one process")]
#[command(version)]
pub struct Cli {
    /// Configuration file path (layered over the global config)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Address to listen on, e.g. 127.0.0.1:8547
    #[arg(long)]
    pub listen: Option<String>,

    /// Version to load as soon as the broker starts
    #[arg(long)]
    pub preload: Vec<String>,

    /// Disable the contract cache
    #[arg(long, default_value = "false")]
    pub no_cache: bool,

    /// Enable verbose logging (debug level)
    #[arg(long, short, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Fold command-line overrides into a loaded configuration
    pub fn apply(&self, config: &mut BrokerConfig) {
        if let Some(ref listen) = self.listen {
            config.listen = listen.clone();
        }
        if self.no_cache {
            config.cache.enabled = false;
        }
        if self.verbose {
            config.logging.level = "debug".to_string();
        }
        if let Some(ref level) = self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(ref format) = self.log_format {
            config.logging.format = format.clone();
        }
        if let Some(ref output) = self.log_output {
            config.logging.output = output.clone();
        }
        if let Some(ref file) = self.log_file {
            config.logging.file = file.clone();
        }
    }
}
