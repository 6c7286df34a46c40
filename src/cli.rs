//! Command-line interface for lumi
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::io::BufRead;
use std::path::PathBuf;
use std::thread;
use tokio::sync::mpsc;

/// Voice assistant client
#[derive(Parser, Debug)]
#[command(name = "lumi", version, about = "Voice assistant client")]
pub struct Cli {
    /// Subcommand to execute (default: run)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress log output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the assistant in the foreground
    Run {
        /// Server address (overrides config)
        #[arg(long, value_name = "URL")]
        server: Option<String>,

        /// Audio input device (e.g., pipewire)
        #[arg(long, value_name = "DEVICE")]
        input_device: Option<String>,

        /// Audio output device
        #[arg(long, value_name = "DEVICE")]
        output_device: Option<String>,

        /// Disable the wake word; record only on request
        #[arg(long)]
        no_wake: bool,

        /// Do not connect on startup
        #[arg(long)]
        no_auto_connect: bool,
    },

    /// List available audio devices
    Devices {
        /// List output devices instead of inputs
        #[arg(long)]
        output: bool,
    },

    /// View and modify configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the configuration file path
    Path,
    /// Print the effective configuration as TOML
    Show,
    /// Get a configuration value by key (e.g., server.url)
    Get {
        /// Dotted key path (e.g., vad.volume_threshold)
        key: String,
    },
    /// Set a configuration value by key
    Set {
        /// Dotted key path (e.g., wake.keyword)
        key: String,
        /// Value to set
        value: String,
    },
}

/// Forward lines from `reader` on a detached thread. The channel closes at
/// EOF or on the first read error.
///
/// A blocked read never holds up runtime shutdown, unlike `tokio::io::stdin`.
pub fn spawn_line_reader<R>(reader: R) -> std::io::Result<mpsc::UnboundedReceiver<String>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    thread::Builder::new()
        .name("lumi-stdin".to_string())
        .spawn(move || {
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "input read failed");
                        break;
                    }
                }
            }
        })?;
    Ok(rx)
}
