use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;

use crate::{
    config::{Config, Source, DEFAULT_DEVICE},
    error::Error,
    hub::OverflowPolicy,
    source::serial_port::DEFAULT_BAUD,
};

/// The command line interface for ttysrv.
///
/// Flags override what the configuration file says,
/// which overrides the defaults.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a configuration file (RON)
    pub config: Option<PathBuf>,

    /// Serial device to listen on [default: /dev/ttyUSB0, COM1 on Windows]
    #[arg(long)]
    pub dev: Option<String>,

    /// Baud rate [default: 115200]
    #[arg(long)]
    pub baud: Option<u32>,

    /// Replay this file as if it came from the serial device
    #[arg(long, conflicts_with = "dev")]
    pub replay: Option<PathBuf>,

    /// Log file used to capture serial output [default: ttysrv.log]
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// Append to the log file instead of truncating it
    #[arg(long)]
    pub append: bool,

    /// Do not echo serial output to stdout
    #[arg(long)]
    pub no_echo: bool,

    /// Port to serve clients on [default: 666]
    #[arg(long)]
    pub port: Option<u16>,

    /// How many frames each client may have buffered [default: 1024]
    #[arg(long)]
    pub capacity: Option<usize>,

    /// What to do when a client's buffer is full [default: drop-newest]
    #[arg(long, value_enum)]
    pub overflow: Option<OverflowPolicy>,

    /// Also write diagnostics to daily rotated files in this directory
    #[arg(long)]
    pub trace_dir: Option<PathBuf>,

    /// Diagnostics level, `RUST_LOG` takes precedence
    #[arg(long, default_value = "info")]
    pub verbosity: Level,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Commands available in the command line interface.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Examples for user convenience.
    #[clap(subcommand)]
    Examples(Examples),
}

/// Helpful examples for users.
#[derive(Subcommand, Debug, Clone)]
pub enum Examples {
    /// Show an example of a configuration file's contents.
    Config,
}

/// Print what the command asks for.
pub fn handle_command(command: Commands) -> Result<(), Error> {
    match command {
        Commands::Examples(Examples::Config) => {
            println!("{}", Config::example().serialize_pretty()?);
        }
    }

    Ok(())
}

impl Cli {
    /// The configuration with the command line flags applied on top.
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(path) = &self.replay {
            config.source = Source::File(path.clone());
        } else if self.dev.is_some() || self.baud.is_some() {
            let (device, baud) = match config.source {
                Source::Serial { device, baud } => (device, baud),
                Source::File(_) => (DEFAULT_DEVICE.to_owned(), DEFAULT_BAUD),
            };

            config.source = Source::Serial {
                device: self.dev.clone().unwrap_or(device),
                baud: self.baud.unwrap_or(baud),
            };
        }

        if let Some(log) = &self.log {
            config.log.path = log.clone();
        }
        if self.append {
            config.log.append = true;
        }
        if self.no_echo {
            config.log.echo = false;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(capacity) = self.capacity {
            config.hub.capacity = capacity;
        }
        if let Some(overflow) = self.overflow {
            config.hub.overflow = overflow;
        }

        config
    }
}
