//! Command-line arguments for embedding applications.
//!
//! Applications flatten [`ClientArgs`] into their own clap parser.

use std::path::PathBuf;

use clap::{ArgAction, Args, ValueEnum};

use peerbook_core::ClientConfig;
use peerbook_core::constants::DEFAULT_HOST;

/// Log output format for CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CliLogFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// Structured JSON output.
    Json,
}

impl From<CliLogFormat> for peerbook_core::LogFormat {
    fn from(fmt: CliLogFormat) -> Self {
        match fmt {
            CliLogFormat::Text => peerbook_core::LogFormat::Text,
            CliLogFormat::Json => peerbook_core::LogFormat::Json,
        }
    }
}

/// PeerBook connection options.
#[derive(Debug, Clone, Args)]
pub struct ClientArgs {
    /// Registry host, optionally with a port
    #[arg(long = "peerbook-host", value_name = "HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Use plain http/ws instead of https/wss
    #[arg(long)]
    pub insecure: bool,

    /// Device fingerprint presented to the registry
    #[arg(long, value_name = "FP", default_value = "")]
    pub fingerprint: String,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Log output format
    #[arg(long = "log-format", value_enum, default_value = "text")]
    pub log_format: CliLogFormat,

    /// Append logs to a file instead of stderr
    #[arg(long = "log-file", value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

impl ClientArgs {
    /// Build a client configuration with default tuning.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            insecure: self.insecure,
            ..ClientConfig::new(self.host.clone(), self.fingerprint.clone())
        }
    }

    /// Install the logging subscriber these arguments describe.
    pub fn init_logging(&self) -> peerbook_core::Result<()> {
        peerbook_core::init_logging(
            self.verbose,
            self.log_file.as_deref(),
            self.log_format.into(),
        )
    }
}
