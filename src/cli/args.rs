//! CLI argument definitions using clap
//!
//! Commands:
//! - odata-server serve --config <path>
//! - odata-server check --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// OData v4 server over a pluggable storage adapter
#[derive(Parser, Debug)]
#[command(name = "odata-server")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the configured model over HTTP
    Serve {
        /// Path to configuration file
        #[arg(long, default_value = "./odata.json")]
        config: PathBuf,

        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Validate the configuration and print the entity set catalog
    Check {
        /// Path to configuration file
        #[arg(long, default_value = "./odata.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve() {
        let cli = Cli::try_parse_from(["odata-server", "serve", "--config", "x.json", "--port", "9000"])
            .unwrap();
        match cli.command {
            Command::Serve { config, port } => {
                assert_eq!(config, PathBuf::from("x.json"));
                assert_eq!(port, Some(9000));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_check_default_path() {
        let cli = Cli::try_parse_from(["odata-server", "check"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Check { config } if config == PathBuf::from("./odata.json")
        ));
    }
}
