//! OtaDeploy CLI Module
//! Command-line interface for firmware release operations

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::engine::config::CONFIG_FILE;

#[derive(Parser, Debug)]
#[command(name = "otadeploy")]
#[command(author = "OtaDeploy Team")]
#[command(version)]
#[command(about = "Sign, publish and serve OTA firmware releases", long_about = None)]
pub struct Cli {
    /// Path to the config file
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    pub config: PathBuf,

    /// Output format (json for scripting)
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build, sign, publish and announce a firmware release
    Deploy {
        /// Release version (major.minor.patch); next patch version when omitted
        #[arg(long)]
        version: Option<String>,

        /// What changed in this release
        #[arg(long)]
        changelog: String,
    },

    /// Serve firmware downloads over HTTP
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
    },

    /// List recorded releases
    Releases {
        /// Maximum number of releases to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Generate an RSA signing key pair
    Keygen {
        /// Directory to write private.pem and public.pem to
        #[arg(short, long)]
        out: PathBuf,

        /// Key size in bits
        #[arg(long, default_value = "2048")]
        bits: usize,
    },

    /// Verify a firmware image against its detached signature
    Verify {
        #[arg(long)]
        firmware: PathBuf,

        #[arg(long)]
        signature: PathBuf,

        /// PEM encoded RSA public key
        #[arg(long)]
        public_key: PathBuf,
    },
}
