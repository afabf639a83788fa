//! Command-line argument parsing

use crate::config::AuthConfig;
use clap::{Parser, Subcommand};

/// Path meaning standard input or standard output
pub const STDIO_PATH: &str = "-";

#[derive(Parser, Debug)]
#[command(name = "image-layer")]
#[command(about = "Store and fetch a byte stream as a single-blob image in a Docker/OCI registry")]
#[command(version, author)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Registry username
    #[arg(
        long = "username",
        short = 'u',
        global = true,
        help = "Username for registry authentication"
    )]
    pub username: Option<String>,

    /// Registry password
    #[arg(
        long = "password",
        short = 'p',
        global = true,
        help = "Password for registry authentication"
    )]
    pub password: Option<String>,

    /// Plain HTTP
    #[arg(
        long = "insecure",
        global = true,
        help = "Talk plain HTTP to the registry"
    )]
    pub insecure: bool,

    /// Verbose output
    #[arg(
        long = "verbose",
        short = 'v',
        global = true,
        help = "Enable verbose output"
    )]
    pub verbose: bool,

    /// Quiet mode
    #[arg(
        long = "quiet",
        short = 'q',
        global = true,
        conflicts_with = "verbose",
        help = "Suppress all output except errors"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Upload a file (or stdin) and tag it
    Put {
        /// Target reference, e.g. registry.example.com/team/data:v1
        reference: String,
        /// File to upload, `-` for stdin
        path: String,
    },
    /// Download the payload stored under a tag
    Get {
        /// Source reference, e.g. registry.example.com/team/data:v1
        reference: String,
        /// Output file, `-` for stdout
        path: String,
    },
}

impl Command {
    pub fn reference(&self) -> &str {
        match self {
            Command::Put { reference, .. } | Command::Get { reference, .. } => reference,
        }
    }
}

impl Args {
    /// Credentials from the flags, else `REGISTRY_USERNAME`/`REGISTRY_PASSWORD`, else anonymous
    pub fn auth_config(&self) -> AuthConfig {
        match &self.username {
            Some(username) => {
                AuthConfig::new(username.clone(), self.password.clone().unwrap_or_default())
            }
            None => AuthConfig::from_env().unwrap_or_else(AuthConfig::anonymous),
        }
    }
}
