//! CLI commands and argument parsing

use crate::types::{LogLevel, Method};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Pacer: rate-limited HTTP requests
#[derive(Parser, Debug)]
#[command(name = "pacer")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (YAML)
    #[arg(short = 'C', long, global = true)]
    pub config: Option<PathBuf>,

    /// Caller identity (rate-limit bucket key)
    #[arg(short, long, global = true)]
    pub identity: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Log level implied by the flags
    pub fn log_level(&self) -> LogLevel {
        if self.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        }
    }
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send one request through the rate limiter
    Send {
        /// Target URL
        url: String,

        /// HTTP method
        #[arg(short = 'X', long, default_value = "GET")]
        method: Method,

        /// Header as "Name: value"; replaces the default headers (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Raw request body
        #[arg(short, long, conflicts_with = "json")]
        data: Option<String>,

        /// JSON request body
        #[arg(long)]
        json: Option<String>,

        /// Request timeout in seconds
        #[arg(short, long)]
        timeout: Option<f64>,

        /// Stream the response body
        #[arg(long)]
        stream: bool,

        /// Do not follow redirects
        #[arg(long)]
        no_redirects: bool,

        /// Print response headers
        #[arg(long)]
        include: bool,
    },

    /// Show the active rate rules
    Rules,
}
