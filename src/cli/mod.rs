//! CLI module
//!
//! Command-line interface for sending rate-limited requests.
//!
//! # Commands
//!
//! - `send` - Send one request through the limiter and retry policy
//! - `rules` - Show the active rate rules

mod commands;
mod runner;

pub use commands::{Cli, Commands};
pub use runner::Runner;
