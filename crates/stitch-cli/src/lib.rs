//! Stitch CLI - bundle virtual projects from the command line.
//!
//! A request file holds the same JSON a bundling service would receive
//! (`files`, `entrypoints`, optional `env`). The CLI loads configuration,
//! runs one bundle through [`stitch_bundler::BundlerService`] and prints or
//! writes the result.
//!
//! - [`cli`] - argument definitions
//! - [`commands`] - command implementations
//! - [`error`] - CLI error type and miette conversion
//! - [`logger`] - subscriber setup for `-v`/`-q`

pub mod cli;
pub mod commands;
pub mod error;
pub mod logger;

pub use error::{CliError, Result};
