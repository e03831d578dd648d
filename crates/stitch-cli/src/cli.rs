//! Command-line interface definition.
//!
//! - `stitch bundle <REQUEST>` - bundle one request file
//! - `stitch check [REQUEST]` - validate configuration and, optionally, a request

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Stitch - bundle virtual ESM projects against an npm CDN
#[derive(Parser, Debug)]
#[command(
    name = "stitch",
    version,
    about = "Bundle virtual ESM projects against an npm CDN",
    long_about = "Stitch bundles a set of in-memory source files into a browser-ready ESM\n\
                  bundle. Relative imports resolve against the supplied files; bare package\n\
                  imports are fetched from an npm CDN."
)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Decrease log verbosity (-q warnings, -qq errors, -qqq silent)
    #[arg(short, long, global = true, action = clap::ArgAction::Count, conflicts_with = "verbose")]
    pub quiet: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Bundle a request file
    ///
    /// The request is JSON: `{"files": {...}, "entrypoints": ["..."], "env": {...}}`.
    /// Use `-` to read it from standard input.
    Bundle(BundleArgs),

    /// Validate configuration, and a request file when one is given
    Check(CheckArgs),
}

#[derive(Args, Debug, Clone)]
pub struct BundleArgs {
    /// Request file (`-` for stdin)
    #[arg(value_name = "REQUEST")]
    pub request: PathBuf,

    /// Configuration file (TOML or JSON)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Write output files below this directory instead of printing a summary
    #[arg(short = 'd', long, value_name = "DIR")]
    pub out_dir: Option<PathBuf>,

    /// Print the whole bundle (files, warnings, metadata) as JSON
    #[arg(long)]
    pub json: bool,

    /// Skip minification
    #[arg(long)]
    pub no_minify: bool,

    /// Skip source map generation
    #[arg(long)]
    pub no_sourcemap: bool,

    /// Inline dynamic imports instead of splitting them into chunks
    #[arg(long)]
    pub no_splitting: bool,

    /// Extra `process.env` value, as NAME=VALUE (repeatable)
    #[arg(short, long = "env", value_name = "NAME=VALUE", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,
}

#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    /// Request file to validate (`-` for stdin)
    #[arg(value_name = "REQUEST")]
    pub request: Option<PathBuf>,

    /// Configuration file (TOML or JSON)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    let valid = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(format!("'{name}' is not a valid environment variable name"));
    }
    Ok((name.to_string(), value.to_string()))
}
