//! CLI error type.
//!
//! Bundler failures keep their own diagnostics (codes and help text) when
//! converted to a miette report; everything else becomes a plain message
//! with a hint.

use std::path::PathBuf;

use miette::Report;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    /// Errors from the bundler library
    #[error(transparent)]
    Bundler(#[from] stitch_bundler::Error),

    #[error("Request file not found: {}\n\nHint: Pass a JSON request file, or `-` to read one from stdin", .0.display())]
    RequestNotFound(PathBuf),

    #[error("Invalid request in {source_name}: {source}\n\nHint: A request looks like {{\"files\": {{\"a.js\": \"...\"}}, \"entrypoints\": [\"a.js\"]}}")]
    InvalidRequest {
        source_name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write output: {0}")]
    Output(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convert a CLI error into a miette report for display.
pub fn cli_error_to_miette(err: CliError) -> Report {
    match err {
        CliError::Bundler(inner) => Report::new(inner),
        other => miette::miette!("{}", other),
    }
}
