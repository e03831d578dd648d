#![cfg_attr(docsrs, feature(doc_cfg))]

//! # stitch-bundler
//!
//! Rolldown-based bundling of virtual projects. A request carries a set of
//! in-memory source files plus one entrypoint; bare package imports are
//! resolved against an npm CDN (jsDelivr conventions by default), and the
//! result is a browser-ready ESM bundle whose paths and build metadata are
//! expressed in logical URIs (`memory:///…`, `cdn:///…`) instead of the
//! engine's output directory.
//!
//! ## Quick Start
//!
//! ```no_run
//! use stitch_bundler::{BundleRequest, BundlerConfig, BundlerService};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let service = BundlerService::new(BundlerConfig::default(), CancellationToken::new())?;
//!
//! let request = BundleRequest::new("index.js")
//!     .file("index.js", "import { x } from './dep.js'; console.log(x);")
//!     .file("dep.js", "export const x = process.env.GREETING;")
//!     .env("GREETING", "hello");
//!
//! let bundle = service.bundle(request).await?;
//! for file in &bundle.output_files {
//!     println!("{} ({} bytes)", file.path, file.content.len());
//! }
//! service.dispose().await;
//! # Ok(()) }
//! ```

pub mod bridge;
pub mod bundle;
pub mod cdn;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod fetch;
pub mod manifest;
pub mod memory;
pub mod normalize;
pub mod resolver;
pub mod service;
pub mod uri;

// Logging utilities (optional, enabled with "logging" feature)
#[cfg(feature = "logging")]
#[cfg_attr(docsrs, doc(cfg(feature = "logging")))]
pub mod logging;

#[cfg(feature = "logging")]
#[cfg_attr(docsrs, doc(cfg(feature = "logging")))]
pub use logging::{LogLevel, init_logging, init_logging_from_env};

pub use bridge::BuildBridge;
pub use bundle::{
    Bundle, BundleOptions, BundleRequest, MetaGraph, MetaImport, MetaInput, MetaOutput,
    MetaOutputInput, OutputFile,
};
pub use cdn::CdnStrategy;
pub use config::BundlerConfig;
pub use engine::{
    BuildEngine, EngineHandle, EngineLauncher, EngineState, ModuleResolver, RolldownEngine,
    RolldownLauncher,
};
pub use fetch::{Fetch, FetchCache, FetchError, RemoteFetcher};
pub use memory::MemoryStore;
pub use normalize::PathMapping;
pub use resolver::{CompoundResolver, ResolveResult, ResolutionStrategy};
pub use service::BundlerService;
pub use uri::{LogicalUri, UriScheme};

/// Error types for stitch-bundler operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No strategy produced a candidate for the specifier.
    #[error("{}", format_unresolvable(.specifier, .importer.as_deref()))]
    Unresolvable {
        specifier: String,
        importer: Option<String>,
    },

    /// The entrypoint resolved to a module excluded by a `browser` override.
    #[error("The entrypoint '{entrypoint}' is excluded by \"browser\" field overrides")]
    ExcludedEntrypoint { entrypoint: String },

    /// A module resolved but its content could not be read.
    #[error("Failed to read '{uri}': {reason}")]
    ReadFailed { uri: String, reason: String },

    /// CDN request failed for a reason other than cancellation.
    #[error("CDN fetch failed: {0}")]
    Fetch(FetchError),

    /// The governing cancellation token fired.
    #[error("Bundle operation was canceled")]
    Canceled,

    /// Fatal error reported by the build engine.
    #[error("Build engine error: {}", format_engine_error(.0))]
    Engine(Vec<diagnostics::ExtractedDiagnostic>),

    /// A string could not be parsed as a logical URI.
    #[error("Invalid logical URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    /// The bundle request is not usable as given.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An output file would land outside the target directory.
    #[error("Invalid output path: {0}")]
    InvalidOutputPath(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for stitch-bundler operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an engine error from a Rolldown error.
    ///
    /// Extracts structured diagnostics from Rolldown's error types.
    pub fn from_rolldown_batch(error: &dyn std::fmt::Debug) -> Self {
        Error::Engine(diagnostics::extract_from_rolldown_error(error))
    }

    /// Create an engine error carrying a single diagnostic.
    pub fn engine(kind: diagnostics::DiagnosticKind, message: impl Into<String>) -> Self {
        Error::Engine(vec![diagnostics::ExtractedDiagnostic::error(kind, message)])
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled)
    }
}

impl From<FetchError> for Error {
    fn from(error: FetchError) -> Self {
        match error {
            FetchError::Canceled => Error::Canceled,
            other => Error::Fetch(other),
        }
    }
}

fn format_unresolvable(specifier: &str, importer: Option<&str>) -> String {
    match importer {
        Some(importer) => format!("Unable to resolve '{specifier}' from '{importer}'"),
        None => format!("Unable to resolve the entrypoint '{specifier}'"),
    }
}

/// Format engine diagnostics for display.
fn format_engine_error(diagnostics: &[diagnostics::ExtractedDiagnostic]) -> String {
    match diagnostics {
        [] => "Unknown build engine error".to_string(),
        [diag] => format!("{}: {}", diag.kind, diag.message),
        many => format!(
            "{} errors: {}",
            many.len(),
            many.iter()
                .map(|d| format!("{}: {}", d.kind, d.message))
                .collect::<Vec<_>>()
                .join("; ")
        ),
    }
}

impl miette::Diagnostic for Error {
    fn code(&self) -> Option<Box<dyn std::fmt::Display + '_>> {
        Some(Box::new(match self {
            Error::Unresolvable { .. } => "UNRESOLVABLE",
            Error::ExcludedEntrypoint { .. } => "EXCLUDED_ENTRYPOINT",
            Error::ReadFailed { .. } => "READ_FAILED",
            Error::Fetch(_) => "FETCH_ERROR",
            Error::Canceled => "CANCELED",
            Error::Engine(_) => "ENGINE_FAILURE",
            Error::InvalidUri { .. } => "INVALID_URI",
            Error::InvalidRequest(_) => "INVALID_REQUEST",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::InvalidOutputPath(_) => "INVALID_OUTPUT_PATH",
            Error::Io(_) => "IO_ERROR",
        }))
    }

    fn severity(&self) -> Option<miette::Severity> {
        Some(miette::Severity::Error)
    }

    fn help(&self) -> Option<Box<dyn std::fmt::Display + '_>> {
        match self {
            Error::Unresolvable {
                specifier,
                importer: None,
            } => Some(Box::new(format!(
                "Check that '{specifier}' is one of the files supplied with the request."
            ))),
            Error::Unresolvable { specifier, .. } if !specifier.starts_with('.') => {
                Some(Box::new(format!(
                    "'{specifier}' was not found in memory or on the CDN. Check the package name and version range."
                )))
            }
            Error::ExcludedEntrypoint { .. } => Some(Box::new(
                "The nearest package.json maps this file to `false` in its \"browser\" field.",
            )),
            Error::Fetch(FetchError::Status { status, .. }) => Some(Box::new(format!(
                "The CDN answered with HTTP {status}."
            ))),
            Error::InvalidConfig(msg) => Some(Box::new(format!(
                "Check your configuration file for syntax errors.\nError: {msg}"
            ))),
            Error::Engine(diagnostics) => match diagnostics.as_slice() {
                [single] => single
                    .help
                    .as_ref()
                    .map(|h| Box::new(h.clone()) as Box<dyn std::fmt::Display>),
                _ => Some(Box::new(
                    "Multiple build errors occurred. See details below.".to_string(),
                )),
            },
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use miette::Diagnostic;

    #[test]
    fn unresolvable_message_names_specifier_and_importer() {
        let err = Error::Unresolvable {
            specifier: "left-pad".into(),
            importer: Some("memory:///index.js".into()),
        };
        assert_eq!(
            err.to_string(),
            "Unable to resolve 'left-pad' from 'memory:///index.js'"
        );
        assert_eq!(err.code().map(|c| c.to_string()).as_deref(), Some("UNRESOLVABLE"));
    }

    #[test]
    fn fetch_cancellation_becomes_canceled() {
        let err: Error = FetchError::Canceled.into();
        assert!(err.is_canceled());

        let err: Error = FetchError::Status {
            url: "https://cdn.example/x".into(),
            status: 500,
        }
        .into();
        assert!(matches!(err, Error::Fetch(FetchError::Status { status: 500, .. })));
    }
}
