//! Build engine capability.
//!
//! The orchestrator never talks to Rolldown directly. It hands a
//! [`BuildEngine`] an [`EngineRequest`] plus a [`ModuleResolver`], and gets
//! back engine-local output files. Everything the engine needs to know about
//! modules flows through the resolver's two hooks.

mod handle;
mod rolldown;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::Result;
use crate::diagnostics::ExtractedDiagnostic;

pub use handle::{EngineHandle, EngineState};
pub use rolldown::{RolldownEngine, RolldownLauncher};

/// Id the engine gives the synthetic entry module.
pub const STDIN_ID: &str = "<stdin>";

/// Output name of the synthetic entry module.
pub const STDIN_NAME: &str = "stdin";

/// Answer of the resolve hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedModule {
    /// Bundle the module; the engine will call `load(namespace, path)`.
    Module { namespace: String, path: String },
    /// Leave the import as-is in the output.
    External { path: String },
}

/// How the engine should parse loaded source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loader {
    Js,
    Jsx,
    Ts,
    Tsx,
    Json,
    Css,
}

impl Loader {
    /// Infer the loader from a path or URI's extension. Unknown extensions
    /// load as JavaScript.
    pub fn from_path(path: &str) -> Self {
        match Path::new(path).extension().and_then(|e| e.to_str()) {
            Some("tsx") => Loader::Tsx,
            Some("ts" | "mts" | "cts") => Loader::Ts,
            Some("jsx") => Loader::Jsx,
            Some("json") => Loader::Json,
            Some("css") => Loader::Css,
            _ => Loader::Js,
        }
    }
}

/// Answer of the load hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModule {
    pub contents: String,
    pub loader: Loader,
}

/// Resolve/load hooks the engine calls for every module it encounters.
#[async_trait]
pub trait ModuleResolver: Send + Sync {
    /// `importer` is the engine id of the importing module, or `None` for
    /// the entry itself.
    async fn resolve(&self, specifier: &str, importer: Option<&str>) -> Result<ResolvedModule>;

    async fn load(&self, namespace: &str, path: &str) -> Result<LoadedModule>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Esm,
}

/// The entry module, handed over as raw contents rather than a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineEntry {
    pub contents: String,
    /// Logical URI of the entry, used for loader inference and diagnostics.
    pub sourcefile: String,
    pub resolve_dir: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineRequest {
    pub bundle: bool,
    pub format: OutputFormat,
    pub minify: bool,
    pub sourcemap: bool,
    pub splitting: bool,
    pub entry: EngineEntry,
    /// Directory outputs are reported under. Nothing is written there.
    pub output_dir: String,
    /// File name of the metadata graph emitted next to the outputs.
    pub metafile: String,
    /// `process.env.<NAME>` replacements, raw (not yet JSON encoded). Only
    /// member expressions are replaced, never text in strings or comments.
    pub define: IndexMap<String, String>,
}

/// A file as the engine names it: an absolute path below `output_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineFile {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineOutput {
    pub warnings: Vec<ExtractedDiagnostic>,
    pub output_files: Vec<EngineFile>,
    /// Path of the metadata graph within `output_files`.
    pub metafile: Option<String>,
}

/// A running bundler that accepts concurrent independent builds.
#[async_trait]
pub trait BuildEngine: Send + Sync {
    async fn build(
        &self,
        request: EngineRequest,
        resolver: Arc<dyn ModuleResolver>,
    ) -> Result<EngineOutput>;

    /// Stop accepting builds and abort the ones in flight.
    async fn stop(&self);
}

/// Starts engines for an [`EngineHandle`].
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn BuildEngine>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loader_from_extension() {
        assert_eq!(Loader::from_path("memory:///a.tsx"), Loader::Tsx);
        assert_eq!(Loader::from_path("cdn:///x@1.0.0/index.mts"), Loader::Ts);
        assert_eq!(Loader::from_path("memory:///data.json"), Loader::Json);
        assert_eq!(Loader::from_path("memory:///noext"), Loader::Js);
        assert_eq!(Loader::from_path("memory:///a.mjs"), Loader::Js);
    }
}
