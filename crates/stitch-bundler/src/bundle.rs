//! Request and result types for one bundle operation.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use path_clean::PathClean;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::diagnostics::ExtractedDiagnostic;
use crate::uri::MEMORY_ROOT;
use crate::{Error, Result};

/// A virtual project to bundle.
///
/// Deserializes from the JSON shape `{"files": {...}, "entrypoints": [...],
/// "env": {...}}`. Exactly one entrypoint is supported.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleRequest {
    pub files: IndexMap<String, String>,
    pub entrypoints: Vec<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub env: IndexMap<String, String>,
    #[serde(default)]
    pub options: BundleOptions,
}

/// Per-request overrides of the configured build defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minify: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sourcemap: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub splitting: Option<bool>,
    /// Caller cancellation, linked into the request scope.
    #[serde(skip)]
    pub token: Option<CancellationToken>,
}

impl BundleRequest {
    pub fn new(entrypoint: impl Into<String>) -> Self {
        Self {
            entrypoints: vec![entrypoint.into()],
            ..Self::default()
        }
    }

    pub fn file(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.files.insert(path.into(), content.into());
        self
    }

    /// Substitute `process.env.<name>` with `value` as a string literal.
    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub fn minify(mut self, minify: bool) -> Self {
        self.options.minify = Some(minify);
        self
    }

    pub fn sourcemap(mut self, sourcemap: bool) -> Self {
        self.options.sourcemap = Some(sourcemap);
        self
    }

    pub fn splitting(mut self, splitting: bool) -> Self {
        self.options.splitting = Some(splitting);
        self
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.options.token = Some(token);
        self
    }

    /// The single entrypoint.
    pub fn entrypoint(&self) -> Result<&str> {
        match self.entrypoints.as_slice() {
            [entry] => Ok(entry.as_str()),
            [] => Err(Error::InvalidRequest("no entrypoint given".into())),
            many => Err(Error::InvalidRequest(format!(
                "exactly one entrypoint is supported, got {}",
                many.len()
            ))),
        }
    }
}

/// Result of a successful bundle operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub warnings: Vec<ExtractedDiagnostic>,
    pub output_files: Vec<OutputFile>,
    pub meta: MetaGraph,
}

/// One emitted file, addressed by logical URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFile {
    pub path: String,
    pub content: String,
}

/// Build metadata: what went in, what came out, and how they connect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaGraph {
    pub inputs: IndexMap<String, MetaInput>,
    pub outputs: IndexMap<String, MetaOutput>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaInput {
    pub bytes: usize,
    pub imports: Vec<MetaImport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaImport {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub external: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaOutput {
    pub imports: Vec<MetaImport>,
    pub exports: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
    pub inputs: IndexMap<String, MetaOutputInput>,
    pub bytes: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaOutputInput {
    pub bytes_in_output: usize,
}

impl Bundle {
    /// Find an output file by its logical path.
    pub fn output(&self, path: &str) -> Option<&OutputFile> {
        self.output_files.iter().find(|file| file.path == path)
    }

    /// Write every output file below `dir`, keeping the layout relative to
    /// the memory root. Returns the written paths in output order.
    ///
    /// File contents are written as the engine produced them. Shared chunks
    /// sit at the memory root, and an entry in a subdirectory
    /// (`memory:///src/app.js`) still imports them as `./chunk.js`, not
    /// `../chunk.js`. With code splitting on, such an entry only runs from
    /// the written tree once those specifiers are adjusted. Bundles built
    /// without splitting, or from a root-level entry, have no such imports.
    pub fn write_to_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let dir = normalize_dir(dir)?;
        fs::create_dir_all(&dir)?;

        let mut written = Vec::with_capacity(self.output_files.len());
        for file in &self.output_files {
            let relative = file.path.strip_prefix(MEMORY_ROOT).ok_or_else(|| {
                Error::InvalidOutputPath(format!(
                    "'{}' is not below {MEMORY_ROOT}",
                    file.path
                ))
            })?;
            let target = output_path(&dir, relative)?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, &file.content)?;
            written.push(target);
        }
        Ok(written)
    }
}

fn normalize_dir(dir: &Path) -> Result<PathBuf> {
    let cleaned = dir.clean();
    if cleaned.is_absolute() {
        return Ok(cleaned);
    }
    Ok(std::env::current_dir()?.join(cleaned).clean())
}

/// Join `relative` onto `base`, rejecting anything that escapes it.
fn output_path(base: &Path, relative: &str) -> Result<PathBuf> {
    if relative.contains('\0') {
        return Err(Error::InvalidOutputPath(
            "file name contains a null byte".into(),
        ));
    }
    let full = base.join(Path::new(relative).clean()).clean();
    if !full.starts_with(base) || full == base {
        return Err(Error::InvalidOutputPath(format!(
            "'{relative}' escapes the output directory '{}'",
            base.display()
        )));
    }
    Ok(full)
}
