//! Engine output → logical URIs.
//!
//! The engine names its outputs after a synthetic `stdin` entry under its
//! output directory, and its metadata graph keys inputs by namespaced ids.
//! [`PathMapping`] is the one place these two address spaces meet; it is
//! built once per request and applied to every output file and every path
//! in the metadata graph.

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::bundle::{Bundle, MetaGraph, MetaImport, MetaOutput, OutputFile};
use crate::diagnostics::DiagnosticKind;
use crate::engine::{EngineOutput, STDIN_ID, STDIN_NAME};
use crate::uri::LogicalUri;
use crate::{Error, Result};

/// Bidirectional mapping between engine-local paths and logical URIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapping {
    output_dir: String,
    entry: String,
    entry_stem: String,
    memory_root: String,
    namespace_prefix: String,
}

impl PathMapping {
    pub fn new(
        output_dir: &str,
        entry: &LogicalUri,
        memory_root: &LogicalUri,
        namespace: &str,
    ) -> Self {
        Self {
            output_dir: output_dir.trim_end_matches('/').to_string(),
            entry: entry.to_string(),
            entry_stem: entry.stem(),
            memory_root: memory_root.with_trailing_slash().to_string(),
            namespace_prefix: format!("{namespace}:"),
        }
    }

    /// `{out}/stdin<suffix>` becomes the entry stem plus suffix; any other
    /// `{out}/<rest>` lands under the memory root. `None` for paths outside
    /// the output directory.
    pub fn output_to_logical(&self, engine_path: &str) -> Option<String> {
        let rest = engine_path
            .strip_prefix(self.output_dir.as_str())?
            .strip_prefix('/')?;
        if let Some(suffix) = entry_suffix(rest, STDIN_NAME) {
            return Some(format!("{}{suffix}", self.entry_stem));
        }
        Some(format!("{}{rest}", self.memory_root))
    }

    /// Inverse of [`output_to_logical`](Self::output_to_logical).
    pub fn logical_to_output(&self, logical: &str) -> Option<String> {
        if let Some(suffix) = entry_suffix(logical, &self.entry_stem) {
            return Some(format!("{}/{STDIN_NAME}{suffix}", self.output_dir));
        }
        let rest = logical.strip_prefix(self.memory_root.as_str())?;
        Some(format!("{}/{rest}", self.output_dir))
    }

    /// Whether the engine path is one of the entry's own outputs.
    pub fn is_entry_output(&self, engine_path: &str) -> bool {
        engine_path
            .strip_prefix(self.output_dir.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .is_some_and(|rest| entry_suffix(rest, STDIN_NAME).is_some())
    }

    /// Engine module id → logical URI: `<stdin>` is the entry, the private
    /// namespace tag is dropped.
    pub fn input_to_logical(&self, id: &str) -> String {
        if id == STDIN_ID {
            return self.entry.clone();
        }
        id.strip_prefix(self.namespace_prefix.as_str())
            .unwrap_or(id)
            .to_string()
    }
}

/// Suffix after `stem` when it names one of the entry's own outputs: empty,
/// a single extension (`.js`), or a single extension plus `.map`.
///
/// Anything longer (`app.chunk.js` next to an `app` entry) is a different
/// file, which keeps the mapping one-to-one.
fn entry_suffix<'a>(path: &'a str, stem: &str) -> Option<&'a str> {
    let suffix = path.strip_prefix(stem)?;
    if suffix.is_empty() {
        return Some(suffix);
    }
    let ext = suffix.strip_suffix(".map").unwrap_or(suffix).strip_prefix('.')?;
    (!ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric())).then_some(suffix)
}

/// Rewrite engine output into a [`Bundle`].
///
/// The metadata file is pulled out of the file list and surfaced only as
/// [`Bundle::meta`].
pub fn normalize(output: EngineOutput, mapping: &PathMapping) -> Result<Bundle> {
    let EngineOutput {
        warnings,
        output_files,
        metafile,
    } = output;

    let mut meta_json = None;
    let mut files = Vec::with_capacity(output_files.len());
    let mut claimed: FxHashMap<String, String> = FxHashMap::default();

    for file in output_files {
        if metafile.as_deref() == Some(file.path.as_str()) {
            meta_json = Some(file.content);
            continue;
        }
        let logical = map_output(mapping, &file.path)?;
        claim(&mut claimed, &logical, &file.path)?;
        let content = if mapping.is_entry_output(&file.path) {
            retarget_map_comment(file.content, mapping)
        } else {
            file.content
        };
        files.push(OutputFile {
            path: logical,
            content,
        });
    }

    let meta = match (metafile, meta_json) {
        (None, _) => MetaGraph::default(),
        (Some(_), Some(json)) => {
            let raw: MetaGraph = serde_json::from_str(&json).map_err(|e| {
                Error::engine(
                    DiagnosticKind::MissingMetadata,
                    format!("unreadable metadata graph: {e}"),
                )
            })?;
            normalize_meta(raw, mapping)?
        }
        (Some(path), None) => {
            return Err(Error::engine(
                DiagnosticKind::MissingMetadata,
                format!("metadata file '{path}' was not emitted"),
            ));
        }
    };

    debug!(files = files.len(), "normalized engine output");
    Ok(Bundle {
        warnings,
        output_files: files,
        meta,
    })
}

const MAP_COMMENT: &str = "//# sourceMappingURL=";

/// Point the entry's `sourceMappingURL` comment at its renamed map file.
fn retarget_map_comment(content: String, mapping: &PathMapping) -> String {
    let Some(at) = content.rfind(MAP_COMMENT) else {
        return content;
    };
    let start = at + MAP_COMMENT.len();
    let end = content[start..]
        .find(['\n', '\r'])
        .map_or(content.len(), |offset| start + offset);
    let Some(suffix) = entry_suffix(&content[start..end], STDIN_NAME) else {
        return content;
    };
    let base = mapping
        .entry_stem
        .rsplit('/')
        .next()
        .unwrap_or(&mapping.entry_stem);
    format!("{}{base}{suffix}{}", &content[..start], &content[end..])
}

fn map_output(mapping: &PathMapping, engine_path: &str) -> Result<String> {
    mapping.output_to_logical(engine_path).ok_or_else(|| {
        Error::engine(
            DiagnosticKind::Other("OutputOutsideDir".into()),
            format!(
                "engine output '{engine_path}' is outside '{}'",
                mapping.output_dir
            ),
        )
    })
}

fn claim(claimed: &mut FxHashMap<String, String>, logical: &str, engine_path: &str) -> Result<()> {
    match claimed.insert(logical.to_string(), engine_path.to_string()) {
        Some(previous) => Err(Error::engine(
            DiagnosticKind::OutputCollision,
            format!("'{previous}' and '{engine_path}' both map to '{logical}'"),
        )),
        None => Ok(()),
    }
}

fn normalize_meta(raw: MetaGraph, mapping: &PathMapping) -> Result<MetaGraph> {
    let map_import = |import: MetaImport| MetaImport {
        path: if import.external {
            import.path
        } else {
            mapping.input_to_logical(&import.path)
        },
        ..import
    };

    let inputs = raw
        .inputs
        .into_iter()
        .map(|(id, mut input)| {
            input.imports = input.imports.into_iter().map(&map_import).collect();
            (mapping.input_to_logical(&id), input)
        })
        .collect();

    let mut claimed = FxHashMap::default();
    let mut outputs = IndexMap::with_capacity(raw.outputs.len());
    for (engine_path, output) in raw.outputs {
        let logical = map_output(mapping, &engine_path)?;
        claim(&mut claimed, &logical, &engine_path)?;
        let output = MetaOutput {
            imports: output
                .imports
                .into_iter()
                .map(|import| MetaImport {
                    path: mapping
                        .output_to_logical(&import.path)
                        .unwrap_or(import.path),
                    ..import
                })
                .collect(),
            entry_point: output
                .entry_point
                .map(|id| mapping.input_to_logical(&id)),
            inputs: output
                .inputs
                .into_iter()
                .map(|(id, input)| (mapping.input_to_logical(&id), input))
                .collect(),
            ..output
        };
        outputs.insert(logical, output);
    }

    Ok(MetaGraph { inputs, outputs })
}
