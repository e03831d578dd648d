//! Diagnostic extraction from Rolldown errors and warnings.
//!
//! Rolldown reports problems as opaque diagnostic values. This module turns
//! their formatted output into [`ExtractedDiagnostic`]s that are cloneable,
//! serializable and stable across Rolldown versions. The same type carries
//! engine warnings back to callers in [`Bundle::warnings`](crate::Bundle).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Structured diagnostic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedDiagnostic {
    pub kind: DiagnosticKind,
    pub severity: DiagnosticSeverity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    /// Error chain (causes) extracted from the error
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_chain: Vec<String>,
}

/// Diagnostic kind (mirrors Rolldown's event kinds).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    MissingExport,
    ParseError,
    CircularDependency,
    UnresolvedEntry,
    UnresolvedImport,
    InvalidOption,
    Plugin,
    Transform,
    /// Two outputs normalized to the same logical path.
    OutputCollision,
    /// The engine produced no metadata graph.
    MissingMetadata,
    Other(String),
}

/// Diagnostic severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticKind::MissingExport => write!(f, "MissingExport"),
            DiagnosticKind::ParseError => write!(f, "ParseError"),
            DiagnosticKind::CircularDependency => write!(f, "CircularDependency"),
            DiagnosticKind::UnresolvedEntry => write!(f, "UnresolvedEntry"),
            DiagnosticKind::UnresolvedImport => write!(f, "UnresolvedImport"),
            DiagnosticKind::InvalidOption => write!(f, "InvalidOption"),
            DiagnosticKind::Plugin => write!(f, "Plugin"),
            DiagnosticKind::Transform => write!(f, "Transform"),
            DiagnosticKind::OutputCollision => write!(f, "OutputCollision"),
            DiagnosticKind::MissingMetadata => write!(f, "MissingMetadata"),
            DiagnosticKind::Other(s) => write!(f, "{s}"),
        }
    }
}

impl ExtractedDiagnostic {
    pub fn error(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: DiagnosticSeverity::Error,
            message: message.into(),
            file: None,
            line: None,
            column: None,
            help: None,
            error_chain: Vec::new(),
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }
}

/// Extract diagnostics from a Rolldown error value.
///
/// Rolldown does not expose a stable structured API for its diagnostics, so
/// this parses the debug representation.
pub fn extract_from_rolldown_error(error: &dyn fmt::Debug) -> Vec<ExtractedDiagnostic> {
    let error_str = format!("{error:?}");

    if error_str.contains("BatchedBuildDiagnostic") {
        let parts: Vec<&str> = error_str
            .split("BatchedBuildDiagnostic")
            .filter(|s| !s.trim().is_empty())
            .collect();
        if parts.len() > 1 {
            return parts.iter().map(|part| extract_single(part)).collect();
        }
    }

    vec![extract_single(&error_str)]
}

/// Extract a warning from a Rolldown warning value.
pub fn extract_warning(warning: &dyn fmt::Debug) -> ExtractedDiagnostic {
    let mut diagnostic = extract_single(&format!("{warning:?}"));
    diagnostic.severity = DiagnosticSeverity::Warning;
    diagnostic
}

fn extract_single(error_str: &str) -> ExtractedDiagnostic {
    let kind = classify_kind(error_str);
    let severity = if error_str.contains("warning") || error_str.contains("Warning") {
        DiagnosticSeverity::Warning
    } else {
        DiagnosticSeverity::Error
    };

    ExtractedDiagnostic {
        kind,
        severity,
        message: error_str.trim().to_string(),
        file: extract_file_path(error_str),
        line: extract_number_after(error_str, &["line ", "line: "]),
        column: extract_number_after(error_str, &["column ", "col ", "column: "]),
        help: extract_help_text(error_str),
        error_chain: extract_error_chain(error_str),
    }
}

fn classify_kind(error_str: &str) -> DiagnosticKind {
    if error_str.contains("MissingExport") || error_str.contains("MISSING_EXPORT") {
        DiagnosticKind::MissingExport
    } else if error_str.contains("Parse error")
        || error_str.contains("PARSE_ERROR")
        || error_str.contains("Syntax")
        || error_str.contains("Expected")
    {
        DiagnosticKind::ParseError
    } else if error_str.contains("Circular") || error_str.contains("CIRCULAR") {
        DiagnosticKind::CircularDependency
    } else if error_str.contains("UnresolvedEntry") || error_str.contains("UNRESOLVED_ENTRY") {
        DiagnosticKind::UnresolvedEntry
    } else if error_str.contains("UnresolvedImport")
        || error_str.contains("UNRESOLVED_IMPORT")
        || error_str.contains("Unable to resolve")
    {
        DiagnosticKind::UnresolvedImport
    } else if error_str.contains("Plugin") || error_str.contains("PLUGIN_ERROR") {
        DiagnosticKind::Plugin
    } else if error_str.contains("Transform") || error_str.contains("transform") {
        DiagnosticKind::Transform
    } else {
        DiagnosticKind::Other("EngineError".to_string())
    }
}

/// Find the first module path mentioned in the message.
fn extract_file_path(text: &str) -> Option<String> {
    for ext in [".tsx", ".ts", ".jsx", ".mjs", ".cjs", ".js", ".json"] {
        let Some(pos) = text.find(ext) else {
            continue;
        };
        let before = &text[..pos + ext.len()];
        let start = before
            .rfind(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | '`' | '(' | '['))
            .map(|idx| idx + 1)
            .unwrap_or(0);
        let path = before[start..].trim();
        if !path.is_empty() && path != ext {
            return Some(path.to_string());
        }
    }
    None
}

fn extract_number_after(text: &str, patterns: &[&str]) -> Option<u32> {
    patterns.iter().find_map(|pattern| {
        let pos = text.find(pattern)?;
        let digits: String = text[pos + pattern.len()..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse().ok()
    })
}

fn extract_help_text(text: &str) -> Option<String> {
    for indicator in ["help: ", "Help: ", "hint: ", "Hint: "] {
        if let Some(pos) = text.find(indicator) {
            let help = text[pos + indicator.len()..]
                .lines()
                .next()
                .unwrap_or("")
                .trim();
            if !help.is_empty() {
                return Some(help.to_string());
            }
        }
    }
    None
}

/// Collect `Caused by:` lines (anyhow's chain format).
fn extract_error_chain(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let pos = line.find("Caused by:")?;
            let cause = line[pos + "Caused by:".len()..].trim();
            (!cause.is_empty()).then(|| cause.to_string())
        })
        .collect()
}
