//! Logical URIs.
//!
//! Every module a bundle touches is addressed by a [`LogicalUri`]: in-memory
//! request files live under `memory:///`, CDN package files under
//! `cdn:///<name>@<version>/`. The scheme decides which resolution strategy
//! owns a module, so the resolver never has to probe more than one backend to
//! find out where a file lives.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

use crate::{Error, Result};

/// Root of the in-memory file set.
pub const MEMORY_ROOT: &str = "memory:///";

/// Root of all CDN-hosted packages.
pub const CDN_ROOT: &str = "cdn:///";

/// Backing store a [`LogicalUri`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UriScheme {
    Memory,
    Cdn,
}

impl UriScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            UriScheme::Memory => "memory",
            UriScheme::Cdn => "cdn",
        }
    }

    pub fn root(&self) -> LogicalUri {
        match self {
            UriScheme::Memory => LogicalUri::memory_root(),
            UriScheme::Cdn => LogicalUri::cdn_root(),
        }
    }
}

impl fmt::Display for UriScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical address of a module.
///
/// Two URIs are equal iff their serialized forms are equal. Dot segments are
/// collapsed on construction, so `memory:///a/../b.js` and `memory:///b.js`
/// are the same module.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogicalUri(Url);

impl LogicalUri {
    /// Parse a logical URI. Only the `memory` and `cdn` schemes are accepted.
    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input).map_err(|e| invalid(input, e.to_string()))?;
        Self::from_url(url)
    }

    fn from_url(url: Url) -> Result<Self> {
        match url.scheme() {
            "memory" | "cdn" => {}
            other => {
                return Err(invalid(
                    url.as_str(),
                    format!("unsupported scheme '{other}'"),
                ));
            }
        }
        if url.cannot_be_a_base() {
            return Err(invalid(url.as_str(), "expected a hierarchical path"));
        }
        Ok(Self(url))
    }

    pub fn memory_root() -> Self {
        Self::root_for(MEMORY_ROOT)
    }

    pub fn cdn_root() -> Self {
        Self::root_for(CDN_ROOT)
    }

    fn root_for(root: &str) -> Self {
        match Url::parse(root) {
            Ok(url) => Self(url),
            // Both roots are constant, well-formed URLs.
            Err(_) => unreachable!("invalid root URI constant {root}"),
        }
    }

    /// Address `logical_path` under `root`.
    ///
    /// Leading `/` and `./` are ignored so that `"/src/a.js"`, `"./src/a.js"`
    /// and `"src/a.js"` all name the same file.
    pub fn for_path(root: &LogicalUri, logical_path: &str) -> Result<Self> {
        let mut relative = logical_path;
        loop {
            if let Some(rest) = relative.strip_prefix("./") {
                relative = rest;
            } else if let Some(rest) = relative.strip_prefix('/') {
                relative = rest;
            } else {
                break;
            }
        }
        if relative.is_empty() {
            return Err(invalid(logical_path, "empty path"));
        }
        root.with_trailing_slash().join(relative)
    }

    /// Resolve a relative reference (`./x`, `../y`, `/z`) against this URI.
    pub fn join(&self, reference: &str) -> Result<Self> {
        let url = self
            .0
            .join(reference)
            .map_err(|e| invalid(reference, e.to_string()))?;
        Self::from_url(url)
    }

    pub fn scheme(&self) -> UriScheme {
        match self.0.scheme() {
            "cdn" => UriScheme::Cdn,
            _ => UriScheme::Memory,
        }
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Path component, always starting with `/`.
    pub fn path(&self) -> &str {
        self.0.path()
    }

    /// Whether the URI names a directory (ends with `/`).
    pub fn is_directory(&self) -> bool {
        self.0.path().ends_with('/')
    }

    /// Directory containing this module, with a trailing slash.
    pub fn parent_dir(&self) -> Self {
        if self.is_directory() {
            return match self.join("..") {
                Ok(parent) => parent,
                Err(_) => self.clone(),
            };
        }
        match self.join(".") {
            Ok(dir) => dir,
            Err(_) => self.clone(),
        }
    }

    pub fn with_trailing_slash(&self) -> Self {
        if self.is_directory() {
            return self.clone();
        }
        let mut url = self.0.clone();
        let path = format!("{}/", url.path());
        url.set_path(&path);
        Self(url)
    }

    /// Append a suffix (such as an extension) to the last path segment.
    pub fn with_suffix(&self, suffix: &str) -> Self {
        let mut url = self.0.clone();
        let path = format!("{}{}", url.path(), suffix);
        url.set_path(&path);
        Self(url)
    }

    /// Last path segment, empty for directories.
    pub fn file_name(&self) -> &str {
        self.0.path().rsplit('/').next().unwrap_or_default()
    }

    /// Extension of the last segment including the dot, if any.
    pub fn extension(&self) -> Option<&str> {
        let name = self.file_name();
        match name.rfind('.') {
            Some(0) | None => None,
            Some(idx) => Some(&name[idx..]),
        }
    }

    /// Serialized form with the last extension removed from the final segment.
    ///
    /// `memory:///src/app.test.tsx` has the stem `memory:///src/app.test`.
    pub fn stem(&self) -> String {
        let full = self.as_str();
        match self.extension() {
            Some(ext) => full[..full.len() - ext.len()].to_string(),
            None => full.to_string(),
        }
    }

    /// Whether this URI lies at or below `root`.
    pub fn is_within(&self, root: &LogicalUri) -> bool {
        let root = root.with_trailing_slash();
        self.as_str().starts_with(root.as_str()) || self.with_trailing_slash() == root
    }

    /// Path of this URI relative to `root`, if it lies below it.
    pub fn strip_root<'a>(&'a self, root: &LogicalUri) -> Option<&'a str> {
        let root = root.with_trailing_slash();
        self.as_str().strip_prefix(root.as_str())
    }
}

fn invalid(uri: &str, reason: impl Into<String>) -> Error {
    Error::InvalidUri {
        uri: uri.to_string(),
        reason: reason.into(),
    }
}

impl fmt::Display for LogicalUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl fmt::Debug for LogicalUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogicalUri({})", self.0.as_str())
    }
}

impl FromStr for LogicalUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for LogicalUri {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LogicalUri {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
