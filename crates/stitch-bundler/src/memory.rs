//! In-memory module store for the files supplied with a bundle request.

use async_trait::async_trait;
use bytes::Bytes;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio_util::sync::CancellationToken;

use crate::resolver::{FileContent, FileStat, ResolutionStrategy};
use crate::uri::{LogicalUri, UriScheme};
use crate::{Error, Result};

/// Immutable virtual file set addressed by `memory:///` URIs.
///
/// Built once per request and never shared across requests. Lookups are
/// pure map operations; nothing here touches the network or the disk.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    root: LogicalUri,
    files: FxHashMap<LogicalUri, Bytes>,
    directories: FxHashSet<LogicalUri>,
}

impl MemoryStore {
    /// Build a store from `(logical path, source text)` pairs.
    pub fn new<I, P, C>(files: I) -> Result<Self>
    where
        I: IntoIterator<Item = (P, C)>,
        P: AsRef<str>,
        C: Into<String>,
    {
        let root = LogicalUri::memory_root();
        let mut store = Self {
            root,
            files: FxHashMap::default(),
            directories: FxHashSet::default(),
        };

        for (path, content) in files {
            let uri = store.uri_for_path(path.as_ref())?;
            if uri.is_directory() {
                return Err(Error::InvalidRequest(format!(
                    "file path '{}' names a directory",
                    path.as_ref()
                )));
            }
            let mut dir = uri.parent_dir();
            while dir != store.root && store.directories.insert(dir.clone()) {
                dir = dir.parent_dir();
            }
            store.files.insert(uri, Bytes::from(content.into()));
        }
        store.directories.insert(store.root.clone());

        Ok(store)
    }

    pub fn root(&self) -> &LogicalUri {
        &self.root
    }

    /// Logical URI of a project-relative path. Pure and deterministic.
    pub fn uri_for_path(&self, path: &str) -> Result<LogicalUri> {
        LogicalUri::for_path(&self.root, path)
    }

    pub fn contains(&self, uri: &LogicalUri) -> bool {
        self.files.contains_key(uri)
    }

    pub fn read(&self, uri: &LogicalUri) -> Result<FileContent> {
        self.files
            .get(uri)
            .map(|bytes| FileContent {
                uri: uri.clone(),
                bytes: bytes.clone(),
            })
            .ok_or_else(|| Error::ReadFailed {
                uri: uri.to_string(),
                reason: "not found in the request files".to_string(),
            })
    }

    pub fn stat(&self, uri: &LogicalUri) -> FileStat {
        if self.files.contains_key(uri) {
            FileStat::File
        } else if self.directories.contains(&uri.with_trailing_slash()) {
            FileStat::Directory
        } else {
            FileStat::Missing
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[async_trait]
impl ResolutionStrategy for MemoryStore {
    fn scheme(&self) -> UriScheme {
        UriScheme::Memory
    }

    fn boundary(&self, _uri: &LogicalUri) -> LogicalUri {
        self.root.clone()
    }

    async fn stat(&self, uri: &LogicalUri, _token: &CancellationToken) -> Result<FileStat> {
        Ok(MemoryStore::stat(self, uri))
    }

    async fn read(&self, uri: &LogicalUri, _token: &CancellationToken) -> Result<FileContent> {
        MemoryStore::read(self, uri)
    }

    async fn package_root(
        &self,
        _name: &str,
        _range: Option<&str>,
        _token: &CancellationToken,
    ) -> Result<Option<LogicalUri>> {
        // Virtual file sets have no installed packages.
        Ok(None)
    }
}
