//! CDN-backed resolution strategy (jsDelivr conventions).
//!
//! - `{base_url}/{name}@{range}/package.json` pins a range to an exact
//!   version; the package root becomes `cdn:///{name}@{version}/`.
//! - `{listing_url}/{name}@{version}/flat` lists every file in the package
//!   and answers `stat` without probing file URLs one by one.
//! - `{base_url}/{name}@{version}/{path}` reads a file.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use rustc_hash::FxHashSet;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::config::CdnConfig;
use crate::fetch::{Fetch, FetchError};
use crate::manifest::PackageManifest;
use crate::resolver::{FileContent, FileStat, ResolutionStrategy};
use crate::uri::{LogicalUri, UriScheme};
use crate::{Error, Result};

/// Files and directories of one pinned package, relative to its root.
#[derive(Debug, Default)]
struct PackageListing {
    files: FxHashSet<String>,
    directories: FxHashSet<String>,
}

impl PackageListing {
    fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut listing = Self::default();
        for name in names {
            let path = name.trim_start_matches('/');
            if path.is_empty() {
                continue;
            }
            let mut end = 0;
            while let Some(idx) = path[end..].find('/') {
                end += idx;
                listing.directories.insert(path[..end].to_string());
                end += 1;
            }
            listing.files.insert(path.to_string());
        }
        listing
    }

    fn stat(&self, relative: &str) -> FileStat {
        if relative.is_empty() {
            return FileStat::Directory;
        }
        if let Some(dir) = relative.strip_suffix('/') {
            return if dir.is_empty() || self.directories.contains(dir) {
                FileStat::Directory
            } else {
                FileStat::Missing
            };
        }
        if self.files.contains(relative) {
            FileStat::File
        } else if self.directories.contains(relative) {
            FileStat::Directory
        } else {
            FileStat::Missing
        }
    }
}

#[derive(Debug, Deserialize)]
struct FlatListing {
    #[serde(default)]
    files: Vec<FlatEntry>,
}

#[derive(Debug, Deserialize)]
struct FlatEntry {
    name: String,
}

/// Resolution strategy serving `cdn:///` URIs.
///
/// Shared across requests: every cache it holds only grows, and pinned
/// versions, listings and manifests never change for a given URL.
pub struct CdnStrategy {
    fetcher: Arc<dyn Fetch>,
    base_url: String,
    listing_url: String,
    roots: DashMap<String, LogicalUri>,
    listings: DashMap<LogicalUri, Arc<PackageListing>>,
    pinned_manifests: DashMap<LogicalUri, Bytes>,
}

impl std::fmt::Debug for CdnStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdnStrategy")
            .field("base_url", &self.base_url)
            .field("listing_url", &self.listing_url)
            .field("pinned", &self.roots.len())
            .finish_non_exhaustive()
    }
}

impl CdnStrategy {
    pub fn new(fetcher: Arc<dyn Fetch>, config: &CdnConfig) -> Self {
        Self {
            fetcher,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            listing_url: config.listing_url.trim_end_matches('/').to_string(),
            roots: DashMap::new(),
            listings: DashMap::new(),
            pinned_manifests: DashMap::new(),
        }
    }

    /// HTTP URL serving the file behind a `cdn:///` URI.
    pub fn file_url(&self, uri: &LogicalUri) -> String {
        format!("{}/{}", self.base_url, uri.path().trim_start_matches('/'))
    }

    fn package_id<'a>(&self, root: &'a LogicalUri) -> &'a str {
        root.path().trim_matches('/')
    }

    async fn listing(
        &self,
        root: &LogicalUri,
        token: &CancellationToken,
    ) -> Result<Arc<PackageListing>> {
        if let Some(listing) = self.listings.get(root) {
            return Ok(Arc::clone(listing.value()));
        }

        let url = format!("{}/{}/flat", self.listing_url, self.package_id(root));
        let listing = match self.fetcher.fetch(&url, token).await {
            Ok(body) => {
                let flat: FlatListing =
                    serde_json::from_slice(&body).map_err(|e| Error::ReadFailed {
                        uri: root.to_string(),
                        reason: format!("invalid directory listing from {url}: {e}"),
                    })?;
                PackageListing::from_names(flat.files.iter().map(|entry| entry.name.as_str()))
            }
            Err(err) if err.is_not_found() => PackageListing::default(),
            Err(err) => return Err(err.into()),
        };

        debug!(package = self.package_id(root), files = listing.files.len(), "listed package");
        let listing = Arc::new(listing);
        self.listings.insert(root.clone(), Arc::clone(&listing));
        Ok(listing)
    }
}

#[async_trait]
impl ResolutionStrategy for CdnStrategy {
    fn scheme(&self) -> UriScheme {
        UriScheme::Cdn
    }

    /// Root of the package `uri` belongs to (`cdn:///name@1.0.0/` or
    /// `cdn:///@scope/name@1.0.0/`).
    fn boundary(&self, uri: &LogicalUri) -> LogicalUri {
        let path = uri.path().trim_start_matches('/');
        let take = if path.starts_with('@') { 2 } else { 1 };
        let segments: Vec<&str> = path.split('/').take(take).collect();
        if segments.len() < take || segments.iter().any(|s| s.is_empty()) {
            return LogicalUri::cdn_root();
        }
        LogicalUri::cdn_root()
            .join(&format!("{}/", segments.join("/")))
            .unwrap_or_else(|_| LogicalUri::cdn_root())
    }

    async fn stat(&self, uri: &LogicalUri, token: &CancellationToken) -> Result<FileStat> {
        let root = self.boundary(uri);
        if root == LogicalUri::cdn_root() {
            return Ok(FileStat::Missing);
        }
        if self.pinned_manifests.contains_key(uri) {
            return Ok(FileStat::File);
        }
        let Some(relative) = uri.strip_root(&root) else {
            return Ok(FileStat::Directory);
        };
        let relative = urlencoding::decode(relative)
            .map(|decoded| decoded.into_owned())
            .unwrap_or_else(|_| relative.to_string());
        let listing = self.listing(&root, token).await?;
        Ok(listing.stat(&relative))
    }

    #[instrument(skip(self, uri, token), level = "debug", fields(uri = %uri))]
    async fn read(&self, uri: &LogicalUri, token: &CancellationToken) -> Result<FileContent> {
        if let Some(bytes) = self.pinned_manifests.get(uri) {
            return Ok(FileContent {
                uri: uri.clone(),
                bytes: bytes.value().clone(),
            });
        }

        let url = self.file_url(uri);
        match self.fetcher.fetch(&url, token).await {
            Ok(bytes) => Ok(FileContent {
                uri: uri.clone(),
                bytes,
            }),
            Err(err) if err.is_not_found() => Err(Error::ReadFailed {
                uri: uri.to_string(),
                reason: err.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    #[instrument(skip(self, token), level = "debug")]
    async fn package_root(
        &self,
        name: &str,
        range: Option<&str>,
        token: &CancellationToken,
    ) -> Result<Option<LogicalUri>> {
        let range = range.map(str::trim).filter(|r| !r.is_empty()).unwrap_or("latest");
        let key = format!("{name}@{range}");
        if let Some(root) = self.roots.get(&key) {
            return Ok(Some(root.value().clone()));
        }

        let url = format!(
            "{}/{}@{}/package.json",
            self.base_url,
            name,
            urlencoding::encode(range)
        );
        let body = match self.fetcher.fetch(&url, token).await {
            Ok(body) => body,
            Err(FetchError::Status { status: 404, .. }) => {
                debug!(%key, "package not on CDN");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        let manifest = PackageManifest::from_slice(&body).map_err(|e| Error::ReadFailed {
            uri: url.clone(),
            reason: format!("invalid package.json: {e}"),
        })?;
        let Some(version) = manifest.version.as_deref() else {
            return Err(Error::ReadFailed {
                uri: url,
                reason: "package.json has no version".to_string(),
            });
        };

        let root = LogicalUri::parse(&format!("cdn:///{name}@{version}/"))?;
        debug!(%key, %root, "pinned package");
        self.pinned_manifests
            .insert(root.join("package.json")?, body);
        self.roots.insert(key, root.clone());
        Ok(Some(root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct StaticFetch {
        responses: FxHashMap<String, &'static str>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Fetch for StaticFetch {
        async fn fetch(
            &self,
            url: &str,
            _token: &CancellationToken,
        ) -> std::result::Result<Bytes, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .get(url)
                .map(|body| Bytes::from_static(body.as_bytes()))
                .ok_or(FetchError::Status {
                    url: url.to_string(),
                    status: 404,
                })
        }
    }

    fn strategy() -> (CdnStrategy, Arc<StaticFetch>) {
        let mut fetch = StaticFetch::default();
        fetch.responses.insert(
            "https://cdn.test/npm/tiny@latest/package.json".into(),
            r#"{ "name": "tiny", "version": "1.0.0", "module": "esm/index.js" }"#,
        );
        fetch.responses.insert(
            "https://data.test/npm/tiny@1.0.0/flat".into(),
            r#"{ "files": [ { "name": "/package.json" }, { "name": "/esm/index.js" } ] }"#,
        );
        fetch.responses.insert(
            "https://cdn.test/npm/tiny@1.0.0/esm/index.js".into(),
            "export default 1;",
        );
        let fetch = Arc::new(fetch);
        let config = CdnConfig {
            base_url: "https://cdn.test/npm/".into(),
            listing_url: "https://data.test/npm".into(),
            ..CdnConfig::default()
        };
        (CdnStrategy::new(fetch.clone(), &config), fetch)
    }

    #[test]
    fn boundary_covers_scoped_packages() {
        let (cdn, _) = strategy();
        let plain = LogicalUri::parse("cdn:///tiny@1.0.0/esm/index.js").unwrap();
        assert_eq!(cdn.boundary(&plain).as_str(), "cdn:///tiny@1.0.0/");
        let scoped = LogicalUri::parse("cdn:///@scope/pkg@2.0.0/dist/a.js").unwrap();
        assert_eq!(cdn.boundary(&scoped).as_str(), "cdn:///@scope/pkg@2.0.0/");
    }

    #[test]
    fn listing_derives_directories() {
        let listing = PackageListing::from_names(["/a/b/c.js", "/d.js"]);
        assert_eq!(listing.stat("a"), FileStat::Directory);
        assert_eq!(listing.stat("a/b/"), FileStat::Directory);
        assert_eq!(listing.stat("a/b/c.js"), FileStat::File);
        assert_eq!(listing.stat("d.js"), FileStat::File);
        assert_eq!(listing.stat("e.js"), FileStat::Missing);
    }

    #[tokio::test]
    async fn pins_package_and_serves_manifest_without_refetch() {
        let (cdn, fetch) = strategy();
        let token = CancellationToken::new();
        let root = cdn.package_root("tiny", None, &token).await.unwrap().unwrap();
        assert_eq!(root.as_str(), "cdn:///tiny@1.0.0/");
        assert_eq!(fetch.calls.load(Ordering::SeqCst), 1);

        let manifest = cdn.read(&root.join("package.json").unwrap(), &token).await.unwrap();
        assert!(manifest.text().unwrap().contains("esm/index.js"));
        assert_eq!(fetch.calls.load(Ordering::SeqCst), 1);

        // Cached pin.
        cdn.package_root("tiny", Some("latest"), &token).await.unwrap();
        assert_eq!(fetch.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_package_is_not_an_error() {
        let (cdn, _) = strategy();
        let token = CancellationToken::new();
        assert!(cdn.package_root("missing", None, &token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stat_and_read_use_listing_and_file_urls() {
        let (cdn, _) = strategy();
        let token = CancellationToken::new();
        let root = cdn.package_root("tiny", None, &token).await.unwrap().unwrap();
        let file = root.join("esm/index.js").unwrap();
        assert_eq!(cdn.stat(&file, &token).await.unwrap(), FileStat::File);
        assert_eq!(cdn.stat(&root.join("esm").unwrap(), &token).await.unwrap(), FileStat::Directory);
        assert_eq!(cdn.stat(&root, &token).await.unwrap(), FileStat::Directory);
        assert_eq!(cdn.stat(&root.join("nope.js").unwrap(), &token).await.unwrap(), FileStat::Missing);
        assert_eq!(cdn.file_url(&file), "https://cdn.test/npm/tiny@1.0.0/esm/index.js");
        assert_eq!(cdn.read(&file, &token).await.unwrap().text().unwrap(), "export default 1;");

        let gone = root.join("gone.js").unwrap();
        assert!(matches!(cdn.read(&gone, &token).await, Err(Error::ReadFailed { .. })));
    }
}
