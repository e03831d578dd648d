//! Compound module resolution over memory and CDN strategies.
//!
//! Resolution is deterministic: strategies are consulted in a fixed order,
//! candidates are probed in a fixed order (exact path, configured
//! extensions, manifest main fields, `index` files), and a strategy is only
//! skipped when it reports no candidate at all. Relative and absolute
//! specifiers never leave the importer's strategy, so a relative import from
//! a request file can never silently resolve on the CDN.

pub mod specifier;
mod strategy;

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

pub use strategy::{FileContent, FileStat, ResolutionStrategy};

use crate::config::ResolveConfig;
use crate::manifest::{BrowserOverride, PackageManifest};
use crate::uri::{LogicalUri, UriScheme};
use crate::{Error, Result};
use specifier::{BareSpecifier, SpecifierKind, classify, parse_bare};

/// Outcome of resolving one specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveResult {
    /// Resolved to a bundlable module.
    Found(LogicalUri),
    /// A candidate exists but a `browser` override maps it to `false`.
    Excluded,
    /// An external form (such as a `data:` URI) that is never bundled.
    External(String),
    /// No strategy produced a candidate.
    NotFound,
}

impl ResolveResult {
    /// `true` unless no candidate existed at all.
    pub fn found(&self) -> bool {
        !matches!(self, ResolveResult::NotFound)
    }

    /// Resolved URI; absent for exclusions, externals and misses.
    pub fn uri(&self) -> Option<&LogicalUri> {
        match self {
            ResolveResult::Found(uri) => Some(uri),
            _ => None,
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self, ResolveResult::External(_))
    }
}

type ManifestEntry = Option<Arc<PackageManifest>>;

/// Resolver over an ordered list of strategies.
///
/// Owned by a single request; the manifest cache it keeps is discarded with
/// it.
pub struct CompoundResolver {
    strategies: Vec<Arc<dyn ResolutionStrategy>>,
    config: ResolveConfig,
    manifests: DashMap<LogicalUri, ManifestEntry>,
}

impl std::fmt::Debug for CompoundResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompoundResolver")
            .field(
                "strategies",
                &self.strategies.iter().map(|s| s.scheme()).collect::<Vec<_>>(),
            )
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CompoundResolver {
    pub fn new(strategies: Vec<Arc<dyn ResolutionStrategy>>, config: ResolveConfig) -> Self {
        Self {
            strategies,
            config,
            manifests: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ResolveConfig {
        &self.config
    }

    fn strategy_for(&self, scheme: UriScheme) -> Result<&Arc<dyn ResolutionStrategy>> {
        self.strategies
            .iter()
            .find(|strategy| strategy.scheme() == scheme)
            .ok_or_else(|| Error::InvalidUri {
                uri: scheme.root().to_string(),
                reason: format!("no resolution strategy handles the '{scheme}' scheme"),
            })
    }

    /// Strategies in consultation order: `owner` first, then the rest as
    /// configured.
    fn ordered_strategies(&self, owner: UriScheme) -> Vec<&Arc<dyn ResolutionStrategy>> {
        let (mut ordered, rest): (Vec<_>, Vec<_>) = self
            .strategies
            .iter()
            .partition(|strategy| strategy.scheme() == owner);
        ordered.extend(rest);
        ordered
    }

    pub fn is_external(&self, specifier: &str) -> bool {
        self.config
            .external_prefixes
            .iter()
            .any(|prefix| specifier.starts_with(prefix.as_str()))
    }

    /// Resolve `specifier` as imported from `importer`.
    ///
    /// Without an importer, relative specifiers are taken relative to the
    /// memory root.
    #[instrument(skip(self, token), level = "debug")]
    pub async fn resolve(
        &self,
        specifier: &str,
        importer: Option<&LogicalUri>,
        token: &CancellationToken,
    ) -> Result<ResolveResult> {
        ensure_live(token)?;

        if self.is_external(specifier) {
            return Ok(ResolveResult::External(specifier.to_string()));
        }

        let owner = importer.map(LogicalUri::scheme).unwrap_or(UriScheme::Memory);
        let result = match classify(specifier) {
            None => ResolveResult::NotFound,
            Some(SpecifierKind::Relative(relative)) => {
                let strategy = self.strategy_for(owner)?;
                let candidate = match importer {
                    Some(importer) => importer.join(relative)?,
                    None => LogicalUri::memory_root().join(relative)?,
                };
                self.resolve_path(strategy, candidate, token).await?
            }
            Some(SpecifierKind::Absolute(path)) => {
                let strategy = self.strategy_for(owner)?;
                let origin = match importer {
                    Some(importer) => strategy.boundary(importer),
                    None => LogicalUri::memory_root(),
                };
                match path.trim_start_matches('/') {
                    "" => self.resolve_path(strategy, origin, token).await?,
                    _ => {
                        let candidate = LogicalUri::for_path(&origin, path)?;
                        self.resolve_path(strategy, candidate, token).await?
                    }
                }
            }
            Some(SpecifierKind::Bare(_)) => self.resolve_bare(specifier, importer, token).await?,
        };

        debug!(?result, "resolved");
        Ok(result)
    }

    /// Resolve a URI directly, applying the same probing as a relative
    /// import. Used for entrypoints.
    pub async fn resolve_uri(
        &self,
        uri: &LogicalUri,
        token: &CancellationToken,
    ) -> Result<ResolveResult> {
        ensure_live(token)?;
        let strategy = self.strategy_for(uri.scheme())?;
        self.resolve_path(strategy, uri.clone(), token).await
    }

    /// Read a resolved module from the strategy that owns its scheme.
    pub async fn read_file_content(
        &self,
        uri: &LogicalUri,
        token: &CancellationToken,
    ) -> Result<FileContent> {
        ensure_live(token)?;
        self.strategy_for(uri.scheme())?.read(uri, token).await
    }

    async fn resolve_bare(
        &self,
        specifier: &str,
        importer: Option<&LogicalUri>,
        token: &CancellationToken,
    ) -> Result<ResolveResult> {
        let owner = importer.map(LogicalUri::scheme).unwrap_or(UriScheme::Memory);

        let mut request = specifier.to_string();
        let context = match importer {
            Some(importer) => {
                let strategy = self.strategy_for(importer.scheme())?;
                self.nearest_manifest(strategy, importer, token).await?
            }
            None => None,
        };

        if let (Some(importer), Some((dir, manifest))) = (importer, &context) {
            match manifest.browser_override(specifier, &[]) {
                Some(BrowserOverride::Disabled(false)) => {
                    trace!(specifier, "bare import disabled by browser field");
                    return Ok(ResolveResult::Excluded);
                }
                Some(BrowserOverride::Replace(target)) => {
                    if target.starts_with("./") || target.starts_with("../") {
                        let strategy = self.strategy_for(importer.scheme())?;
                        let candidate = dir.join(target)?;
                        return self.resolve_path(strategy, candidate, token).await;
                    }
                    request = target.clone();
                }
                _ => {}
            }
        }

        let Some(bare) = parse_bare(&request) else {
            return Ok(ResolveResult::NotFound);
        };
        let range = bare.range.or_else(|| {
            context
                .as_ref()
                .and_then(|(_, manifest)| manifest.dependency_range(bare.name))
        });

        for strategy in self.ordered_strategies(owner) {
            let result = self.resolve_package(strategy, &bare, range, token).await?;
            if result.found() {
                return Ok(result);
            }
            trace!(scheme = %strategy.scheme(), name = bare.name, "no candidate");
        }
        Ok(ResolveResult::NotFound)
    }

    async fn resolve_package(
        &self,
        strategy: &Arc<dyn ResolutionStrategy>,
        bare: &BareSpecifier<'_>,
        range: Option<&str>,
        token: &CancellationToken,
    ) -> Result<ResolveResult> {
        let Some(root) = strategy.package_root(bare.name, range, token).await? else {
            return Ok(ResolveResult::NotFound);
        };
        let candidate = match bare.subpath {
            Some(subpath) => root.with_trailing_slash().join(subpath)?,
            None => root,
        };
        self.resolve_path(strategy, candidate, token).await
    }

    async fn resolve_path(
        &self,
        strategy: &Arc<dyn ResolutionStrategy>,
        candidate: LogicalUri,
        token: &CancellationToken,
    ) -> Result<ResolveResult> {
        match self.probe(strategy, &candidate, token).await? {
            Some(uri) => self.apply_browser_overrides(strategy, uri, token).await,
            None => Ok(ResolveResult::NotFound),
        }
    }

    async fn apply_browser_overrides(
        &self,
        strategy: &Arc<dyn ResolutionStrategy>,
        uri: LogicalUri,
        token: &CancellationToken,
    ) -> Result<ResolveResult> {
        let Some((dir, manifest)) = self.nearest_manifest(strategy, &uri, token).await? else {
            return Ok(ResolveResult::Found(uri));
        };
        let Some(relative) = uri.strip_root(&dir) else {
            return Ok(ResolveResult::Found(uri));
        };

        match manifest.browser_override(relative, &self.config.extensions) {
            Some(BrowserOverride::Disabled(false)) => {
                trace!(%uri, "module disabled by browser field");
                Ok(ResolveResult::Excluded)
            }
            Some(BrowserOverride::Replace(target)) => {
                let replacement = dir.join(target.trim_start_matches('/'))?;
                if replacement == uri {
                    return Ok(ResolveResult::Found(uri));
                }
                Ok(match self.probe(strategy, &replacement, token).await? {
                    Some(found) => ResolveResult::Found(found),
                    None => ResolveResult::NotFound,
                })
            }
            _ => Ok(ResolveResult::Found(uri)),
        }
    }

    /// Probe order: exact file, file + each extension, then directory
    /// (manifest main fields, `index` + each extension).
    async fn probe(
        &self,
        strategy: &Arc<dyn ResolutionStrategy>,
        candidate: &LogicalUri,
        token: &CancellationToken,
    ) -> Result<Option<LogicalUri>> {
        if let Some(file) = self.probe_file(strategy, candidate, token).await? {
            return Ok(Some(file));
        }
        let dir = candidate.with_trailing_slash();
        if strategy.stat(&dir, token).await? != FileStat::Directory {
            return Ok(None);
        }
        self.probe_directory(strategy, &dir, token).await
    }

    async fn probe_file(
        &self,
        strategy: &Arc<dyn ResolutionStrategy>,
        candidate: &LogicalUri,
        token: &CancellationToken,
    ) -> Result<Option<LogicalUri>> {
        if candidate.is_directory() {
            return Ok(None);
        }
        if strategy.stat(candidate, token).await? == FileStat::File {
            return Ok(Some(candidate.clone()));
        }
        for ext in &self.config.extensions {
            let with_ext = candidate.with_suffix(ext);
            if strategy.stat(&with_ext, token).await? == FileStat::File {
                return Ok(Some(with_ext));
            }
        }
        Ok(None)
    }

    async fn probe_directory(
        &self,
        strategy: &Arc<dyn ResolutionStrategy>,
        dir: &LogicalUri,
        token: &CancellationToken,
    ) -> Result<Option<LogicalUri>> {
        if let Some(manifest) = self.manifest_in(strategy, dir, token).await? {
            for field in &self.config.package_main {
                let Some(main) = manifest.main_field(field) else {
                    continue;
                };
                let target = dir.join(main.trim_start_matches('/'))?;
                if let Some(found) = self.probe_file(strategy, &target, token).await? {
                    return Ok(Some(found));
                }
                let target_dir = target.with_trailing_slash();
                if target_dir != *dir {
                    if let Some(found) = self.probe_index(strategy, &target_dir, token).await? {
                        return Ok(Some(found));
                    }
                }
            }
        }
        self.probe_index(strategy, dir, token).await
    }

    async fn probe_index(
        &self,
        strategy: &Arc<dyn ResolutionStrategy>,
        dir: &LogicalUri,
        token: &CancellationToken,
    ) -> Result<Option<LogicalUri>> {
        for ext in &self.config.extensions {
            let candidate = dir.join(&format!("index{ext}"))?;
            if strategy.stat(&candidate, token).await? == FileStat::File {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// Closest `package.json` at or above `uri`, never leaving the
    /// strategy's boundary for it.
    async fn nearest_manifest(
        &self,
        strategy: &Arc<dyn ResolutionStrategy>,
        uri: &LogicalUri,
        token: &CancellationToken,
    ) -> Result<Option<(LogicalUri, Arc<PackageManifest>)>> {
        let boundary = strategy.boundary(uri).with_trailing_slash();
        let mut dir = if uri.is_directory() {
            uri.clone()
        } else {
            uri.parent_dir()
        };

        loop {
            if !dir.is_within(&boundary) {
                return Ok(None);
            }
            if let Some(manifest) = self.manifest_in(strategy, &dir, token).await? {
                return Ok(Some((dir, manifest)));
            }
            let parent = dir.parent_dir();
            if dir == boundary || parent == dir {
                return Ok(None);
            }
            dir = parent;
        }
    }

    async fn manifest_in(
        &self,
        strategy: &Arc<dyn ResolutionStrategy>,
        dir: &LogicalUri,
        token: &CancellationToken,
    ) -> Result<ManifestEntry> {
        let uri = dir.with_trailing_slash().join("package.json")?;
        if let Some(cached) = self.manifests.get(&uri) {
            return Ok(cached.value().clone());
        }

        let manifest = match strategy.stat(&uri, token).await? {
            FileStat::File => {
                let content = strategy.read(&uri, token).await?;
                let parsed =
                    PackageManifest::from_slice(&content.bytes).map_err(|e| Error::ReadFailed {
                        uri: uri.to_string(),
                        reason: format!("invalid package.json: {e}"),
                    })?;
                Some(Arc::new(parsed))
            }
            _ => None,
        };
        self.manifests.insert(uri, manifest.clone());
        Ok(manifest)
    }
}

fn ensure_live(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        Err(Error::Canceled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn resolver(files: &[(&str, &str)]) -> CompoundResolver {
        resolver_with(files, ResolveConfig::default())
    }

    fn resolver_with(files: &[(&str, &str)], config: ResolveConfig) -> CompoundResolver {
        let store = MemoryStore::new(files.iter().copied()).unwrap();
        CompoundResolver::new(vec![Arc::new(store)], config)
    }

    fn uri(path: &str) -> LogicalUri {
        LogicalUri::for_path(&LogicalUri::memory_root(), path).unwrap()
    }

    async fn resolve(resolver: &CompoundResolver, specifier: &str, from: &str) -> ResolveResult {
        resolver
            .resolve(specifier, Some(&uri(from)), &CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn probes_exact_then_extensions_in_order() {
        let r = resolver(&[
            ("index.js", ""),
            ("util", "exact"),
            ("util.ts", ""),
            ("lib.tsx", ""),
            ("lib.ts", ""),
        ]);
        assert_eq!(resolve(&r, "./util", "index.js").await, ResolveResult::Found(uri("util")));
        assert_eq!(resolve(&r, "./lib", "index.js").await, ResolveResult::Found(uri("lib.ts")));
    }

    #[tokio::test]
    async fn directory_uses_package_main_precedence_then_index() {
        let r = resolver(&[
            ("index.js", ""),
            ("pkg/package.json", r#"{ "main": "main.js", "module": "esm.js" }"#),
            ("pkg/main.js", ""),
            ("pkg/esm.js", ""),
            ("plain/index.ts", ""),
        ]);
        assert_eq!(resolve(&r, "./pkg", "index.js").await, ResolveResult::Found(uri("pkg/esm.js")));
        assert_eq!(resolve(&r, "./plain", "index.js").await, ResolveResult::Found(uri("plain/index.ts")));
        assert_eq!(resolve(&r, "./plain/", "index.js").await, ResolveResult::Found(uri("plain/index.ts")));
    }

    #[tokio::test]
    async fn relative_to_importer_directory() {
        let r = resolver(&[("src/a/entry.js", ""), ("src/b.js", "")]);
        assert_eq!(
            resolve(&r, "../b", "src/a/entry.js").await,
            ResolveResult::Found(uri("src/b.js"))
        );
        assert_eq!(
            resolve(&r, "/src/b.js", "src/a/entry.js").await,
            ResolveResult::Found(uri("src/b.js"))
        );
    }

    #[tokio::test]
    async fn missing_and_bare_in_memory_are_not_found() {
        let r = resolver(&[("index.js", "")]);
        assert_eq!(resolve(&r, "./nope", "index.js").await, ResolveResult::NotFound);
        assert_eq!(resolve(&r, "react", "index.js").await, ResolveResult::NotFound);
        assert!(!ResolveResult::NotFound.found());
    }

    #[tokio::test]
    async fn external_forms_are_passed_through() {
        let r = resolver(&[("index.js", "")]);
        let result = resolve(&r, "data:text/javascript,export default 1", "index.js").await;
        assert!(result.is_external());
        assert!(result.found());
        assert!(result.uri().is_none());
    }

    #[tokio::test]
    async fn browser_false_excludes_module() {
        let r = resolver(&[
            ("package.json", r#"{ "browser": { "./server.js": false, "fs": false } }"#),
            ("index.js", ""),
            ("server.js", ""),
        ]);
        let excluded = resolve(&r, "./server", "index.js").await;
        assert_eq!(excluded, ResolveResult::Excluded);
        assert!(excluded.found());
        assert!(excluded.uri().is_none());
        assert_eq!(resolve(&r, "fs", "index.js").await, ResolveResult::Excluded);
    }

    #[tokio::test]
    async fn browser_string_replaces_module() {
        let r = resolver(&[
            ("package.json", r#"{ "browser": { "./node.js": "./web.js" } }"#),
            ("index.js", ""),
            ("node.js", ""),
            ("web.js", ""),
        ]);
        assert_eq!(resolve(&r, "./node.js", "index.js").await, ResolveResult::Found(uri("web.js")));
    }

    #[tokio::test]
    async fn browser_main_only_when_configured() {
        let files = [
            ("index.js", ""),
            ("pkg/package.json", r#"{ "browser": "web.js", "main": "node.js" }"#),
            ("pkg/web.js", ""),
            ("pkg/node.js", ""),
        ];
        let r = resolver(&files);
        assert_eq!(resolve(&r, "./pkg", "index.js").await, ResolveResult::Found(uri("pkg/node.js")));

        let config = ResolveConfig {
            package_main: vec!["browser".into(), "module".into(), "main".into()],
            ..ResolveConfig::default()
        };
        let r = resolver_with(&files, config);
        assert_eq!(resolve(&r, "./pkg", "index.js").await, ResolveResult::Found(uri("pkg/web.js")));
    }

    #[tokio::test]
    async fn resolution_is_idempotent() {
        let r = resolver(&[("index.js", ""), ("a.ts", "")]);
        let first = resolve(&r, "./a", "index.js").await;
        let second = resolve(&r, "./a", "index.js").await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn canceled_token_fails_fast() {
        let r = resolver(&[("index.js", "")]);
        let token = CancellationToken::new();
        token.cancel();
        let err = r.resolve("./index.js", None, &token).await.unwrap_err();
        assert!(err.is_canceled());
    }

    #[tokio::test]
    async fn read_file_content_dispatches_by_scheme() {
        let r = resolver(&[("a.js", "export {}")]);
        let token = CancellationToken::new();
        let content = r.read_file_content(&uri("a.js"), &token).await.unwrap();
        assert_eq!(content.text().unwrap(), "export {}");

        let cdn = LogicalUri::parse("cdn:///react@18.2.0/index.js").unwrap();
        assert!(matches!(
            r.read_file_content(&cdn, &token).await,
            Err(Error::InvalidUri { .. })
        ));
    }
}
