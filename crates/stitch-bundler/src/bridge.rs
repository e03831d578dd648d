//! Engine hooks backed by the compound resolver.
//!
//! Modules handed to the engine are tagged with a private namespace
//! (`stitch:memory:///a.js`) so the engine never tries its own filesystem
//! resolution. The engine's synthetic entry identity (`<stdin>`) is mapped
//! back to the entrypoint's logical URI so relative imports from the entry
//! resolve against the right directory.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::engine::{LoadedModule, Loader, ModuleResolver, ResolvedModule, STDIN_ID};
use crate::resolver::{CompoundResolver, ResolveResult};
use crate::uri::LogicalUri;
use crate::{Error, Result};

/// [`ModuleResolver`] for one request.
#[derive(Debug)]
pub struct BuildBridge {
    resolver: Arc<CompoundResolver>,
    entry: LogicalUri,
    namespace: String,
    token: CancellationToken,
}

impl BuildBridge {
    pub fn new(
        resolver: Arc<CompoundResolver>,
        entry: LogicalUri,
        namespace: impl Into<String>,
        token: CancellationToken,
    ) -> Self {
        Self {
            resolver,
            entry,
            namespace: namespace.into(),
            token,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Logical URI of an engine importer id.
    fn importer_uri(&self, importer: Option<&str>) -> Result<LogicalUri> {
        match importer {
            None | Some(STDIN_ID) => Ok(self.entry.clone()),
            Some(id) => {
                let path = id
                    .strip_prefix(self.namespace.as_str())
                    .and_then(|rest| rest.strip_prefix(':'))
                    .unwrap_or(id);
                LogicalUri::parse(path)
            }
        }
    }

    /// Cancellation wins over whatever else went wrong.
    fn settle<T>(&self, result: Result<T>) -> Result<T> {
        match result {
            Err(error) if self.token.is_cancelled() && !error.is_canceled() => Err(Error::Canceled),
            other => other,
        }
    }

    async fn resolve_inner(
        &self,
        specifier: &str,
        importer: Option<&str>,
    ) -> Result<ResolvedModule> {
        if self.token.is_cancelled() {
            return Err(Error::Canceled);
        }
        if self.resolver.is_external(specifier) {
            return Ok(ResolvedModule::External {
                path: specifier.to_string(),
            });
        }

        let importer = self.importer_uri(importer)?;
        let result = self
            .resolver
            .resolve(specifier, Some(&importer), &self.token)
            .await?;
        trace!(specifier, %importer, ?result, "bridge resolve");

        match result {
            ResolveResult::Found(uri) => Ok(ResolvedModule::Module {
                namespace: self.namespace.clone(),
                path: uri.to_string(),
            }),
            ResolveResult::Excluded => Ok(ResolvedModule::External {
                path: specifier.to_string(),
            }),
            ResolveResult::External(path) => Ok(ResolvedModule::External { path }),
            ResolveResult::NotFound => Err(Error::Unresolvable {
                specifier: specifier.to_string(),
                importer: Some(importer.to_string()),
            }),
        }
    }

    async fn load_inner(&self, namespace: &str, path: &str) -> Result<LoadedModule> {
        if namespace != self.namespace {
            return Err(Error::ReadFailed {
                uri: format!("{namespace}:{path}"),
                reason: format!("unknown namespace '{namespace}'"),
            });
        }
        let uri = LogicalUri::parse(path)?;
        let content = self.resolver.read_file_content(&uri, &self.token).await?;
        let contents = content
            .text()
            .map_err(|e| Error::ReadFailed {
                uri: uri.to_string(),
                reason: format!("not valid UTF-8: {e}"),
            })?
            .to_string();
        Ok(LoadedModule {
            contents,
            loader: Loader::from_path(uri.path()),
        })
    }
}

#[async_trait]
impl ModuleResolver for BuildBridge {
    async fn resolve(&self, specifier: &str, importer: Option<&str>) -> Result<ResolvedModule> {
        let result = self.resolve_inner(specifier, importer).await;
        self.settle(result)
    }

    async fn load(&self, namespace: &str, path: &str) -> Result<LoadedModule> {
        let result = self.load_inner(namespace, path).await;
        self.settle(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolveConfig;
    use crate::memory::MemoryStore;

    fn bridge(files: &[(&str, &str)], entry: &str) -> (BuildBridge, CancellationToken) {
        let store = MemoryStore::new(files.iter().copied()).unwrap();
        let entry = store.uri_for_path(entry).unwrap();
        let resolver = CompoundResolver::new(vec![Arc::new(store)], ResolveConfig::default());
        let token = CancellationToken::new();
        (
            BuildBridge::new(Arc::new(resolver), entry, "stitch", token.clone()),
            token,
        )
    }

    #[tokio::test]
    async fn stdin_importer_resolves_against_entry_directory() {
        let (bridge, _) = bridge(&[("src/main.js", ""), ("src/util.ts", "")], "src/main.js");
        let resolved = bridge.resolve("./util", Some(STDIN_ID)).await.unwrap();
        assert_eq!(
            resolved,
            ResolvedModule::Module {
                namespace: "stitch".into(),
                path: "memory:///src/util.ts".into(),
            }
        );
    }

    #[tokio::test]
    async fn namespaced_importers_are_unwrapped() {
        let (bridge, _) = bridge(&[("a.js", ""), ("lib/b.js", ""), ("lib/c.js", "")], "a.js");
        let resolved = bridge
            .resolve("./c.js", Some("stitch:memory:///lib/b.js"))
            .await
            .unwrap();
        assert_eq!(
            resolved,
            ResolvedModule::Module {
                namespace: "stitch".into(),
                path: "memory:///lib/c.js".into(),
            }
        );
    }

    #[tokio::test]
    async fn data_uris_and_exclusions_are_external() {
        let (bridge, _) = bridge(
            &[
                ("package.json", r#"{ "browser": { "./node.js": false } }"#),
                ("a.js", ""),
                ("node.js", ""),
            ],
            "a.js",
        );
        let data = "data:text/javascript,export default 1";
        assert_eq!(
            bridge.resolve(data, Some(STDIN_ID)).await.unwrap(),
            ResolvedModule::External { path: data.into() }
        );
        assert_eq!(
            bridge.resolve("./node.js", Some(STDIN_ID)).await.unwrap(),
            ResolvedModule::External {
                path: "./node.js".into()
            }
        );
    }

    #[tokio::test]
    async fn not_found_names_specifier_and_importer() {
        let (bridge, _) = bridge(&[("a.js", "")], "a.js");
        match bridge.resolve("./missing", Some(STDIN_ID)).await {
            Err(Error::Unresolvable {
                specifier,
                importer,
            }) => {
                assert_eq!(specifier, "./missing");
                assert_eq!(importer.as_deref(), Some("memory:///a.js"));
            }
            other => panic!("expected Unresolvable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn load_reads_text_and_infers_loader() {
        let (bridge, _) = bridge(&[("a.js", ""), ("view.tsx", "export default 1")], "a.js");
        let loaded = bridge.load("stitch", "memory:///view.tsx").await.unwrap();
        assert_eq!(loaded.contents, "export default 1");
        assert_eq!(loaded.loader, Loader::Tsx);

        assert!(matches!(
            bridge.load("other", "memory:///view.tsx").await,
            Err(Error::ReadFailed { .. })
        ));
    }

    #[tokio::test]
    async fn canceled_token_wins() {
        let (bridge, token) = bridge(&[("a.js", "")], "a.js");
        token.cancel();
        assert!(bridge.resolve("./missing", None).await.unwrap_err().is_canceled());
        assert!(bridge.load("stitch", "memory:///a.js").await.unwrap_err().is_canceled());
    }
}
