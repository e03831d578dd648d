//! The bundling facade.
//!
//! One [`BundlerService`] lives for the whole process. It owns the shared
//! engine, the shared CDN strategy and the process-wide cancellation token.
//! Each [`bundle`](BundlerService::bundle) call builds its own memory store,
//! resolver and child token, and discards them when it returns.
//!
//! Per build: `Idle → Resolving → EngineStarting → Building → Normalizing →
//! Done`, or `Canceled`/`Failed` from any of those. The entrypoint is
//! resolved and read before the engine is touched, so a bad entrypoint never
//! launches it. Neither terminal state touches the shared engine; only the
//! root token does.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::bridge::BuildBridge;
use crate::bundle::{Bundle, BundleRequest};
use crate::cdn::CdnStrategy;
use crate::config::BundlerConfig;
use crate::engine::{
    EngineEntry, EngineHandle, EngineLauncher, EngineRequest, EngineState, OutputFormat,
    RolldownLauncher,
};
use crate::fetch::{Fetch, RemoteFetcher};
use crate::memory::MemoryStore;
use crate::normalize::{PathMapping, normalize};
use crate::resolver::{CompoundResolver, ResolveResult, ResolutionStrategy};
use crate::{Error, Result};

/// Composes resolution, the engine and normalization into `bundle()`.
pub struct BundlerService {
    config: BundlerConfig,
    root: CancellationToken,
    engine: Arc<EngineHandle>,
    cdn: Arc<CdnStrategy>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for BundlerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundlerService")
            .field("engine", &self.engine.state())
            .field("canceled", &self.root.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl BundlerService {
    /// Service backed by the HTTP fetcher and the Rolldown engine.
    pub fn new(config: BundlerConfig, root: CancellationToken) -> Result<Self> {
        config.validate()?;
        let fetcher: Arc<dyn Fetch> = Arc::new(RemoteFetcher::new(&config.cdn)?);
        let launcher: Arc<dyn EngineLauncher> = Arc::new(RolldownLauncher::new(&config.build));
        Self::with_components(config, root, fetcher, launcher)
    }

    /// Service with an injected fetcher and engine launcher.
    pub fn with_components(
        config: BundlerConfig,
        root: CancellationToken,
        fetcher: Arc<dyn Fetch>,
        launcher: Arc<dyn EngineLauncher>,
    ) -> Result<Self> {
        config.validate()?;
        let cdn = Arc::new(CdnStrategy::new(fetcher, &config.cdn));
        let engine = Arc::new(EngineHandle::new(launcher));

        // Without a runtime there is nothing to watch with; `bundle` still
        // observes the root token directly.
        let watcher = tokio::runtime::Handle::try_current().ok().map(|runtime| {
            let root = root.clone();
            let engine = Arc::clone(&engine);
            runtime.spawn(async move {
                root.cancelled().await;
                warn!("process-wide cancellation, stopping the build engine");
                engine.stop().await;
            })
        });

        Ok(Self {
            config,
            root,
            engine,
            cdn,
            watcher: Mutex::new(watcher),
        })
    }

    pub fn config(&self) -> &BundlerConfig {
        &self.config
    }

    /// A fresh child of the process-wide token.
    pub fn request_token(&self) -> CancellationToken {
        self.root.child_token()
    }

    pub fn engine_state(&self) -> EngineState {
        self.engine.state()
    }

    /// Bundle one virtual project.
    ///
    /// Fails with [`Error::Canceled`] whenever the process-wide token or the
    /// caller's token fired, whatever else went wrong at the same time.
    #[instrument(skip_all, fields(entry = request.entrypoints.first().map(String::as_str).unwrap_or_default()))]
    pub async fn bundle(&self, request: BundleRequest) -> Result<Bundle> {
        let token = self.request_token();
        let _scope = token.clone().drop_guard();

        if let Some(caller) = request.options.token.clone() {
            if caller.is_cancelled() {
                token.cancel();
            } else {
                let scope = token.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = caller.cancelled() => scope.cancel(),
                        _ = scope.cancelled() => {}
                    }
                });
            }
        }

        let result = self.run(request, &token).await;
        match result {
            Err(error) if token.is_cancelled() && !error.is_canceled() => {
                debug!(%error, "discarding error in favor of cancellation");
                Err(Error::Canceled)
            }
            Err(error) => {
                debug!(%error, "bundle failed");
                Err(error)
            }
            ok => ok,
        }
    }

    async fn run(&self, request: BundleRequest, token: &CancellationToken) -> Result<Bundle> {
        let entrypoint = request.entrypoint()?.to_string();
        let BundleRequest {
            files,
            env,
            options,
            ..
        } = request;
        ensure_live(token)?;

        debug!(state = "resolving");
        let memory = Arc::new(MemoryStore::new(files)?);
        let memory_root = memory.root().clone();
        let entry_uri = memory.uri_for_path(&entrypoint)?;
        let strategies: Vec<Arc<dyn ResolutionStrategy>> = vec![
            memory as Arc<dyn ResolutionStrategy>,
            Arc::clone(&self.cdn) as Arc<dyn ResolutionStrategy>,
        ];
        let resolver = Arc::new(CompoundResolver::new(
            strategies,
            self.config.resolve.clone(),
        ));

        let entry = match resolver.resolve_uri(&entry_uri, token).await? {
            ResolveResult::Found(uri) => uri,
            ResolveResult::Excluded => {
                return Err(Error::ExcludedEntrypoint { entrypoint });
            }
            ResolveResult::External(_) | ResolveResult::NotFound => {
                return Err(Error::Unresolvable {
                    specifier: entrypoint,
                    importer: None,
                });
            }
        };
        let content = resolver.read_file_content(&entry, token).await?;
        let contents = content
            .text()
            .map_err(|e| Error::ReadFailed {
                uri: entry.to_string(),
                reason: format!("not valid UTF-8: {e}"),
            })?
            .to_string();
        ensure_live(token)?;

        debug!(state = "engine_starting");
        let engine = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Error::Canceled),
            engine = self.engine.ensure_started() => engine?,
        };

        debug!(state = "building", %entry);
        let build = &self.config.build;
        let engine_request = EngineRequest {
            bundle: true,
            format: OutputFormat::Esm,
            minify: options.minify.unwrap_or(build.minify),
            sourcemap: options.sourcemap.unwrap_or(build.sourcemap),
            splitting: options.splitting.unwrap_or(build.splitting),
            entry: EngineEntry {
                contents,
                sourcefile: entry.to_string(),
                resolve_dir: entry.parent_dir().to_string(),
            },
            output_dir: build.output_dir.clone(),
            metafile: build.metafile.clone(),
            define: env,
        };
        let bridge = Arc::new(BuildBridge::new(
            resolver,
            entry.clone(),
            build.namespace.as_str(),
            token.clone(),
        ));
        let output = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Error::Canceled),
            output = engine.build(engine_request, bridge) => output?,
        };

        debug!(state = "normalizing");
        let mapping = PathMapping::new(&build.output_dir, &entry, &memory_root, &build.namespace);
        let bundle = normalize(output, &mapping)?;

        info!(
            outputs = bundle.output_files.len(),
            warnings = bundle.warnings.len(),
            "bundle complete"
        );
        Ok(bundle)
    }

    /// Stop the shared engine. Later `bundle` calls fail with
    /// [`Error::Canceled`].
    pub async fn dispose(&self) {
        self.engine.stop().await;
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.abort();
        }
    }
}

impl Drop for BundlerService {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.get_mut().take() {
            watcher.abort();
        }
    }
}

fn ensure_live(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        Err(Error::Canceled)
    } else {
        Ok(())
    }
}
