//! Shared test utilities for stitch-bundler tests
//!
//! Fakes for the two collaborators the service talks to: the CDN (behind
//! [`Fetch`]) and the build engine launcher.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use stitch_bundler::config::{BuildConfig, CdnConfig};
use stitch_bundler::engine::{EngineOutput, EngineRequest};
use stitch_bundler::{
    BuildEngine, BundlerConfig, BundlerService, EngineLauncher, Fetch, FetchError,
    ModuleResolver, RolldownLauncher,
};
use tokio_util::sync::CancellationToken;

pub const CDN_BASE: &str = "https://cdn.test/npm";
pub const LISTING_BASE: &str = "https://data.test/npm";

/// Config pointing at the fake CDN, with minify and sourcemaps off so
/// outputs are easy to inspect.
pub fn test_config() -> BundlerConfig {
    BundlerConfig {
        cdn: CdnConfig {
            base_url: CDN_BASE.into(),
            listing_url: LISTING_BASE.into(),
            ..CdnConfig::default()
        },
        build: BuildConfig {
            minify: false,
            sourcemap: false,
            ..BuildConfig::default()
        },
        ..BundlerConfig::default()
    }
}

#[derive(Clone)]
enum Response {
    Body(Bytes),
    Status(u16),
    Hang,
}

/// In-memory CDN. Unknown URLs answer 404.
#[derive(Default)]
pub struct FakeCdn {
    responses: Mutex<FxHashMap<String, Response>>,
    calls: AtomicUsize,
    requested: Mutex<Vec<String>>,
}

impl FakeCdn {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, url: impl Into<String>, body: impl Into<String>) -> &Self {
        let body = Bytes::from(body.into());
        self.responses.lock().insert(url.into(), Response::Body(body));
        self
    }

    pub fn fail(&self, url: impl Into<String>, status: u16) -> &Self {
        self.responses.lock().insert(url.into(), Response::Status(status));
        self
    }

    /// Never answer `url`; the request only ends when its token fires.
    pub fn hang(&self, url: impl Into<String>) -> &Self {
        self.responses.lock().insert(url.into(), Response::Hang);
        self
    }

    /// Publish `name` at version 1.0.0 with the given files.
    pub fn publish(&self, name: &str, manifest: &str, files: &[(&str, &str)]) {
        self.serve(format!("{CDN_BASE}/{name}@latest/package.json"), manifest);
        let listing: Vec<String> = std::iter::once("/package.json".to_string())
            .chain(files.iter().map(|(path, _)| format!("/{path}")))
            .map(|path| format!(r#"{{ "name": "{path}" }}"#))
            .collect();
        let listing = format!(r#"{{ "files": [{}] }}"#, listing.join(", "));
        self.serve(format!("{LISTING_BASE}/{name}@1.0.0/flat"), listing);
        for (path, body) in files {
            self.serve(format!("{CDN_BASE}/{name}@1.0.0/{path}"), *body);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().clone()
    }
}

#[async_trait]
impl Fetch for FakeCdn {
    async fn fetch(&self, url: &str, token: &CancellationToken) -> Result<Bytes, FetchError> {
        if token.is_cancelled() {
            return Err(FetchError::Canceled);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().push(url.to_string());

        let response = self.responses.lock().get(url).cloned();
        match response {
            Some(Response::Body(body)) => Ok(body),
            Some(Response::Hang) => {
                token.cancelled().await;
                Err(FetchError::Canceled)
            }
            Some(Response::Status(status)) => Err(FetchError::Status {
                url: url.to_string(),
                status,
            }),
            None => Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}

/// Counts launches and builds of the real Rolldown engine.
pub struct CountingLauncher {
    inner: RolldownLauncher,
    launches: AtomicUsize,
    builds: Arc<AtomicUsize>,
}

impl CountingLauncher {
    pub fn new(config: &BuildConfig) -> Arc<Self> {
        Arc::new(Self {
            inner: RolldownLauncher::new(config),
            launches: AtomicUsize::new(0),
            builds: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineLauncher for CountingLauncher {
    async fn launch(&self) -> stitch_bundler::Result<Arc<dyn BuildEngine>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.launch().await?;
        Ok(Arc::new(CountingEngine {
            inner,
            builds: Arc::clone(&self.builds),
        }))
    }
}

struct CountingEngine {
    inner: Arc<dyn BuildEngine>,
    builds: Arc<AtomicUsize>,
}

#[async_trait]
impl BuildEngine for CountingEngine {
    async fn build(
        &self,
        request: EngineRequest,
        resolver: Arc<dyn ModuleResolver>,
    ) -> stitch_bundler::Result<EngineOutput> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        self.inner.build(request, resolver).await
    }

    async fn stop(&self) {
        self.inner.stop().await;
    }
}

pub struct Harness {
    pub service: BundlerService,
    pub cdn: Arc<FakeCdn>,
    pub launcher: Arc<CountingLauncher>,
    pub root: CancellationToken,
}

/// Service wired to a fresh fake CDN and a counting Rolldown launcher.
pub fn harness() -> Harness {
    harness_with(test_config(), FakeCdn::new())
}

pub fn harness_with(config: BundlerConfig, cdn: Arc<FakeCdn>) -> Harness {
    let root = CancellationToken::new();
    let launcher = CountingLauncher::new(&config.build);
    let service = BundlerService::with_components(
        config,
        root.clone(),
        Arc::clone(&cdn) as Arc<dyn Fetch>,
        Arc::clone(&launcher) as Arc<dyn EngineLauncher>,
    )
    .expect("valid test config");
    Harness {
        service,
        cdn,
        launcher,
        root,
    }
}

/// Assert that the output at `path` contains `needle`.
pub fn assert_output_contains(bundle: &stitch_bundler::Bundle, path: &str, needle: &str) {
    let file = bundle
        .output(path)
        .unwrap_or_else(|| panic!("no output at {path}; have {:?}", paths(bundle)));
    assert!(
        file.content.contains(needle),
        "Expected {path} to contain '{needle}'.\nContent:\n{}",
        file.content
    );
}

pub fn paths(bundle: &stitch_bundler::Bundle) -> Vec<&str> {
    bundle.output_files.iter().map(|f| f.path.as_str()).collect()
}
