use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::{BuildEngine, EngineLauncher};
use crate::{Error, Result};

/// Where a shared engine is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    NotStarted,
    Starting,
    Ready,
    Stopped,
}

/// Lazily started, once-stopped engine shared by every request.
///
/// Concurrent [`ensure_started`](Self::ensure_started) calls share a single
/// in-flight launch. After [`stop`](Self::stop) no engine is handed out
/// again.
pub struct EngineHandle {
    launcher: Arc<dyn EngineLauncher>,
    engine: OnceCell<Arc<dyn BuildEngine>>,
    starting: AtomicBool,
    stopped: AtomicBool,
    engine_stopped: AtomicBool,
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl EngineHandle {
    pub fn new(launcher: Arc<dyn EngineLauncher>) -> Self {
        Self {
            launcher,
            engine: OnceCell::new(),
            starting: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            engine_stopped: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> EngineState {
        if self.stopped.load(Ordering::Acquire) {
            EngineState::Stopped
        } else if self.engine.initialized() {
            EngineState::Ready
        } else if self.starting.load(Ordering::Acquire) {
            EngineState::Starting
        } else {
            EngineState::NotStarted
        }
    }

    /// Return the running engine, launching it on first use.
    pub async fn ensure_started(&self) -> Result<Arc<dyn BuildEngine>> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::Canceled);
        }

        let engine = self
            .engine
            .get_or_try_init(|| async {
                self.starting.store(true, Ordering::Release);
                debug!("launching build engine");
                let launched = self.launcher.launch().await;
                if launched.is_err() {
                    self.starting.store(false, Ordering::Release);
                }
                launched
            })
            .await?
            .clone();

        // A stop that raced the launch never saw this engine.
        if self.stopped.load(Ordering::Acquire) {
            self.stop_engine(&engine).await;
            return Err(Error::Canceled);
        }
        Ok(engine)
    }

    /// Stop the engine if it ever started. Later calls do nothing.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(engine) = self.engine.get() {
            self.stop_engine(engine).await;
        }
    }

    async fn stop_engine(&self, engine: &Arc<dyn BuildEngine>) {
        if !self.engine_stopped.swap(true, Ordering::AcqRel) {
            info!("stopping build engine");
            engine.stop().await;
        }
    }
}
