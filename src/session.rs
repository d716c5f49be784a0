//! Host-facing control surface.
//!
//! A [`GraphSession`] owns one scan and one layout engine over a shared
//! graph. Renderers hold the session (or a clone of its graph) and read node
//! positions while ingestion and layout run in the background.

use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::error::{PathValidationError, SchedulerError};
use crate::graph::{ClassNode, DependencyGraph};
use crate::ingest::{IngestConfig, IngestScheduler, ScanState, ScanStats};
use crate::layout::{LayoutConfig, LayoutEngine, LayoutHandle};
use crate::origin::ClassOriginResolver;
use crate::scan::validate_classpath;

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionConfig {
    pub ingest: IngestConfig,
    pub layout: LayoutConfig,
}

pub struct GraphSession {
    graph: Arc<DependencyGraph>,
    scheduler: IngestScheduler,
    layout: Option<LayoutEngine>,
    layout_handle: Option<LayoutHandle>,
    terminated: bool,
}

impl GraphSession {
    /// Validates the classpath and prepares an idle session. Nothing is
    /// scanned if any path is rejected.
    pub fn open<P: AsRef<Path>>(
        paths: &[P],
        config: SessionConfig,
    ) -> Result<Self, PathValidationError> {
        let roots = validate_classpath(paths)?;
        let graph = Arc::new(DependencyGraph::new(ClassOriginResolver::new(&roots)));
        let scheduler = IngestScheduler::new(roots, Arc::clone(&graph), config.ingest);
        let layout = LayoutEngine::new(Arc::clone(&graph), config.layout);

        Ok(Self {
            graph,
            scheduler,
            layout: Some(layout),
            layout_handle: None,
            terminated: false,
        })
    }

    /// Starts ingestion and the layout loop, returning immediately.
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        if self.terminated {
            return Err(SchedulerError::AlreadyStarted);
        }
        self.scheduler.start()?;

        if let Some(layout) = self.layout.take() {
            match layout.spawn() {
                Ok(handle) => self.layout_handle = Some(handle),
                Err(e) => {
                    self.scheduler.cancel();
                    self.scheduler.wait();
                    return Err(SchedulerError::Spawn(e));
                }
            }
        }
        Ok(())
    }

    /// Blocks until ingestion completes or is cancelled. Layout keeps
    /// running.
    pub fn wait_for_scan(&mut self) -> ScanState {
        self.scheduler.wait()
    }

    pub fn scan_state(&self) -> ScanState {
        self.scheduler.state()
    }

    pub fn scan_stats(&self) -> ScanStats {
        self.scheduler.stats()
    }

    pub fn graph(&self) -> Arc<DependencyGraph> {
        Arc::clone(&self.graph)
    }

    pub fn nodes(&self) -> Vec<Arc<ClassNode>> {
        self.graph.nodes()
    }

    pub fn attraction_between(&self, a: &str, b: &str) -> f32 {
        self.graph.attraction_between(a, b)
    }

    pub fn layout_ticks(&self) -> u64 {
        self.layout_handle.as_ref().map_or(0, LayoutHandle::ticks)
    }

    /// Stops ingestion and layout and waits for both. Only the first call
    /// does anything.
    pub fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;

        self.scheduler.cancel();
        if let Some(handle) = self.layout_handle.as_mut() {
            handle.stop();
        }
        let state = self.scheduler.wait();
        info!(state = ?state, nodes = self.graph.node_count(), "session terminated");
    }
}

impl Drop for GraphSession {
    fn drop(&mut self) {
        self.terminate();
    }
}
