//! Engine assembly: config → registry → graph → session manager.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::graph::PipelineGraph;
use crate::registry::{Manifest, Registry};
use crate::session::manager::SessionManager;
use std::sync::Arc;
use tracing::info;

/// The assembled chat engine.
///
/// Initialization performs every fatal-at-startup validation: handler
/// resolution and instantiation, parameter checks, and whole-chain type
/// validation. A constructed engine accepts sessions immediately.
pub struct ChatEngine {
    registry: Arc<Registry>,
    graph: Arc<PipelineGraph>,
    manager: SessionManager,
}

impl ChatEngine {
    /// Build the engine from validated configuration and a factory manifest.
    ///
    /// # Errors
    ///
    /// Any [`EngineError`](crate::error::EngineError) returned here is fatal
    /// at startup; no session traffic may be accepted.
    pub fn initialize(config: &EngineConfig, manifest: Manifest) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(Registry::load(manifest, &config.chat_engine)?);
        let graph = Arc::new(PipelineGraph::build(
            &registry,
            &config.chat_engine.pipeline,
        )?);
        info!(
            handlers = registry.len(),
            stages = graph.len(),
            "chat engine initialized"
        );
        let manager = SessionManager::new(
            Arc::clone(&registry),
            Arc::clone(&graph),
            &config.chat_engine,
        );
        Ok(Self {
            registry,
            graph,
            manager,
        })
    }

    /// The loaded handler registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The validated pipeline graph.
    pub fn graph(&self) -> &Arc<PipelineGraph> {
        &self.graph
    }

    /// The session manager.
    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }
}
