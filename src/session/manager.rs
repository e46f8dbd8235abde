//! Process-wide session management.
//!
//! Owns the set of active sessions, admits new ones while the required
//! handler leases are available, and routes lifecycle events to the right
//! session. Per-session failures stay per-session: teardown of one session
//! never touches another's leases, queues or ordering.

use crate::config::ChatEngineConfig;
use crate::error::Result;
use crate::graph::PipelineGraph;
use crate::handler::SessionId;
use crate::registry::Registry;
use crate::session::executor::{self, ExecutorSettings, TransportHandle};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A registered live session.
struct SessionEntry {
    cancel: CancellationToken,
    supervisor: JoinHandle<()>,
}

/// Owns all live sessions for the process.
pub struct SessionManager {
    registry: Arc<Registry>,
    graph: Arc<PipelineGraph>,
    settings: ExecutorSettings,
    sessions: Arc<Mutex<HashMap<SessionId, SessionEntry>>>,
    next_id: AtomicU64,
}

impl SessionManager {
    /// Create a manager over a loaded registry and validated graph.
    pub fn new(registry: Arc<Registry>, graph: Arc<PipelineGraph>, config: &ChatEngineConfig) -> Self {
        Self {
            registry,
            graph,
            settings: ExecutorSettings {
                lease_timeout: config.lease_timeout(),
                stage_channel_size: config.stage_channel_size,
            },
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Admit a new client session.
    ///
    /// Acquires one lease per distinct handler in the chain before any frame
    /// flows; the client is informed through the handle's notice channel on
    /// both admission and rejection.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Overloaded`](crate::error::EngineError::Overloaded)
    /// when a handler's lease pool stays exhausted past the configured
    /// timeout. No partial session state remains in that case.
    pub async fn connect(&self, transport: TransportHandle) -> Result<SessionId> {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        let sessions = Arc::clone(&self.sessions);
        let running = executor::launch(
            id,
            &self.registry,
            &self.graph,
            self.settings,
            transport,
            move |id| {
                if let Ok(mut sessions) = sessions.lock() {
                    sessions.remove(&id);
                }
            },
        )
        .await?;

        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(
                id,
                SessionEntry {
                    cancel: running.cancel,
                    supervisor: running.supervisor,
                },
            );
        }
        // Only now may the supervisor's exit callback remove the entry.
        let _ = running.armed.send(());
        info!(%id, "session connected");
        Ok(id)
    }

    /// Tear a session down. In-flight stage invocations are cancelled
    /// cooperatively at their next suspension point; leases are released by
    /// the session's supervisor. Idempotent: unknown or already-closed ids
    /// are a no-op.
    pub fn disconnect(&self, id: SessionId) {
        let entry = self
            .sessions
            .lock()
            .ok()
            .and_then(|mut sessions| sessions.remove(&id));
        if let Some(running) = entry {
            debug!(%id, "disconnect requested");
            running.cancel.cancel();
        }
    }

    /// Number of live sessions.
    pub fn active(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Cancel every session and wait for their supervisors to finish, so all
    /// leases are released and teardown hooks have run before process exit.
    pub async fn shutdown(&self) {
        let drained: Vec<(SessionId, SessionEntry)> = match self.sessions.lock() {
            Ok(mut sessions) => sessions.drain().collect(),
            Err(_) => return,
        };
        let mut supervisors: Vec<JoinHandle<()>> = Vec::with_capacity(drained.len());
        for (id, running) in drained {
            debug!(%id, "shutting down session");
            running.cancel.cancel();
            supervisors.push(running.supervisor);
        }
        for supervisor in supervisors {
            let _ = supervisor.await;
        }
        info!("all sessions drained");
    }
}
