//! Session execution: stage tasks, lease acquisition, teardown.
//!
//! One tokio task per stage per session, wired with bounded channels so a
//! slow consumer suspends its producer instead of buffering unboundedly.
//! Ordering within a session is preserved end to end: each stage is a single
//! task reading a FIFO channel. Leases for every distinct handler in the
//! chain are acquired up front and held until the session ends, so admission
//! either fully succeeds or leaves nothing behind.

use crate::error::{EngineError, Result};
use crate::frames::Frame;
use crate::graph::PipelineGraph;
use crate::handler::{Handler, SessionId};
use crate::lease::Lease;
use crate::registry::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The abstract stream interface the media transport presents to the core.
///
/// The transport pushes decoded client frames into `incoming` and drains
/// `outgoing` back to the wire. Closing `incoming` is the session-close
/// event: the pipeline drains in order and the session ends cleanly.
pub struct TransportHandle {
    /// Frames arriving from the client.
    pub incoming: mpsc::Receiver<Frame>,
    /// Frames to deliver to the client.
    pub outgoing: mpsc::Sender<Frame>,
    /// Out-of-band session notifications; the client is never dropped
    /// without a signal here.
    pub notices: mpsc::UnboundedSender<SessionNotice>,
}

/// Out-of-band notification to the client transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    /// The session was not admitted.
    Rejected {
        /// Why admission failed.
        reason: String,
    },
    /// A pipeline stage failed; the session was torn down.
    Failed {
        /// The failing stage's error.
        reason: String,
    },
    /// The session ended cleanly.
    Closed,
}

/// A launched session as the manager tracks it.
pub(crate) struct RunningSession {
    pub cancel: CancellationToken,
    pub supervisor: JoinHandle<()>,
    /// Fired by the manager once the session is registered, so the
    /// supervisor's exit callback cannot race the registration.
    pub armed: oneshot::Sender<()>,
}

/// Tunables the executor needs from the chat-engine config.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExecutorSettings {
    pub lease_timeout: Duration,
    pub stage_channel_size: usize,
}

/// Acquire leases, spawn stage tasks, and hand back the running session.
///
/// On lease-acquisition failure every already-acquired lease is dropped, the
/// client gets a `Rejected` notice, and no task or state is left behind.
pub(crate) async fn launch(
    id: SessionId,
    registry: &Registry,
    graph: &Arc<PipelineGraph>,
    settings: ExecutorSettings,
    transport: TransportHandle,
    on_exit: impl FnOnce(SessionId) + Send + 'static,
) -> Result<RunningSession> {
    let leases = acquire_leases(id, registry, graph, settings.lease_timeout, &transport).await?;

    let cancel = CancellationToken::new();
    let (err_tx, mut err_rx) = mpsc::unbounded_channel::<EngineError>();
    let mut stage_handles = Vec::with_capacity(graph.len());

    // Wire stage i's output to stage i+1's input; the first stage reads the
    // client's incoming stream, the last writes the client's outgoing one.
    let mut input = transport.incoming;
    let stages = graph.stages();
    for (index, stage) in stages.iter().enumerate() {
        let registered = registry
            .get(&stage.name)
            .ok_or_else(|| EngineError::HandlerNotFound(stage.name.clone()))?;
        let handler = registered.handler();

        let (output, next_input) = if index + 1 == stages.len() {
            (transport.outgoing.clone(), None)
        } else {
            let (tx, rx) = mpsc::channel::<Frame>(settings.stage_channel_size);
            (tx, Some(rx))
        };

        stage_handles.push(tokio::spawn(run_stage(
            id,
            stage.name.clone(),
            handler,
            input,
            output,
            cancel.clone(),
            err_tx.clone(),
        )));

        input = match next_input {
            Some(rx) => rx,
            None => break,
        };
    }
    drop(err_tx);

    let (armed, armed_rx) = oneshot::channel::<()>();
    let supervisor = {
        let cancel = cancel.clone();
        let notices = transport.notices.clone();
        tokio::spawn(async move {
            for handle in stage_handles {
                let _ = handle.await;
            }
            // Closed-sender is fine too: it just means the manager bailed
            // out before registering.
            let _ = armed_rx.await;
            match err_rx.recv().await {
                Some(error) => {
                    warn!(%id, %error, "session torn down after stage failure");
                    let _ = notices.send(SessionNotice::Failed {
                        reason: error.to_string(),
                    });
                }
                None => {
                    info!(%id, "session closed");
                    let _ = notices.send(SessionNotice::Closed);
                }
            }
            cancel.cancel();
            drop(leases);
            on_exit(id);
        })
    };

    Ok(RunningSession {
        cancel,
        supervisor,
        armed,
    })
}

/// One lease per distinct handler in the chain, acquired in chain order.
async fn acquire_leases(
    id: SessionId,
    registry: &Registry,
    graph: &PipelineGraph,
    timeout: Duration,
    transport: &TransportHandle,
) -> Result<Vec<Lease>> {
    let mut leases = Vec::new();
    for name in graph.distinct_handlers() {
        let registered = registry
            .get(name)
            .ok_or_else(|| EngineError::HandlerNotFound(name.to_owned()))?;
        match registered.pool().acquire(timeout).await {
            Ok(lease) => leases.push(lease),
            Err(EngineError::LeaseTimeout { handler }) => {
                let reason = format!("handler \"{handler}\" is at capacity");
                debug!(%id, %reason, "session rejected");
                let _ = transport.notices.send(SessionNotice::Rejected {
                    reason: reason.clone(),
                });
                return Err(EngineError::Overloaded(reason));
            }
            Err(other) => return Err(other),
        }
    }
    Ok(leases)
}

/// Drive one stage: deliver each input frame to the handler as soon as it
/// arrives, in order, until the upstream closes or the session is cancelled.
/// Any failure cancels the whole session; the input is never redelivered.
async fn run_stage(
    session: SessionId,
    name: String,
    handler: Arc<dyn Handler>,
    mut input: mpsc::Receiver<Frame>,
    output: mpsc::Sender<Frame>,
    cancel: CancellationToken,
    err_tx: mpsc::UnboundedSender<EngineError>,
) {
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            frame = input.recv() => match frame {
                Some(frame) => frame,
                None => break, // upstream finished; drain complete
            },
        };

        let result = match handler.accept(&name, &frame) {
            Ok(()) => {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    result = handler.process(session, frame, &output) => result,
                }
            }
            Err(e) => Err(e),
        };

        if let Err(error) = result {
            let _ = err_tx.send(error);
            cancel.cancel();
            break;
        }
    }

    // Teardown hook runs on every exit path; stateful handlers flush or drop
    // per-session state here. Its output still flows downstream when the
    // session is draining normally. A cancelled session abandons the hook at
    // its first suspension point so teardown never stalls on a channel the
    // client has stopped draining.
    tokio::select! {
        biased;
        result = handler.finish(session, &output) => {
            if let Err(error) = result {
                warn!(%session, stage = %name, %error, "finish hook failed");
            }
        }
        () = cancel.cancelled() => {
            debug!(%session, stage = %name, "finish hook abandoned on cancellation");
        }
    }
    debug!(%session, stage = %name, "stage finished");
    // Dropping `output` closes the next stage's input, cascading the drain.
}
