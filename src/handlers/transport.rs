//! Loopback transport stage.
//!
//! Forwards frames unchanged; forwarding is kind-preserving. The session
//! executor pumps the client's incoming stream into the chain's first stage
//! and the last stage's output back to the client; this handler is the typed
//! stage occupying those two chain positions, so transport concurrency is
//! budgeted like any other handler.
//!
//! The declared output kind binds the downstream adjacency at whatever
//! position the handler occupies: at the chain head it names what clients
//! actually send (`output = "audio"` by default), and a mid-chain placement
//! sets it to the kind its upstream produces. At the chain tail there is no
//! successor; forwarded frames go to the client as-is.

use crate::error::Result;
use crate::frames::{Frame, FrameKind};
use crate::handler::{Capability, Handler, HandlerDescriptor, SessionId};
use crate::handlers::param_str;
use crate::registry::FactoryContext;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Passthrough client-transport stage.
pub struct LoopbackTransport {
    output: FrameKind,
}

/// Build a [`LoopbackTransport`]. The `output` parameter ("audio", "video"
/// or "text", default "audio") sets the declared output kind.
pub fn factory(ctx: &FactoryContext<'_>) -> Result<Arc<dyn Handler>> {
    let output = match param_str(ctx, "output", "audio")?.as_str() {
        "audio" => FrameKind::Audio,
        "video" => FrameKind::Video,
        "text" => FrameKind::Text,
        other => {
            return Err(ctx.invalid(format!(
                "output must be \"audio\", \"video\" or \"text\", got \"{other}\""
            )))
        }
    };
    Ok(Arc::new(LoopbackTransport { output }))
}

#[async_trait]
impl Handler for LoopbackTransport {
    fn descriptor(&self) -> HandlerDescriptor {
        HandlerDescriptor {
            capability: Capability::Transport,
            inputs: &[FrameKind::Audio, FrameKind::Video, FrameKind::Text],
            output: self.output,
        }
    }

    async fn process(
        &self,
        _session: SessionId,
        input: Frame,
        out: &mpsc::Sender<Frame>,
    ) -> Result<()> {
        out.send(input)
            .await
            .map_err(|_| crate::error::EngineError::Channel("transport output closed".to_owned()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn build(params: &str) -> Result<Arc<dyn Handler>> {
        let table: toml::Table = params.parse().unwrap();
        let ctx = FactoryContext {
            name: "client",
            model_root: std::path::Path::new("models"),
            params: &table,
        };
        factory(&ctx)
    }

    #[test]
    fn default_output_is_audio() {
        let transport = build("").unwrap();
        assert_eq!(transport.descriptor().output, FrameKind::Audio);
    }

    #[test]
    fn output_kind_is_configurable_for_other_positions() {
        let transport = build("output = \"video\"").unwrap();
        assert_eq!(transport.descriptor().output, FrameKind::Video);
    }

    #[test]
    fn unknown_output_kind_fails_the_factory() {
        assert!(build("output = \"speech\"").is_err());
    }
}
