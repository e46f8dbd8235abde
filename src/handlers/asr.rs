//! Placeholder speech recognition stage.
//!
//! Emits a deterministic description of each segment instead of a real
//! transcription. Useful for wiring tests and local pipeline runs; model
//! backed recognizers register their own factory.

use crate::error::{EngineError, Result};
use crate::frames::{Frame, FrameKind, TextChunk};
use crate::handler::{Capability, Handler, HandlerDescriptor, SessionId};
use crate::registry::FactoryContext;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Deterministic stand-in recognizer.
pub struct EchoAsr;

/// Build an [`EchoAsr`]. Takes no parameters.
pub fn factory(_ctx: &FactoryContext<'_>) -> Result<Arc<dyn Handler>> {
    Ok(Arc::new(EchoAsr))
}

#[async_trait]
impl Handler for EchoAsr {
    fn descriptor(&self) -> HandlerDescriptor {
        HandlerDescriptor {
            capability: Capability::Asr,
            inputs: &[FrameKind::Speech],
            output: FrameKind::Text,
        }
    }

    async fn process(
        &self,
        session: SessionId,
        input: Frame,
        out: &mpsc::Sender<Frame>,
    ) -> Result<()> {
        let Frame::Speech(segment) = input else {
            return Err(EngineError::Handler("asr expects speech segments".to_owned()));
        };
        debug!(%session, samples = segment.len(), "transcribing segment");
        let text = format!(
            "utterance of {:.2}s starting at sample {}",
            segment.duration_secs(),
            segment.start_sample
        );
        out.send(Frame::Text(TextChunk::whole(text)))
            .await
            .map_err(|_| EngineError::Channel("asr output closed".to_owned()))
    }
}
