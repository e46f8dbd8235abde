//! Echo language-model stage.
//!
//! Streams the user's text back word by word, exercising the same streaming
//! surface a real model uses: downstream synthesis starts on the first word,
//! long before the "generation" finishes.

use crate::error::{EngineError, Result};
use crate::frames::{Frame, FrameKind, TextChunk};
use crate::handler::{Capability, Handler, HandlerDescriptor, SessionId};
use crate::handlers::param_str;
use crate::registry::FactoryContext;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Streaming echo responder with per-session input buffering.
pub struct EchoLlm {
    prefix: String,
    /// Partial input accumulated until a final chunk arrives.
    pending: Mutex<HashMap<SessionId, String>>,
}

/// Build an [`EchoLlm`]. Optional `prefix` parameter prepended to replies.
pub fn factory(ctx: &FactoryContext<'_>) -> Result<Arc<dyn Handler>> {
    Ok(Arc::new(EchoLlm {
        prefix: param_str(ctx, "prefix", "you said:")?,
        pending: Mutex::new(HashMap::new()),
    }))
}

#[async_trait]
impl Handler for EchoLlm {
    fn descriptor(&self) -> HandlerDescriptor {
        HandlerDescriptor {
            capability: Capability::Llm,
            inputs: &[FrameKind::Text],
            output: FrameKind::Text,
        }
    }

    async fn process(
        &self,
        session: SessionId,
        input: Frame,
        out: &mpsc::Sender<Frame>,
    ) -> Result<()> {
        let Frame::Text(chunk) = input else {
            return Err(EngineError::Handler("llm expects text".to_owned()));
        };

        let reply = {
            let mut pending = self
                .pending
                .lock()
                .map_err(|_| EngineError::Handler("llm state poisoned".to_owned()))?;
            let buffer = pending.entry(session).or_default();
            if !buffer.is_empty() && !chunk.text.is_empty() {
                buffer.push(' ');
            }
            buffer.push_str(chunk.text.trim());
            if !chunk.is_final {
                return Ok(());
            }
            let input = std::mem::take(buffer);
            pending.remove(&session);
            format!("{} {}", self.prefix, input)
        };

        let words: Vec<&str> = reply.split_whitespace().collect();
        let last = words.len().saturating_sub(1);
        for (i, word) in words.iter().enumerate() {
            let text = if i == last {
                (*word).to_owned()
            } else {
                format!("{word} ")
            };
            out.send(Frame::Text(TextChunk {
                text,
                is_final: i == last,
            }))
            .await
            .map_err(|_| EngineError::Channel("llm output closed".to_owned()))?;
        }
        Ok(())
    }

    async fn finish(&self, session: SessionId, _out: &mpsc::Sender<Frame>) -> Result<()> {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&session);
        }
        Ok(())
    }
}
