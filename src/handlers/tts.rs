//! Placeholder speech synthesis stage.
//!
//! Emits silence proportional to the text length, chunk by chunk as text
//! streams in, with per-session output sequence numbering. Model-backed
//! synthesizers register their own factory.

use crate::error::{EngineError, Result};
use crate::frames::{AudioFrame, Frame, FrameKind};
use crate::handler::{Capability, Handler, HandlerDescriptor, SessionId};
use crate::handlers::param_u64;
use crate::registry::FactoryContext;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Silence-emitting stand-in synthesizer.
pub struct SilenceTts {
    sample_rate: u32,
    ms_per_char: u64,
    next_seq: Mutex<HashMap<SessionId, u64>>,
}

/// Build a [`SilenceTts`]. Parameters: `sample_rate` (default 16000),
/// `ms_per_char` (default 50).
pub fn factory(ctx: &FactoryContext<'_>) -> Result<Arc<dyn Handler>> {
    let sample_rate = param_u64(ctx, "sample_rate", 16_000)?;
    if sample_rate == 0 || sample_rate > 192_000 {
        return Err(ctx.invalid(format!("sample_rate out of range: {sample_rate}")));
    }
    Ok(Arc::new(SilenceTts {
        sample_rate: sample_rate as u32,
        ms_per_char: param_u64(ctx, "ms_per_char", 50)?,
        next_seq: Mutex::new(HashMap::new()),
    }))
}

#[async_trait]
impl Handler for SilenceTts {
    fn descriptor(&self) -> HandlerDescriptor {
        HandlerDescriptor {
            capability: Capability::Tts,
            inputs: &[FrameKind::Text],
            output: FrameKind::Audio,
        }
    }

    async fn process(
        &self,
        session: SessionId,
        input: Frame,
        out: &mpsc::Sender<Frame>,
    ) -> Result<()> {
        let Frame::Text(chunk) = input else {
            return Err(EngineError::Handler("tts expects text".to_owned()));
        };
        let chars = chunk.text.chars().count() as u64;
        if chars == 0 {
            return Ok(());
        }
        let samples = (chars * self.ms_per_char * u64::from(self.sample_rate) / 1000) as usize;

        let seq = {
            let mut next = self
                .next_seq
                .lock()
                .map_err(|_| EngineError::Handler("tts state poisoned".to_owned()))?;
            let counter = next.entry(session).or_insert(0);
            let seq = *counter;
            *counter += 1;
            seq
        };

        out.send(Frame::Audio(AudioFrame {
            samples: vec![0.0; samples],
            sample_rate: self.sample_rate,
            seq,
        }))
        .await
        .map_err(|_| EngineError::Channel("tts output closed".to_owned()))
    }

    async fn finish(&self, session: SessionId, _out: &mpsc::Sender<Frame>) -> Result<()> {
        if let Ok(mut next) = self.next_seq.lock() {
            next.remove(&session);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::frames::TextChunk;

    #[tokio::test]
    async fn synthesizes_proportional_silence_with_ordered_seq() {
        let table = toml::Table::new();
        let ctx = FactoryContext {
            name: "tts",
            model_root: std::path::Path::new("models"),
            params: &table,
        };
        let tts = factory(&ctx).unwrap();
        let (tx, mut rx) = mpsc::channel(8);

        for text in ["hi ", "there"] {
            tts.process(
                SessionId(1),
                Frame::Text(TextChunk {
                    text: text.to_owned(),
                    is_final: false,
                }),
                &tx,
            )
            .await
            .unwrap();
        }

        let Frame::Audio(a) = rx.try_recv().unwrap() else { panic!() };
        let Frame::Audio(b) = rx.try_recv().unwrap() else { panic!() };
        assert_eq!(a.seq, 0);
        assert_eq!(b.seq, 1);
        assert_eq!(a.samples.len(), 3 * 50 * 16); // 3 chars at 50ms, 16 samples/ms
        assert_eq!(b.samples.len(), 5 * 50 * 16);
    }
}
