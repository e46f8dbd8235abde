//! Energy-based voice-activity handler.
//!
//! Maps each audio frame's RMS energy to a speech probability and feeds the
//! per-session segmenter state machine. Silero-style model-based probability
//! estimators register their own factory and reuse the same segmenter.

use crate::error::{EngineError, Result};
use crate::frames::{Frame, FrameKind};
use crate::handler::{Capability, Handler, HandlerDescriptor, SessionId};
use crate::handlers::{param_f32, param_u64};
use crate::registry::FactoryContext;
use crate::segmenter::{Segmenter, SegmenterParams};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// VAD stage: RMS-energy probability probe plus segmentation.
///
/// Per-session segmenter state is keyed by session id; concurrent sessions
/// sharing this instance never observe each other's buffers.
pub struct EnergyVad {
    params: SegmenterParams,
    /// RMS-to-probability gain: probability = clamp(rms * gain, 0, 1).
    gain: f32,
    sessions: Mutex<HashMap<SessionId, Segmenter>>,
}

/// Build an [`EnergyVad`] from segmentation parameters.
pub fn factory(ctx: &FactoryContext<'_>) -> Result<Arc<dyn Handler>> {
    let defaults = SegmenterParams::default();
    let params = SegmenterParams {
        speaking_threshold: param_f32(ctx, "speaking_threshold", defaults.speaking_threshold)?,
        start_delay: param_u64(ctx, "start_delay", defaults.start_delay)?,
        end_delay: param_u64(ctx, "end_delay", defaults.end_delay)?,
        buffer_look_back: param_u64(ctx, "buffer_look_back", defaults.buffer_look_back)?,
        speech_padding: param_u64(ctx, "speech_padding", defaults.speech_padding)?,
    };
    params
        .validate()
        .map_err(|e| ctx.invalid(e.to_string()))?;
    let gain = param_f32(ctx, "probe_gain", 20.0)?;
    if !gain.is_finite() || gain <= 0.0 {
        return Err(ctx.invalid(format!("probe_gain must be positive, got {gain}")));
    }
    Ok(Arc::new(EnergyVad {
        params,
        gain,
        sessions: Mutex::new(HashMap::new()),
    }))
}

impl EnergyVad {
    fn probability(&self, samples: &[f32]) -> f32 {
        (rms_energy(samples) * self.gain).clamp(0.0, 1.0)
    }
}

#[async_trait]
impl Handler for EnergyVad {
    fn descriptor(&self) -> HandlerDescriptor {
        HandlerDescriptor {
            capability: Capability::Vad,
            inputs: &[FrameKind::Audio],
            output: FrameKind::Speech,
        }
    }

    async fn process(
        &self,
        session: SessionId,
        input: Frame,
        out: &mpsc::Sender<Frame>,
    ) -> Result<()> {
        let Frame::Audio(frame) = input else {
            return Err(EngineError::Handler("vad expects audio frames".to_owned()));
        };
        let probability = self.probability(&frame.samples);

        // Lock scope kept away from the send await point.
        let emitted = {
            let mut sessions = self
                .sessions
                .lock()
                .map_err(|_| EngineError::Handler("vad state poisoned".to_owned()))?;
            let segmenter = match sessions.entry(session) {
                std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
                std::collections::hash_map::Entry::Vacant(e) => {
                    e.insert(Segmenter::new(self.params)?)
                }
            };
            segmenter.push(&frame, probability)?
        };

        if let Some(segment) = emitted {
            out.send(Frame::Speech(segment))
                .await
                .map_err(|_| EngineError::Channel("vad output closed".to_owned()))?;
        }
        Ok(())
    }

    async fn finish(&self, session: SessionId, out: &mpsc::Sender<Frame>) -> Result<()> {
        let flushed = {
            let mut sessions = self
                .sessions
                .lock()
                .map_err(|_| EngineError::Handler("vad state poisoned".to_owned()))?;
            sessions.remove(&session).and_then(|mut s| s.flush())
        };
        if let Some(segment) = flushed {
            // Teardown may already have closed the channel; the flush is
            // best-effort by then.
            let _ = out.send(Frame::Speech(segment)).await;
        }
        Ok(())
    }
}

/// RMS energy of a sample buffer.
fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::frames::AudioFrame;

    fn handler(params: &str) -> Arc<dyn Handler> {
        let table: toml::Table = params.parse().unwrap();
        let ctx = FactoryContext {
            name: "vad",
            model_root: std::path::Path::new("models"),
            params: &table,
        };
        factory(&ctx).unwrap()
    }

    fn frame(seq: u64, amplitude: f32, len: usize) -> Frame {
        Frame::Audio(AudioFrame {
            samples: vec![amplitude; len],
            sample_rate: 16_000,
            seq,
        })
    }

    #[tokio::test]
    async fn loud_audio_becomes_a_segment() {
        let vad = handler(
            "speaking_threshold = 0.5\nstart_delay = 512\nend_delay = 1024\nbuffer_look_back = 512\nspeech_padding = 128\n",
        );
        let session = SessionId(1);
        let (tx, mut rx) = mpsc::channel(8);

        let mut seq = 0;
        for _ in 0..4 {
            vad.process(session, frame(seq, 0.0, 512), &tx).await.unwrap();
            seq += 1;
        }
        for _ in 0..3 {
            vad.process(session, frame(seq, 0.5, 512), &tx).await.unwrap();
            seq += 1;
        }
        for _ in 0..3 {
            vad.process(session, frame(seq, 0.0, 512), &tx).await.unwrap();
            seq += 1;
        }

        let emitted = rx.try_recv().unwrap();
        let Frame::Speech(segment) = emitted else {
            panic!("expected speech segment");
        };
        assert_eq!(segment.start_sample, 4 * 512 - 512 - 128);
        assert_eq!(segment.end_sample, 7 * 512 + 128);
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let vad = handler("start_delay = 512\nend_delay = 512\n");
        let (tx, mut rx) = mpsc::channel(8);

        // Session 2 speaking must not open a segment for session 3.
        vad.process(SessionId(2), frame(0, 0.5, 512), &tx).await.unwrap();
        vad.process(SessionId(3), frame(0, 0.0, 512), &tx).await.unwrap();
        vad.process(SessionId(3), frame(1, 0.0, 512), &tx).await.unwrap();
        assert!(rx.try_recv().is_err());

        // Flushing session 2 emits its open utterance; session 3 has none.
        vad.finish(SessionId(2), &tx).await.unwrap();
        assert!(matches!(rx.try_recv().unwrap(), Frame::Speech(_)));
        vad.finish(SessionId(3), &tx).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn out_of_order_frame_propagates() {
        let vad = handler("");
        let (tx, _rx) = mpsc::channel(8);
        vad.process(SessionId(9), frame(5, 0.0, 512), &tx).await.unwrap();
        let err = vad
            .process(SessionId(9), frame(4, 0.0, 512), &tx)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::OutOfOrderFrame { last: 5, got: 4 }));
    }

    #[test]
    fn bad_threshold_fails_factory() {
        let table: toml::Table = "speaking_threshold = 3.0".parse().unwrap();
        let ctx = FactoryContext {
            name: "vad",
            model_root: std::path::Path::new("models"),
            params: &table,
        };
        assert!(factory(&ctx).is_err());
    }
}
