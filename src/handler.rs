//! The handler capability contract.
//!
//! Every pipeline stage (transport, VAD, ASR, LLM, TTS, avatar driver)
//! implements the same [`Handler`] trait and differs only in the frame kinds
//! it declares. The engine never knows what a stage does internally; it only
//! routes frames whose kinds match the stage's declaration.

use crate::error::{EngineError, Result};
use crate::frames::{Frame, FrameKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

/// Identifier of one live session, unique for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Capability tag of a pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Client-facing media transport stage.
    Transport,
    /// Voice activity detection / speech segmentation.
    Vad,
    /// Speech recognition.
    Asr,
    /// Language model response generation.
    Llm,
    /// Speech synthesis.
    Tts,
    /// Avatar expression/render driver.
    Avatar,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transport => "transport",
            Self::Vad => "vad",
            Self::Asr => "asr",
            Self::Llm => "llm",
            Self::Tts => "tts",
            Self::Avatar => "avatar",
        };
        f.write_str(s)
    }
}

/// Static description of what a handler consumes and produces.
#[derive(Debug, Clone)]
pub struct HandlerDescriptor {
    /// Capability tag; must match the spec that instantiated the handler.
    pub capability: Capability,
    /// Frame kinds the handler accepts as input.
    pub inputs: &'static [FrameKind],
    /// Frame kind the handler produces.
    pub output: FrameKind,
}

/// One pluggable pipeline stage.
///
/// Instances are shared across sessions up to their concurrency limit, so
/// implementations use interior mutability and key any per-session state by
/// [`SessionId`]. The engine does not partition handler state per lease;
/// isolation between concurrent sessions is the handler's own contract.
#[async_trait]
pub trait Handler: Send + Sync {
    /// The handler's capability and frame-kind declaration.
    fn descriptor(&self) -> HandlerDescriptor;

    /// Reject a frame whose kind the handler does not declare.
    fn accept(&self, name: &str, frame: &Frame) -> Result<()> {
        let descriptor = self.descriptor();
        if descriptor.inputs.contains(&frame.kind()) {
            Ok(())
        } else {
            Err(EngineError::UnsupportedInput {
                handler: name.to_owned(),
                kind: frame.kind(),
            })
        }
    }

    /// Process one input frame, writing zero or more output frames to `out`.
    ///
    /// Output is streaming: downstream stages start consuming as soon as the
    /// first frame is sent, and a full channel suspends the producer
    /// (backpressure). The output sequence is finite per invocation and not
    /// restartable; the engine never retries a failed invocation.
    ///
    /// # Errors
    ///
    /// Any error tears the calling session down; other sessions sharing this
    /// instance are unaffected.
    async fn process(
        &self,
        session: SessionId,
        input: Frame,
        out: &mpsc::Sender<Frame>,
    ) -> Result<()>;

    /// Session teardown hook, called exactly once per session that used this
    /// handler, after its last `process` call. Stateful handlers drop
    /// per-session state here; the segmenter flushes any open utterance into
    /// `out` if the channel is still open.
    ///
    /// A cancelled session may abandon the hook at its first suspension
    /// point, so state cleanup should happen before any send.
    async fn finish(&self, session: SessionId, out: &mpsc::Sender<Frame>) -> Result<()> {
        let _ = (session, out);
        Ok(())
    }
}

impl std::fmt::Debug for dyn Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("descriptor", &self.descriptor())
            .finish()
    }
}
