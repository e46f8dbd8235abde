//! Placeholder avatar driver stage.
//!
//! Emits one blank video frame per synthesized audio frame, mirroring the
//! audio's sequence numbering so transport can lip-sync pairs downstream.
//! Model-backed drivers (talking-head renderers) register their own factory.

use crate::error::{EngineError, Result};
use crate::frames::{Frame, FrameKind, VideoFrame};
use crate::handler::{Capability, Handler, HandlerDescriptor, SessionId};
use crate::handlers::param_u64;
use crate::registry::FactoryContext;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Blank-frame avatar driver.
pub struct StillAvatar {
    width: u32,
    height: u32,
}

/// Build a [`StillAvatar`]. Parameters: `width`/`height` (default 512).
pub fn factory(ctx: &FactoryContext<'_>) -> Result<Arc<dyn Handler>> {
    let width = param_u64(ctx, "width", 512)?;
    let height = param_u64(ctx, "height", 512)?;
    if width == 0 || height == 0 || width > 4096 || height > 4096 {
        return Err(ctx.invalid(format!("frame size out of range: {width}x{height}")));
    }
    Ok(Arc::new(StillAvatar {
        width: width as u32,
        height: height as u32,
    }))
}

#[async_trait]
impl Handler for StillAvatar {
    fn descriptor(&self) -> HandlerDescriptor {
        HandlerDescriptor {
            capability: Capability::Avatar,
            inputs: &[FrameKind::Audio],
            output: FrameKind::Video,
        }
    }

    async fn process(
        &self,
        _session: SessionId,
        input: Frame,
        out: &mpsc::Sender<Frame>,
    ) -> Result<()> {
        let Frame::Audio(audio) = input else {
            return Err(EngineError::Handler("avatar expects audio".to_owned()));
        };
        let frame = VideoFrame {
            data: vec![0; (self.width * self.height * 3) as usize],
            width: self.width,
            height: self.height,
            seq: audio.seq,
        };
        out.send(Frame::Video(frame))
            .await
            .map_err(|_| EngineError::Channel("avatar output closed".to_owned()))
    }
}
