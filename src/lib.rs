//! Avachat: real-time avatar conversation engine.
//!
//! A per-session pipeline turns live client audio into a spoken, animated
//! reply: transport → VAD → ASR → LLM → TTS → avatar → transport. The
//! stages are not hard-coded: each is an opaque [`Handler`] resolved by name
//! from configuration, and the chain is validated once at startup.
//!
//! # Architecture
//!
//! - **Registry**: a startup-time manifest maps module locators to handler
//!   factories; each enabled spec is instantiated exactly once and shared
//!   across sessions.
//! - **Leases**: every handler carries a concurrency budget; a session holds
//!   one lease per handler for its lifetime, so a GPU-bound stage cannot be
//!   oversubscribed and a full pool rejects new sessions as overloaded.
//! - **Pipeline graph**: the configured chain is type-checked stage by stage
//!   (each output kind must be accepted downstream) before any session runs.
//! - **Session executor**: one task per stage, wired by bounded channels;
//!   streaming output with backpressure, strict per-session ordering, and
//!   cooperative cancellation.
//! - **Segmenter**: the voice-activity state machine that turns a raw audio
//!   stream into padded, debounced speech segments.

pub mod config;
pub mod engine;
pub mod error;
pub mod frames;
pub mod graph;
pub mod handler;
pub mod handlers;
pub mod lease;
pub mod registry;
pub mod segmenter;
pub mod session;

pub use config::EngineConfig;
pub use engine::ChatEngine;
pub use error::{EngineError, Result};
pub use frames::{AudioFrame, Frame, FrameKind, SpeechSegment, TextChunk, VideoFrame};
pub use handler::{Capability, Handler, HandlerDescriptor, SessionId};
pub use registry::{Manifest, Registry};
pub use session::{SessionManager, SessionNotice, TransportHandle};
