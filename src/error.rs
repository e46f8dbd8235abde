//! Error types for the avachat engine.

use crate::frames::FrameKind;

/// Top-level error type for the conversation engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No factory in the manifest matches a spec's module locator.
    #[error("handler not found: no factory matches locator \"{0}\"")]
    HandlerNotFound(String),

    /// Two handler specs share the same name.
    #[error("duplicate handler name: {0}")]
    DuplicateHandler(String),

    /// A handler parameter is missing or failed factory validation.
    #[error("invalid parameter for handler \"{handler}\": {reason}")]
    InvalidParameter {
        /// Name of the handler whose parameters failed validation.
        handler: String,
        /// What was wrong.
        reason: String,
    },

    /// Adjacent pipeline stages disagree on frame kinds.
    #[error(
        "type mismatch between stages \"{from}\" and \"{to}\": \
         \"{from}\" produces {produced:?}, \"{to}\" accepts [{expected}]"
    )]
    TypeMismatch {
        /// Upstream stage name.
        from: String,
        /// Downstream stage name.
        to: String,
        /// Kind the upstream stage produces.
        produced: FrameKind,
        /// Kinds the downstream stage accepts.
        expected: String,
    },

    /// The configured pipeline chain has no stages.
    #[error("pipeline chain is empty")]
    EmptyChain,

    /// Other configuration error (parse failure, bad field value).
    #[error("config error: {0}")]
    Config(String),

    /// No lease freed up within the acquisition timeout.
    #[error("lease timeout on handler \"{handler}\"")]
    LeaseTimeout {
        /// Handler whose pool was exhausted.
        handler: String,
    },

    /// A session could not be admitted because a handler pool is exhausted.
    #[error("overloaded: {0}")]
    Overloaded(String),

    /// An audio frame arrived with a regressing sequence number.
    #[error("out-of-order frame: seq {got} after {last}")]
    OutOfOrderFrame {
        /// Highest sequence number seen so far.
        last: u64,
        /// Sequence number of the offending frame.
        got: u64,
    },

    /// A frame's kind does not match the stage's declared input kinds.
    #[error("handler \"{handler}\" does not accept {kind:?} frames")]
    UnsupportedInput {
        /// Stage that rejected the frame.
        handler: String,
        /// Kind of the rejected frame.
        kind: FrameKind,
    },

    /// An opaque handler reported its own processing failure.
    #[error("handler error: {0}")]
    Handler(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether this error class is fatal at startup, as opposed to
    /// session-scoped. No session traffic is accepted while one of these
    /// stands.
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(
            self,
            Self::HandlerNotFound(_)
                | Self::DuplicateHandler(_)
                | Self::InvalidParameter { .. }
                | Self::TypeMismatch { .. }
                | Self::EmptyChain
                | Self::Config(_)
        )
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, EngineError>;
