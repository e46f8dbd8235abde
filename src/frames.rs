//! Message types passed between pipeline stages.

use std::fmt;

/// A chunk of raw audio samples from the client.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Interleaved f32 samples, mono, at the configured sample rate.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Per-session sequence number, strictly increasing.
    pub seq: u64,
}

/// A video frame from or for the client.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Packed RGB24 pixel data.
    pub data: Vec<u8>,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Per-session sequence number, strictly increasing.
    pub seq: u64,
}

/// A complete speech segment detected by the voice-activity segmenter,
/// ready for transcription.
///
/// Samples are flattened across the frames that made up the utterance;
/// look-back and padding are already applied. `start_sample`/`end_sample`
/// are absolute positions in the session's audio stream, so segments from
/// one session never overlap.
#[derive(Debug, Clone)]
pub struct SpeechSegment {
    /// Concatenated audio samples for the entire utterance.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Absolute stream position of the first sample (look-back included).
    pub start_sample: u64,
    /// Absolute stream position one past the last sample (padding included).
    pub end_sample: u64,
}

impl SpeechSegment {
    /// Segment length in samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the segment holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Segment duration in seconds.
    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// A chunk of text flowing between the ASR, LLM and TTS stages.
///
/// The LLM stage streams these token-by-token so downstream synthesis can
/// start before generation finishes.
#[derive(Debug, Clone)]
pub struct TextChunk {
    /// The text fragment.
    pub text: String,
    /// Whether this is the last chunk of the current utterance/response.
    pub is_final: bool,
}

impl TextChunk {
    /// A final chunk carrying the whole text at once.
    pub fn whole(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

/// The runtime payload delivered between adjacent pipeline stages.
#[derive(Debug, Clone)]
pub enum Frame {
    /// Raw or synthesized audio.
    Audio(AudioFrame),
    /// Raw or rendered video.
    Video(VideoFrame),
    /// A finalized speech segment.
    Speech(SpeechSegment),
    /// A text fragment.
    Text(TextChunk),
}

impl Frame {
    /// The kind tag used for chain-adjacency typing.
    pub fn kind(&self) -> FrameKind {
        match self {
            Self::Audio(_) => FrameKind::Audio,
            Self::Video(_) => FrameKind::Video,
            Self::Speech(_) => FrameKind::Speech,
            Self::Text(_) => FrameKind::Text,
        }
    }
}

/// Kind tag for [`Frame`] payloads. Pipeline graph validation checks that
/// each stage's output kind is accepted by the next stage's input kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Audio samples.
    Audio,
    /// Video pixels.
    Video,
    /// A detected speech segment.
    Speech,
    /// Text.
    Text,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Speech => "speech",
            Self::Text => "text",
        };
        f.write_str(s)
    }
}

/// Render a list of accepted kinds for error messages.
pub(crate) fn kinds_to_string(kinds: &[FrameKind]) -> String {
    kinds
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
