//! Voice-activity segmentation state machine.
//!
//! Converts a continuous, ordered stream of audio frames plus per-frame
//! speech probabilities into well-bounded [`SpeechSegment`]s:
//!
//! ```text
//! SILENCE → SUSPECT_SPEECH → SPEECH → TRAILING → SILENCE
//! ```
//!
//! `start_delay` debounces transient noise before an utterance is confirmed,
//! `end_delay` debounces brief pauses before it is finalized,
//! `buffer_look_back` preserves pre-trigger audio so onsets are not clipped,
//! and `speech_padding` widens both ends of the emitted segment. All four are
//! measured in samples. Probability estimation lives outside this module; the
//! caller supplies one probability per frame.

use crate::error::{EngineError, Result};
use crate::frames::{AudioFrame, SpeechSegment};
use std::collections::VecDeque;
use tracing::debug;

/// Latency/robustness trade-off parameters, all sample counts except the
/// threshold.
#[derive(Debug, Clone, Copy)]
pub struct SegmenterParams {
    /// Speech probability at or above which a frame counts as speech.
    pub speaking_threshold: f32,
    /// Samples of continuous speech required to confirm an utterance start.
    pub start_delay: u64,
    /// Samples of continuous silence required to confirm an utterance end.
    pub end_delay: u64,
    /// Pre-trigger samples retained so the segment start is not clipped.
    pub buffer_look_back: u64,
    /// Extra samples included on both ends of an emitted segment.
    pub speech_padding: u64,
}

impl Default for SegmenterParams {
    fn default() -> Self {
        Self {
            speaking_threshold: 0.5,
            start_delay: 2048,
            end_delay: 5000,
            buffer_look_back: 5000,
            speech_padding: 512,
        }
    }
}

impl SegmenterParams {
    /// Check parameter ranges.
    ///
    /// # Errors
    ///
    /// Returns a config error when the threshold is not a probability.
    pub fn validate(&self) -> Result<()> {
        if !self.speaking_threshold.is_finite()
            || self.speaking_threshold <= 0.0
            || self.speaking_threshold > 1.0
        {
            return Err(EngineError::Config(format!(
                "speaking_threshold must be in (0, 1], got {}",
                self.speaking_threshold
            )));
        }
        Ok(())
    }
}

/// A retained slice of the input stream, positioned absolutely.
#[derive(Debug)]
struct BufferedFrame {
    /// Absolute stream position of `samples[0]`.
    start: u64,
    samples: Vec<f32>,
}

impl BufferedFrame {
    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Silence,
    /// Probability crossed up at `onset`; `above` samples observed since.
    SuspectSpeech { onset: u64, above: u64 },
    /// Utterance confirmed, still running.
    Speech { onset: u64 },
    /// Probability dropped at `offset`; `below` samples observed since.
    Trailing { onset: u64, offset: u64, below: u64 },
}

/// Per-session voice-activity segmenter.
///
/// Frames must arrive with strictly increasing sequence numbers; a
/// regression fails the stream with [`EngineError::OutOfOrderFrame`] rather
/// than silently reordering.
#[derive(Debug)]
pub struct Segmenter {
    params: SegmenterParams,
    state: State,
    buffer: VecDeque<BufferedFrame>,
    /// Absolute stream position after the last consumed frame.
    pos: u64,
    /// End of the last emitted segment; nothing before this is ever re-emitted.
    floor: u64,
    last_seq: Option<u64>,
    sample_rate: u32,
}

impl Segmenter {
    /// Create a segmenter with the given parameters.
    ///
    /// # Errors
    ///
    /// Returns a config error for out-of-range parameters.
    pub fn new(params: SegmenterParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            state: State::Silence,
            buffer: VecDeque::new(),
            pos: 0,
            floor: 0,
            last_seq: None,
            sample_rate: 0,
        })
    }

    /// Consume one frame with its speech probability; returns a finalized
    /// segment when an utterance end is confirmed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::OutOfOrderFrame`] on a regressing sequence
    /// number; the stream is unusable afterwards and the session must be
    /// torn down.
    pub fn push(&mut self, frame: &AudioFrame, probability: f32) -> Result<Option<SpeechSegment>> {
        if let Some(last) = self.last_seq {
            if frame.seq <= last {
                return Err(EngineError::OutOfOrderFrame {
                    last,
                    got: frame.seq,
                });
            }
        }
        self.last_seq = Some(frame.seq);
        if self.sample_rate == 0 {
            self.sample_rate = frame.sample_rate;
        }

        let start = self.pos;
        let len = frame.samples.len() as u64;
        self.pos += len;
        self.buffer.push_back(BufferedFrame {
            start,
            samples: frame.samples.clone(),
        });

        let speaking = probability >= self.params.speaking_threshold;
        let mut emitted = None;

        self.state = match self.state {
            State::Silence => {
                if speaking {
                    debug!(onset = start, "speech suspected");
                    State::SuspectSpeech {
                        onset: start,
                        above: len,
                    }
                } else {
                    State::Silence
                }
            }
            State::SuspectSpeech { onset, above } => {
                if speaking {
                    let above = above + len;
                    if above >= self.params.start_delay {
                        debug!(onset, "speech confirmed");
                        State::Speech { onset }
                    } else {
                        State::SuspectSpeech { onset, above }
                    }
                } else {
                    // Transient noise: drop the tentative utterance.
                    State::Silence
                }
            }
            State::Speech { onset } => {
                if speaking {
                    State::Speech { onset }
                } else {
                    State::Trailing {
                        onset,
                        offset: start,
                        below: len,
                    }
                }
            }
            State::Trailing {
                onset,
                offset,
                below,
            } => {
                if speaking {
                    // Brief pause, resume the same utterance.
                    State::Speech { onset }
                } else {
                    let below = below + len;
                    if below >= self.params.end_delay {
                        emitted = Some(self.finalize(onset, offset));
                        State::Silence
                    } else {
                        State::Trailing {
                            onset,
                            offset,
                            below,
                        }
                    }
                }
            }
        };

        self.prune();
        Ok(emitted)
    }

    /// Finalize any open utterance at end of stream, clipped to stream
    /// bounds. Suspected-but-unconfirmed speech is discarded.
    pub fn flush(&mut self) -> Option<SpeechSegment> {
        let segment = match self.state {
            State::Speech { onset } => Some(self.finalize(onset, self.pos)),
            State::Trailing { onset, offset, .. } => Some(self.finalize(onset, offset)),
            State::Silence | State::SuspectSpeech { .. } => None,
        };
        self.state = State::Silence;
        self.prune();
        segment
    }

    /// Total samples consumed so far.
    pub fn stream_position(&self) -> u64 {
        self.pos
    }

    /// Cut `[seg_start, seg_end)` out of the retained buffer and advance the
    /// emission floor. Look-back and padding extend the start; padding
    /// extends the end; both are clipped to the stream bounds and to the
    /// previous segment's end so no sample is emitted twice.
    fn finalize(&mut self, onset: u64, offset: u64) -> SpeechSegment {
        let lead = self.params.buffer_look_back + self.params.speech_padding;
        let seg_start = onset.saturating_sub(lead).max(self.floor);
        let seg_end = (offset + self.params.speech_padding).min(self.pos);

        let mut samples = Vec::with_capacity((seg_end - seg_start) as usize);
        for frame in &self.buffer {
            if frame.end() <= seg_start || frame.start >= seg_end {
                continue;
            }
            let from = seg_start.saturating_sub(frame.start) as usize;
            let to = (seg_end.min(frame.end()) - frame.start) as usize;
            samples.extend_from_slice(&frame.samples[from..to]);
        }

        self.floor = seg_end;
        debug!(
            start = seg_start,
            end = seg_end,
            samples = samples.len(),
            "speech segment finalized"
        );
        SpeechSegment {
            samples,
            sample_rate: self.sample_rate,
            start_sample: seg_start,
            end_sample: seg_end,
        }
    }

    /// Drop frames that can no longer contribute to any future segment.
    fn prune(&mut self) {
        let lead = self.params.buffer_look_back + self.params.speech_padding;
        let keep_from = match self.state {
            State::Silence => self.pos.saturating_sub(lead),
            State::SuspectSpeech { onset, .. }
            | State::Speech { onset }
            | State::Trailing { onset, .. } => onset.saturating_sub(lead),
        }
        .max(self.floor);

        while let Some(front) = self.buffer.front() {
            if front.end() <= keep_from {
                self.buffer.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    const FRAME_LEN: usize = 1000;
    const SAMPLE_RATE: u32 = 16_000;

    /// Drives a segmenter with a probability trace, one frame per entry.
    /// Sample values encode their absolute stream position so tests can
    /// verify exactly which samples a segment contains.
    struct Trace {
        segmenter: Segmenter,
        seq: u64,
        pos: u64,
        emitted: Vec<SpeechSegment>,
    }

    impl Trace {
        fn new(params: SegmenterParams) -> Self {
            Self {
                segmenter: Segmenter::new(params).unwrap(),
                seq: 0,
                pos: 0,
                emitted: Vec::new(),
            }
        }

        fn feed(&mut self, frames: usize, probability: f32) {
            for _ in 0..frames {
                let samples: Vec<f32> = (0..FRAME_LEN).map(|i| (self.pos + i as u64) as f32).collect();
                let frame = AudioFrame {
                    samples,
                    sample_rate: SAMPLE_RATE,
                    seq: self.seq,
                };
                self.seq += 1;
                self.pos += FRAME_LEN as u64;
                if let Some(segment) = self.segmenter.push(&frame, probability).unwrap() {
                    self.emitted.push(segment);
                }
            }
        }
    }

    fn params() -> SegmenterParams {
        SegmenterParams {
            speaking_threshold: 0.5,
            start_delay: 2048,
            end_delay: 5000,
            buffer_look_back: 5000,
            speech_padding: 512,
        }
    }

    /// Segment samples must be exactly the stream slice [start, end).
    fn assert_exact_slice(segment: &SpeechSegment) {
        assert_eq!(
            segment.samples.len() as u64,
            segment.end_sample - segment.start_sample
        );
        for (i, &s) in segment.samples.iter().enumerate() {
            assert_eq!(s, (segment.start_sample + i as u64) as f32);
        }
    }

    #[test]
    fn worked_example_emits_one_padded_segment() {
        let mut trace = Trace::new(params());
        trace.feed(10, 0.0); // 10_000 samples of silence
        trace.feed(3, 0.9); // 3000 samples above threshold, onset at 10_000
        trace.feed(6, 0.1); // 6000 samples below, offset at 13_000

        assert_eq!(trace.emitted.len(), 1);
        let segment = &trace.emitted[0];
        assert_eq!(segment.start_sample, 10_000 - 5000 - 512);
        assert_eq!(segment.end_sample, 13_000 + 512);
        assert_eq!(segment.sample_rate, SAMPLE_RATE);
        assert_exact_slice(segment);

        // More silence emits nothing further.
        trace.feed(20, 0.0);
        assert_eq!(trace.emitted.len(), 1);
    }

    #[test]
    fn transient_noise_below_start_delay_is_discarded() {
        let mut trace = Trace::new(params());
        trace.feed(10, 0.0);
        trace.feed(2, 0.9); // 2000 < start_delay of 2048
        trace.feed(20, 0.0);
        assert!(trace.emitted.is_empty());
    }

    #[test]
    fn brief_pause_keeps_utterance_open() {
        let mut trace = Trace::new(params());
        trace.feed(10, 0.0);
        trace.feed(4, 0.9);
        trace.feed(3, 0.1); // 3000 < end_delay of 5000
        trace.feed(4, 0.9);
        trace.feed(6, 0.1); // now confirmed silent

        assert_eq!(trace.emitted.len(), 1);
        let segment = &trace.emitted[0];
        assert_eq!(segment.start_sample, 10_000 - 5512);
        // Offset is the start of the final silent run.
        assert_eq!(segment.end_sample, 21_000 + 512);
        assert_exact_slice(segment);
    }

    #[test]
    fn look_back_clips_at_stream_start() {
        let mut trace = Trace::new(params());
        trace.feed(3, 0.9); // speech from sample 0
        trace.feed(6, 0.1);

        assert_eq!(trace.emitted.len(), 1);
        assert_eq!(trace.emitted[0].start_sample, 0);
        assert_exact_slice(&trace.emitted[0]);
    }

    #[test]
    fn segments_never_overlap() {
        // Large padding and short end delay force the second segment's
        // look-back window into the first segment's territory.
        let mut p = params();
        p.end_delay = 1000;
        p.speech_padding = 900;
        let mut trace = Trace::new(p);

        trace.feed(10, 0.0);
        trace.feed(3, 0.9);
        trace.feed(1, 0.1); // finalizes after 1000 silent samples
        trace.feed(3, 0.9); // second utterance right behind
        trace.feed(1, 0.1);

        assert_eq!(trace.emitted.len(), 2);
        let (a, b) = (&trace.emitted[0], &trace.emitted[1]);
        assert!(a.end_sample <= b.start_sample);
        assert_eq!(b.start_sample, a.end_sample); // clipped to the floor
        assert_exact_slice(a);
        assert_exact_slice(b);
    }

    #[test]
    fn emission_is_monotonic_across_many_utterances() {
        let mut trace = Trace::new(params());
        for _ in 0..5 {
            trace.feed(8, 0.0);
            trace.feed(4, 0.9);
            trace.feed(6, 0.1);
        }
        assert_eq!(trace.emitted.len(), 5);
        for pair in trace.emitted.windows(2) {
            assert!(pair[0].end_sample <= pair[1].start_sample);
        }
    }

    #[test]
    fn regressing_sequence_number_fails() {
        let mut segmenter = Segmenter::new(params()).unwrap();
        let frame = |seq| AudioFrame {
            samples: vec![0.0; FRAME_LEN],
            sample_rate: SAMPLE_RATE,
            seq,
        };
        segmenter.push(&frame(7), 0.0).unwrap();
        let err = segmenter.push(&frame(7), 0.0).unwrap_err();
        assert!(matches!(
            err,
            EngineError::OutOfOrderFrame { last: 7, got: 7 }
        ));
    }

    #[test]
    fn flush_finalizes_open_speech_clipped_to_stream() {
        let mut trace = Trace::new(params());
        trace.feed(10, 0.0);
        trace.feed(4, 0.9);

        let segment = trace.segmenter.flush().unwrap();
        assert_eq!(segment.start_sample, 10_000 - 5512);
        assert_eq!(segment.end_sample, 14_000); // no padding past stream end
        assert_exact_slice(&segment);
        assert!(trace.segmenter.flush().is_none());
    }

    #[test]
    fn flush_discards_unconfirmed_speech() {
        let mut trace = Trace::new(params());
        trace.feed(10, 0.0);
        trace.feed(1, 0.9); // suspect only
        assert!(trace.segmenter.flush().is_none());
    }

    #[test]
    fn threshold_must_be_a_probability() {
        let mut p = params();
        p.speaking_threshold = 1.5;
        assert!(Segmenter::new(p).is_err());
        p.speaking_threshold = 0.0;
        assert!(Segmenter::new(p).is_err());
    }
}
