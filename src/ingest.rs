//! The framed-stream parser: resynchronizes on the sample magic and recovers from both
//! bad headers and bad checksums by dropping exactly one byte, never a whole frame.

use std::collections::VecDeque;

use crate::frame::{DecodeError, SampleFrame, SAMPLE_FRAME_LEN};

#[derive(Debug, Default)]
pub struct ParserStats {
    pub frames_decoded: u64,
    pub bytes_dropped: u64,
}

/// Owns the byte buffer accumulated from the serial link and turns it into a stream of
/// valid sample frames, dropping one byte at a time to resynchronize past garbage or a
/// failed checksum.
pub struct FrameParser {
    buf: VecDeque<u8>,
    pub stats: ParserStats,
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            buf: VecDeque::new(),
            stats: ParserStats::default(),
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend(bytes.iter().copied());
    }

    /// Drains every complete frame currently resolvable from the buffered bytes,
    /// invoking `on_frame` for each. Stops as soon as fewer than a frame's worth of
    /// bytes remain -- it never blocks waiting for more input.
    pub fn drain_frames(&mut self, mut on_frame: impl FnMut(SampleFrame)) {
        while self.buf.len() >= SAMPLE_FRAME_LEN {
            let mut candidate = [0u8; SAMPLE_FRAME_LEN];
            for (i, b) in self.buf.iter().take(SAMPLE_FRAME_LEN).enumerate() {
                candidate[i] = *b;
            }
            match SampleFrame::try_decode(&candidate) {
                Ok(frame) => {
                    for _ in 0..SAMPLE_FRAME_LEN {
                        self.buf.pop_front();
                    }
                    self.stats.frames_decoded += 1;
                    on_frame(frame);
                }
                Err(DecodeError::BadHeader) | Err(DecodeError::BadChecksum) => {
                    self.buf.pop_front();
                    self.stats.bytes_dropped += 1;
                }
            }
        }
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}
