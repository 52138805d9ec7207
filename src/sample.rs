//! The in-memory timestamped sample that flows from the dispatcher to every consumer.

use crate::frame::SampleFrame;

/// A decoded frame stamped with the local clock at decode time. Timestamps are assigned
/// by the dispatcher, not the MCU, and are monotonic per consumer since a single thread
/// assigns them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimestampedSample {
    /// Seconds since the Unix epoch, sub-second resolution.
    pub timestamp: f64,
    pub ch0: i32,
    pub ch1: i32,
    pub ch2: i32,
}

impl TimestampedSample {
    pub fn from_frame(frame: SampleFrame, timestamp: f64) -> Self {
        Self {
            timestamp,
            ch0: frame.ch0,
            ch1: frame.ch1,
            ch2: frame.ch2,
        }
    }

    /// Returns the raw reading for `adc_channel` (0..=2).
    pub fn channel_value(&self, adc_channel: u8) -> Option<i32> {
        match adc_channel {
            0 => Some(self.ch0),
            1 => Some(self.ch1),
            2 => Some(self.ch2),
            _ => None,
        }
    }
}
