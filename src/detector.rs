//! Streaming STA/LTA trigger with hysteresis.
//!
//! Two ring buffers of squared signal energy -- short window and long window -- feed a
//! ratio `mean(STA) / mean(LTA)`. The ratio is reported as `1.0` (disarmed) until the
//! long buffer fills. A simple two-state hysteresis machine turns the ratio into an
//! armed/disarmed trigger, so a single noisy sample near the threshold can't chatter.

use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    Disarmed,
    Armed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorEvent {
    pub ratio: f64,
    pub timestamp: f64,
    pub new_state: TriggerState,
}

pub struct StaLtaDetector {
    sta: VecDeque<f64>,
    lta: VecDeque<f64>,
    sta_len: usize,
    lta_len: usize,
    on_threshold: f64,
    off_threshold: f64,
    state: TriggerState,
}

impl StaLtaDetector {
    pub fn new(
        sampling_rate_hz: f64,
        sta_secs: f64,
        lta_secs: f64,
        on_threshold: f64,
        off_threshold: f64,
    ) -> Self {
        let sta_len = (sta_secs * sampling_rate_hz).round().max(1.0) as usize;
        let lta_len = (lta_secs * sampling_rate_hz).round().max(1.0) as usize;
        Self {
            sta: VecDeque::with_capacity(sta_len),
            lta: VecDeque::with_capacity(lta_len),
            sta_len,
            lta_len,
            on_threshold,
            off_threshold,
            state: TriggerState::Disarmed,
        }
    }

    fn push_bounded(buf: &mut VecDeque<f64>, len: usize, value: f64) {
        if buf.len() == len {
            buf.pop_front();
        }
        buf.push_back(value);
    }

    /// Feeds one sample of the trigger channel. Returns the computed ratio and, if this
    /// sample caused a state transition, the resulting detector event.
    pub fn process_sample(&mut self, value: f64, timestamp: f64) -> (f64, Option<DetectorEvent>) {
        let energy = value * value;
        Self::push_bounded(&mut self.sta, self.sta_len, energy);
        Self::push_bounded(&mut self.lta, self.lta_len, energy);

        if self.lta.len() < self.lta_len {
            return (1.0, None);
        }

        let sta_mean = self.sta.iter().sum::<f64>() / self.sta.len() as f64;
        let lta_mean = self.lta.iter().sum::<f64>() / self.lta.len() as f64;
        let ratio = if lta_mean > 0.0 { sta_mean / lta_mean } else { 1.0 };

        let new_state = match self.state {
            TriggerState::Disarmed if ratio > self.on_threshold => Some(TriggerState::Armed),
            TriggerState::Armed if ratio < self.off_threshold => Some(TriggerState::Disarmed),
            _ => None,
        };

        if let Some(new_state) = new_state {
            self.state = new_state;
            return (
                ratio,
                Some(DetectorEvent {
                    ratio,
                    timestamp,
                    new_state,
                }),
            );
        }

        (ratio, None)
    }

    pub fn state(&self) -> TriggerState {
        self.state
    }
}
