//! Wires the STA/LTA detector (component E) to its queue and the shared event-armed
//! flag: feeds the trigger channel's readings in, and flips the flag on every state
//! transition the detector reports.

use std::time::Duration;

use log::{info, warn};

use crate::config::Settings;
use crate::detector::{StaLtaDetector, TriggerState};
use crate::queue::Receiver;
use crate::sample::TimestampedSample;
use crate::shared::{EventArmedFlag, ShutdownFlag};

const QUEUE_POLL: Duration = Duration::from_millis(500);

pub struct DetectorWorker {
    queue: Receiver<TimestampedSample>,
    shutdown: ShutdownFlag,
    event_armed: EventArmedFlag,
    trigger_channel: u8,
    detector: StaLtaDetector,
}

impl DetectorWorker {
    pub fn new(queue: Receiver<TimestampedSample>, shutdown: ShutdownFlag, event_armed: EventArmedFlag, settings: &Settings) -> Self {
        let detector = StaLtaDetector::new(
            settings.sampling_rate as f64,
            settings.sta_secs,
            settings.lta_secs,
            settings.on_threshold,
            settings.off_threshold,
        );
        Self {
            queue,
            shutdown,
            event_armed,
            trigger_channel: settings.trigger_channel().adc_channel,
            detector,
        }
    }

    pub fn run(&mut self) {
        info!("STA/LTA detector started on channel {}", self.trigger_channel);
        while !self.shutdown.is_set() {
            let Some(sample) = self.queue.recv_timeout(QUEUE_POLL) else { continue };
            let Some(value) = sample.channel_value(self.trigger_channel) else { continue };

            let (_, event) = self.detector.process_sample(value as f64, sample.timestamp);
            if let Some(event) = event {
                match event.new_state {
                    TriggerState::Armed => {
                        warn!("event detected: ratio={:.2} at t={:.3}", event.ratio, event.timestamp);
                        self.event_armed.arm();
                    }
                    TriggerState::Disarmed => {
                        info!("event window closed: ratio={:.2} at t={:.3}", event.ratio, event.timestamp);
                        self.event_armed.disarm();
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::bounded;
    use std::thread;

    #[test]
    fn arms_and_disarms_the_shared_flag_on_transitions() {
        let mut settings = Settings::default_settings();
        settings.sampling_rate = 10;
        settings.sta_secs = 1.0;
        settings.lta_secs = 3.0;
        settings.on_threshold = 3.5;
        settings.off_threshold = 1.5;

        let (tx, rx) = bounded(8192);
        let shutdown = ShutdownFlag::new();
        let armed = EventArmedFlag::new();
        let worker = DetectorWorker::new(rx, shutdown.clone(), armed.clone(), &settings);

        let quiet = 90;
        let loud = 90;
        let mut t = 0.0;
        for _ in 0..quiet {
            tx.send_drop_oldest(TimestampedSample { timestamp: t, ch0: 1, ch1: 0, ch2: 0 });
            t += 0.1;
        }
        for _ in 0..loud {
            tx.send_drop_oldest(TimestampedSample { timestamp: t, ch0: 5, ch1: 0, ch2: 0 });
            t += 0.1;
        }
        for _ in 0..quiet {
            tx.send_drop_oldest(TimestampedSample { timestamp: t, ch0: 1, ch1: 0, ch2: 0 });
            t += 0.1;
        }

        let mut worker = worker;
        let handle = thread::spawn(move || worker.run());
        thread::sleep(Duration::from_millis(200));
        shutdown.signal();
        handle.join().unwrap();

        assert!(!armed.is_armed(), "event window should have closed by end of run");
    }
}
