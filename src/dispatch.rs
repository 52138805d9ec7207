//! Fan-out: stamps each decoded frame with the local clock and publishes a copy to every
//! consumer queue, independently. A slow consumer never slows a fast one -- each queue
//! drops its own oldest entry on overflow rather than applying back-pressure upstream.

use log::warn;

use crate::clock::Clock;
use crate::error::WorkerError;
use crate::frame::SampleFrame;
use crate::queue::Sender;
use crate::sample::TimestampedSample;

pub struct Dispatcher<C: Clock> {
    clock: C,
    consumers: Vec<Sender<TimestampedSample>>,
}

impl<C: Clock> Dispatcher<C> {
    pub fn new(clock: C, consumers: Vec<Sender<TimestampedSample>>) -> Self {
        Self { clock, consumers }
    }

    /// Timestamps `frame` and publishes it, in order, to every consumer queue.
    pub fn publish(&self, frame: SampleFrame) {
        let sample = TimestampedSample::from_frame(frame, self.clock.now());
        for consumer in &self.consumers {
            if let Some(total_drops) = consumer.send_drop_oldest(sample) {
                warn!("{}", WorkerError::QueueFull(total_drops));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::queue::bounded;
    use std::time::Duration;

    #[test]
    fn publishes_to_every_consumer_in_order() {
        let clock = FakeClock::new(1000.0);
        let (tx_a, rx_a) = bounded(8);
        let (tx_b, rx_b) = bounded(8);
        let dispatcher = Dispatcher::new(clock, vec![tx_a, tx_b]);

        dispatcher.publish(SampleFrame { ch0: 1, ch1: 2, ch2: 3 });
        dispatcher.publish(SampleFrame { ch0: 4, ch1: 5, ch2: 6 });

        for rx in [&rx_a, &rx_b] {
            let first = rx.recv_timeout(Duration::from_millis(10)).unwrap();
            let second = rx.recv_timeout(Duration::from_millis(10)).unwrap();
            assert_eq!(first.ch0, 1);
            assert_eq!(second.ch0, 4);
            assert!(first.timestamp <= second.timestamp);
        }
    }

    #[test]
    fn slow_consumer_does_not_block_publish() {
        let clock = FakeClock::new(0.0);
        let (tx_slow, _rx_slow_never_drained) = bounded(2);
        let dispatcher = Dispatcher::new(clock, vec![tx_slow]);
        for i in 0..10 {
            dispatcher.publish(SampleFrame { ch0: i, ch1: 0, ch2: 0 });
        }
        // No panic, no blocking: overflow just drops oldest entries silently.
    }
}
