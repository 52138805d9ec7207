//! The serial link worker: RS-485 handshake at startup, then a steady-state loop that
//! alternates receiving sample bytes with periodic transmit-side keep-alives.
//!
//! The driver-enable line is asserted only for the duration of a write; every other
//! moment, including the entire receive path, the link sits in receive mode so the MCU's
//! continuous sample stream is never missed.

use std::io::{self, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::clock::Clock;
use crate::config::Settings;
use crate::dispatch::Dispatcher;
use crate::error::{StartupError, WorkerError};
use crate::frame::{ConfigFrame, CONFIG_FRAME_LEN};
use crate::gpio::DriverEnablePin;
use crate::ingest::FrameParser;
use crate::shared::ShutdownFlag;

const HANDSHAKE_SLEEP: Duration = Duration::from_secs(2);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_millis(500);
const KEEP_ALIVE_BYTE: u8 = 0x01;
const READ_CHUNK: usize = 256;

/// Abstracts the startup sleep so tests don't pay the MCU reboot window in wall time.
pub trait Sleeper: Send + 'static {
    fn sleep(&self, dur: Duration);
}

#[derive(Clone, Default)]
pub struct RealSleeper;

impl Sleeper for RealSleeper {
    fn sleep(&self, dur: Duration) {
        thread::sleep(dur);
    }
}

pub struct SerialWorker<T, P, S, C>
where
    T: Read + Write,
    P: DriverEnablePin,
    S: Sleeper,
    C: Clock,
{
    transport: T,
    de_pin: P,
    sleeper: S,
    shutdown: ShutdownFlag,
    config_frame: ConfigFrame,
    dispatcher: Dispatcher<C>,
    parser: FrameParser,
    handshake_sleep: Duration,
    handshake_timeout: Duration,
    keep_alive_interval: Duration,
}

impl<T, P, S, C> SerialWorker<T, P, S, C>
where
    T: Read + Write,
    P: DriverEnablePin,
    S: Sleeper,
    C: Clock,
{
    pub fn new(
        transport: T,
        de_pin: P,
        sleeper: S,
        shutdown: ShutdownFlag,
        settings: &Settings,
        dispatcher: Dispatcher<C>,
    ) -> Self {
        Self {
            transport,
            de_pin,
            sleeper,
            shutdown,
            config_frame: ConfigFrame {
                sampling_rate_hz: settings.sampling_rate,
                adc_pga_index: settings.adc_pga_index,
                adc_data_rate_index: settings.adc_data_rate_index,
            },
            dispatcher,
            parser: FrameParser::new(),
            handshake_sleep: HANDSHAKE_SLEEP,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            keep_alive_interval: KEEP_ALIVE_INTERVAL,
        }
    }

    #[cfg(test)]
    fn with_timing(mut self, handshake_sleep: Duration, handshake_timeout: Duration, keep_alive_interval: Duration) -> Self {
        self.handshake_sleep = handshake_sleep;
        self.handshake_timeout = handshake_timeout;
        self.keep_alive_interval = keep_alive_interval;
        self
    }

    fn transmit(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.de_pin.set_high();
        let result = self.transport.write_all(bytes).and_then(|_| self.transport.flush());
        self.de_pin.set_low();
        result
    }

    /// Sleeps for the MCU reboot window, sends the configuration frame, then listens up
    /// to the handshake timeout for the same bytes echoed back, resynchronizing on the
    /// configuration magic. A mismatch or timeout is fatal.
    pub fn handshake(&mut self) -> Result<(), StartupError> {
        self.sleeper.sleep(self.handshake_sleep);

        let encoded = self.config_frame.encode();
        self.transmit(&encoded)
            .map_err(|e| StartupError::HandshakeFailed(format!("failed to send config frame: {e}")))?;

        let deadline = Instant::now() + self.handshake_timeout;
        let mut echo_buf: Vec<u8> = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];

        while echo_buf.len() < CONFIG_FRAME_LEN {
            if Instant::now() >= deadline {
                return Err(StartupError::HandshakeFailed(
                    "no echo received within the handshake window".to_string(),
                ));
            }
            match self.transport.read(&mut chunk) {
                Ok(0) => continue,
                Ok(n) => echo_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(StartupError::HandshakeFailed(format!("read error during handshake: {e}"))),
            }

            while echo_buf.len() >= 2 && (echo_buf[0] != encoded[0] || echo_buf[1] != encoded[1]) {
                echo_buf.remove(0);
            }
        }

        let mut echoed = [0u8; CONFIG_FRAME_LEN];
        echoed.copy_from_slice(&echo_buf[..CONFIG_FRAME_LEN]);
        if echoed != encoded {
            return Err(StartupError::HandshakeFailed(
                "echoed configuration frame did not match what was sent".to_string(),
            ));
        }

        info!("MCU handshake complete");
        Ok(())
    }

    /// The steady-state loop: receive sample bytes, decode and dispatch them, and on a
    /// fixed cadence flip briefly to transmit a keep-alive byte. Cancellation is checked
    /// only between read cycles, never mid-read or mid-write.
    pub fn run(&mut self) {
        let mut chunk = [0u8; READ_CHUNK];
        let mut next_keep_alive = Instant::now() + self.keep_alive_interval;

        while !self.shutdown.is_set() {
            match self.transport.read(&mut chunk) {
                Ok(0) => {}
                Ok(n) => {
                    let Self { parser, dispatcher, .. } = self;
                    let dropped_before = parser.stats.bytes_dropped;
                    parser.feed(&chunk[..n]);
                    parser.drain_frames(|frame| dispatcher.publish(frame));
                    let dropped = parser.stats.bytes_dropped - dropped_before;
                    if dropped > 0 {
                        warn!("{}", WorkerError::FrameInvalid(format!("dropped {dropped} byte(s) while resyncing")));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => warn!("serial read error: {e}"),
            }

            if Instant::now() >= next_keep_alive {
                if let Err(e) = self.transmit(&[KEEP_ALIVE_BYTE]) {
                    warn!("keep-alive transmit failed: {e}");
                }
                next_keep_alive = Instant::now() + self.keep_alive_interval;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::gpio::MockPin;
    use crate::queue::bounded;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct NoopSleeper;
    impl Sleeper for NoopSleeper {
        fn sleep(&self, _dur: Duration) {}
    }

    /// A loopback-style fake link: whatever is written is immediately available to read,
    /// optionally perturbed by the test before the worker reads it back.
    #[derive(Clone)]
    struct FakeTransport {
        inbound: Arc<Mutex<VecDeque<u8>>>,
        outbound: Arc<Mutex<Vec<u8>>>,
    }

    impl FakeTransport {
        fn new() -> Self {
            Self {
                inbound: Arc::new(Mutex::new(VecDeque::new())),
                outbound: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn push_inbound(&self, bytes: &[u8]) {
            self.inbound.lock().unwrap().extend(bytes.iter().copied());
        }
    }

    impl Read for FakeTransport {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut inbound = self.inbound.lock().unwrap();
            let n = inbound.len().min(buf.len());
            for slot in buf.iter_mut().take(n) {
                *slot = inbound.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    impl Write for FakeTransport {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.outbound.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn settings() -> Settings {
        Settings::default_settings()
    }

    fn dispatcher() -> (Dispatcher<FakeClock>, crate::queue::Receiver<crate::sample::TimestampedSample>) {
        let (tx, rx) = bounded(64);
        (Dispatcher::new(FakeClock::new(0.0), vec![tx]), rx)
    }

    #[test]
    fn handshake_succeeds_on_exact_echo() {
        let transport = FakeTransport::new();
        let transport_for_echo = transport.clone();
        let (dispatcher, _rx) = dispatcher();
        let settings = settings();

        // Echo the frame back the instant it is transmitted: write() populates inbound
        // directly for this test's purposes.
        let encoded = ConfigFrame {
            sampling_rate_hz: settings.sampling_rate,
            adc_pga_index: settings.adc_pga_index,
            adc_data_rate_index: settings.adc_data_rate_index,
        }
        .encode();
        transport_for_echo.push_inbound(&encoded);

        let mut worker = SerialWorker::new(transport, MockPin::new(), NoopSleeper, ShutdownFlag::new(), &settings, dispatcher)
            .with_timing(Duration::from_millis(0), Duration::from_millis(200), Duration::from_millis(50));

        worker.handshake().expect("handshake should succeed on exact echo");
    }

    #[test]
    fn handshake_fails_on_mismatched_echo() {
        let transport = FakeTransport::new();
        let (dispatcher, _rx) = dispatcher();
        let settings = settings();

        let mut wrong = ConfigFrame {
            sampling_rate_hz: settings.sampling_rate,
            adc_pga_index: settings.adc_pga_index,
            adc_data_rate_index: settings.adc_data_rate_index,
        }
        .encode();
        wrong[3] ^= 0xFF;
        transport.push_inbound(&wrong);

        let mut worker = SerialWorker::new(transport, MockPin::new(), NoopSleeper, ShutdownFlag::new(), &settings, dispatcher)
            .with_timing(Duration::from_millis(0), Duration::from_millis(200), Duration::from_millis(50));

        assert!(worker.handshake().is_err());
    }

    #[test]
    fn steady_state_decodes_frames_and_dispatches_them() {
        let transport = FakeTransport::new();
        let (dispatcher, rx) = dispatcher();
        let settings = settings();

        let frame = crate::frame::SampleFrame { ch0: 10, ch1: 20, ch2: 30 };
        transport.push_inbound(&frame.encode());

        let shutdown = ShutdownFlag::new();
        let mut worker = SerialWorker::new(transport, MockPin::new(), NoopSleeper, shutdown.clone(), &settings, dispatcher)
            .with_timing(Duration::from_millis(0), Duration::from_millis(200), Duration::from_secs(3600));

        let handle = thread::spawn(move || worker.run());
        let sample = rx.recv_timeout(Duration::from_secs(1)).expect("a decoded sample");
        assert_eq!(sample.ch0, 10);
        shutdown.signal();
        handle.join().unwrap();
    }
}
