//! The lifecycle coordinator (component H): wires every queue and shared flag, spawns
//! the worker threads, registers the signal handler, and joins everything back together
//! on shutdown.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info, warn};

use crate::broadcast::BroadcastWorker;
use crate::clock::SystemClock;
use crate::config::Settings;
use crate::detector_worker::DetectorWorker;
use crate::dispatch::Dispatcher;
use crate::error::StartupError;
use crate::gpio::{DriverEnablePin, MockPin};
use crate::queue::bounded;
use crate::serial::{RealSleeper, SerialWorker};
use crate::shared::{EventArmedFlag, ShutdownFlag};
use crate::writer::MseedWriter;

const QUEUE_CAPACITY: usize = 8192;

/// Runs the whole pipeline until the shutdown flag is signalled, and only returns once
/// every worker has joined.
pub fn run(settings: Settings) -> Result<(), StartupError> {
    let shutdown = ShutdownFlag::new();
    let event_armed = EventArmedFlag::new();

    register_signal_handlers(&shutdown)?;
    elevate_priority_best_effort();

    let clock = SystemClock;

    let (detector_tx, detector_rx) = bounded(QUEUE_CAPACITY);
    let (writer_tx, writer_rx) = bounded(QUEUE_CAPACITY);
    let (broadcast_tx, broadcast_rx) = bounded(QUEUE_CAPACITY);
    let dispatcher = Dispatcher::new(clock.clone(), vec![detector_tx, writer_tx, broadcast_tx]);

    let de_pin = open_driver_enable_pin(&settings);
    let port = open_serial_port(&settings)?;

    let mut serial_worker = SerialWorker::new(port, de_pin, RealSleeper, shutdown.clone(), &settings, dispatcher);
    serial_worker.handshake()?;

    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    {
        let mut detector = DetectorWorker::new(detector_rx, shutdown.clone(), event_armed.clone(), &settings);
        handles.push(thread::spawn(move || detector.run()));
    }
    {
        let mut writer = MseedWriter::new(clock.clone(), writer_rx, shutdown.clone(), event_armed.clone(), &settings);
        handles.push(thread::spawn(move || writer.run()));
    }
    {
        let broadcaster = BroadcastWorker::new(clock.clone(), broadcast_rx, shutdown.clone(), &settings);
        handles.push(thread::spawn(move || broadcaster.run()));
    }
    {
        handles.push(thread::spawn(move || serial_worker.run()));
    }

    for handle in handles {
        if let Err(e) = handle.join() {
            error!("a worker thread panicked: {e:?}");
        }
    }

    info!("all workers joined, exiting");
    Ok(())
}

fn register_signal_handlers(shutdown: &ShutdownFlag) -> Result<(), StartupError> {
    let flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, flag.clone())
        .map_err(|e| StartupError::HardwareUnavailable(format!("failed to register SIGTERM handler: {e}")))?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, flag.clone())
        .map_err(|e| StartupError::HardwareUnavailable(format!("failed to register SIGINT handler: {e}")))?;

    let shutdown = shutdown.clone();
    thread::spawn(move || loop {
        if flag.load(std::sync::atomic::Ordering::SeqCst) {
            warn!("signal received, shutting down");
            shutdown.signal();
            break;
        }
        thread::sleep(Duration::from_millis(100));
    });
    Ok(())
}

/// Raising the process scheduling priority is a nice-to-have on real hardware, not a
/// startup requirement: failure here is logged and otherwise ignored.
#[cfg(target_os = "linux")]
fn elevate_priority_best_effort() {
    // SAFETY: setpriority(PRIO_PROCESS, 0, _) only affects this process's own niceness.
    let result = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, -10) };
    if result != 0 {
        warn!("could not raise process priority (requires elevated privileges); continuing at default priority");
    }
}

#[cfg(not(target_os = "linux"))]
fn elevate_priority_best_effort() {}

#[cfg(target_os = "linux")]
fn open_driver_enable_pin(settings: &Settings) -> Box<dyn DriverEnablePin> {
    match crate::gpio::rpi::RppalPin::open(settings.serial.de_pin_bcm) {
        Ok(pin) => Box::new(pin),
        Err(e) => {
            warn!("RS-485 driver-enable GPIO unavailable ({e}), falling back to a mock pin");
            Box::new(MockPin::new())
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn open_driver_enable_pin(_settings: &Settings) -> Box<dyn DriverEnablePin> {
    Box::new(MockPin::new())
}

fn open_serial_port(settings: &Settings) -> Result<Box<dyn serialport::SerialPort>, StartupError> {
    serialport::new(&settings.serial.device, settings.serial.baud_rate)
        .timeout(Duration::from_millis(100))
        .open()
        .map_err(|e| StartupError::HardwareUnavailable(format!("serial port {}: {e}", settings.serial.device)))
}
