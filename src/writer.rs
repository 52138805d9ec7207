//! Per-channel append-only buffering with a scheduled flush, accelerated by the
//! event-armed flag. The writer never blocks the ingest path: it owns its queue and
//! reads it with a timeout, and a disk fault just clears the buffer and logs.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use log::{error, info, warn};

use crate::clock::Clock;
use crate::config::Settings;
use crate::error::WorkerError;
use crate::mseed::{self, Trace};
use crate::queue::Receiver;
use crate::sample::TimestampedSample;
use crate::shared::{EventArmedFlag, ShutdownFlag};

const QUEUE_POLL: Duration = Duration::from_millis(500);

struct Buffer {
    /// channel name -> raw integer readings accumulated this batch.
    channels: HashMap<String, Vec<i32>>,
    /// Wall-clock time of the first sample in the current batch; cleared on flush.
    batch_start: Option<f64>,
}

impl Buffer {
    fn new() -> Self {
        Self {
            channels: HashMap::new(),
            batch_start: None,
        }
    }

    fn is_empty(&self) -> bool {
        self.channels.values().all(|v| v.is_empty())
    }

    fn push(&mut self, sample: &TimestampedSample, channel_names: &[(u8, &str)]) {
        if self.batch_start.is_none() {
            self.batch_start = Some(sample.timestamp);
        }
        for (adc_channel, name) in channel_names {
            if let Some(value) = sample.channel_value(*adc_channel) {
                self.channels.entry((*name).to_string()).or_default().push(value);
            }
        }
    }

    fn take(&mut self) -> (HashMap<String, Vec<i32>>, Option<f64>) {
        let channels = std::mem::take(&mut self.channels);
        let batch_start = self.batch_start.take();
        (channels, batch_start)
    }
}

pub struct MseedWriter<C: Clock> {
    clock: C,
    queue: Receiver<TimestampedSample>,
    shutdown: ShutdownFlag,
    event_armed: EventArmedFlag,
    data_dir: PathBuf,
    network: String,
    station: String,
    sampling_rate: f64,
    write_interval_secs: f64,
    event_window_secs: f64,
    channel_names: Vec<(u8, String)>,
    buffer: Buffer,
    next_flush: f64,
    is_event_tracked: bool,
}

impl<C: Clock> MseedWriter<C> {
    pub fn new(
        clock: C,
        queue: Receiver<TimestampedSample>,
        shutdown: ShutdownFlag,
        event_armed: EventArmedFlag,
        settings: &Settings,
    ) -> Self {
        let now = clock.now();
        let channel_names = settings
            .channels
            .iter()
            .map(|c| (c.adc_channel, c.name.clone()))
            .collect();
        Self {
            next_flush: now + settings.write_interval_secs as f64,
            clock,
            queue,
            shutdown,
            event_armed,
            data_dir: PathBuf::from(&settings.data_dir),
            network: settings.network.clone(),
            station: settings.station.clone(),
            sampling_rate: settings.sampling_rate as f64,
            write_interval_secs: settings.write_interval_secs as f64,
            event_window_secs: settings.event_window_secs as f64,
            channel_names,
            buffer: Buffer::new(),
            is_event_tracked: false,
        }
    }

    fn channel_name_pairs(&self) -> Vec<(u8, &str)> {
        self.channel_names
            .iter()
            .map(|(ch, name)| (*ch, name.as_str()))
            .collect()
    }

    /// Runs the writer loop until the shutdown flag is set, then performs one final
    /// flush before returning.
    pub fn run(&mut self) {
        info!("MiniSEED writer started, writing to {:?}", self.data_dir);
        while !self.shutdown.is_set() {
            self.drain_available();
            self.maybe_flush();
        }
        info!("MiniSEED writer shutting down, performing final flush");
        self.flush();
    }

    fn drain_available(&mut self) {
        // One bounded wait per cycle is the writer's suspension point; anything already
        // queued beyond that is drained without blocking so the schedule stays on time.
        if let Some(sample) = self.queue.recv_timeout(QUEUE_POLL) {
            let pairs = self.channel_name_pairs();
            self.buffer.push(&sample, &pairs);
        }
    }

    fn maybe_flush(&mut self) {
        let now = self.clock.now();

        if self.event_armed.is_armed() {
            let new_deadline = now + self.event_window_secs;
            if !self.is_event_tracked {
                self.is_event_tracked = true;
                warn!("event armed: accelerating next flush to ~{:.0}s from now", self.event_window_secs);
            }
            self.next_flush = new_deadline;
        }

        if now >= self.next_flush {
            self.flush();
            self.next_flush = now + self.write_interval_secs;
        }
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let (channels, batch_start) = self.buffer.take();
        let triggered = self.is_event_tracked;
        self.is_event_tracked = false;

        let Some(batch_start) = batch_start else {
            return;
        };

        if let Err(e) = self.write_batch(&channels, batch_start, triggered) {
            let err = WorkerError::WriteFailed(e.to_string());
            error!("{err}, discarding buffered batch");
        }
    }

    fn write_batch(
        &self,
        channels: &HashMap<String, Vec<i32>>,
        batch_start: f64,
        triggered: bool,
    ) -> std::io::Result<()> {
        fs::create_dir_all(&self.data_dir)?;

        let traces: Vec<Trace> = channels
            .iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(name, values)| Trace {
                network: self.network.clone(),
                station: self.station.clone(),
                channel: name.clone(),
                location: String::new(),
                start_time: batch_start,
                sampling_rate: self.sampling_rate,
                data: values.iter().map(|v| *v as f32).collect(),
            })
            .collect();

        if traces.is_empty() {
            return Ok(());
        }

        let prefix = if triggered { "data_EQ_" } else { "data_" };
        let dt = Utc.timestamp_opt(batch_start.floor() as i64, 0).single().unwrap_or_else(Utc::now);
        let filename = format!("{prefix}{}.mseed", dt.format("%Y%m%dT%H%M%S"));
        let path: &Path = &self.data_dir.join(filename);

        let file = File::create(path)?;
        let mut out = BufWriter::new(file);
        mseed::write_stream(&traces, &mut out)?;
        info!("wrote {} channels to {:?}", traces.len(), path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::config::{ChannelConfig, Orientation, Settings};
    use crate::queue::bounded;

    fn settings_with(dir: &Path) -> Settings {
        let mut s = Settings::default_settings();
        s.data_dir = dir.to_string_lossy().to_string();
        s.write_interval_secs = 30;
        s.event_window_secs = 300;
        s.channels = vec![
            ChannelConfig { name: "EHZ".into(), adc_channel: 0, orientation: Orientation::Vertical },
            ChannelConfig { name: "EHN".into(), adc_channel: 1, orientation: Orientation::North },
            ChannelConfig { name: "EHE".into(), adc_channel: 2, orientation: Orientation::East },
        ];
        s
    }

    #[test]
    fn flushes_on_schedule_and_resets_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_with(dir.path());
        let clock = FakeClock::new(0.0);
        let (tx, rx) = bounded(1024);
        let shutdown = ShutdownFlag::new();
        let armed = EventArmedFlag::new();
        let mut writer = MseedWriter::new(clock.clone(), rx, shutdown, armed, &settings);

        for t in 0..29 {
            clock.set(t as f64);
            tx.send_drop_oldest(TimestampedSample { timestamp: t as f64, ch0: 1, ch1: 2, ch2: 3 });
            writer.drain_available();
            writer.maybe_flush();
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        clock.set(30.0);
        writer.drain_available();
        writer.maybe_flush();
        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);

        clock.set(60.0);
        writer.maybe_flush();
        // no new data since last flush -> no second file
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn event_arming_shortens_and_extends_the_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_with(dir.path());
        let clock = FakeClock::new(0.0);
        let (tx, rx) = bounded(1024);
        let shutdown = ShutdownFlag::new();
        let armed = EventArmedFlag::new();
        let mut writer = MseedWriter::new(clock.clone(), rx, shutdown, armed, &settings);

        clock.set(12.0);
        tx.send_drop_oldest(TimestampedSample { timestamp: 12.0, ch0: 50, ch1: 0, ch2: 0 });
        writer.drain_available();
        armed.arm();
        writer.maybe_flush();
        assert_eq!(writer.next_flush, 12.0 + settings.event_window_secs as f64);

        // intermediate ticks before the event deadline: no flush yet
        clock.set(30.0);
        writer.maybe_flush();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        armed.disarm();
        clock.set(312.0);
        writer.maybe_flush();
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let name = entries[0].as_ref().unwrap().file_name();
        assert!(name.to_string_lossy().starts_with("data_EQ_"));
    }

    #[test]
    fn shutdown_final_drain_writes_one_more_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_with(dir.path());
        let clock = FakeClock::new(0.0);
        let (tx, rx) = bounded(1024);
        let shutdown = ShutdownFlag::new();
        let armed = EventArmedFlag::new();
        let mut writer = MseedWriter::new(clock, rx, shutdown.clone(), armed, &settings);

        tx.send_drop_oldest(TimestampedSample { timestamp: 5.0, ch0: 1, ch1: 1, ch2: 1 });
        writer.drain_available();
        shutdown.signal();
        writer.flush();

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
