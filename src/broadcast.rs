//! Live broadcaster: per-channel 5-second sliding windows, anti-alias decimation on a
//! 1-second cadence, pushed as JSON text frames to every connected viewer.
//!
//! The worker runs its own single-threaded cooperative event loop (a current-thread
//! Tokio runtime) rather than sharing the multi-threaded rest of the pipeline: the
//! server's accept loop and per-viewer sends are all non-blocking I/O multiplexed on
//! one thread, bridged to the blocking sample queue by one small polling task.
//!
//! Known interface quirk, preserved for compatibility: `fs` in the broadcast payload is
//! the *original* sampling rate, not the post-decimation rate. A viewer that assumes
//! otherwise will mis-scale its time axis.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, TimeZone, Utc};
use futures_util::future::join_all;
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use log::{info, warn};
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::clock::Clock;
use crate::config::Settings;
use crate::decimate::Decimator;
use crate::error::WorkerError;
use crate::queue::Receiver;
use crate::sample::TimestampedSample;
use crate::shared::ShutdownFlag;

const WINDOW_SECONDS: f64 = 5.0;
const QUEUE_POLL: Duration = Duration::from_millis(500);

#[derive(Serialize)]
struct BroadcastMessage {
    channel: String,
    timestamp: String,
    fs: f64,
    data: Vec<f64>,
}

struct ChannelWindow {
    adc_channel: u8,
    data: VecDeque<f64>,
    capacity: usize,
    counter: u64,
}

impl ChannelWindow {
    fn new(adc_channel: u8, capacity: usize) -> Self {
        Self {
            adc_channel,
            data: VecDeque::with_capacity(capacity),
            capacity,
            counter: 0,
        }
    }

    fn push(&mut self, value: f64) {
        if self.data.len() == self.capacity {
            self.data.pop_front();
        }
        self.data.push_back(value);
        self.counter += 1;
    }

    fn primed(&self) -> bool {
        self.data.len() == self.capacity
    }
}

type ViewerSink = SplitSink<WebSocketStream<TcpStream>, Message>;

pub struct BroadcastWorker<C: Clock> {
    clock: C,
    queue: Receiver<TimestampedSample>,
    shutdown: ShutdownFlag,
    addr: String,
    sampling_rate_hz: f64,
    decimation_factor: u32,
    channels: Vec<(String, u8)>,
}

impl<C: Clock> BroadcastWorker<C> {
    pub fn new(
        clock: C,
        queue: Receiver<TimestampedSample>,
        shutdown: ShutdownFlag,
        settings: &Settings,
    ) -> Self {
        Self {
            clock,
            queue,
            shutdown,
            addr: settings.broadcast_addr.clone(),
            sampling_rate_hz: settings.sampling_rate as f64,
            decimation_factor: settings.decimation_factor,
            channels: settings
                .channels
                .iter()
                .map(|c| (c.name.clone(), c.adc_channel))
                .collect(),
        }
    }

    pub fn run(self) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build broadcaster runtime");
        rt.block_on(self.serve());
    }

    async fn serve(self) {
        let listener = match TcpListener::bind(&self.addr).await {
            Ok(l) => l,
            Err(e) => {
                log::error!("broadcaster failed to bind {}: {e}", self.addr);
                return;
            }
        };
        info!("live broadcaster listening on ws://{}", self.addr);

        let viewers: Arc<Mutex<Vec<ViewerSink>>> = Arc::new(Mutex::new(Vec::new()));
        let shutdown = self.shutdown.clone();

        let accept_viewers = viewers.clone();
        let accept_shutdown = shutdown.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                if accept_shutdown.is_set() {
                    break;
                }
                tokio::select! {
                    accepted = listener.accept() => {
                        let Ok((stream, peer)) = accepted else { continue };
                        let Ok(ws) = tokio_tungstenite::accept_async(stream).await else { continue };
                        let (sink, _read_half_unused) = futures_util::StreamExt::split(ws);
                        accept_viewers.lock().await.push(sink);
                        info!("viewer connected: {peer}");
                    }
                    _ = tokio::time::sleep(Duration::from_millis(200)) => {}
                }
            }
        });

        // Bridges the blocking sample queue into the async world with one polling task.
        let (tx, mut rx) = mpsc::unbounded_channel::<TimestampedSample>();
        let bridge_queue = self.queue;
        let bridge_shutdown = shutdown.clone();
        let bridge_task = tokio::task::spawn_blocking(move || loop {
            if bridge_shutdown.is_set() {
                break;
            }
            if let Some(sample) = bridge_queue.recv_timeout(QUEUE_POLL) {
                if tx.send(sample).is_err() {
                    break;
                }
            }
        });

        let mut windows: HashMap<String, ChannelWindow> = self
            .channels
            .iter()
            .map(|(name, adc_channel)| {
                (
                    name.clone(),
                    ChannelWindow::new(*adc_channel, (self.sampling_rate_hz * WINDOW_SECONDS) as usize),
                )
            })
            .collect();
        let step = self.sampling_rate_hz as usize;

        while !shutdown.is_set() {
            tokio::select! {
                sample = rx.recv() => {
                    let Some(sample) = sample else { break };
                    self.on_sample(&sample, &mut windows, step, &viewers).await;
                }
                _ = tokio::time::sleep(Duration::from_millis(200)) => {}
            }
        }

        accept_task.abort();
        bridge_task.abort();
        viewers.lock().await.clear();
        info!("live broadcaster shut down");
    }

    async fn on_sample(
        &self,
        sample: &TimestampedSample,
        windows: &mut HashMap<String, ChannelWindow>,
        step: usize,
        viewers: &Arc<Mutex<Vec<ViewerSink>>>,
    ) {
        for (name, window) in windows.iter_mut() {
            let Some(value) = sample.channel_value(window.adc_channel) else { continue };
            window.push(value as f64);

            if window.primed() && step > 0 && window.counter % step as u64 == 0 {
                let block = decimate_last_block(window, self.sampling_rate_hz, self.decimation_factor, step);
                let msg = BroadcastMessage {
                    channel: name.clone(),
                    timestamp: format_timestamp(self.clock.now()),
                    fs: self.sampling_rate_hz,
                    data: block,
                };
                self.send_to_viewers(&msg, viewers).await;
            }
        }
    }

    /// Sends `msg` to every connected viewer concurrently, so one viewer whose socket
    /// buffer is full cannot delay delivery to the others. The lock is held only long
    /// enough to take ownership of the sink list and to put the survivors back.
    async fn send_to_viewers(&self, msg: &BroadcastMessage, viewers: &Arc<Mutex<Vec<ViewerSink>>>) {
        let Ok(text) = serde_json::to_string(msg) else { return };

        let drained: Vec<ViewerSink> = viewers.lock().await.drain(..).collect();
        let sends = drained.into_iter().map(|mut sink| {
            let text = text.clone();
            async move {
                match sink.send(Message::Text(text)).await {
                    Ok(()) => Some(sink),
                    Err(e) => {
                        warn!("{}", WorkerError::ViewerSendFailed(e.to_string()));
                        None
                    }
                }
            }
        });
        let still_alive: Vec<ViewerSink> = join_all(sends).await.into_iter().flatten().collect();

        viewers.lock().await.extend(still_alive);
    }
}

fn decimate_last_block(window: &ChannelWindow, sampling_rate_hz: f64, factor: u32, step: usize) -> Vec<f64> {
    let samples: Vec<f64> = window.data.iter().copied().collect();
    let mut decimator = Decimator::new(sampling_rate_hz, factor as usize);
    let decimated = decimator.process(&samples);
    let new_block_len = step / factor as usize;
    let start = decimated.len().saturating_sub(new_block_len);
    decimated[start..].to_vec()
}

fn format_timestamp(epoch_secs: f64) -> String {
    let secs = epoch_secs.floor() as i64;
    let micros = ((epoch_secs - epoch_secs.floor()) * 1_000_000.0).round() as u32;
    Utc.timestamp_opt(secs, micros * 1_000)
        .single()
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_block_length_matches_step_over_factor() {
        let mut window = ChannelWindow::new(0, 500);
        for i in 0..500 {
            window.push(i as f64);
        }
        assert!(window.primed());
        let block = decimate_last_block(&window, 100.0, 4, 100);
        assert_eq!(block.len(), 25);
    }

    #[test]
    fn timestamp_format_matches_expected_shape() {
        let ts = format_timestamp(1_704_067_201.5);
        assert!(ts.ends_with('Z'));
        assert!(ts.contains('T'));
    }
}
