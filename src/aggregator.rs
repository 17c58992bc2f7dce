//! Event aggregation worker.
//!
//! Monitor callbacks push events onto an unbounded queue without blocking. A
//! dedicated worker drains the queue on a fixed tick and hands each batch to
//! the flush handler, so consumers see events at a bounded rate instead of one
//! at a time.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, unbounded, Receiver, Sender};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{WatchError, WatchResult};
use crate::event::BufferAccessEvent;
use crate::monitor::EventSink;

/// Default flush period.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 250;

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Milliseconds between periodic flushes.
    pub flush_interval_ms: u64,
    /// Name given to the worker thread.
    pub thread_name: String,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            thread_name: "bufwatch-aggregator".to_string(),
        }
    }
}

impl AggregatorConfig {
    /// Flush period; never shorter than one millisecond.
    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }
}

/// Receives each non-empty batch, in arrival order.
pub type FlushHandler = Box<dyn FnMut(Vec<BufferAccessEvent>) + Send>;

#[derive(Debug)]
enum ControlMsg {
    Flush { reply: Sender<usize> },
    Stop { reply: Sender<usize> },
}

#[derive(Debug)]
struct Shared {
    tx: Sender<BufferAccessEvent>,
    stopped: AtomicBool,
    /// Producers between their `stopped` check and the end of their send.
    in_flight: AtomicUsize,
    late_events: AtomicU64,
}

impl Shared {
    fn enqueue(&self, event: BufferAccessEvent) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let accepted = !self.stopped.load(Ordering::SeqCst) && self.tx.send(event).is_ok();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if !accepted {
            self.late_events.fetch_add(1, Ordering::Relaxed);
            debug!("event submitted after aggregator stop, dropping");
        }
    }

    /// Marks the queue closed and waits until every accepted send has landed.
    /// Returns false if it was already closed.
    fn close(&self) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            thread::yield_now();
        }
        true
    }
}

/// Cloneable producer handle for monitors.
#[derive(Debug, Clone)]
pub struct AggregatorSink {
    shared: Arc<Shared>,
}

impl EventSink for AggregatorSink {
    fn submit(&self, event: BufferAccessEvent) {
        self.shared.enqueue(event);
    }
}

/// Batches events on a background worker.
///
/// Each flush takes the queue length at that moment and drains exactly that
/// many events, so every batch is a consistent prefix of what was submitted.
#[derive(Debug)]
pub struct EventAggregator {
    shared: Arc<Shared>,
    control_tx: Sender<ControlMsg>,
    delivered: Arc<AtomicU64>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl EventAggregator {
    /// Spawns the worker.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Internal`] if the worker thread cannot be spawned.
    pub fn start(cfg: AggregatorConfig, handler: impl FnMut(Vec<BufferAccessEvent>) + Send + 'static) -> WatchResult<Self> {
        let (tx, rx) = unbounded::<BufferAccessEvent>();
        let (control_tx, control_rx) = unbounded::<ControlMsg>();
        let delivered = Arc::new(AtomicU64::new(0));

        let interval = cfg.flush_interval();
        let thread_delivered = Arc::clone(&delivered);
        let handler: FlushHandler = Box::new(handler);
        let join = thread::Builder::new()
            .name(cfg.thread_name.clone())
            .spawn(move || worker_loop(interval, handler, thread_delivered, rx, control_rx))
            .map_err(|e| WatchError::internal(format!("failed to spawn aggregator worker: {e}")))?;

        info!(interval_ms = cfg.flush_interval_ms, "event aggregator started");
        Ok(Self {
            shared: Arc::new(Shared {
                tx,
                stopped: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                late_events: AtomicU64::new(0),
            }),
            control_tx,
            delivered,
            join: Mutex::new(Some(join)),
        })
    }

    /// Non-blocking enqueue.
    pub fn enqueue(&self, event: BufferAccessEvent) {
        self.shared.enqueue(event);
    }

    /// Producer handle for monitors.
    #[must_use]
    pub fn sink(&self) -> AggregatorSink {
        AggregatorSink {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Flushes now and waits. Returns the number of events delivered.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Internal`] if the worker is gone.
    pub fn flush(&self) -> WatchResult<usize> {
        if self.is_stopped() {
            return Ok(0);
        }
        let (reply, reply_rx) = bounded(1);
        self.request(ControlMsg::Flush { reply }, &reply_rx)
    }

    /// Flushes what is queued, then stops the worker. Later calls return `Ok(0)`.
    ///
    /// Every event is either in the final flush or counted in
    /// [`late_events`](Self::late_events).
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Internal`] if the worker died before stopping.
    pub fn stop(&self) -> WatchResult<usize> {
        if !self.shared.close() {
            return Ok(0);
        }
        let (reply, reply_rx) = bounded(1);
        let flushed = self.request(ControlMsg::Stop { reply }, &reply_rx);

        let handle = self.join.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("aggregator worker panicked");
            }
        }
        info!(delivered = self.delivered(), late = self.late_events(), "event aggregator stopped");
        flushed
    }

    fn request(&self, msg: ControlMsg, reply_rx: &Receiver<usize>) -> WatchResult<usize> {
        self.control_tx
            .send(msg)
            .map_err(|_| WatchError::internal("aggregator control channel disconnected"))?;
        reply_rx
            .recv()
            .map_err(|_| WatchError::internal("aggregator worker exited without replying"))
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    /// Events waiting for the next flush.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.tx.len()
    }

    /// Total events handed to the flush handler.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Events submitted after [`stop`](Self::stop) and therefore dropped.
    #[must_use]
    pub fn late_events(&self) -> u64 {
        self.shared.late_events.load(Ordering::Relaxed)
    }
}

impl Drop for EventAggregator {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "aggregator stop failed during drop");
        }
    }
}

fn drain(rx: &Receiver<BufferAccessEvent>, handler: &mut FlushHandler, delivered: &AtomicU64) -> usize {
    let pending = rx.len();
    if pending == 0 {
        return 0;
    }
    let batch: Vec<BufferAccessEvent> = rx.try_iter().take(pending).collect();
    let count = batch.len();
    delivered.fetch_add(count as u64, Ordering::Relaxed);
    handler(batch);
    count
}

fn worker_loop(
    interval: Duration,
    mut handler: FlushHandler,
    delivered: Arc<AtomicU64>,
    rx: Receiver<BufferAccessEvent>,
    control_rx: Receiver<ControlMsg>,
) {
    let ticker = tick(interval);

    loop {
        select! {
            recv(control_rx) -> msg => {
                match msg {
                    Ok(ControlMsg::Flush { reply }) => {
                        let count = drain(&rx, &mut handler, &delivered);
                        let _ = reply.send(count);
                    }
                    Ok(ControlMsg::Stop { reply }) => {
                        let count = drain(&rx, &mut handler, &delivered);
                        let _ = reply.send(count);
                        break;
                    }
                    Err(_) => {
                        drain(&rx, &mut handler, &delivered);
                        break;
                    }
                }
            }
            recv(ticker) -> _ => {
                drain(&rx, &mut handler, &delivered);
            }
        }
    }
}
