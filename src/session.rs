//! Watch sessions.
//!
//! A [`WatchSession`] ties the pieces together: it attaches descriptors to
//! targets, feeds every monitor into one aggregator, appends flushed batches to
//! a bounded log, and answers filtered and decoded views of that log.

use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::aggregator::{AggregatorConfig, EventAggregator};
use crate::descriptor::BufferDescriptor;
use crate::error::{ValidationError, WatchError, WatchResult};
use crate::event::BufferAccessEvent;
use crate::filter::{FilterEngine, FilterStatus};
use crate::log::{BoundedEventLog, LogChange, DEFAULT_LOG_CAPACITY};
use crate::memory::{SimTime, Target, TargetId};
use crate::monitor::{EventSink, Monitor, MonitorContext, MonitorKind};
use crate::parser::{DecodedValue, Parser};

/// Exported in place of a missing execution context.
pub const UNKNOWN_CONTEXT: &str = "[unknown]";

/// Session settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Aggregator tick and worker settings.
    pub aggregator: AggregatorConfig,
    /// Maximum rows kept in the log.
    pub log_capacity: usize,
    /// Hide READ events from filtered views.
    pub hide_reads: bool,
    /// Attach a stack trace to every event.
    pub capture_stack_traces: bool,
    /// Decoder for the data column.
    pub parser: Parser,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            aggregator: AggregatorConfig::default(),
            log_capacity: DEFAULT_LOG_CAPACITY,
            hide_reads: true,
            capture_stack_traces: false,
            parser: Parser::default(),
        }
    }
}

impl WatchConfig {
    /// Parses a JSON config; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidConfig`] for malformed JSON or a zero
    /// log capacity.
    pub fn from_json(json: &str) -> WatchResult<Self> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfig {
            reason: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks values that `Default` never produces.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidConfig`] for a zero log capacity.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.log_capacity == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "log_capacity must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Identifier of one (descriptor, target) attachment.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttachmentId(Uuid);

impl AttachmentId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AttachmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// Result of [`WatchSession::attach`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachOutcome {
    /// A monitor is running (or already was) for this pair.
    Active(AttachmentId),
    /// The target has no such symbol; nothing is watched there.
    Inactive { symbol: String },
}

impl AttachOutcome {
    #[must_use]
    pub const fn id(&self) -> Option<AttachmentId> {
        match self {
            Self::Active(id) => Some(*id),
            Self::Inactive { .. } => None,
        }
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }
}

/// Read-only view of an attachment.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentInfo {
    pub id: AttachmentId,
    pub target: TargetId,
    pub descriptor: BufferDescriptor,
    pub kind: MonitorKind,
    pub data_address: Option<u64>,
    pub size: usize,
    pub attached_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Attachment {
    id: AttachmentId,
    target: TargetId,
    descriptor: BufferDescriptor,
    fingerprint: String,
    monitor: Monitor,
    attached_at: DateTime<Utc>,
}

impl Attachment {
    fn info(&self) -> AttachmentInfo {
        AttachmentInfo {
            id: self.id,
            target: self.target,
            descriptor: self.descriptor.clone(),
            kind: self.monitor.kind(),
            data_address: self.monitor.data_address(),
            size: self.monitor.size(),
            attached_at: self.attached_at,
        }
    }
}

/// Attachments, aggregator, log and view settings for one watch window.
pub struct WatchSession {
    config: WatchConfig,
    aggregator: EventAggregator,
    sink: Arc<dyn EventSink>,
    log: Arc<Mutex<BoundedEventLog>>,
    filter: FilterEngine,
    parser: Parser,
    attachments: Vec<Attachment>,
    closed: bool,
}

impl std::fmt::Debug for WatchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchSession")
            .field("config", &self.config)
            .field("attachments", &self.attachments.len())
            .field("parser", &self.parser)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl WatchSession {
    /// Starts the aggregator and an empty log.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad config and an internal error if
    /// the aggregator cannot start.
    pub fn new(config: WatchConfig) -> WatchResult<Self> {
        config.validate()?;

        let log = Arc::new(Mutex::new(BoundedEventLog::new(config.log_capacity)));
        let handler_log = Arc::clone(&log);
        let aggregator = EventAggregator::start(config.aggregator.clone(), move |batch: Vec<BufferAccessEvent>| {
            let mut log = handler_log.lock().unwrap_or_else(PoisonError::into_inner);
            let outcome = log.append_batch(batch);
            if outcome.evicted > 0 {
                debug!(evicted = outcome.evicted, len = log.len(), "log at capacity");
            }
        })?;
        let sink: Arc<dyn EventSink> = Arc::new(aggregator.sink());

        let mut filter = FilterEngine::new();
        filter.set_hide_reads(config.hide_reads);

        Ok(Self {
            parser: config.parser,
            config,
            aggregator,
            sink,
            log,
            filter,
            attachments: Vec::new(),
            closed: false,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &WatchConfig {
        &self.config
    }

    fn log(&self) -> MutexGuard<'_, BoundedEventLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> WatchResult<()> {
        if self.closed {
            return Err(WatchError::internal("watch session is closed"));
        }
        Ok(())
    }

    /// Starts watching `descriptor` on `target`.
    ///
    /// Attaching the same descriptor to the same target twice returns the
    /// existing attachment.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an invalid descriptor, a registration
    /// error if the target refuses the watch, and an internal error once the
    /// session is closed.
    pub fn attach(&mut self, descriptor: &BufferDescriptor, target: Arc<dyn Target>) -> WatchResult<AttachOutcome> {
        self.ensure_open()?;
        descriptor.validate()?;

        let target_id = target.id();
        let fingerprint = descriptor.fingerprint();
        if let Some(existing) = self
            .attachments
            .iter()
            .find(|a| a.target == target_id && a.fingerprint == fingerprint)
        {
            return Ok(AttachOutcome::Active(existing.id));
        }

        let ctx = MonitorContext::new(target, Arc::clone(&self.sink)).with_stack_traces(self.config.capture_stack_traces);
        let Some(monitor) = descriptor.create_monitor(&ctx)? else {
            debug!(target_id = %target_id, symbol = descriptor.symbol(), "symbol not found, attachment inactive");
            return Ok(AttachOutcome::Inactive {
                symbol: descriptor.symbol().to_string(),
            });
        };

        let id = AttachmentId::new();
        info!(target_id = %target_id, %descriptor, attachment = %id, "attached");
        self.attachments.push(Attachment {
            id,
            target: target_id,
            descriptor: descriptor.clone(),
            fingerprint,
            monitor,
            attached_at: Utc::now(),
        });
        Ok(AttachOutcome::Active(id))
    }

    /// Stops and removes one attachment.
    pub fn detach(&mut self, id: AttachmentId) -> bool {
        let Some(pos) = self.attachments.iter().position(|a| a.id == id) else {
            return false;
        };
        let attachment = self.attachments.remove(pos);
        attachment.monitor.dispose();
        debug!(attachment = %id, target_id = %attachment.target, "detached");
        true
    }

    /// Removes every attachment on `target`, for example when it leaves the
    /// simulation. Returns the number removed.
    pub fn detach_target(&mut self, target: TargetId) -> usize {
        let mut removed = 0;
        self.attachments.retain(|a| {
            if a.target == target {
                a.monitor.dispose();
                removed += 1;
                false
            } else {
                true
            }
        });
        if removed > 0 {
            debug!(target_id = %target, removed, "target detached");
        }
        removed
    }

    fn detach_all(&mut self) -> usize {
        let count = self.attachments.len();
        for a in self.attachments.drain(..) {
            a.monitor.dispose();
        }
        count
    }

    /// Replaces what every target is watching.
    ///
    /// The descriptor is validated before anything changes. Then all current
    /// attachments are removed, pending events flushed, the log cleared, and
    /// the new descriptor attached to each target. A failure on one target
    /// does not affect the others.
    ///
    /// # Errors
    ///
    /// Returns a validation error (with nothing changed) for an invalid
    /// descriptor and an internal error if the session is closed or the
    /// aggregator is gone.
    pub fn switch_descriptor(
        &mut self,
        descriptor: &BufferDescriptor,
        targets: &[Arc<dyn Target>],
    ) -> WatchResult<Vec<(TargetId, WatchResult<AttachOutcome>)>> {
        self.ensure_open()?;
        descriptor.validate()?;

        let removed = self.detach_all();
        self.aggregator.flush()?;
        self.log().clear();
        info!(%descriptor, removed, targets = targets.len(), "switching descriptor");

        let mut results = Vec::with_capacity(targets.len());
        for target in targets {
            let target_id = target.id();
            let outcome = self.attach(descriptor, Arc::clone(target));
            if let Err(e) = &outcome {
                warn!(target_id = %target_id, error = %e, "attach failed");
            }
            results.push((target_id, outcome));
        }
        Ok(results)
    }

    /// Current attachments.
    #[must_use]
    pub fn attachments(&self) -> Vec<AttachmentInfo> {
        self.attachments.iter().map(Attachment::info).collect()
    }

    #[must_use]
    pub fn attachment(&self, id: AttachmentId) -> Option<AttachmentInfo> {
        self.attachments.iter().find(|a| a.id == id).map(Attachment::info)
    }

    /// Delivers queued events to the log now. Returns how many were appended.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the aggregator worker is gone.
    pub fn flush(&self) -> WatchResult<usize> {
        self.aggregator.flush()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.log().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log().is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<Arc<BufferAccessEvent>> {
        self.log().get(index).cloned()
    }

    /// Removes every logged event. Returns how many there were.
    pub fn clear(&self) -> usize {
        self.log().clear()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.log().capacity()
    }

    /// Changes the log capacity, evicting old rows at once. Returns the number
    /// evicted.
    pub fn set_capacity(&mut self, capacity: usize) -> usize {
        self.config.log_capacity = capacity;
        self.log().set_capacity(capacity)
    }

    /// Observes log changes. The observer runs with the log locked.
    pub fn subscribe(&self, observer: impl Fn(&LogChange) + Send + 'static) {
        self.log().subscribe(observer);
    }

    /// All logged events, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<BufferAccessEvent>> {
        self.log().iter().cloned().collect()
    }

    /// Logged events that pass the filter, oldest first.
    #[must_use]
    pub fn visible(&self) -> Vec<Arc<BufferAccessEvent>> {
        self.log()
            .iter()
            .filter(|e| self.filter.accepts(e, self.parser))
            .cloned()
            .collect()
    }

    /// Decodes row `index` with the current parser.
    #[must_use]
    pub fn decode(&self, index: usize) -> Option<DecodedValue> {
        self.log().get(index).map(|e| self.parser.decode(e))
    }

    /// Index of the first logged event at or after `time`.
    #[must_use]
    pub fn first_at_or_after(&self, time: SimTime) -> Option<usize> {
        self.log().first_at_or_after(time)
    }

    /// Visible rows as tab-separated `time source kind data context` lines.
    ///
    /// Graphical parsers export the raw hex dump. Rows without an execution
    /// context show `[unknown]`.
    #[must_use]
    pub fn export_text(&self) -> String {
        let rows = self.visible();
        let with_hours = rows.iter().any(|e| e.time().0 >= SimTime::HOUR);
        let mut out = String::new();
        for e in rows {
            let data = if self.parser.is_graphical() {
                e.as_hex()
            } else {
                self.parser.decode(&e).text()
            };
            let _ = writeln!(
                out,
                "{}\t{}\t{}\t{}\t{}",
                e.time().format_clock(with_hours),
                e.source(),
                e.kind(),
                data,
                e.context().unwrap_or(UNKNOWN_CONTEXT),
            );
        }
        out
    }

    /// Sets the filter pattern; empty text clears it.
    ///
    /// # Errors
    ///
    /// Returns a filter error for a malformed pattern; the previous pattern
    /// stays in effect.
    pub fn set_filter(&mut self, text: &str) -> WatchResult<()> {
        self.filter.set_pattern(text)?;
        Ok(())
    }

    pub fn set_inverse(&mut self, inverse: bool) {
        self.filter.set_inverse(inverse);
    }

    pub fn set_hide_reads(&mut self, hide_reads: bool) {
        self.config.hide_reads = hide_reads;
        self.filter.set_hide_reads(hide_reads);
    }

    #[must_use]
    pub const fn filter_status(&self) -> &FilterStatus {
        self.filter.status()
    }

    #[must_use]
    pub const fn filter(&self) -> &FilterEngine {
        &self.filter
    }

    pub fn set_parser(&mut self, parser: Parser) {
        self.parser = parser;
    }

    #[must_use]
    pub const fn parser(&self) -> Parser {
        self.parser
    }

    /// Events dropped because they arrived after [`close`](Self::close).
    #[must_use]
    pub fn late_events(&self) -> u64 {
        self.aggregator.late_events()
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Disposes every monitor and stops the aggregator after a final flush.
    /// Later calls do nothing.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the aggregator worker died.
    pub fn close(&mut self) -> WatchResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let removed = self.detach_all();
        let flushed = self.aggregator.stop()?;
        info!(removed, flushed, "watch session closed");
        Ok(())
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "watch session close failed during drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{AccessKind, MemoryLayout, SimulatedMemory, SimulatedTarget};

    fn target(id: u32) -> Arc<SimulatedTarget> {
        let mem = SimulatedMemory::new(0x1000, 0x4000, MemoryLayout::MSP430)
            .with_symbol("packetbuf_aligned", 0x2000)
            .with_symbol("node_id", 0x1200);
        Arc::new(SimulatedTarget::new(id, Arc::new(mem)))
    }

    fn session() -> WatchSession {
        WatchSession::new(WatchConfig {
            aggregator: AggregatorConfig {
                flush_interval_ms: 60_000,
                ..AggregatorConfig::default()
            },
            ..WatchConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn config_defaults_and_json() {
        let cfg = WatchConfig::default();
        assert_eq!(cfg.log_capacity, 40_000);
        assert!(cfg.hide_reads);
        assert!(!cfg.capture_stack_traces);

        let cfg = WatchConfig::from_json(r#"{"log_capacity": 10, "aggregator": {"flush_interval_ms": 50}}"#).unwrap();
        assert_eq!(cfg.log_capacity, 10);
        assert_eq!(cfg.aggregator.flush_interval_ms, 50);
        assert!(cfg.hide_reads);

        let err = WatchConfig::from_json(r#"{"log_capacity": 0}"#).unwrap_err();
        assert!(err.is_validation());
        assert!(WatchConfig::from_json("{").unwrap_err().is_validation());
    }

    #[test]
    fn attach_dedupes_per_target() {
        let mut s = session();
        let t1 = target(1);
        let t2 = target(2);
        let d = BufferDescriptor::packetbuf();

        let a = s.attach(&d, t1.clone()).unwrap();
        let b = s.attach(&d, t1.clone()).unwrap();
        let c = s.attach(&d, t2.clone()).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(s.attachments().len(), 2);
        assert_eq!(t1.simulated_memory().watch_count(), 1);
    }

    #[test]
    fn missing_symbol_is_inactive() {
        let mut s = session();
        let d = BufferDescriptor::packetbuf_pointer();
        let outcome = s.attach(&d, target(1)).unwrap();
        assert_eq!(
            outcome,
            AttachOutcome::Inactive {
                symbol: "packetbufptr".to_string()
            }
        );
        assert!(s.attachments().is_empty());
    }

    #[test]
    fn events_reach_the_log_on_flush() {
        let mut s = session();
        let t = target(1);
        s.attach(&BufferDescriptor::node_id(), t.clone()).unwrap();
        t.simulated_memory().write(0x1200, &[0x2a, 0x00]);
        assert_eq!(s.len(), 0);
        assert_eq!(s.flush().unwrap(), 1);
        assert_eq!(s.len(), 1);
        assert_eq!(s.get(0).unwrap().payload(), &[0x2a, 0x00]);
        s.set_parser(Parser::IntegerArray);
        assert_eq!(s.decode(0).unwrap().text(), "42");
    }

    #[test]
    fn detach_stops_watching() {
        let mut s = session();
        let t = target(1);
        let id = s.attach(&BufferDescriptor::node_id(), t.clone()).unwrap().id().unwrap();
        assert!(s.attachment(id).is_some());
        assert!(s.detach(id));
        assert!(!s.detach(id));
        assert_eq!(t.simulated_memory().watch_count(), 0);
    }

    #[test]
    fn visible_applies_filter() {
        let mut s = session();
        let t = target(3);
        s.attach(&BufferDescriptor::node_id(), t.clone()).unwrap();
        let mem = t.simulated_memory();
        mem.write(0x1200, &[1, 0]);
        mem.read_access(0x1200, 2);
        s.flush().unwrap();
        assert_eq!(s.len(), 2);
        assert_eq!(s.visible().len(), 1);

        s.set_hide_reads(false);
        assert_eq!(s.visible().len(), 2);
        s.set_filter("READ").unwrap();
        assert_eq!(s.visible()[0].kind(), AccessKind::Read);
        assert!(s.set_filter("[").unwrap_err().is_filter());
        assert!(matches!(s.filter_status(), FilterStatus::Invalid { .. }));
        assert_eq!(s.visible().len(), 1);
    }

    #[test]
    fn close_is_idempotent_and_rejects_attach() {
        let mut s = session();
        let t = target(1);
        s.attach(&BufferDescriptor::node_id(), t.clone()).unwrap();
        s.close().unwrap();
        s.close().unwrap();
        assert!(s.is_closed());
        assert_eq!(t.simulated_memory().watch_count(), 0);
        let err = s.attach(&BufferDescriptor::node_id(), t).unwrap_err();
        assert!(err.is_internal());
    }
}
