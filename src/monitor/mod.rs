//! Memory monitors.
//!
//! A monitor owns a watch registration on a target's memory interface and turns
//! its callbacks into [`BufferAccessEvent`]s handed to an [`EventSink`]. The set
//! of monitors is closed: a fixed [`SegmentMonitor`] or a [`PointerMonitor`] that
//! follows the address stored in a pointer cell.

use std::fmt;
use std::sync::Arc;

use crossbeam_channel::Sender;

use crate::event::BufferAccessEvent;
use crate::memory::{Target, TargetId};

/// Pointer-following monitor.
pub mod pointer;
/// Fixed-range monitor.
pub mod segment;

pub use pointer::PointerMonitor;
pub use segment::SegmentMonitor;

/// Destination of events produced by monitor callbacks.
///
/// Called on the target's execution thread; implementations must not block.
pub trait EventSink: Send + Sync {
    /// Accepts one event.
    fn submit(&self, event: BufferAccessEvent);
}

impl EventSink for Sender<BufferAccessEvent> {
    fn submit(&self, event: BufferAccessEvent) {
        if self.send(event).is_err() {
            tracing::debug!("event sink disconnected, dropping event");
        }
    }
}

/// Everything a monitor needs to observe one target.
#[derive(Clone)]
pub struct MonitorContext {
    target: Arc<dyn Target>,
    sink: Arc<dyn EventSink>,
    capture_stack_traces: bool,
}

impl fmt::Debug for MonitorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorContext")
            .field("target", &self.target.id())
            .field("capture_stack_traces", &self.capture_stack_traces)
            .finish_non_exhaustive()
    }
}

impl MonitorContext {
    #[must_use]
    pub fn new(target: Arc<dyn Target>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            target,
            sink,
            capture_stack_traces: false,
        }
    }

    /// Enables stack trace capture on every event.
    #[must_use]
    pub fn with_stack_traces(mut self, enabled: bool) -> Self {
        self.capture_stack_traces = enabled;
        self
    }

    /// The observed target.
    #[must_use]
    pub fn target(&self) -> &Arc<dyn Target> {
        &self.target
    }

    #[must_use]
    pub fn target_id(&self) -> TargetId {
        self.target.id()
    }

    pub(crate) fn sink(&self) -> &dyn EventSink {
        self.sink.as_ref()
    }

    pub(crate) const fn capture_stack_traces(&self) -> bool {
        self.capture_stack_traces
    }
}

/// Kind of monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitorKind {
    Segment,
    Pointer,
}

/// An active monitor attached to one target.
#[derive(Debug)]
pub enum Monitor {
    Segment(SegmentMonitor),
    Pointer(PointerMonitor),
}

impl Monitor {
    #[must_use]
    pub const fn kind(&self) -> MonitorKind {
        match self {
            Self::Segment(_) => MonitorKind::Segment,
            Self::Pointer(_) => MonitorKind::Pointer,
        }
    }

    /// Address currently being watched for data (the pointee for pointer
    /// monitors; `None` while a pointer monitor is degraded).
    #[must_use]
    pub fn data_address(&self) -> Option<u64> {
        match self {
            Self::Segment(m) => Some(m.address()),
            Self::Pointer(m) => m.current_address(),
        }
    }

    /// Watched data size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            Self::Segment(m) => m.size(),
            Self::Pointer(m) => m.segment_size(),
        }
    }

    /// Releases every registration held by this monitor. Idempotent.
    pub fn dispose(&self) {
        match self {
            Self::Segment(m) => m.dispose(),
            Self::Pointer(m) => m.dispose(),
        }
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        match self {
            Self::Segment(m) => m.is_disposed(),
            Self::Pointer(m) => m.is_disposed(),
        }
    }
}
