use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::debug;

use crate::descriptor::MAX_BUFFER_SIZE;
use crate::error::RegistrationError;
use crate::event::BufferAccessEvent;
use crate::memory::{AccessKind, WatchCallback};

use super::MonitorContext;

struct SegmentShared {
    ctx: MonitorContext,
    address: u64,
    size: usize,
    snapshot: Mutex<Option<Vec<u8>>>,
    disposed: AtomicBool,
}

impl SegmentShared {
    fn notify(&self, kind: AccessKind) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }

        let target = self.ctx.target();
        let memory = target.memory();

        // Held across read and emit so concurrent notifications diff against a
        // consistent baseline.
        let mut snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);

        let current = memory.get_memory_segment(self.address, self.size);
        if current.is_none() {
            debug!(target_id = %target.id(), address = self.address, size = self.size, "segment unreadable");
        }
        let payload = current.unwrap_or_default();

        let stack_trace = if self.ctx.capture_stack_traces() {
            target.stack_trace()
        } else {
            None
        };

        let event = BufferAccessEvent::new(
            target.now(),
            target.id(),
            self.address,
            kind,
            snapshot.as_deref(),
            payload,
            target.execution_context(),
            stack_trace,
            memory.layout(),
        );

        *snapshot = if event.payload().is_empty() {
            None
        } else {
            Some(event.payload().to_vec())
        };
        self.ctx.sink().submit(event);
    }
}

/// Watches a fixed byte range and emits one event per notification.
///
/// The first observation marks the whole range as changed; later ones diff
/// against the previous snapshot. Dropping the monitor disposes it.
pub struct SegmentMonitor {
    shared: Arc<SegmentShared>,
    callback: WatchCallback,
}

impl std::fmt::Debug for SegmentMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentMonitor")
            .field("target", &self.shared.ctx.target_id())
            .field("address", &self.shared.address)
            .field("size", &self.shared.size)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl SegmentMonitor {
    /// Registers a watch on `[address, address + size)`.
    ///
    /// # Errors
    ///
    /// Fails if the address is null, the size is outside
    /// `[1, MAX_BUFFER_SIZE]`, or the memory interface refuses the watch.
    pub fn create(ctx: MonitorContext, address: u64, size: usize) -> Result<Self, RegistrationError> {
        let target_id = ctx.target_id();
        if address == 0 {
            return Err(RegistrationError::InvalidAddress {
                target: target_id,
                address,
            });
        }
        if size == 0 || size > MAX_BUFFER_SIZE {
            return Err(RegistrationError::InvalidSize {
                target: target_id,
                size,
                max: MAX_BUFFER_SIZE,
            });
        }

        let shared = Arc::new(SegmentShared {
            ctx,
            address,
            size,
            snapshot: Mutex::new(None),
            disposed: AtomicBool::new(false),
        });

        // The memory interface only holds a weak reference; the monitor owns
        // the shared state.
        let weak: Weak<SegmentShared> = Arc::downgrade(&shared);
        let callback: WatchCallback = Arc::new(move |kind, _address| {
            if let Some(shared) = weak.upgrade() {
                shared.notify(kind);
            }
        });

        let memory = shared.ctx.target().memory();
        if !memory.add_segment_monitor(address, size, Arc::clone(&callback)) {
            return Err(RegistrationError::Refused {
                target: target_id,
                address,
                size,
            });
        }

        debug!(target_id = %target_id, address, size, "segment monitor registered");
        Ok(Self { shared, callback })
    }

    /// Reads the segment and emits an event as if the memory interface had
    /// reported an access of `kind`.
    pub fn notify(&self, kind: AccessKind) {
        self.shared.notify(kind);
    }

    #[must_use]
    pub fn address(&self) -> u64 {
        self.shared.address
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.shared.size
    }

    /// Last observed bytes, if any notification has been processed.
    #[must_use]
    pub fn snapshot(&self) -> Option<Vec<u8>> {
        self.shared
            .snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Unregisters the watch. Later calls are no-ops.
    ///
    /// A notification already running when this is called may still complete;
    /// none are accepted afterwards.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared
            .ctx
            .target()
            .memory()
            .remove_segment_monitor(self.shared.address, self.shared.size, &self.callback);
        debug!(
            target_id = %self.shared.ctx.target_id(),
            address = self.shared.address,
            size = self.shared.size,
            "segment monitor disposed"
        );
    }
}

impl Drop for SegmentMonitor {
    fn drop(&mut self) {
        self.dispose();
    }
}
