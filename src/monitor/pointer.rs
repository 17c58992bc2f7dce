use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::{debug, warn};

use crate::descriptor::MAX_BUFFER_SIZE;
use crate::error::RegistrationError;
use crate::memory::{AccessKind, WatchCallback};

use super::{MonitorContext, SegmentMonitor};

#[derive(Debug, Default)]
struct PointerState {
    inner: Option<SegmentMonitor>,
    /// Decoded pointer value the inner monitor was created for. `None` while
    /// degraded, so the next pointer write always retries.
    last_resolved: Option<u64>,
    relocations: u64,
}

struct PointerShared {
    ctx: MonitorContext,
    pointer_address: u64,
    pointer_size: usize,
    segment_size: usize,
    state: Mutex<PointerState>,
    disposed: AtomicBool,
}

impl PointerShared {
    fn read_pointer(&self) -> Option<u64> {
        let memory = self.ctx.target().memory();
        let cell = memory.get_memory_segment(self.pointer_address, self.pointer_size)?;
        memory.layout().decode_address(&cell)
    }

    fn create_inner(&self, pointer_value: u64) -> Result<SegmentMonitor, RegistrationError> {
        SegmentMonitor::create(self.ctx.clone(), pointer_value, self.segment_size)
    }

    fn attach_initial(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(value) = self.read_pointer() else {
            warn!(target_id = %self.ctx.target_id(), pointer = self.pointer_address, "pointer cell unreadable, monitor degraded");
            return;
        };
        match self.create_inner(value) {
            Ok(inner) => {
                state.inner = Some(inner);
                state.last_resolved = Some(value);
            }
            Err(e) => {
                warn!(target_id = %self.ctx.target_id(), pointer = self.pointer_address, error = %e, "pointer monitor degraded");
            }
        }
    }

    fn on_pointer_access(&self, kind: AccessKind) {
        if kind == AccessKind::Read || self.disposed.load(Ordering::Acquire) {
            return;
        }

        let Some(value) = self.read_pointer() else {
            warn!(target_id = %self.ctx.target_id(), pointer = self.pointer_address, "pointer cell unreadable");
            return;
        };

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if self.disposed.load(Ordering::Acquire) || state.last_resolved == Some(value) {
            return;
        }

        if let Some(old) = state.inner.take() {
            old.dispose();
        }
        state.last_resolved = None;

        match self.create_inner(value) {
            Ok(inner) => {
                debug!(
                    target_id = %self.ctx.target_id(),
                    pointer = self.pointer_address,
                    address = inner.address(),
                    "pointer relocated"
                );
                // Baseline event for the new location, whatever the bytes are.
                inner.notify(AccessKind::Write);
                state.inner = Some(inner);
                state.last_resolved = Some(value);
                state.relocations += 1;
            }
            Err(e) => {
                warn!(
                    target_id = %self.ctx.target_id(),
                    pointer = self.pointer_address,
                    value,
                    error = %e,
                    "could not re-register pointer target, monitor degraded"
                );
            }
        }
    }
}

/// Watches a pointer cell and keeps an inner [`SegmentMonitor`] on the memory
/// it points to.
///
/// The inner monitor always uses the size requested at creation, also after
/// the pointer moves.
pub struct PointerMonitor {
    shared: Arc<PointerShared>,
    callback: WatchCallback,
}

impl std::fmt::Debug for PointerMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointerMonitor")
            .field("target", &self.shared.ctx.target_id())
            .field("pointer_address", &self.shared.pointer_address)
            .field("segment_size", &self.shared.segment_size)
            .field("current_address", &self.current_address())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl PointerMonitor {
    /// Registers a write watch on the pointer cell at `pointer_address` and an
    /// inner monitor of `segment_size` bytes at the decoded pointer value.
    ///
    /// An inner monitor that cannot be created (for example a NULL pointer)
    /// leaves the monitor degraded rather than failing; it recovers on the
    /// next pointer write.
    ///
    /// # Errors
    ///
    /// Fails if the pointer address is null, the size is out of range, or the
    /// memory interface refuses the pointer cell watch.
    pub fn create(
        ctx: MonitorContext,
        pointer_address: u64,
        segment_size: usize,
    ) -> Result<Self, RegistrationError> {
        let target_id = ctx.target_id();
        if pointer_address == 0 {
            return Err(RegistrationError::InvalidAddress {
                target: target_id,
                address: pointer_address,
            });
        }
        if segment_size == 0 || segment_size > MAX_BUFFER_SIZE {
            return Err(RegistrationError::InvalidSize {
                target: target_id,
                size: segment_size,
                max: MAX_BUFFER_SIZE,
            });
        }

        let pointer_size = ctx.target().memory().layout().pointer_size;
        let shared = Arc::new(PointerShared {
            ctx,
            pointer_address,
            pointer_size,
            segment_size,
            state: Mutex::new(PointerState::default()),
            disposed: AtomicBool::new(false),
        });

        let weak: Weak<PointerShared> = Arc::downgrade(&shared);
        let callback: WatchCallback = Arc::new(move |kind, _address| {
            if let Some(shared) = weak.upgrade() {
                shared.on_pointer_access(kind);
            }
        });

        let memory = shared.ctx.target().memory();
        if !memory.add_segment_monitor(pointer_address, pointer_size, Arc::clone(&callback)) {
            return Err(RegistrationError::Refused {
                target: target_id,
                address: pointer_address,
                size: pointer_size,
            });
        }

        shared.attach_initial();
        debug!(target_id = %target_id, pointer = pointer_address, segment_size, "pointer monitor registered");
        Ok(Self { shared, callback })
    }

    #[must_use]
    pub fn pointer_address(&self) -> u64 {
        self.shared.pointer_address
    }

    #[must_use]
    pub fn segment_size(&self) -> usize {
        self.shared.segment_size
    }

    /// Address of the inner monitor, `None` while degraded.
    #[must_use]
    pub fn current_address(&self) -> Option<u64> {
        self.state().inner.as_ref().map(SegmentMonitor::address)
    }

    /// Pointer value the inner monitor was created for.
    #[must_use]
    pub fn last_resolved(&self) -> Option<u64> {
        self.state().last_resolved
    }

    /// Number of inner re-registrations caused by pointer writes.
    #[must_use]
    pub fn relocations(&self) -> u64 {
        self.state().relocations
    }

    /// True if there is no inner monitor.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.state().inner.is_none()
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, PointerState> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Disposes the pointer cell watch and the inner monitor. Idempotent.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.ctx.target().memory().remove_segment_monitor(
            self.shared.pointer_address,
            self.shared.pointer_size,
            &self.callback,
        );
        if let Some(inner) = self.state().inner.take() {
            inner.dispose();
        }
        debug!(target_id = %self.shared.ctx.target_id(), pointer = self.shared.pointer_address, "pointer monitor disposed");
    }
}

impl Drop for PointerMonitor {
    fn drop(&mut self) {
        self.dispose();
    }
}
