//! In-process reference memory.
//!
//! `SimulatedMemory` is a flat byte array with a symbol table and watch list.
//! Writes performed through it notify overlapping watches, the same way an
//! emulator's memory would. It is intended for embedded usage, tests, and as a
//! reference implementation of [`MemoryInterface`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use super::{AccessKind, MemoryInterface, MemoryLayout, SimTime, Target, TargetId, WatchCallback};

struct Watch {
    address: u64,
    size: usize,
    callback: WatchCallback,
}

impl Watch {
    fn overlaps(&self, address: u64, len: usize) -> bool {
        let end = self.address.saturating_add(self.size as u64);
        let other_end = address.saturating_add(len as u64);
        self.address < other_end && address < end
    }
}

/// Flat simulated memory starting at `base`.
pub struct SimulatedMemory {
    base: u64,
    layout: MemoryLayout,
    bytes: RwLock<Vec<u8>>,
    symbols: RwLock<HashMap<String, u64>>,
    watches: Mutex<Vec<Watch>>,
    refuse_watches: AtomicBool,
}

impl std::fmt::Debug for SimulatedMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedMemory")
            .field("base", &self.base)
            .field("layout", &self.layout)
            .field("watches", &self.watch_count())
            .finish_non_exhaustive()
    }
}

impl SimulatedMemory {
    /// Creates `len` zeroed bytes starting at `base`.
    #[must_use]
    pub fn new(base: u64, len: usize, layout: MemoryLayout) -> Self {
        Self {
            base,
            layout,
            bytes: RwLock::new(vec![0; len]),
            symbols: RwLock::new(HashMap::new()),
            watches: Mutex::new(Vec::new()),
            refuse_watches: AtomicBool::new(false),
        }
    }

    /// Adds a symbol (builder style).
    #[must_use]
    pub fn with_symbol(self, name: impl Into<String>, address: u64) -> Self {
        self.add_symbol(name, address);
        self
    }

    /// Adds or replaces a symbol.
    pub fn add_symbol(&self, name: impl Into<String>, address: u64) {
        self.symbols
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), address);
    }

    /// Makes subsequent `add_segment_monitor` calls fail (or succeed again).
    pub fn set_refuse_watches(&self, refuse: bool) {
        self.refuse_watches.store(refuse, Ordering::Release);
    }

    /// Number of registered watches.
    #[must_use]
    pub fn watch_count(&self) -> usize {
        self.watches.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether a watch on exactly `[address, address + size)` is registered.
    #[must_use]
    pub fn is_watched(&self, address: u64, size: usize) -> bool {
        self.watches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|w| w.address == address && w.size == size)
    }

    fn range(&self, address: u64, len: usize) -> Option<std::ops::Range<usize>> {
        let start = usize::try_from(address.checked_sub(self.base)?).ok()?;
        let end = start.checked_add(len)?;
        let total = self.bytes.read().unwrap_or_else(PoisonError::into_inner).len();
        (end <= total).then_some(start..end)
    }

    fn callbacks_for(&self, address: u64, len: usize) -> Vec<WatchCallback> {
        self.watches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|w| w.overlaps(address, len))
            .map(|w| Arc::clone(&w.callback))
            .collect()
    }

    fn notify(&self, kind: AccessKind, address: u64, len: usize) {
        // Locks are released before callbacks run.
        for callback in self.callbacks_for(address, len) {
            callback(kind, address);
        }
    }

    /// Writes `data` at `address` and notifies overlapping watches.
    ///
    /// Returns false (and writes nothing) if the range is out of bounds.
    pub fn write(&self, address: u64, data: &[u8]) -> bool {
        let Some(range) = self.range(address, data.len()) else {
            return false;
        };
        {
            let mut bytes = self.bytes.write().unwrap_or_else(PoisonError::into_inner);
            bytes[range].copy_from_slice(data);
        }
        self.notify(AccessKind::Write, address, data.len());
        true
    }

    /// Writes `data` without notifying any watch (e.g. loading an image).
    pub fn poke(&self, address: u64, data: &[u8]) -> bool {
        let Some(range) = self.range(address, data.len()) else {
            return false;
        };
        let mut bytes = self.bytes.write().unwrap_or_else(PoisonError::into_inner);
        bytes[range].copy_from_slice(data);
        true
    }

    /// Writes an address into the pointer cell at `address`.
    pub fn write_pointer(&self, address: u64, value: u64) -> bool {
        let cell = self.layout.encode_address(value);
        self.write(address, &cell)
    }

    /// Reports a read access of `len` bytes at `address` to overlapping watches.
    pub fn read_access(&self, address: u64, len: usize) {
        self.notify(AccessKind::Read, address, len);
    }
}

impl MemoryInterface for SimulatedMemory {
    fn add_segment_monitor(&self, address: u64, size: usize, callback: WatchCallback) -> bool {
        if self.refuse_watches.load(Ordering::Acquire) || self.range(address, size).is_none() {
            return false;
        }
        self.watches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Watch {
                address,
                size,
                callback,
            });
        true
    }

    fn remove_segment_monitor(&self, address: u64, size: usize, callback: &WatchCallback) {
        let mut watches = self.watches.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pos) = watches
            .iter()
            .position(|w| w.address == address && w.size == size && Arc::ptr_eq(&w.callback, callback))
        {
            watches.remove(pos);
        }
    }

    fn get_memory_segment(&self, address: u64, size: usize) -> Option<Vec<u8>> {
        let range = self.range(address, size)?;
        let bytes = self.bytes.read().unwrap_or_else(PoisonError::into_inner);
        Some(bytes[range].to_vec())
    }

    fn layout(&self) -> MemoryLayout {
        self.layout
    }

    fn symbol_address(&self, name: &str) -> Option<u64> {
        self.symbols
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
    }
}

/// A target backed by [`SimulatedMemory`] with a manually advanced clock.
#[derive(Debug)]
pub struct SimulatedTarget {
    id: TargetId,
    memory: Arc<SimulatedMemory>,
    clock: AtomicU64,
    context: Mutex<Option<String>>,
    stack_trace: Mutex<Option<String>>,
}

impl SimulatedTarget {
    /// Creates a target at time zero.
    #[must_use]
    pub fn new(id: u32, memory: Arc<SimulatedMemory>) -> Self {
        Self {
            id: TargetId(id),
            memory,
            clock: AtomicU64::new(0),
            context: Mutex::new(None),
            stack_trace: Mutex::new(None),
        }
    }

    /// Shared handle to the backing memory.
    #[must_use]
    pub fn simulated_memory(&self) -> &Arc<SimulatedMemory> {
        &self.memory
    }

    /// Advances the clock by `micros`.
    pub fn advance(&self, micros: u64) {
        self.clock.fetch_add(micros, Ordering::AcqRel);
    }

    /// Sets the execution context reported with subsequent events.
    pub fn set_context(&self, context: Option<String>) {
        *self.context.lock().unwrap_or_else(PoisonError::into_inner) = context;
    }

    /// Sets the stack trace reported when stack capture is enabled.
    pub fn set_stack_trace(&self, trace: Option<String>) {
        *self.stack_trace.lock().unwrap_or_else(PoisonError::into_inner) = trace;
    }
}

impl Target for SimulatedTarget {
    fn id(&self) -> TargetId {
        self.id
    }

    fn memory(&self) -> &dyn MemoryInterface {
        self.memory.as_ref()
    }

    fn now(&self) -> SimTime {
        SimTime(self.clock.load(Ordering::Acquire))
    }

    fn execution_context(&self) -> Option<String> {
        self.context.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn stack_trace(&self) -> Option<String> {
        self.stack_trace.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}
