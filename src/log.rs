//! Bounded, observable event log.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::event::BufferAccessEvent;
use crate::memory::SimTime;

/// Default number of rows kept.
pub const DEFAULT_LOG_CAPACITY: usize = 40_000;

/// A change to the log's rows, delivered to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogChange {
    /// `count` rows were added starting at index `first`.
    Appended { first: usize, count: usize },
    /// `count` rows were removed from the front; the rest shifted down.
    Evicted { count: usize },
    /// Every row was removed.
    Cleared { count: usize },
}

/// Result of [`BoundedEventLog::append_batch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Rows added and still present.
    pub appended: usize,
    /// Events discarded to stay within capacity.
    pub evicted: usize,
}

type LogObserver = Box<dyn Fn(&LogChange) + Send>;

/// Event rows in arrival order, oldest evicted first once full.
///
/// Observers run synchronously under whatever lock guards the log and must
/// not call back into it.
pub struct BoundedEventLog {
    events: VecDeque<Arc<BufferAccessEvent>>,
    capacity: usize,
    observers: Vec<LogObserver>,
}

impl std::fmt::Debug for BoundedEventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedEventLog")
            .field("len", &self.events.len())
            .field("capacity", &self.capacity)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Default for BoundedEventLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl BoundedEventLog {
    /// Creates an empty log. A zero capacity keeps no rows.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            observers: Vec::new(),
        }
    }

    /// Registers an observer for later changes.
    pub fn subscribe(&mut self, observer: impl Fn(&LogChange) + Send + 'static) {
        self.observers.push(Box::new(observer));
    }

    fn emit(&self, change: LogChange) {
        for observer in &self.observers {
            observer(&change);
        }
    }

    /// Appends events in order, then evicts the oldest rows beyond capacity.
    pub fn append_batch(&mut self, batch: impl IntoIterator<Item = BufferAccessEvent>) -> AppendOutcome {
        let batch: Vec<BufferAccessEvent> = batch.into_iter().collect();
        if batch.is_empty() {
            return AppendOutcome::default();
        }

        let overflow = (self.events.len() + batch.len()).saturating_sub(self.capacity);
        let from_existing = overflow.min(self.events.len());
        let from_batch = overflow - from_existing;

        if from_existing > 0 {
            self.events.drain(..from_existing);
            self.emit(LogChange::Evicted { count: from_existing });
        }

        let first = self.events.len();
        self.events.extend(batch.into_iter().skip(from_batch).map(Arc::new));
        let appended = self.events.len() - first;
        if appended > 0 {
            self.emit(LogChange::Appended { first, count: appended });
        }

        AppendOutcome {
            appended,
            evicted: overflow,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Arc<BufferAccessEvent>> {
        self.events.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<BufferAccessEvent>> + '_ {
        self.events.iter()
    }

    /// Removes every row and returns how many there were.
    pub fn clear(&mut self) -> usize {
        let count = self.events.len();
        self.events.clear();
        self.emit(LogChange::Cleared { count });
        count
    }

    /// Changes the capacity, evicting the oldest rows right away if needed.
    /// Returns the number evicted.
    pub fn set_capacity(&mut self, capacity: usize) -> usize {
        self.capacity = capacity;
        let excess = self.events.len().saturating_sub(self.capacity);
        if excess > 0 {
            self.events.drain(..excess);
            self.emit(LogChange::Evicted { count: excess });
        }
        excess
    }

    /// Index of the first row at or after `time`.
    #[must_use]
    pub fn first_at_or_after(&self, time: SimTime) -> Option<usize> {
        self.events.iter().position(|e| e.time() >= time)
    }
}
