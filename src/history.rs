//! Command history for an interactive console.

/// Entries kept by [`CommandHistory::default`].
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Fixed-capacity ring of past commands with an up/down cursor.
///
/// The oldest entry is overwritten once the ring is full. Pushing the same
/// command twice in a row stores it once.
#[derive(Debug, Clone)]
pub struct CommandHistory {
    slots: Vec<String>,
    capacity: usize,
    head: usize,
    len: usize,
    cursor: Option<usize>,
}

impl Default for CommandHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl CommandHistory {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            head: 0,
            len: 0,
            cursor: None,
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Entry `index`, oldest first.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&str> {
        if index >= self.len {
            return None;
        }
        self.slots.get((self.head + index) % self.capacity).map(String::as_str)
    }

    /// Records a command and resets the cursor.
    ///
    /// Returns `false` if nothing was stored (blank input or a repeat of the
    /// newest entry).
    pub fn push(&mut self, command: &str) -> bool {
        self.cursor = None;
        let command = command.trim();
        if command.is_empty() {
            return false;
        }
        if self.len > 0 && self.get(self.len - 1) == Some(command) {
            return false;
        }

        if self.len < self.capacity {
            self.slots.push(command.to_string());
            self.len += 1;
        } else {
            self.slots[self.head] = command.to_string();
            self.head = (self.head + 1) % self.capacity;
        }
        true
    }

    /// Steps to the next older entry. Stays on the oldest once reached.
    pub fn previous(&mut self) -> Option<&str> {
        if self.len == 0 {
            return None;
        }
        let index = match self.cursor {
            None => self.len - 1,
            Some(i) => i.saturating_sub(1),
        };
        self.cursor = Some(index);
        self.get(index)
    }

    /// Steps to the next newer entry. Past the newest, the cursor resets and
    /// `None` is returned (an empty prompt).
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<&str> {
        let index = self.cursor?;
        if index + 1 < self.len {
            self.cursor = Some(index + 1);
            self.get(index + 1)
        } else {
            self.cursor = None;
            None
        }
    }

    pub fn reset_cursor(&mut self) {
        self.cursor = None;
    }

    /// Entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        (0..self.len).filter_map(move |i| self.get(i))
    }
}
