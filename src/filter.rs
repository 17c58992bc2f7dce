//! Row filtering for the event log.
//!
//! A row is shown when it passes the READ check and, if a pattern is set, when
//! the pattern finds a match in one of its text columns (inverted on request).

use regex::Regex;

use crate::error::FilterError;
use crate::event::BufferAccessEvent;
use crate::memory::AccessKind;
use crate::parser::Parser;

/// Outcome of the last [`FilterEngine::set_pattern`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FilterStatus {
    #[default]
    Valid,
    /// The last pattern did not compile; the previous one is still in effect.
    Invalid { input: String, message: String },
}

/// Regex filter with inverse and hide-reads switches.
#[derive(Debug, Clone)]
pub struct FilterEngine {
    regex: Option<Regex>,
    pattern: String,
    inverse: bool,
    hide_reads: bool,
    status: FilterStatus,
}

impl Default for FilterEngine {
    fn default() -> Self {
        Self {
            regex: None,
            pattern: String::new(),
            inverse: false,
            hide_reads: true,
            status: FilterStatus::Valid,
        }
    }
}

impl FilterEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the pattern. Empty text clears it.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::Malformed`] if `text` does not compile; the
    /// previous pattern stays active and the status turns invalid.
    pub fn set_pattern(&mut self, text: &str) -> Result<(), FilterError> {
        if text.is_empty() {
            self.regex = None;
            self.pattern.clear();
            self.status = FilterStatus::Valid;
            return Ok(());
        }

        match Regex::new(text) {
            Ok(regex) => {
                self.regex = Some(regex);
                self.pattern = text.to_string();
                self.status = FilterStatus::Valid;
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                tracing::debug!(input = text, %message, "malformed filter pattern");
                self.status = FilterStatus::Invalid {
                    input: text.to_string(),
                    message: message.clone(),
                };
                Err(FilterError::Malformed {
                    input: text.to_string(),
                    message,
                })
            }
        }
    }

    /// Pattern currently in effect (empty if none).
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    #[must_use]
    pub const fn status(&self) -> &FilterStatus {
        &self.status
    }

    pub fn set_inverse(&mut self, inverse: bool) {
        self.inverse = inverse;
    }

    #[must_use]
    pub const fn inverse(&self) -> bool {
        self.inverse
    }

    pub fn set_hide_reads(&mut self, hide_reads: bool) {
        self.hide_reads = hide_reads;
    }

    #[must_use]
    pub const fn hide_reads(&self) -> bool {
        self.hide_reads
    }

    /// Whether `event` should be shown. `parser` renders the data column.
    #[must_use]
    pub fn accepts(&self, event: &BufferAccessEvent, parser: Parser) -> bool {
        if self.hide_reads && event.kind() == AccessKind::Read {
            return false;
        }
        let Some(regex) = &self.regex else {
            return true;
        };

        let matched = regex.is_match(&event.source().to_string())
            || regex.is_match(event.kind().as_str())
            || regex.is_match(&parser.decode(event).text())
            || event.context().is_some_and(|c| regex.is_match(c));
        matched != self.inverse
    }
}
