//! Buffer access events and byte diffs.
//!
//! A [`BufferAccessEvent`] is created by a monitor callback and never mutated
//! afterwards. It carries the bytes observed at the watched range and a
//! [`DiffBitmap`] marking which of them changed since the previous observation.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::memory::{AccessKind, MemoryLayout, SimTime, TargetId};

/// Per-byte change marks. `true` means the byte at that position changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiffBitmap(Vec<bool>);

impl DiffBitmap {
    /// A bitmap of `len` set bits.
    #[must_use]
    pub fn all_changed(len: usize) -> Self {
        Self(vec![true; len])
    }

    /// Number of positions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the bitmap has no positions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Change mark at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<bool> {
        self.0.get(index).copied()
    }

    /// Iterates over the change marks.
    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        self.0.iter().copied()
    }

    /// The marks as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[bool] {
        &self.0
    }

    /// Number of changed positions.
    #[must_use]
    pub fn changed_count(&self) -> usize {
        self.0.iter().filter(|b| **b).count()
    }

    /// True if any position changed.
    #[must_use]
    pub fn any_changed(&self) -> bool {
        self.0.iter().any(|b| *b)
    }
}

impl From<Vec<bool>> for DiffBitmap {
    fn from(bits: Vec<bool>) -> Self {
        Self(bits)
    }
}

/// Computes the diff between two observations of the same segment.
///
/// With no previous observation every byte counts as changed. A previous
/// observation of a different length is treated as absent.
#[must_use]
pub fn compute_diff(previous: Option<&[u8]>, current: &[u8]) -> DiffBitmap {
    match previous {
        Some(prev) if prev.len() == current.len() => {
            DiffBitmap(prev.iter().zip(current).map(|(p, n)| p != n).collect())
        }
        _ => DiffBitmap::all_changed(current.len()),
    }
}

/// One observed access to a watched buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferAccessEvent {
    time: SimTime,
    source: TargetId,
    address: u64,
    payload: Vec<u8>,
    diff: DiffBitmap,
    kind: AccessKind,
    context: Option<String>,
    stack_trace: Option<String>,
    layout: MemoryLayout,
}

impl BufferAccessEvent {
    /// Builds an event from the previous and current snapshot of a segment.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        time: SimTime,
        source: TargetId,
        address: u64,
        kind: AccessKind,
        previous: Option<&[u8]>,
        payload: Vec<u8>,
        context: Option<String>,
        stack_trace: Option<String>,
        layout: MemoryLayout,
    ) -> Self {
        let diff = compute_diff(previous, &payload);
        Self {
            time,
            source,
            address,
            payload,
            diff,
            kind,
            context,
            stack_trace,
            layout,
        }
    }

    /// Simulation time of the access.
    #[must_use]
    pub const fn time(&self) -> SimTime {
        self.time
    }

    /// Target the access was observed on.
    #[must_use]
    pub const fn source(&self) -> TargetId {
        self.source
    }

    /// Start address of the watched segment.
    #[must_use]
    pub const fn address(&self) -> u64 {
        self.address
    }

    /// Bytes observed at the segment.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Change marks, one per payload byte.
    #[must_use]
    pub const fn diff(&self) -> &DiffBitmap {
        &self.diff
    }

    /// Access kind.
    #[must_use]
    pub const fn kind(&self) -> AccessKind {
        self.kind
    }

    /// Execution context at the time of the access.
    #[must_use]
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Stack trace, when captured.
    #[must_use]
    pub fn stack_trace(&self) -> Option<&str> {
        self.stack_trace.as_deref()
    }

    /// Layout of the source target, used to decode the payload.
    #[must_use]
    pub const fn layout(&self) -> MemoryLayout {
        self.layout
    }

    /// `address:hexbytes`, e.g. `0000000000002000:01000000`.
    #[must_use]
    pub fn as_hex(&self) -> String {
        let mut out = String::with_capacity(17 + self.payload.len() * 2);
        let _ = write!(out, "{:016x}:", self.address);
        for b in &self.payload {
            let _ = write!(out, "{b:02x}");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(previous: Option<&[u8]>, payload: &[u8]) -> BufferAccessEvent {
        BufferAccessEvent::new(
            SimTime(0),
            TargetId(1),
            0x2000,
            AccessKind::Write,
            previous,
            payload.to_vec(),
            None,
            None,
            MemoryLayout::MSP430,
        )
    }

    #[test]
    fn diff_without_previous_is_all_changed() {
        let diff = compute_diff(None, &[0, 0, 0, 0]);
        assert_eq!(diff.as_slice(), &[true, true, true, true]);
    }

    #[test]
    fn diff_marks_unequal_bytes() {
        let diff = compute_diff(Some(&[0, 1, 2, 3][..]), &[0, 9, 2, 8]);
        assert_eq!(diff.as_slice(), &[false, true, false, true]);
        assert_eq!(diff.changed_count(), 2);
        assert!(diff.any_changed());
    }

    #[test]
    fn diff_matches_elementwise_inequality() {
        let prev: Vec<u8> = (0..=255).collect();
        let next: Vec<u8> = prev.iter().map(|b| if b % 3 == 0 { b.wrapping_add(1) } else { *b }).collect();
        let diff = compute_diff(Some(prev.as_slice()), &next);
        assert_eq!(diff.len(), next.len());
        for i in 0..next.len() {
            assert_eq!(diff.get(i), Some(prev[i] != next[i]));
        }
    }

    #[test]
    fn diff_with_length_mismatch_is_all_changed() {
        let diff = compute_diff(Some(&[1, 2][..]), &[1, 2, 3]);
        assert_eq!(diff.changed_count(), 3);
    }

    #[test]
    fn empty_payload_has_empty_diff() {
        let ev = event(None, &[]);
        assert!(ev.diff().is_empty());
        assert!(!ev.diff().any_changed());
    }

    #[test]
    fn event_diff_length_matches_payload() {
        let ev = event(Some(&[1, 0, 0, 0][..]), &[1, 0, 0, 5]);
        assert_eq!(ev.diff().len(), ev.payload().len());
        assert_eq!(ev.diff().as_slice(), &[false, false, false, true]);
    }

    #[test]
    fn as_hex_renders_address_and_bytes() {
        let ev = event(None, &[0x01, 0xab]);
        assert_eq!(ev.as_hex(), "0000000000002000:01ab");
    }
}
