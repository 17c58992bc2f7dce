//! Target memory abstractions.
//!
//! The core never emulates memory itself. It observes an externally supplied
//! [`MemoryInterface`] that can read byte ranges, resolve symbols, and call back
//! when a watched range is accessed. A [`Target`] bundles a memory interface with
//! its identity, a simulation clock, and optional execution context.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// In-process reference memory and target.
pub mod simulated;

pub use simulated::{SimulatedMemory, SimulatedTarget};

/// Identifier of a watched target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(pub u32);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID:{}", self.0)
    }
}

/// Kind of memory access reported by the memory interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessKind {
    Read,
    Write,
}

impl AccessKind {
    /// Upper-case label used in logs and filters.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "READ",
            Self::Write => "WRITE",
        }
    }
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Byte order of the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endianness {
    Little,
    Big,
}

/// Memory layout of a target: pointer width, native int width, byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryLayout {
    /// Pointer width in bytes.
    pub pointer_size: usize,
    /// Native `int` width in bytes.
    pub int_size: usize,
    /// Byte order.
    pub endianness: Endianness,
}

impl MemoryLayout {
    /// 16-bit little-endian layout (MSP430 class targets).
    pub const MSP430: Self = Self {
        pointer_size: 2,
        int_size: 2,
        endianness: Endianness::Little,
    };

    /// 32-bit little-endian layout (ARM Cortex-M class targets).
    pub const ARM32: Self = Self {
        pointer_size: 4,
        int_size: 4,
        endianness: Endianness::Little,
    };

    /// Decodes an unsigned value of `bytes.len()` bytes (1 to 8).
    fn decode_unsigned(&self, bytes: &[u8]) -> Option<u64> {
        let n = bytes.len();
        if n == 0 || n > 8 {
            return None;
        }
        let mut buf = [0u8; 8];
        let value = match self.endianness {
            Endianness::Little => {
                buf[..n].copy_from_slice(bytes);
                u64::from_le_bytes(buf)
            }
            Endianness::Big => {
                buf[8 - n..].copy_from_slice(bytes);
                u64::from_be_bytes(buf)
            }
        };
        Some(value)
    }

    /// Decodes a pointer cell into an address.
    ///
    /// Returns `None` unless `bytes` is exactly `pointer_size` long.
    #[must_use]
    pub fn decode_address(&self, bytes: &[u8]) -> Option<u64> {
        if bytes.len() != self.pointer_size {
            return None;
        }
        self.decode_unsigned(bytes)
    }

    /// Decodes a signed integer of `bytes.len()` bytes (1 to 8), sign-extended.
    #[must_use]
    pub fn decode_int(&self, bytes: &[u8]) -> Option<i64> {
        let raw = self.decode_unsigned(bytes)?;
        let bits = bytes.len() * 8;
        if bits == 64 {
            #[allow(clippy::cast_possible_wrap)]
            return Some(raw as i64);
        }
        let shift = 64 - bits;
        #[allow(clippy::cast_possible_wrap)]
        Some(((raw << shift) as i64) >> shift)
    }

    /// Encodes an address into a pointer cell of `pointer_size` bytes.
    ///
    /// High bytes that do not fit the pointer width are discarded.
    #[must_use]
    pub fn encode_address(&self, address: u64) -> Vec<u8> {
        let n = self.pointer_size.min(8);
        match self.endianness {
            Endianness::Little => address.to_le_bytes()[..n].to_vec(),
            Endianness::Big => address.to_be_bytes()[8 - n..].to_vec(),
        }
    }
}

/// Simulation time in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimTime(pub u64);

impl SimTime {
    /// Microseconds per millisecond.
    pub const MILLISECOND: u64 = 1_000;
    /// Microseconds per second.
    pub const SECOND: u64 = 1_000 * Self::MILLISECOND;
    /// Microseconds per minute.
    pub const MINUTE: u64 = 60 * Self::SECOND;
    /// Microseconds per hour.
    pub const HOUR: u64 = 60 * Self::MINUTE;

    /// Time in whole milliseconds.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0 / Self::MILLISECOND
    }

    /// Clock-style rendering: `H:MM:SS.mmm` with hours, `MM:SS.mmm` without.
    #[must_use]
    pub fn format_clock(self, with_hours: bool) -> String {
        let t = self.0;
        let h = t / Self::HOUR;
        let m = (t % Self::HOUR) / Self::MINUTE;
        let s = (t % Self::MINUTE) / Self::SECOND;
        let ms = (t % Self::SECOND) / Self::MILLISECOND;
        if with_hours {
            format!("{h}:{m:02}:{s:02}.{ms:03}")
        } else {
            format!("{m:02}:{s:02}.{ms:03}")
        }
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_millis())
    }
}

/// Callback invoked by the memory interface when a watched range is accessed.
///
/// Arguments are the access kind and the accessed address. Identity (for
/// removal) is the `Arc` allocation, compared with [`Arc::ptr_eq`].
pub type WatchCallback = Arc<dyn Fn(AccessKind, u64) + Send + Sync>;

/// Byte-addressable target memory with watch registration.
///
/// Implementations must not hold internal locks while invoking callbacks: a
/// pointer monitor's callback reads memory and registers new watches.
pub trait MemoryInterface: Send + Sync {
    /// Registers `callback` for accesses to `[address, address + size)`.
    ///
    /// Returns false if the watch was refused.
    fn add_segment_monitor(&self, address: u64, size: usize, callback: WatchCallback) -> bool;

    /// Removes a watch previously added with the same range and callback.
    fn remove_segment_monitor(&self, address: u64, size: usize, callback: &WatchCallback);

    /// Reads `size` bytes at `address`, or `None` if the range is not readable.
    fn get_memory_segment(&self, address: u64, size: usize) -> Option<Vec<u8>>;

    /// Memory layout of the target.
    fn layout(&self) -> MemoryLayout;

    /// Resolves a symbol name to its address.
    fn symbol_address(&self, name: &str) -> Option<u64>;
}

/// A watched target: identity, memory, clock, and execution context.
pub trait Target: Send + Sync {
    /// Target identifier, used as the event source id.
    fn id(&self) -> TargetId;

    /// The target's memory interface.
    fn memory(&self) -> &dyn MemoryInterface;

    /// Current simulation time. Must be monotonically non-decreasing.
    fn now(&self) -> SimTime;

    /// Opaque execution context (e.g. program counter and function name)
    /// used to annotate events.
    fn execution_context(&self) -> Option<String> {
        None
    }

    /// Current stack trace, captured only when enabled in the configuration.
    fn stack_trace(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_address_respects_endianness_and_width() {
        assert_eq!(MemoryLayout::MSP430.decode_address(&[0x00, 0x30]), Some(0x3000));
        let be = MemoryLayout {
            endianness: Endianness::Big,
            ..MemoryLayout::MSP430
        };
        assert_eq!(be.decode_address(&[0x30, 0x00]), Some(0x3000));
        assert_eq!(MemoryLayout::MSP430.decode_address(&[0x00, 0x30, 0x00]), None);
        assert_eq!(
            MemoryLayout::ARM32.decode_address(&[0x78, 0x56, 0x34, 0x12]),
            Some(0x1234_5678)
        );
    }

    #[test]
    fn decode_int_sign_extends() {
        assert_eq!(MemoryLayout::MSP430.decode_int(&[0xff, 0xff]), Some(-1));
        assert_eq!(MemoryLayout::MSP430.decode_int(&[0x01, 0x00]), Some(1));
        assert_eq!(MemoryLayout::ARM32.decode_int(&[0x00, 0x00, 0x00, 0x80]), Some(i64::from(i32::MIN)));
        assert_eq!(MemoryLayout::ARM32.decode_int(&[]), None);
    }

    #[test]
    fn encode_address_matches_decode() {
        let layout = MemoryLayout::MSP430;
        let cell = layout.encode_address(0x4000);
        assert_eq!(cell, vec![0x00, 0x40]);
        assert_eq!(layout.decode_address(&cell), Some(0x4000));
    }

    #[test]
    fn sim_time_formats() {
        let t = SimTime(SimTime::HOUR + 2 * SimTime::MINUTE + 3 * SimTime::SECOND + 4 * SimTime::MILLISECOND);
        assert_eq!(t.format_clock(true), "1:02:03.004");
        assert_eq!(t.format_clock(false), "02:03.004");
        assert_eq!(SimTime(2_500).as_millis(), 2);
        assert_eq!(SimTime(2_500).to_string(), "2");
    }

    #[test]
    fn labels() {
        assert_eq!(AccessKind::Read.to_string(), "READ");
        assert_eq!(AccessKind::Write.to_string(), "WRITE");
        assert_eq!(TargetId(7).to_string(), "ID:7");
    }
}
