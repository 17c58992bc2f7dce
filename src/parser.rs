//! Payload decoders.
//!
//! A [`Parser`] turns an event's bytes and diff into a [`DecodedValue`]. Decoding
//! is pure and runs on the consumer side, never in monitor callbacks. How the
//! result is drawn is up to the presentation layer.

use std::fmt::Write as _;
use std::net::Ipv6Addr;

use serde::{Deserialize, Serialize};

use crate::event::BufferAccessEvent;

/// A decoded item and whether any of its bytes changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marked<T> {
    /// Decoded value.
    pub value: T,
    /// True if any byte behind the value differs from the previous snapshot.
    pub changed: bool,
}

/// Result of decoding one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "items", rename_all = "snake_case")]
pub enum DecodedValue {
    /// Raw bytes.
    Bytes(Vec<Marked<u8>>),
    /// Native-width signed integers.
    Integers(Vec<Marked<i64>>),
    /// Text with no change marks.
    Text(String),
    /// Per-byte levels for graphical display.
    Levels(Vec<Marked<u8>>),
}

impl DecodedValue {
    /// Plain-text form used for filtering and export.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::Bytes(bytes) => {
                let mut out = String::with_capacity(bytes.len() * 2 + bytes.len() / 4);
                for (i, b) in bytes.iter().enumerate() {
                    if i > 0 && i % 4 == 0 {
                        out.push(' ');
                    }
                    let _ = write!(out, "{:02x}", b.value);
                }
                out
            }
            Self::Integers(values) => join(values.iter().map(|v| v.value)),
            Self::Text(s) => s.clone(),
            Self::Levels(levels) => join(levels.iter().map(|v| v.value)),
        }
    }
}

fn join<T: std::fmt::Display>(items: impl Iterator<Item = T>) -> String {
    let mut out = String::new();
    for (i, item) in items.enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{item}");
    }
    out
}

fn printable(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .chars()
        .filter(|c| *c == ' ' || c.is_ascii_graphic())
        .collect()
}

/// Available decoders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parser {
    #[default]
    ByteArray,
    IntegerArray,
    TerminatedString,
    PrintableCharacters,
    Ipv6Address,
    Height4Bits,
    Grayscale,
}

impl Parser {
    /// Every parser, in menu order.
    pub const ALL: [Self; 7] = [
        Self::ByteArray,
        Self::IntegerArray,
        Self::TerminatedString,
        Self::PrintableCharacters,
        Self::Ipv6Address,
        Self::Height4Bits,
        Self::Grayscale,
    ];

    /// Stable registry key.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::ByteArray => "byte_array",
            Self::IntegerArray => "integer_array",
            Self::TerminatedString => "terminated_string",
            Self::PrintableCharacters => "printable_characters",
            Self::Ipv6Address => "ipv6_address",
            Self::Height4Bits => "height_4bits",
            Self::Grayscale => "grayscale",
        }
    }

    /// Human-readable name.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ByteArray => "Byte array",
            Self::IntegerArray => "Integer array",
            Self::TerminatedString => "Terminated string",
            Self::PrintableCharacters => "Printable characters",
            Self::Ipv6Address => "IPv6 address",
            Self::Height4Bits => "Graphical: Height",
            Self::Grayscale => "Graphical: Grayscale",
        }
    }

    /// True for parsers that draw levels instead of text.
    #[must_use]
    pub const fn is_graphical(self) -> bool {
        matches!(self, Self::Height4Bits | Self::Grayscale)
    }

    /// Decodes one event.
    #[must_use]
    pub fn decode(self, event: &BufferAccessEvent) -> DecodedValue {
        let payload = event.payload();
        let diff = event.diff();
        let changed = |i: usize| diff.get(i).unwrap_or(false);

        match self {
            Self::ByteArray => DecodedValue::Bytes(
                payload
                    .iter()
                    .enumerate()
                    .map(|(i, b)| Marked {
                        value: *b,
                        changed: changed(i),
                    })
                    .collect(),
            ),
            Self::IntegerArray => {
                let layout = event.layout();
                let width = layout.int_size.max(1);
                let values = payload
                    .chunks_exact(width)
                    .enumerate()
                    .filter_map(|(n, chunk)| {
                        let value = layout.decode_int(chunk)?;
                        let start = n * width;
                        Some(Marked {
                            value,
                            changed: (start..start + width).any(changed),
                        })
                    })
                    .collect();
                DecodedValue::Integers(values)
            }
            Self::TerminatedString => {
                let end = payload.iter().position(|b| *b == 0).unwrap_or(payload.len());
                DecodedValue::Text(printable(&payload[..end]))
            }
            Self::PrintableCharacters => DecodedValue::Text(printable(payload)),
            Self::Ipv6Address => {
                let Some(octets) = payload.get(..16).and_then(|s| <[u8; 16]>::try_from(s).ok()) else {
                    return DecodedValue::Text("[must monitor at least 16 bytes]".to_string());
                };
                DecodedValue::Text(Ipv6Addr::from(octets).to_string())
            }
            Self::Height4Bits => DecodedValue::Levels(
                payload
                    .iter()
                    .enumerate()
                    .map(|(i, b)| Marked {
                        value: (b / 16).min(15),
                        changed: changed(i),
                    })
                    .collect(),
            ),
            Self::Grayscale => DecodedValue::Levels(
                payload
                    .iter()
                    .enumerate()
                    .map(|(i, b)| Marked {
                        value: 255 - b,
                        changed: changed(i),
                    })
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{AccessKind, MemoryLayout, SimTime, TargetId};

    fn event_with(layout: MemoryLayout, previous: Option<&[u8]>, payload: &[u8]) -> BufferAccessEvent {
        BufferAccessEvent::new(
            SimTime(0),
            TargetId(1),
            0x2000,
            AccessKind::Write,
            previous,
            payload.to_vec(),
            None,
            None,
            layout,
        )
    }

    fn event(payload: &[u8]) -> BufferAccessEvent {
        event_with(MemoryLayout::MSP430, None, payload)
    }

    #[test]
    fn byte_array_groups_by_four() {
        let ev = event(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(Parser::ByteArray.decode(&ev).text(), "00112233 4455");
    }

    #[test]
    fn byte_array_carries_change_marks() {
        let ev = event_with(MemoryLayout::MSP430, Some(&[1, 2][..]), &[1, 3]);
        let DecodedValue::Bytes(bytes) = Parser::ByteArray.decode(&ev) else {
            panic!("expected bytes");
        };
        assert!(!bytes[0].changed);
        assert!(bytes[1].changed);
    }

    #[test]
    fn integer_array_uses_layout() {
        let ev = event_with(MemoryLayout::MSP430, Some(&[1, 0, 0, 0, 9][..]), &[1, 0, 0xff, 0xff, 9]);
        let DecodedValue::Integers(values) = Parser::IntegerArray.decode(&ev) else {
            panic!("expected integers");
        };
        assert_eq!(values.len(), 2);
        assert_eq!(values[0], Marked { value: 1, changed: false });
        assert_eq!(values[1], Marked { value: -1, changed: true });

        let ev = event_with(MemoryLayout::ARM32, None, &[0x10, 0x27, 0, 0]);
        assert_eq!(Parser::IntegerArray.decode(&ev).text(), "10000");
    }

    #[test]
    fn terminated_string_stops_at_nul() {
        let ev = event(b"hello\0world");
        assert_eq!(Parser::TerminatedString.decode(&ev).text(), "hello");
    }

    #[test]
    fn printable_characters_strip_control_bytes() {
        let ev = event(b"a\x01b\nc d");
        assert_eq!(Parser::PrintableCharacters.decode(&ev).text(), "abc d");
    }

    #[test]
    fn ipv6_needs_sixteen_bytes() {
        let ev = event(&[0u8; 8]);
        assert_eq!(Parser::Ipv6Address.decode(&ev).text(), "[must monitor at least 16 bytes]");

        let mut addr = [0u8; 18];
        addr[0] = 0xfe;
        addr[1] = 0x80;
        addr[15] = 0x01;
        let ev = event(&addr);
        assert_eq!(Parser::Ipv6Address.decode(&ev).text(), "fe80::1");
    }

    #[test]
    fn graphical_levels() {
        let ev = event(&[0x00, 0x7f, 0xff]);
        assert_eq!(Parser::Height4Bits.decode(&ev).text(), "0 7 15");
        assert_eq!(Parser::Grayscale.decode(&ev).text(), "255 128 0");
    }

    #[test]
    fn only_level_parsers_are_graphical() {
        let graphical: Vec<_> = Parser::ALL.iter().filter(|p| p.is_graphical()).collect();
        assert_eq!(graphical, vec![&Parser::Height4Bits, &Parser::Grayscale]);
    }

    #[test]
    fn keys_are_unique() {
        let mut keys: Vec<_> = Parser::ALL.iter().map(|p| p.key()).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), Parser::ALL.len());
    }
}
