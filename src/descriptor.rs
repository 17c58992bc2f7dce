//! Buffer descriptors: where to watch.
//!
//! A [`BufferDescriptor`] names a buffer by symbol and resolves it against each
//! target's symbol table. A descriptor whose symbol is missing on a target is
//! simply inactive there.
//!
//! ```
//! use bufwatch::descriptor::{BufferDescriptor, CustomBuffer};
//!
//! let custom = CustomBuffer::new("rx_buf", 64, 4).unwrap();
//! let descriptor = BufferDescriptor::CustomSegment(custom);
//! assert_eq!(descriptor.to_string(), "Symbol &rx_buf[4] (64)");
//!
//! assert!(CustomBuffer::new("rx_buf", 0, 0).is_err());
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ValidationError, WatchResult};
use crate::memory::{MemoryInterface, Target};
use crate::monitor::{Monitor, MonitorContext, PointerMonitor, SegmentMonitor};

/// Largest watchable buffer, in bytes.
pub const MAX_BUFFER_SIZE: usize = 16 * 1024;

fn check_size(size: usize) -> Result<(), ValidationError> {
    if size == 0 || size > MAX_BUFFER_SIZE {
        return Err(ValidationError::BufferSizeOutOfRange {
            size,
            max: MAX_BUFFER_SIZE,
        });
    }
    Ok(())
}

fn check_symbol(symbol: &str) -> Result<(), ValidationError> {
    if symbol.trim().is_empty() {
        return Err(ValidationError::EmptySymbol);
    }
    Ok(())
}

/// Size of a fixed buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferSize {
    /// A fixed number of bytes.
    Bytes(usize),
    /// The target's native `int` width.
    NativeInt,
}

impl BufferSize {
    /// Concrete size for a target.
    #[must_use]
    pub fn resolve(self, memory: &dyn MemoryInterface) -> usize {
        match self {
            Self::Bytes(n) => n,
            Self::NativeInt => memory.layout().int_size,
        }
    }
}

impl fmt::Display for BufferSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(n) => write!(f, "{n}"),
            Self::NativeInt => f.write_str("int"),
        }
    }
}

#[derive(Deserialize)]
struct CustomBufferFields {
    variable: String,
    size: usize,
    #[serde(default)]
    offset: u64,
}

/// User-configured buffer: symbol, byte size, and offset.
///
/// Construction validates the input, so an existing `CustomBuffer` is always
/// within `[1, MAX_BUFFER_SIZE]` bytes and names a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "CustomBufferFields")]
pub struct CustomBuffer {
    variable: String,
    size: usize,
    offset: u64,
}

impl TryFrom<CustomBufferFields> for CustomBuffer {
    type Error = ValidationError;

    fn try_from(fields: CustomBufferFields) -> Result<Self, Self::Error> {
        Self::new(fields.variable, fields.size, fields.offset)
    }
}

impl CustomBuffer {
    /// # Errors
    ///
    /// Returns `ValidationError` if the variable is empty or the size is out of
    /// range.
    pub fn new(variable: impl Into<String>, size: usize, offset: u64) -> Result<Self, ValidationError> {
        let variable = variable.into().trim().to_string();
        check_symbol(&variable)?;
        check_size(size)?;
        Ok(Self {
            variable,
            size,
            offset,
        })
    }

    /// Parses textual input, e.g. from a configuration dialog.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidNumber` for unparsable numbers and the
    /// errors of [`CustomBuffer::new`].
    pub fn parse(variable: &str, size: &str, offset: &str) -> Result<Self, ValidationError> {
        let parsed_size = size.trim().parse::<usize>().map_err(|_| ValidationError::InvalidNumber {
            field: "size",
            input: size.to_string(),
        })?;
        let parsed_offset = if offset.trim().is_empty() {
            0
        } else {
            offset.trim().parse::<u64>().map_err(|_| ValidationError::InvalidNumber {
                field: "offset",
                input: offset.to_string(),
            })?
        };
        Self::new(variable, parsed_size, parsed_offset)
    }

    #[must_use]
    pub fn variable(&self) -> &str {
        &self.variable
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }
}

/// Where to watch, resolved per target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BufferDescriptor {
    /// A well-known symbol, plus an optional offset.
    FixedSegment {
        symbol: String,
        #[serde(default)]
        offset: u64,
        size: BufferSize,
    },

    /// The memory a well-known pointer symbol points to.
    FixedPointer {
        symbol: String,
        size: BufferSize,
    },

    /// A user-configured symbol.
    CustomSegment(CustomBuffer),

    /// The memory a user-configured pointer symbol points to.
    CustomPointer(CustomBuffer),
}

impl BufferDescriptor {
    /// `packetbuf_aligned`, 128 bytes.
    #[must_use]
    pub fn packetbuf() -> Self {
        Self::FixedSegment {
            symbol: "packetbuf_aligned".to_string(),
            offset: 0,
            size: BufferSize::Bytes(128),
        }
    }

    /// `*packetbufptr`, 128 bytes.
    #[must_use]
    pub fn packetbuf_pointer() -> Self {
        Self::FixedPointer {
            symbol: "packetbufptr".to_string(),
            size: BufferSize::Bytes(128),
        }
    }

    /// `node_id`, native int.
    #[must_use]
    pub fn node_id() -> Self {
        Self::integer("node_id")
    }

    /// Queue buffer 0 RAM (`buframmem`), 128 bytes.
    #[must_use]
    pub fn queuebuf0() -> Self {
        Self::FixedSegment {
            symbol: "buframmem".to_string(),
            offset: 0,
            size: BufferSize::Bytes(128),
        }
    }

    /// A native int variable.
    #[must_use]
    pub fn integer(variable: impl Into<String>) -> Self {
        Self::FixedSegment {
            symbol: variable.into(),
            offset: 0,
            size: BufferSize::NativeInt,
        }
    }

    /// Symbol the descriptor resolves.
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::FixedSegment { symbol, .. } | Self::FixedPointer { symbol, .. } => symbol,
            Self::CustomSegment(c) | Self::CustomPointer(c) => c.variable(),
        }
    }

    /// True for pointer-following variants.
    #[must_use]
    pub const fn is_pointer(&self) -> bool {
        matches!(self, Self::FixedPointer { .. } | Self::CustomPointer(_))
    }

    const fn offset(&self) -> u64 {
        match self {
            Self::FixedSegment { offset, .. } => *offset,
            Self::FixedPointer { .. } => 0,
            Self::CustomSegment(c) | Self::CustomPointer(c) => c.offset(),
        }
    }

    fn size_spec(&self) -> BufferSize {
        match self {
            Self::FixedSegment { size, .. } | Self::FixedPointer { size, .. } => *size,
            Self::CustomSegment(c) | Self::CustomPointer(c) => BufferSize::Bytes(c.size()),
        }
    }

    /// Checks the descriptor before any monitor is created.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` for an empty symbol or an out-of-range size.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_symbol(self.symbol())?;
        if let BufferSize::Bytes(n) = self.size_spec() {
            check_size(n)?;
        }
        Ok(())
    }

    /// Address of the pointer cell, for pointer variants.
    #[must_use]
    pub fn pointer_address(&self, target: &dyn Target) -> Option<u64> {
        if !self.is_pointer() {
            return None;
        }
        target.memory().symbol_address(self.symbol())
    }

    /// Address of the buffer on `target`, or `None` if unavailable.
    ///
    /// Pointer variants dereference the pointer cell and add the offset to
    /// the decoded value. Their monitor watches the decoded value itself.
    #[must_use]
    pub fn resolve_address(&self, target: &dyn Target) -> Option<u64> {
        let memory = target.memory();
        let symbol_address = memory.symbol_address(self.symbol())?;
        let base = if self.is_pointer() {
            let layout = memory.layout();
            let cell = memory.get_memory_segment(symbol_address, layout.pointer_size)?;
            layout.decode_address(&cell)?
        } else {
            symbol_address
        };
        base.checked_add(self.offset())
    }

    /// Size of the watched data on `target`, or `None` if unavailable.
    #[must_use]
    pub fn resolve_size(&self, target: &dyn Target) -> Option<usize> {
        let memory = target.memory();
        memory.symbol_address(self.symbol())?;
        Some(self.size_spec().resolve(memory))
    }

    /// Creates the monitor for the context's target.
    ///
    /// Returns `Ok(None)` when the symbol is absent on that target.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an invalid descriptor and a registration
    /// error when the memory interface refuses the watch.
    pub fn create_monitor(&self, ctx: &MonitorContext) -> WatchResult<Option<Monitor>> {
        self.validate()?;
        let target: &dyn Target = &**ctx.target();
        let Some(size) = self.resolve_size(target) else {
            return Ok(None);
        };

        if self.is_pointer() {
            let Some(cell) = self.pointer_address(target) else {
                return Ok(None);
            };
            let monitor = PointerMonitor::create(ctx.clone(), cell, size)?;
            return Ok(Some(Monitor::Pointer(monitor)));
        }

        let Some(address) = self.resolve_address(target) else {
            return Ok(None);
        };
        let monitor = SegmentMonitor::create(ctx.clone(), address, size)?;
        Ok(Some(Monitor::Segment(monitor)))
    }

    /// Stable identity of this descriptor, used to deduplicate attachments.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_else(|_| format!("{self:?}").into_bytes());
        blake3::hash(&canonical).to_hex().to_string()
    }
}

impl fmt::Display for BufferDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FixedSegment { symbol, offset, size } if *offset > 0 => {
                write!(f, "{symbol}[{offset}] ({size})")
            }
            Self::FixedSegment { symbol, size, .. } => write!(f, "{symbol} ({size})"),
            Self::FixedPointer { symbol, size } => write!(f, "*{symbol} ({size})"),
            Self::CustomSegment(c) if c.offset() > 0 => {
                write!(f, "Symbol &{}[{}] ({})", c.variable(), c.offset(), c.size())
            }
            Self::CustomSegment(c) => write!(f, "Symbol {} ({})", c.variable(), c.size()),
            Self::CustomPointer(c) if c.offset() > 0 => {
                write!(f, "Pointer *{}[{}] ({})", c.variable(), c.offset(), c.size())
            }
            Self::CustomPointer(c) => write!(f, "Pointer *{} ({})", c.variable(), c.size()),
        }
    }
}
