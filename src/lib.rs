//! # bufwatch - Memory buffer watching for emulated targets
//!
//! bufwatch observes named memory buffers on simulated targets, records every
//! access as an event with a byte-level diff, and keeps a bounded, filterable,
//! decodable log of those events.
//!
//! ## Core Concepts
//!
//! - **Descriptor**: where to watch, by symbol, resolved per target
//! - **Monitor**: a watch registration turning memory callbacks into events
//! - **Aggregator**: batches events from monitor callbacks on a fixed tick
//! - **Log**: bounded event rows with change notifications
//! - **Filter / Parser**: consumer-side views over logged events
//!
//! ## Usage
//!
//! ```
//! use std::sync::Arc;
//!
//! use bufwatch::memory::{MemoryLayout, SimulatedMemory, SimulatedTarget};
//! use bufwatch::{BufferDescriptor, Parser, WatchConfig, WatchSession};
//!
//! let memory = SimulatedMemory::new(0x1000, 0x1000, MemoryLayout::MSP430).with_symbol("node_id", 0x1200);
//! let target = Arc::new(SimulatedTarget::new(1, Arc::new(memory)));
//!
//! let mut session = WatchSession::new(WatchConfig::default()).unwrap();
//! session.attach(&BufferDescriptor::node_id(), target.clone()).unwrap();
//!
//! target.simulated_memory().write(0x1200, &[7, 0]);
//! session.flush().unwrap();
//!
//! session.set_parser(Parser::IntegerArray);
//! assert_eq!(session.decode(0).unwrap().text(), "7");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Target model
pub mod error;
pub mod event;
pub mod memory;

// Watching
pub mod descriptor;
pub mod monitor;
pub mod registry;

// Collection and views
pub mod aggregator;
pub mod filter;
pub mod history;
pub mod log;
pub mod parser;
pub mod session;

// Re-export primary types at crate root for convenience
pub use aggregator::{AggregatorConfig, AggregatorSink, EventAggregator};
pub use descriptor::{BufferDescriptor, BufferSize, CustomBuffer, MAX_BUFFER_SIZE};
pub use error::{FilterError, RegistrationError, ValidationError, WatchError, WatchResult};
pub use event::{compute_diff, BufferAccessEvent, DiffBitmap};
pub use filter::{FilterEngine, FilterStatus};
pub use history::CommandHistory;
pub use log::{AppendOutcome, BoundedEventLog, LogChange};
pub use memory::{AccessKind, MemoryInterface, MemoryLayout, SimTime, Target, TargetId};
pub use monitor::{EventSink, Monitor, MonitorContext, PointerMonitor, SegmentMonitor};
pub use parser::{DecodedValue, Parser};
pub use registry::Registry;
pub use session::{AttachOutcome, AttachmentId, AttachmentInfo, WatchConfig, WatchSession};
