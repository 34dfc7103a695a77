//! Multi-instance logging with JSONL storage.
//!
//! Several peers (tabs, CLI demo participants) can log at once without
//! stepping on each other: each instance appends to its own file, and the
//! files are merged into one timeline on demand.
//!
//! ## Layout
//!
//! ```text
//! logs/
//! └── raw/                         # one file per instance per day
//!     ├── 2026-10-14_alice.jsonl
//!     └── 2026-10-14_bob.jsonl
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use webtalk_core::logging::LoggingBuilder;
//!
//! LoggingBuilder::new("webtalk_core=debug")
//!     .with_jsonl("./logs", "alice")
//!     .init()?;
//! ```
//!
//! Entries logged inside a room task carry `room` and `peer`, so
//!
//! ```bash
//! jq 'select(.room == "6578616d706c652e636f6d")' logs/raw/*.jsonl
//! ```
//!
//! gives one room's traffic across every instance.

pub mod entry;
pub mod layer;
pub mod timeline;
pub mod writer;

pub use entry::JsonLogEntry;
pub use layer::{JsonlLayer, LoggingBuilder};
pub use timeline::{generate_timeline, render_timeline, LogStats, TimelineOptions};
pub use writer::{read_all_entries, InstanceLogWriter};
