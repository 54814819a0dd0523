//! Core event-ingestion pipeline for a kernel-event capture and inspection tool.
//!
//! A driver (real kernel ring buffer, or a previously captured trace file) emits a
//! stream of per-cpu syscall/scheduling events. [`inspector::Inspector`] pulls events
//! from a [`source::Source`], reconstructs per-thread/per-fd state in
//! [`thread::ThreadTable`], applies an optional filter, optionally dumps to a rotating
//! trace file, and returns the enriched event to the caller.
//!
//! The scriptable extension subsystem, the filter-expression compiler, the output
//! formatter, and the analyzer are external collaborators: this crate only defines the
//! trait seams they plug into (see [`collab`]).

#[macro_use]
extern crate lazy_static;

#[macro_use]
pub mod log;

pub mod collab;
pub mod config;
pub mod cycle_writer;
pub mod decoder;
pub mod dumper;
pub mod error;
pub mod event;
pub mod fd;
pub mod iface;
pub mod inspector;
pub mod machine;
pub mod parser;
pub mod snapshot;
pub mod source;
pub mod stats;
pub mod thread;
pub mod userdb;

pub use error::{Error, Result};
pub use event::{CpuEvent, Event, EventParams, EventType, Phase};
pub use inspector::Inspector;
pub use source::{FileSource, PullResult, Source};
