//! Delay Monitor — live delay statistics over a multiplexed event stream.
//!
//! One websocket connection carries events for many sources. Each frame is
//! split per source, events are deduplicated by identity, the first few events
//! of every (source, category) pair are discarded as warm-up, and the delay
//! between an event's own timestamp and its receipt feeds per-source and
//! per-category statistics written to flat log files.
//!
//! Single task, all state in memory, fail-fast on transport or decode faults.

pub mod admission;
pub mod config;
pub mod connection;
pub mod demux;
pub mod engine;
pub mod error;
pub mod registry;
pub mod sink;
pub mod stats;
pub mod types;

pub use config::Config;
pub use connection::{FrameSource, WsConnection};
pub use engine::{Engine, FrameReport, SessionEnd};
pub use error::MonitorError;
pub use registry::SourceRegistry;
pub use types::Category;
