//! The statmon agent: samples host statistics, signs them, and ships them to
//! the server in batches.
//!
//! Data moves through bounded channels:
//!
//! ```text
//! poller::Collector ─┬─ gauges ──► prepare worker ─┐
//!                    └─ counters ─► prepare worker ─┴─► merged ──► send ──► Transport
//! ```
//!
//! Every stage reports recoverable problems on one error channel
//! ([`error::ErrorSink`]) and is restarted by [`supervisor::supervise`] when
//! it faults.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod poller;
pub mod supervisor;
pub mod transport;
