//! Metrics endpoint.
//!
//! Counters are plain atomics updated on the connection and streaming paths;
//! the web server runs on its own task and only ever reads them.

pub mod metrics;
pub mod server;

pub use metrics::{Metrics, MetricsSnapshot};
