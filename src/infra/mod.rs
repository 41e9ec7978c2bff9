//! Infrastructure adapters and runtime bootstrap.

pub mod db;
pub mod error;
pub mod http;
pub mod memory;
pub mod metrics;
pub mod telemetry;
