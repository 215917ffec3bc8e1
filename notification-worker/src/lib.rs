#![deny(clippy::all, clippy::pedantic, clippy::nursery, dead_code)]

pub mod log_format;
pub mod processor;
pub mod telemetry;
pub mod types;
