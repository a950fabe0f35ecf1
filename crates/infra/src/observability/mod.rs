//! Logging and tracing

pub mod logging;

pub use logging::init_tracing;
