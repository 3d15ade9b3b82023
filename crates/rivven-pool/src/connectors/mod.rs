//! Built-in sink implementations

pub mod stdout;

pub use stdout::{OutputFormat, StdoutSink, StdoutSinkConfig};
