//! Shared pieces used by every Rentwise binary.

pub mod logging;

pub use logging::{init_logging, LogFormat};
