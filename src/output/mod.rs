//! Per-instance output capture

mod buffer;

pub use buffer::{DEFAULT_MAX_BYTES, FilterFn, OutputBuffer};
