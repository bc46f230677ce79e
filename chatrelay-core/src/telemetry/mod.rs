//! Tracing field keys shared by the relay span and its tests.

pub mod keys;
#[cfg(test)]
pub mod test_span;

pub use keys::*;
