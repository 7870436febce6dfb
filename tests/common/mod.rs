//! Common test utilities for meeting-sync integration tests

#[allow(dead_code)]
pub mod assertions;
#[allow(dead_code)]
pub mod transport;

#[allow(unused_imports)]
pub use assertions::*;
pub use transport::*;
