//! Deterministic, pure logic shared by both drivers.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod gate;
pub mod plan;
pub mod record;
pub mod signal;
pub mod types;
