//! Deterministic, pure logic shared by the task engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod budget;
pub mod cost;
pub mod protocol;
pub mod tokens;
pub mod types;
