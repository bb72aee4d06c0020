//! Deterministic, pure logic shared by the lifecycle engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! values and return deterministic outputs suitable for tests.

pub mod approval;
pub mod failure;
pub mod naming;
pub mod types;
