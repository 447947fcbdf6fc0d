//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod checklist;
pub mod history;
pub mod invariants;
pub mod reflection;
pub mod selector;
pub mod types;
