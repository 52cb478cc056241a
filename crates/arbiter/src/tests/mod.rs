//! Crate-level tests covering the lifecycle controller sequence.

mod support;
