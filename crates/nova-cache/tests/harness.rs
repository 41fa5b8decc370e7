//! Integration test harness for `nova-cache`.
//!
//! Add new integration tests under `tests/suite/` and register them from
//! `tests/suite/mod.rs` so they build into this single test binary.

mod suite;
