//! Crate-level tests
//!
//! - `common`: scripted generation services and fixed-score strategies
//! - `property`: proptest invariants of scoring, hashing and the retry loop
//! - `integration`: full orchestrator runs against scripted services

mod common;
mod integration;
mod property;
