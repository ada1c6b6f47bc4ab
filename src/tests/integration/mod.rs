//! Integration tests
//!
//! Whole runs through the orchestrator with scripted services:
//! - retry loop, fallbacks and transport failures (`orchestrator_flow`)
//! - template promotion and drift across runs (`lifecycle_flow`)

mod lifecycle_flow;
mod orchestrator_flow;
