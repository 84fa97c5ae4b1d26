//! End-to-End Tests for Photo Relay
//!
//! - `common`: test environment (relay server + mock media store)
//! - `upload_flow`: happy path
//! - `error_scenarios`: validation, store failures, routing, timeouts

pub mod common;
pub mod error_scenarios;
pub mod upload_flow;
