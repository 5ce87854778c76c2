//! Test utilities and fixtures for modhost
//!
//! Shared by the integration tests of the workspace crates.

pub mod fixtures;
pub mod host;
pub mod mocks;
