//! Shared test utilities for semsync integration tests.
//!
//! This module provides:
//! - `MockProvider`, a scripted embedding backend
//! - `StaticCatalog`, an in-memory source of tables
//! - `TestHarness`, an orchestrator wired to both over an in-memory database

pub mod harness;
pub mod mocks;

pub use harness::TestHarness;
pub use mocks::{MockProvider, StaticCatalog};
