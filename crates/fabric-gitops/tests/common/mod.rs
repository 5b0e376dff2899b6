//! Shared test utilities for fabric-gitops integration tests.
//!
//! This module provides:
//! - `TestHarness` with an isolated workspace, an in-memory record store and
//!   one repository-bound fabric
//! - `FakeGitProvider`, an in-memory repository with commits, blob SHAs and
//!   optimistic concurrency
//! - Manifest builders

pub mod builders;
pub mod fake_git;
pub mod harness;

pub use builders::*;
pub use fake_git::FakeGitProvider;
pub use harness::TestHarness;
