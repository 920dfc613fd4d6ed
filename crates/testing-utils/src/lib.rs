//! # Chronoforge Testing Utils
//!
//! Shared testing utilities for the workspace: in-memory plugins, a manual
//! clock, task builders and async wait helpers.
//!
//! ```toml
//! [dev-dependencies]
//! chronoforge-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
