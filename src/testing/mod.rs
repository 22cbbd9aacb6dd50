//! Testing infrastructure for mender.
//!
//! This module provides traits, mocks, fixtures, and assertions for testing
//! the repair loop and its components without real external dependencies.
//!
//! # Architecture
//!
//! The testing infrastructure is organized into:
//! - **Traits**: Abstractions for side effects (target execution, file system)
//! - **Mocks**: Test doubles for those traits and for the oracle
//! - **Fixtures**: Temporary target directories (test-only)
//! - **Assertions**: Execution log invariants
//!
//! # Example
//!
//! ```rust,ignore
//! use mender::testing::{MockExecutor, MockFileSystem, MockOracle};
//!
//! let executor = MockExecutor::always_succeeding();
//! let fs = MockFileSystem::new().with_file("script.py", "print('hi')");
//! let oracle = MockOracle::new().with_response("[]");
//! ```

pub mod assertions;
#[cfg(test)]
pub mod fixtures;
pub mod mocks;
pub mod traits;

// Re-export commonly used types
pub use assertions::*;
#[cfg(test)]
pub use fixtures::*;
pub use mocks::*;
pub use traits::*;
