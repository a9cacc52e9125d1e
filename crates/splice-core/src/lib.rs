//! # splice-core
//!
//! Core contracts for the Splice feature integration orchestrator.
//!
//! This crate provides the foundational types and capabilities shared across
//! Splice components:
//!
//! - **Identifiers**: Strongly-typed ULID identifiers for features, jobs,
//!   changes, plans, and rollback entities
//! - **Command Capability**: The external command-execution interface used
//!   for apply, test, and rollback commands
//! - **File Capability**: Scoped file/config read-write access used for
//!   backup and restore
//! - **Error Types**: Shared error definitions and result types
//!
//! ## Crate Boundary
//!
//! `splice-core` is the only crate allowed to define shared primitives.
//! The orchestration domain (`splice-flow`) consumes these contracts and
//! never reaches around them to the operating system directly.
//!
//! ## Example
//!
//! ```rust
//! use splice_core::prelude::*;
//!
//! let feature = FeatureId::generate();
//! let job = JobId::generate();
//! // IDs are distinct types; `let wrong: FeatureId = job;` will not compile.
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod command;
pub mod error;
pub mod fs;
pub mod id;

pub use command::{
    CommandOutput, CommandRunner, CommandSpec, FailingRunner, NoOpRunner, ProcessRunner,
    ScriptedRunner,
};
pub use error::{Error, Result};
pub use fs::{FileStore, LocalFiles, MemoryFiles};
pub use id::{ChangeId, ExecutionId, FeatureId, JobId, PlanId, StepId, TriggerId};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::command::{CommandOutput, CommandRunner, CommandSpec};
    pub use crate::error::{Error, Result};
    pub use crate::fs::FileStore;
    pub use crate::id::{ChangeId, ExecutionId, FeatureId, JobId, PlanId, StepId, TriggerId};
}
