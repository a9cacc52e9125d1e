//! # splice-flow
//!
//! Feature integration orchestration for the Splice toolkit.
//!
//! This crate implements the integration domain, providing:
//!
//! - **Strategy Selection**: Validated apply strategies (direct, gradual
//!   behind feature flags, parallel over disjoint file groups)
//! - **Integration Execution**: A seven-phase job pipeline with progress
//!   tracking and a structured log trail
//! - **Rollback**: Deterministic plan derivation in reverse application
//!   order, stateful execution, automatic triggers, and recovery
//! - **Monitoring**: Bounded-window performance sampling feeding trigger
//!   evaluation
//!
//! ## Core Concepts
//!
//! - **Feature**: An analyzed, prioritized unit of work handed in by the
//!   upstream pipeline
//! - **Job**: One attempt to integrate a feature under a strategy, with a
//!   validated state machine and an append-only change ledger
//! - **Plan**: A deterministic rollback specification, one reversing step
//!   per forward change, last change undone first
//!
//! ## Guarantees
//!
//! - **Reversible**: Every applied change carries its inverse command
//! - **Ordered**: Rollback step order is the exact reverse of apply order
//! - **Bounded**: Automatic triggers respect cooldown and lifetime limits
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use splice_core::{LocalFiles, ProcessRunner};
//! use splice_flow::error::Result;
//! use splice_flow::feature::{Complexity, FeatureFile, PrioritizedFeature};
//! use splice_flow::service::IntegrationService;
//! use splice_flow::store::InMemoryStore;
//! use splice_flow::strategy::IntegrationStrategy;
//!
//! # async fn example() -> Result<()> {
//! let service = IntegrationService::new(
//!     Arc::new(ProcessRunner::new()),
//!     Arc::new(LocalFiles::new("/srv/app")),
//!     Arc::new(InMemoryStore::new()),
//! );
//!
//! let feature = PrioritizedFeature::new(
//!     "full-text search",
//!     vec![FeatureFile::added("src/search.ts", 200, Complexity::Medium)],
//! );
//!
//! let result = service
//!     .integrate(&feature, IntegrationStrategy::direct())
//!     .await?;
//! println!("integrated {} change(s)", result.changes.len());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod apply;
pub mod change;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod feature;
pub mod job;
pub mod monitor;
pub mod rollback;
pub mod service;
pub mod store;
pub mod strategy;
pub mod testing;
pub mod validate;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::apply::{ApplyContext, ApplyReport};
    pub use crate::change::{ChangeType, CodeChange};
    pub use crate::config::{merge_configurations, ConfigMerger, MergeStrategy};
    pub use crate::error::{Error, Result};
    pub use crate::events::{BroadcastSink, EventSink, InMemoryOutbox, LogEvent, LogLevel};
    pub use crate::executor::{IntegrationExecutor, PerformanceProbe};
    pub use crate::feature::{
        Complexity, FeatureCategory, FeatureFile, FeatureFlagConfig, FileGroup,
        PrioritizedFeature, RiskLevel,
    };
    pub use crate::job::{IntegrationJob, IntegrationResult, JobState, RollbackOutcome};
    pub use crate::monitor::{
        PerformanceAlert, PerformanceMonitor, PerformanceSample, SharedMonitor,
    };
    pub use crate::rollback::{
        ExecutionState, RollbackExecution, RollbackExecutor, RollbackPlan, RollbackPlanner,
        RollbackResult, RollbackTrigger, TriggerCondition, TriggerFired, TriggerMonitor,
        TriggerSeverity,
    };
    pub use crate::service::IntegrationService;
    pub use crate::store::{ExecutionFilter, InMemoryStore, JobFilter, Store};
    pub use crate::strategy::{
        ApplyApproach, IntegrationStrategy, RolloutStrategy, TestingApproach,
    };
    pub use crate::testing::{TestHarness, TestRunResult};
    pub use crate::validate::{PerformanceDelta, ValidationResult};
}
