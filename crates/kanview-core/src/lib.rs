//! kanview-core: the board state engine.
//!
//! Builds kanban board snapshots from issue lists, versions them, serves
//! per-user views and the changes between versions, and lets only one
//! rebuild per board run at a time.
//!
//! # Conventions
//!
//! - **Errors**: engine operations return [`BoardError`]; file loading uses `anyhow::Result`.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `debug!`).

pub mod changes;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod registry;
pub mod snapshot;
pub mod source;
pub mod view;

pub use changes::log::ChangeLog;
pub use changes::{AddedIssue, ChangeRecord, IssueField, RemovedIssue, UpdatedIssue};
pub use config::{EngineConfig, load_engine_config};
pub use engine::{BoardEngine, BoardPhase, BoardStatus, FailureStatus};
pub use error::{BoardError, ErrorCode, Result};
pub use model::{BoardConfiguration, Column, Issue, ProjectRules, Rank, User};
pub use registry::BoardRegistry;
pub use snapshot::{BoardSnapshot, ColumnIssues, PlacedIssue, Placement};
pub use source::{
    AllowAll, ConfigurationProvider, InMemoryConfigurations, IssueSource, VisibilityPredicate,
};
pub use view::{BoardFilter, BoardView, ViewQuery, project_changes};
