//! Weft Store
//!
//! This crate provides the storage trait and implementations for workflow
//! executions and their step records.
//!
//! The [`Store`] trait defines operations for:
//! - Creating executions and upserting step records
//! - Moving an execution to a terminal status, at most once
//! - Listing unfinished executions so an engine can resume them
//!
//! [`SqliteStore`] persists to SQLite; [`InMemoryStore`] keeps everything in
//! process and is used by tests and `--in-memory` runs.

mod memory;
mod sqlite;
mod types;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use types::{
  ExecutionStatus, StepOutput, StepStatus, WorkflowExecution, WorkflowExecutionStep,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// An execution with this id already exists.
  #[error("execution already exists: {0}")]
  AlreadyExists(String),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("migration error: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Storage for workflow executions.
#[async_trait]
pub trait Store: Send + Sync {
  /// Create an execution along with the step records it already carries.
  async fn add(&self, execution: &WorkflowExecution) -> Result<(), Error>;

  /// Insert or replace one step record and return the updated execution.
  async fn upsert_step(&self, step: &WorkflowExecutionStep) -> Result<WorkflowExecution, Error>;

  /// Move an execution to `status`.
  ///
  /// Only applies while the execution is still started; returns whether the
  /// transition was applied.
  async fn update_status(
    &self,
    execution_id: &str,
    status: ExecutionStatus,
    at: DateTime<Utc>,
  ) -> Result<bool, Error>;

  /// Get an execution by id.
  async fn get(&self, execution_id: &str) -> Result<WorkflowExecution, Error>;

  /// Started executions of a workflow, oldest first.
  async fn get_unfinished(
    &self,
    workflow_id: &str,
    offset: usize,
    limit: usize,
  ) -> Result<Vec<WorkflowExecution>, Error>;
}
