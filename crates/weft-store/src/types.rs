use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

/// Status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ExecutionStatus {
  Started,
  Completed,
  Errored,
  Timeout,
  CompletedEarlyExit,
}

impl ExecutionStatus {
  /// Whether the execution is finished. A finished execution never changes
  /// status again.
  pub fn is_terminal(self) -> bool {
    !matches!(self, ExecutionStatus::Started)
  }
}

/// Status of a processed step. A step without a record has not run yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum StepStatus {
  Completed,
  Errored,
  CompletedEarlyExit,
}

/// What a step produced: a value, an error, or neither (early exit).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub value: Option<serde_json::Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

/// The record of one step of an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecutionStep {
  pub execution_id: String,
  pub step_ref: String,
  pub status: StepStatus,
  /// Interpolated inputs the step ran with.
  pub inputs: Option<serde_json::Value>,
  pub outputs: StepOutput,
  pub updated_at: DateTime<Utc>,
}

/// A workflow execution with the records of its processed steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
  pub execution_id: String,
  pub workflow_id: String,
  pub status: ExecutionStatus,
  /// Step ref -> record. The trigger step is recorded under `trigger`.
  pub steps: HashMap<String, WorkflowExecutionStep>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
  /// A new started execution without step records.
  pub fn new(
    execution_id: impl Into<String>,
    workflow_id: impl Into<String>,
    created_at: DateTime<Utc>,
  ) -> Self {
    Self {
      execution_id: execution_id.into(),
      workflow_id: workflow_id.into(),
      status: ExecutionStatus::Started,
      steps: HashMap::new(),
      created_at,
      updated_at: created_at,
      finished_at: None,
    }
  }

  /// Status of a step, `None` if it has not been processed.
  pub fn step_status(&self, step_ref: &str) -> Option<StepStatus> {
    self.steps.get(step_ref).map(|s| s.status)
  }
}

/// Row of `workflow_executions`.
#[derive(Debug, FromRow)]
pub(crate) struct ExecutionRow {
  pub execution_id: String,
  pub workflow_id: String,
  pub status: ExecutionStatus,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub finished_at: Option<DateTime<Utc>>,
}

/// Row of `workflow_execution_steps`.
#[derive(Debug, FromRow)]
pub(crate) struct StepRow {
  pub execution_id: String,
  pub step_ref: String,
  pub status: StepStatus,
  pub inputs: Option<Json<serde_json::Value>>,
  pub output_value: Option<Json<serde_json::Value>>,
  pub output_error: Option<String>,
  pub updated_at: DateTime<Utc>,
}

impl From<StepRow> for WorkflowExecutionStep {
  fn from(row: StepRow) -> Self {
    Self {
      execution_id: row.execution_id,
      step_ref: row.step_ref,
      status: row.status,
      inputs: row.inputs.map(|j| j.0),
      outputs: StepOutput {
        value: row.output_value.map(|j| j.0),
        error: row.output_error,
      },
      updated_at: row.updated_at,
    }
  }
}

impl ExecutionRow {
  pub(crate) fn into_execution(self, steps: Vec<StepRow>) -> WorkflowExecution {
    WorkflowExecution {
      execution_id: self.execution_id,
      workflow_id: self.workflow_id,
      status: self.status,
      steps: steps
        .into_iter()
        .map(|row| (row.step_ref.clone(), row.into()))
        .collect(),
      created_at: self.created_at,
      updated_at: self.updated_at,
      finished_at: self.finished_at,
    }
  }
}
