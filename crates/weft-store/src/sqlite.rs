use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::types::{ExecutionRow, StepRow};
use crate::{Error, ExecutionStatus, Store, WorkflowExecution, WorkflowExecutionStep};

/// SQLite-based store implementation.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), Error> {
    sqlx::migrate!("../../migrations").run(&self.pool).await?;
    Ok(())
  }

  async fn load(&self, execution_id: &str) -> Result<WorkflowExecution, Error> {
    let mut tx = self.pool.begin().await?;
    let execution = load_execution(&mut tx, execution_id).await?;
    tx.commit().await?;
    Ok(execution)
  }
}

async fn load_execution(
  tx: &mut Transaction<'_, Sqlite>,
  execution_id: &str,
) -> Result<WorkflowExecution, Error> {
  let row: Option<ExecutionRow> = sqlx::query_as(
    r#"
            SELECT execution_id, workflow_id, status, created_at, updated_at, finished_at
            FROM workflow_executions
            WHERE execution_id = ?
            "#,
  )
  .bind(execution_id)
  .fetch_optional(&mut **tx)
  .await?;

  let row = row.ok_or_else(|| Error::NotFound(execution_id.to_string()))?;
  let steps = load_steps(tx, execution_id).await?;
  Ok(row.into_execution(steps))
}

async fn load_steps(
  tx: &mut Transaction<'_, Sqlite>,
  execution_id: &str,
) -> Result<Vec<StepRow>, Error> {
  let rows = sqlx::query_as(
    r#"
            SELECT execution_id, step_ref, status, inputs, output_value, output_error, updated_at
            FROM workflow_execution_steps
            WHERE execution_id = ?
            "#,
  )
  .bind(execution_id)
  .fetch_all(&mut **tx)
  .await?;

  Ok(rows)
}

async fn upsert_step_row(
  tx: &mut Transaction<'_, Sqlite>,
  step: &WorkflowExecutionStep,
) -> Result<(), Error> {
  sqlx::query(
    r#"
            INSERT INTO workflow_execution_steps (execution_id, step_ref, status, inputs, output_value, output_error, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (execution_id, step_ref) DO UPDATE SET
              status = excluded.status,
              inputs = excluded.inputs,
              output_value = excluded.output_value,
              output_error = excluded.output_error,
              updated_at = excluded.updated_at
            "#,
  )
  .bind(&step.execution_id)
  .bind(&step.step_ref)
  .bind(step.status)
  .bind(step.inputs.as_ref().map(Json))
  .bind(step.outputs.value.as_ref().map(Json))
  .bind(&step.outputs.error)
  .bind(step.updated_at)
  .execute(&mut **tx)
  .await?;

  Ok(())
}

#[async_trait]
impl Store for SqliteStore {
  async fn add(&self, execution: &WorkflowExecution) -> Result<(), Error> {
    let mut tx = self.pool.begin().await?;

    let inserted = sqlx::query(
      r#"
            INSERT INTO workflow_executions (execution_id, workflow_id, status, created_at, updated_at, finished_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
    )
    .bind(&execution.execution_id)
    .bind(&execution.workflow_id)
    .bind(execution.status)
    .bind(execution.created_at)
    .bind(execution.updated_at)
    .bind(execution.finished_at)
    .execute(&mut *tx)
    .await;

    match inserted {
      Ok(_) => {}
      Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
        return Err(Error::AlreadyExists(execution.execution_id.clone()));
      }
      Err(e) => return Err(e.into()),
    }

    for step in execution.steps.values() {
      upsert_step_row(&mut tx, step).await?;
    }

    tx.commit().await?;
    Ok(())
  }

  async fn upsert_step(&self, step: &WorkflowExecutionStep) -> Result<WorkflowExecution, Error> {
    let mut tx = self.pool.begin().await?;

    let touched = sqlx::query(
      r#"
            UPDATE workflow_executions
            SET updated_at = ?
            WHERE execution_id = ?
            "#,
    )
    .bind(step.updated_at)
    .bind(&step.execution_id)
    .execute(&mut *tx)
    .await?;

    if touched.rows_affected() == 0 {
      return Err(Error::NotFound(step.execution_id.clone()));
    }

    upsert_step_row(&mut tx, step).await?;
    let execution = load_execution(&mut tx, &step.execution_id).await?;

    tx.commit().await?;
    Ok(execution)
  }

  async fn update_status(
    &self,
    execution_id: &str,
    status: ExecutionStatus,
    at: DateTime<Utc>,
  ) -> Result<bool, Error> {
    let finished_at = status.is_terminal().then_some(at);

    let result = sqlx::query(
      r#"
            UPDATE workflow_executions
            SET status = ?, updated_at = ?, finished_at = ?
            WHERE execution_id = ? AND status = 'started'
            "#,
    )
    .bind(status)
    .bind(at)
    .bind(finished_at)
    .bind(execution_id)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() > 0 {
      return Ok(true);
    }

    // Distinguish "already finished" from "unknown"
    self.get(execution_id).await.map(|_| false)
  }

  async fn get(&self, execution_id: &str) -> Result<WorkflowExecution, Error> {
    self.load(execution_id).await
  }

  async fn get_unfinished(
    &self,
    workflow_id: &str,
    offset: usize,
    limit: usize,
  ) -> Result<Vec<WorkflowExecution>, Error> {
    let mut tx = self.pool.begin().await?;

    let rows: Vec<ExecutionRow> = sqlx::query_as(
      r#"
            SELECT execution_id, workflow_id, status, created_at, updated_at, finished_at
            FROM workflow_executions
            WHERE workflow_id = ? AND status = 'started'
            ORDER BY created_at ASC, execution_id ASC
            LIMIT ? OFFSET ?
            "#,
    )
    .bind(workflow_id)
    .bind(limit as i64)
    .bind(offset as i64)
    .fetch_all(&mut *tx)
    .await?;

    let mut executions = Vec::with_capacity(rows.len());
    for row in rows {
      let steps = load_steps(&mut tx, &row.execution_id).await?;
      executions.push(row.into_execution(steps));
    }

    tx.commit().await?;
    Ok(executions)
  }
}
