use chrono::{Duration, TimeZone, Utc};
use futures::future::join_all;
use serde_json::json;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use weft_store::{
  Error, ExecutionStatus, InMemoryStore, SqliteStore, StepOutput, StepStatus, Store,
  WorkflowExecution, WorkflowExecutionStep,
};

async fn sqlite_store() -> SqliteStore {
  let pool = SqlitePoolOptions::new()
    .max_connections(1)
    .connect("sqlite::memory:")
    .await
    .unwrap();
  let store = SqliteStore::new(pool);
  store.migrate().await.unwrap();
  store
}

/// A file-backed store whose pool hands out several connections, so writes
/// can contend for the database lock.
async fn pooled_sqlite_store(dir: &tempfile::TempDir) -> SqliteStore {
  let options = SqliteConnectOptions::new()
    .filename(dir.path().join("weft.db"))
    .create_if_missing(true)
    .journal_mode(SqliteJournalMode::Wal);
  let pool = SqlitePoolOptions::new()
    .max_connections(4)
    .connect_with(options)
    .await
    .unwrap();
  let store = SqliteStore::new(pool);
  store.migrate().await.unwrap();
  store
}

fn at(seconds: i64) -> chrono::DateTime<Utc> {
  Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(seconds)
}

fn execution(id: &str, workflow_id: &str, created: i64) -> WorkflowExecution {
  let mut execution = WorkflowExecution::new(id, workflow_id, at(created));
  execution.steps.insert(
    "trigger".to_string(),
    WorkflowExecutionStep {
      execution_id: id.to_string(),
      step_ref: "trigger".to_string(),
      status: StepStatus::Completed,
      inputs: None,
      outputs: StepOutput {
        value: Some(json!({"event_id": "evt"})),
        error: None,
      },
      updated_at: at(created),
    },
  );
  execution
}

fn step(execution_id: &str, step_ref: &str, status: StepStatus, seconds: i64) -> WorkflowExecutionStep {
  WorkflowExecutionStep {
    execution_id: execution_id.to_string(),
    step_ref: step_ref.to_string(),
    status,
    inputs: Some(json!({"x": 1})),
    outputs: StepOutput {
      value: Some(json!("out")),
      error: None,
    },
    updated_at: at(seconds),
  }
}

async fn add_and_get(store: &dyn Store) {
  let created = execution("exec-1", "wf", 0);
  store.add(&created).await.unwrap();

  let fetched = store.get("exec-1").await.unwrap();
  assert_eq!(fetched, created);

  let err = store.add(&created).await.unwrap_err();
  assert!(matches!(err, Error::AlreadyExists(_)));

  let err = store.get("missing").await.unwrap_err();
  assert!(matches!(err, Error::NotFound(_)));
}

async fn upsert_returns_snapshot(store: &dyn Store) {
  store.add(&execution("exec-1", "wf", 0)).await.unwrap();

  let snapshot = store
    .upsert_step(&step("exec-1", "a", StepStatus::Completed, 5))
    .await
    .unwrap();
  assert_eq!(snapshot.steps.len(), 2);
  assert_eq!(snapshot.step_status("a"), Some(StepStatus::Completed));
  assert_eq!(snapshot.steps["a"].outputs.value, Some(json!("out")));

  // upserting the same ref replaces the record
  let mut errored = step("exec-1", "a", StepStatus::Errored, 6);
  errored.outputs = StepOutput {
    value: None,
    error: Some("boom".to_string()),
  };
  let snapshot = store.upsert_step(&errored).await.unwrap();
  assert_eq!(snapshot.steps.len(), 2);
  assert_eq!(snapshot.steps["a"], errored);

  let err = store
    .upsert_step(&step("missing", "a", StepStatus::Completed, 1))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::NotFound(_)));
}

async fn status_transitions_once(store: &dyn Store) {
  store.add(&execution("exec-1", "wf", 0)).await.unwrap();

  let applied = store
    .update_status("exec-1", ExecutionStatus::CompletedEarlyExit, at(10))
    .await
    .unwrap();
  assert!(applied);

  let applied = store
    .update_status("exec-1", ExecutionStatus::Completed, at(11))
    .await
    .unwrap();
  assert!(!applied);

  let fetched = store.get("exec-1").await.unwrap();
  assert_eq!(fetched.status, ExecutionStatus::CompletedEarlyExit);
  assert_eq!(fetched.finished_at, Some(at(10)));

  // step records can still be written after the execution finished
  let snapshot = store
    .upsert_step(&step("exec-1", "late", StepStatus::Completed, 12))
    .await
    .unwrap();
  assert_eq!(snapshot.status, ExecutionStatus::CompletedEarlyExit);
  assert!(snapshot.steps.contains_key("late"));

  let err = store
    .update_status("missing", ExecutionStatus::Completed, at(1))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::NotFound(_)));
}

async fn unfinished_are_paged(store: &dyn Store) {
  store.add(&execution("exec-c", "wf", 3)).await.unwrap();
  store.add(&execution("exec-a", "wf", 1)).await.unwrap();
  store.add(&execution("exec-b", "wf", 2)).await.unwrap();
  store.add(&execution("exec-other", "other", 0)).await.unwrap();
  store
    .update_status("exec-b", ExecutionStatus::Completed, at(4))
    .await
    .unwrap();

  let unfinished = store.get_unfinished("wf", 0, 10).await.unwrap();
  let ids: Vec<&str> = unfinished.iter().map(|e| e.execution_id.as_str()).collect();
  assert_eq!(ids, ["exec-a", "exec-c"]);
  assert!(unfinished[0].steps.contains_key("trigger"));

  let page = store.get_unfinished("wf", 1, 10).await.unwrap();
  assert_eq!(page.len(), 1);
  assert_eq!(page[0].execution_id, "exec-c");

  let page = store.get_unfinished("wf", 0, 1).await.unwrap();
  assert_eq!(page.len(), 1);
  assert_eq!(page[0].execution_id, "exec-a");
}

async fn concurrent_upserts_keep_every_step(store: &dyn Store) {
  store.add(&execution("exec-1", "wf", 0)).await.unwrap();

  let steps: Vec<WorkflowExecutionStep> = (0..16)
    .map(|i| step("exec-1", &format!("step-{i}"), StepStatus::Completed, i + 1))
    .collect();
  let results = join_all(steps.iter().map(|step| store.upsert_step(step))).await;
  for result in results {
    let snapshot = result.unwrap();
    assert!(snapshot.steps.contains_key("trigger"));
  }

  let fetched = store.get("exec-1").await.unwrap();
  assert_eq!(fetched.steps.len(), 17);
  for i in 0..16 {
    assert_eq!(
      fetched.step_status(&format!("step-{i}")),
      Some(StepStatus::Completed)
    );
  }
  assert_eq!(fetched.status, ExecutionStatus::Started);
}

#[tokio::test]
async fn test_memory_add_and_get() {
  add_and_get(&InMemoryStore::new()).await;
}

#[tokio::test]
async fn test_sqlite_add_and_get() {
  add_and_get(&sqlite_store().await).await;
}

#[tokio::test]
async fn test_memory_upsert_returns_snapshot() {
  upsert_returns_snapshot(&InMemoryStore::new()).await;
}

#[tokio::test]
async fn test_sqlite_upsert_returns_snapshot() {
  upsert_returns_snapshot(&sqlite_store().await).await;
}

#[tokio::test]
async fn test_memory_status_transitions_once() {
  status_transitions_once(&InMemoryStore::new()).await;
}

#[tokio::test]
async fn test_sqlite_status_transitions_once() {
  status_transitions_once(&sqlite_store().await).await;
}

#[tokio::test]
async fn test_memory_unfinished_are_paged() {
  unfinished_are_paged(&InMemoryStore::new()).await;
}

#[tokio::test]
async fn test_sqlite_unfinished_are_paged() {
  unfinished_are_paged(&sqlite_store().await).await;
}

#[tokio::test]
async fn test_memory_concurrent_upserts_keep_every_step() {
  concurrent_upserts_keep_every_step(&InMemoryStore::new()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_concurrent_upserts_keep_every_step() {
  let dir = tempfile::tempdir().unwrap();
  concurrent_upserts_keep_every_step(&pooled_sqlite_store(&dir).await).await;
}
