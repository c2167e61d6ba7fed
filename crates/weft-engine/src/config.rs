//! Engine configuration.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use weft_capability::{CapabilityRegistry, Node};
use weft_config::WorkflowDef;
use weft_store::Store;

use crate::clock::{Clock, SystemClock};
use crate::error::BoxError;
use crate::events::{EngineNotifier, NoopNotifier};

/// Tunables of an engine. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
  /// Maximum number of steps running at the same time.
  pub max_worker_limit: usize,
  /// Capacity of the dispatch, step update and trigger queues.
  pub queue_size: usize,
  /// How long a dispatch waits for a free worker before being requeued.
  pub new_worker_timeout_ms: u64,
  /// Executions running longer than this finish with `timeout`.
  pub max_execution_duration_ms: u64,
  /// Delay between initialization attempts.
  pub retry_interval_ms: u64,
  /// Number of initialization retries after the first attempt. `None`
  /// retries until the engine is closed.
  pub max_init_retries: Option<u32>,
}

impl Default for EngineSettings {
  fn default() -> Self {
    Self {
      max_worker_limit: 100,
      queue_size: 100_000,
      new_worker_timeout_ms: 2_000,
      max_execution_duration_ms: 10 * 60 * 1_000,
      retry_interval_ms: 5_000,
      max_init_retries: None,
    }
  }
}

impl EngineSettings {
  /// Parse settings from JSON. Missing fields take their default.
  pub fn from_json(source: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(source)
  }

  pub fn new_worker_timeout(&self) -> Duration {
    Duration::from_millis(self.new_worker_timeout_ms)
  }

  pub fn max_execution_duration(&self) -> Duration {
    Duration::from_millis(self.max_execution_duration_ms)
  }

  pub fn retry_interval(&self) -> Duration {
    Duration::from_millis(self.retry_interval_ms)
  }
}

/// Resolves the identity of the node the engine runs on.
///
/// Resolution may fail while the node is still joining its DON; the engine
/// retries it as part of initialization.
#[async_trait]
pub trait LocalNodeResolver: Send + Sync {
  async fn local_node(&self) -> Result<Node, BoxError>;
}

/// A resolver returning a fixed node.
#[derive(Debug, Clone, Default)]
pub struct StaticNode(pub Node);

#[async_trait]
impl LocalNodeResolver for StaticNode {
  async fn local_node(&self) -> Result<Node, BoxError> {
    Ok(self.0.clone())
  }
}

/// Everything an engine needs to run one workflow.
pub struct EngineConfig {
  pub workflow_id: String,
  pub workflow_owner: String,
  pub workflow_name: String,
  pub definition: WorkflowDef,
  pub settings: EngineSettings,
  pub registry: Arc<dyn CapabilityRegistry>,
  pub store: Arc<dyn Store>,
  pub local_node: Arc<dyn LocalNodeResolver>,
  pub notifier: Arc<dyn EngineNotifier>,
  pub clock: Arc<dyn Clock>,
}

impl EngineConfig {
  /// Configuration with default settings, a static empty node, no
  /// notifications and the system clock.
  pub fn new(
    workflow_id: impl Into<String>,
    definition: WorkflowDef,
    registry: Arc<dyn CapabilityRegistry>,
    store: Arc<dyn Store>,
  ) -> Self {
    Self {
      workflow_id: workflow_id.into(),
      workflow_owner: String::new(),
      workflow_name: String::new(),
      definition,
      settings: EngineSettings::default(),
      registry,
      store,
      local_node: Arc::new(StaticNode::default()),
      notifier: Arc::new(NoopNotifier),
      clock: Arc::new(SystemClock),
    }
  }

  pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
    self.workflow_owner = owner.into();
    self
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.workflow_name = name.into();
    self
  }

  pub fn with_settings(mut self, settings: EngineSettings) -> Self {
    self.settings = settings;
    self
  }

  pub fn with_local_node(mut self, resolver: Arc<dyn LocalNodeResolver>) -> Self {
    self.local_node = resolver;
    self
  }

  pub fn with_notifier(mut self, notifier: Arc<dyn EngineNotifier>) -> Self {
    self.notifier = notifier;
    self
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }
}
