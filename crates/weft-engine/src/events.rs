//! Engine events and notifiers for observability.
//!
//! The engine reports initialization results and the lifecycle of each
//! execution to an [`EngineNotifier`]. Implementations decide what to do
//! with them (log, forward, assert on them in tests).

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use weft_store::{ExecutionStatus, StepStatus};

/// Events emitted by an engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
  /// Initialization finished. On failure triggers were never registered.
  Initialized { workflow_id: String, success: bool },

  /// A trigger event created a new execution.
  ExecutionStarted {
    workflow_id: String,
    execution_id: String,
  },

  /// A step record was written.
  StepFinished {
    execution_id: String,
    step_ref: String,
    status: StepStatus,
  },

  /// An execution reached a terminal status. Emitted once per execution.
  ExecutionFinished {
    workflow_id: String,
    execution_id: String,
    status: ExecutionStatus,
  },
}

/// Receives engine events.
pub trait EngineNotifier: Send + Sync {
  fn notify(&self, event: EngineEvent);
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl EngineNotifier for NoopNotifier {
  fn notify(&self, _event: EngineEvent) {}
}

/// A notifier that sends events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  // Unbounded so a slow consumer never blocks the scheduling loop.
  sender: mpsc::UnboundedSender<EngineEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<EngineEvent>) -> Self {
    Self { sender }
  }

  /// Create a notifier along with the receiving end of its channel.
  pub fn channel() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Self::new(sender), receiver)
  }
}

impl EngineNotifier for ChannelNotifier {
  fn notify(&self, event: EngineEvent) {
    // receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
