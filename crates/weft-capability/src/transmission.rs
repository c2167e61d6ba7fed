//! Transmission protocol for targets that only run on the local node.
//!
//! When every node of a DON runs the same workflow, each of them reaches the
//! target step. The schedule decides whether they all transmit at once or
//! take turns, each node waiting for its slot in a per-execution ordering of
//! the DON members.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::capability::{CallbackCapability, ResponseStream, respond};
use crate::error::CapabilityError;
use crate::types::{
  CapabilityInfo, CapabilityRequest, Node, RegisterToWorkflowRequest,
  UnregisterFromWorkflowRequest,
};

/// How the nodes of a DON share the transmission of a target call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmissionSchedule {
  /// Every node transmits immediately.
  AllAtOnce,
  /// Nodes transmit one after the other, `delta` apart.
  OneAtATime { delta: Duration },
}

impl TransmissionSchedule {
  /// Read the schedule from a step's config.
  ///
  /// `schedule` is `"allAtOnce"` (the default) or `"oneAtATime"`;
  /// `deltaStage` is either an integer number of milliseconds or a duration
  /// string such as `"250ms"`, `"5s"` or `"1m"`.
  pub fn from_config(config: &serde_json::Map<String, Value>) -> Result<Self, CapabilityError> {
    let schedule = match config.get("schedule") {
      None | Some(Value::Null) => "allAtOnce",
      Some(Value::String(s)) => s.as_str(),
      Some(other) => {
        return Err(CapabilityError::invalid_request(format!(
          "schedule must be a string, got {other}"
        )));
      }
    };

    match schedule {
      "allAtOnce" => Ok(Self::AllAtOnce),
      "oneAtATime" => {
        let delta = match config.get("deltaStage") {
          None | Some(Value::Null) => Duration::ZERO,
          Some(value) => parse_delta(value)?,
        };
        Ok(Self::OneAtATime { delta })
      }
      other => Err(CapabilityError::invalid_request(format!(
        "unknown transmission schedule: {other}"
      ))),
    }
  }
}

fn parse_delta(value: &Value) -> Result<Duration, CapabilityError> {
  if let Some(millis) = value.as_u64() {
    return Ok(Duration::from_millis(millis));
  }

  let Some(text) = value.as_str() else {
    return Err(CapabilityError::invalid_request(format!(
      "deltaStage must be a number of milliseconds or a duration string, got {value}"
    )));
  };

  let invalid = || CapabilityError::invalid_request(format!("invalid deltaStage: {text}"));
  let text = text.trim();
  let (number, unit) = if let Some(n) = text.strip_suffix("ms") {
    (n, 1)
  } else if let Some(n) = text.strip_suffix('s') {
    (n, 1_000)
  } else if let Some(n) = text.strip_suffix('m') {
    (n, 60_000)
  } else {
    return Err(invalid());
  };

  let number: u64 = number.trim().parse().map_err(|_| invalid())?;
  number
    .checked_mul(unit)
    .map(Duration::from_millis)
    .ok_or_else(invalid)
}

/// Position of `peer_id` among `members`, ordered by
/// `sha256(transmission_id ‖ member)`.
fn transmission_position(transmission_id: &str, members: &[String], peer_id: &str) -> Option<usize> {
  let mut ordered: Vec<(Vec<u8>, &str)> = members
    .iter()
    .map(|member| {
      let mut hasher = Sha256::new();
      hasher.update(transmission_id.as_bytes());
      hasher.update(member.as_bytes());
      (hasher.finalize().to_vec(), member.as_str())
    })
    .collect();
  ordered.sort();

  ordered.iter().position(|(_, member)| *member == peer_id)
}

/// Waits for a duration. Lets the owner of the adapter decide which timer
/// the transmission slots run on.
pub type SleepFn = Arc<dyn Fn(Duration) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wraps a target that has no DON of its own so that the nodes of the
/// workflow DON follow the configured transmission schedule.
pub struct LocalTargetCapability {
  info: CapabilityInfo,
  local_node: Node,
  target: Arc<dyn CallbackCapability>,
  sleep: SleepFn,
}

impl LocalTargetCapability {
  /// Adapter waiting on the tokio timer.
  pub fn new(local_node: Node, target: Arc<dyn CallbackCapability>) -> Self {
    Self {
      info: target.info().clone(),
      local_node,
      target,
      sleep: Arc::new(|delay| -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(delay))
      }),
    }
  }

  /// Wait for transmission slots with `sleep` instead of the tokio timer.
  pub fn with_sleep(mut self, sleep: SleepFn) -> Self {
    self.sleep = sleep;
    self
  }

  /// How long the local node waits before transmitting, or `None` if it
  /// does not take part in the transmission.
  fn delay(&self, request: &CapabilityRequest) -> Result<Option<Duration>, CapabilityError> {
    let schedule = TransmissionSchedule::from_config(&request.config)?;
    let members = &self.local_node.workflow_don.members;

    let delta = match schedule {
      TransmissionSchedule::AllAtOnce => return Ok(Some(Duration::ZERO)),
      TransmissionSchedule::OneAtATime { delta } => delta,
    };

    let Some(peer_id) = self.local_node.peer_id.as_deref() else {
      return Ok(Some(Duration::ZERO));
    };
    if members.is_empty() {
      return Ok(Some(Duration::ZERO));
    }

    let transmission_id = format!(
      "{}{}",
      request.metadata.workflow_id, request.metadata.workflow_execution_id
    );
    let Some(position) = transmission_position(&transmission_id, members, peer_id) else {
      return Ok(None);
    };

    Ok(Some(delta.saturating_mul(position as u32)))
  }
}

#[async_trait]
impl CallbackCapability for LocalTargetCapability {
  fn info(&self) -> &CapabilityInfo {
    &self.info
  }

  async fn register_to_workflow(
    &self,
    request: RegisterToWorkflowRequest,
  ) -> Result<(), CapabilityError> {
    self.target.register_to_workflow(request).await
  }

  async fn unregister_from_workflow(
    &self,
    request: UnregisterFromWorkflowRequest,
  ) -> Result<(), CapabilityError> {
    self.target.unregister_from_workflow(request).await
  }

  async fn execute(
    &self,
    request: CapabilityRequest,
    cancel: CancellationToken,
  ) -> Result<ResponseStream, CapabilityError> {
    let Some(delay) = self.delay(&request)? else {
      tracing::debug!(
        capability_id = %self.info.id,
        execution_id = %request.metadata.workflow_execution_id,
        "local node is not a member of the workflow DON, skipping transmission"
      );
      return Ok(respond(vec![]));
    };

    if !delay.is_zero() {
      tracing::debug!(
        capability_id = %self.info.id,
        execution_id = %request.metadata.workflow_execution_id,
        delay_ms = delay.as_millis() as u64,
        "waiting for transmission slot"
      );
      tokio::select! {
        _ = cancel.cancelled() => return Err(CapabilityError::Cancelled),
        _ = (self.sleep)(delay) => {}
      }
    }

    self.target.execute(request, cancel).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::capability::execute_sync;
  use crate::types::{CapabilityType, Don, RequestMetadata};
  use serde_json::json;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use tokio::time::Instant;

  struct CountingTarget {
    info: CapabilityInfo,
    calls: AtomicUsize,
  }

  #[async_trait]
  impl CallbackCapability for CountingTarget {
    fn info(&self) -> &CapabilityInfo {
      &self.info
    }

    async fn register_to_workflow(
      &self,
      _request: RegisterToWorkflowRequest,
    ) -> Result<(), CapabilityError> {
      Ok(())
    }

    async fn unregister_from_workflow(
      &self,
      _request: UnregisterFromWorkflowRequest,
    ) -> Result<(), CapabilityError> {
      Ok(())
    }

    async fn execute(
      &self,
      _request: CapabilityRequest,
      _cancel: CancellationToken,
    ) -> Result<ResponseStream, CapabilityError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      Ok(respond(vec![Ok(json!("sent"))]))
    }
  }

  fn target() -> Arc<CountingTarget> {
    Arc::new(CountingTarget {
      info: CapabilityInfo::new("write@1.0.0", CapabilityType::Target, "write", "1.0.0"),
      calls: AtomicUsize::new(0),
    })
  }

  fn node(peer: &str, members: &[&str]) -> Node {
    Node {
      peer_id: Some(peer.to_string()),
      workflow_don: Don {
        id: "don-1".to_string(),
        members: members.iter().map(|m| m.to_string()).collect(),
        f: 0,
      },
    }
  }

  fn request(config: Value) -> CapabilityRequest {
    CapabilityRequest {
      metadata: RequestMetadata {
        workflow_id: "wf".to_string(),
        workflow_execution_id: "exec".to_string(),
        ..Default::default()
      },
      config: config.as_object().cloned().unwrap_or_default(),
      inputs: Default::default(),
    }
  }

  #[test]
  fn test_parse_schedule() {
    let config = |v: Value| v.as_object().cloned().unwrap();

    assert_eq!(
      TransmissionSchedule::from_config(&config(json!({}))).unwrap(),
      TransmissionSchedule::AllAtOnce
    );
    assert_eq!(
      TransmissionSchedule::from_config(&config(
        json!({"schedule": "oneAtATime", "deltaStage": "5s"})
      ))
      .unwrap(),
      TransmissionSchedule::OneAtATime {
        delta: Duration::from_secs(5)
      }
    );
    assert_eq!(
      TransmissionSchedule::from_config(&config(
        json!({"schedule": "oneAtATime", "deltaStage": 250})
      ))
      .unwrap(),
      TransmissionSchedule::OneAtATime {
        delta: Duration::from_millis(250)
      }
    );
    assert!(
      TransmissionSchedule::from_config(&config(
        json!({"schedule": "oneAtATime", "deltaStage": "soon"})
      ))
      .is_err()
    );
    assert!(TransmissionSchedule::from_config(&config(json!({"schedule": "never"}))).is_err());
  }

  #[test]
  fn test_position_is_a_permutation() {
    let members: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
    let mut positions: Vec<usize> = members
      .iter()
      .map(|m| transmission_position("wfexec", &members, m).unwrap())
      .collect();
    positions.sort();
    assert_eq!(positions, vec![0, 1, 2, 3]);

    assert_eq!(transmission_position("wfexec", &members, "z"), None);
  }

  #[tokio::test(start_paused = true)]
  async fn test_one_at_a_time_waits_for_slot() {
    let members = ["a", "b", "c"];
    let delta = Duration::from_secs(10);
    let transmission_id = "wfexec";
    let ordered: Vec<String> = members.iter().map(|s| s.to_string()).collect();

    for peer in members {
      let inner = target();
      let capability = LocalTargetCapability::new(node(peer, &members), inner.clone());
      let position = transmission_position(transmission_id, &ordered, peer).unwrap();

      let started = Instant::now();
      let values = execute_sync(
        &capability,
        request(json!({"schedule": "oneAtATime", "deltaStage": "10s"})),
        CancellationToken::new(),
      )
      .await
      .unwrap();

      assert_eq!(values, vec![json!("sent")]);
      assert_eq!(started.elapsed(), delta * position as u32);
      assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }
  }

  #[tokio::test]
  async fn test_waits_on_the_given_sleep() {
    let members = ["a", "b", "c"];
    let ordered: Vec<String> = members.iter().map(|s| s.to_string()).collect();
    let last = members
      .iter()
      .find(|m| transmission_position("wfexec", &ordered, m) == Some(2))
      .unwrap();

    let slept = Arc::new(std::sync::Mutex::new(Vec::new()));
    let recorded = slept.clone();
    let sleep: SleepFn = Arc::new(move |delay| -> BoxFuture<'static, ()> {
      recorded.lock().unwrap().push(delay);
      Box::pin(async {})
    });

    let inner = target();
    let capability =
      LocalTargetCapability::new(node(last, &members), inner.clone()).with_sleep(sleep);

    // the last slot of three waits twice the delta, here without real time passing
    let values = execute_sync(
      &capability,
      request(json!({"schedule": "oneAtATime", "deltaStage": "30m"})),
      CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(values, vec![json!("sent")]);
    assert_eq!(*slept.lock().unwrap(), vec![Duration::from_secs(60 * 60)]);
    assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_non_member_skips_transmission() {
    let inner = target();
    let capability = LocalTargetCapability::new(node("z", &["a", "b"]), inner.clone());

    let values = execute_sync(
      &capability,
      request(json!({"schedule": "oneAtATime", "deltaStage": "1s"})),
      CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(values.is_empty());
    assert_eq!(inner.calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_wait_is_cancellable() {
    let members = ["a", "b", "c"];
    let ordered: Vec<String> = members.iter().map(|s| s.to_string()).collect();
    // pick the peer with the last slot so it always waits
    let last = members
      .iter()
      .find(|m| transmission_position("wfexec", &ordered, m) == Some(2))
      .unwrap();

    let inner = target();
    let capability = LocalTargetCapability::new(node(last, &members), inner.clone());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = capability
      .execute(
        request(json!({"schedule": "oneAtATime", "deltaStage": "1m"})),
        cancel,
      )
      .await
      .err()
      .unwrap();
    assert_eq!(err, CapabilityError::Cancelled);
    assert_eq!(inner.calls.load(Ordering::SeqCst), 0);
  }
}
