use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::capability::{CallbackCapability, Capability, TriggerCapability};
use crate::error::RegistryError;
use crate::types::CapabilityType;

/// Registry of the capabilities available to workflows.
#[async_trait]
pub trait CapabilityRegistry: Send + Sync {
  /// Get a capability by id, whatever its type.
  async fn get(&self, id: &str) -> Result<Capability, RegistryError>;

  /// Get a trigger capability by id.
  async fn get_trigger(&self, id: &str) -> Result<Arc<dyn TriggerCapability>, RegistryError>;

  /// Get an action capability by id.
  async fn get_action(&self, id: &str) -> Result<Arc<dyn CallbackCapability>, RegistryError>;

  /// Get a consensus (report) capability by id.
  async fn get_consensus(&self, id: &str) -> Result<Arc<dyn CallbackCapability>, RegistryError>;

  /// Get a target capability by id.
  async fn get_target(&self, id: &str) -> Result<Arc<dyn CallbackCapability>, RegistryError>;

  /// List all capabilities, in insertion order.
  async fn list(&self) -> Vec<Capability>;

  /// Add a capability.
  ///
  /// Fails if the id is taken, or if the capability's execution contract does
  /// not match its declared type.
  async fn add(&self, capability: Capability) -> Result<(), RegistryError>;
}

#[derive(Default)]
struct Entries {
  by_id: HashMap<String, Capability>,
  order: Vec<String>,
}

/// Registry that keeps capabilities in memory.
#[derive(Default)]
pub struct InMemoryRegistry {
  entries: RwLock<Entries>,
}

impl InMemoryRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  fn lookup(&self, id: &str, expected: CapabilityType) -> Result<Capability, RegistryError> {
    let entries = self.entries.read().unwrap();
    let capability = entries
      .by_id
      .get(id)
      .cloned()
      .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })?;

    let actual = capability.info().capability_type;
    if actual != expected {
      return Err(RegistryError::WrongType {
        id: id.to_string(),
        expected,
        actual,
      });
    }

    Ok(capability)
  }

  fn callback(
    &self,
    id: &str,
    expected: CapabilityType,
  ) -> Result<Arc<dyn CallbackCapability>, RegistryError> {
    match self.lookup(id, expected)? {
      Capability::Callback(callback) => Ok(callback),
      // add() rejects mismatched contracts
      Capability::Trigger(_) => Err(RegistryError::ContractMismatch {
        id: id.to_string(),
        capability_type: expected,
        expected: "callback",
      }),
    }
  }
}

fn check_contract(capability: &Capability) -> Result<(), RegistryError> {
  let info = capability.info();
  let expected = match info.capability_type {
    CapabilityType::Trigger => "trigger",
    CapabilityType::Action | CapabilityType::Consensus | CapabilityType::Target => "callback",
  };

  if capability.contract() != expected {
    return Err(RegistryError::ContractMismatch {
      id: info.id.clone(),
      capability_type: info.capability_type,
      expected,
    });
  }

  Ok(())
}

#[async_trait]
impl CapabilityRegistry for InMemoryRegistry {
  async fn get(&self, id: &str) -> Result<Capability, RegistryError> {
    let entries = self.entries.read().unwrap();
    entries
      .by_id
      .get(id)
      .cloned()
      .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })
  }

  async fn get_trigger(&self, id: &str) -> Result<Arc<dyn TriggerCapability>, RegistryError> {
    match self.lookup(id, CapabilityType::Trigger)? {
      Capability::Trigger(trigger) => Ok(trigger),
      Capability::Callback(_) => Err(RegistryError::ContractMismatch {
        id: id.to_string(),
        capability_type: CapabilityType::Trigger,
        expected: "trigger",
      }),
    }
  }

  async fn get_action(&self, id: &str) -> Result<Arc<dyn CallbackCapability>, RegistryError> {
    self.callback(id, CapabilityType::Action)
  }

  async fn get_consensus(&self, id: &str) -> Result<Arc<dyn CallbackCapability>, RegistryError> {
    self.callback(id, CapabilityType::Consensus)
  }

  async fn get_target(&self, id: &str) -> Result<Arc<dyn CallbackCapability>, RegistryError> {
    self.callback(id, CapabilityType::Target)
  }

  async fn list(&self) -> Vec<Capability> {
    let entries = self.entries.read().unwrap();
    entries
      .order
      .iter()
      .filter_map(|id| entries.by_id.get(id).cloned())
      .collect()
  }

  async fn add(&self, capability: Capability) -> Result<(), RegistryError> {
    check_contract(&capability)?;

    let id = capability.id().to_string();
    let mut entries = self.entries.write().unwrap();
    if entries.by_id.contains_key(&id) {
      return Err(RegistryError::AlreadyExists { id });
    }

    tracing::debug!(capability_id = %id, capability_type = %capability.info().capability_type, "capability_added");
    entries.order.push(id.clone());
    entries.by_id.insert(id, capability);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::capability::{ResponseStream, respond};
  use crate::error::CapabilityError;
  use crate::types::{
    CapabilityInfo, CapabilityRequest, RegisterToWorkflowRequest, UnregisterFromWorkflowRequest,
  };
  use tokio_util::sync::CancellationToken;

  struct MockCallback(CapabilityInfo);

  #[async_trait]
  impl CallbackCapability for MockCallback {
    fn info(&self) -> &CapabilityInfo {
      &self.0
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
      Ok(respond(vec![]))
    }
  }

  struct MockTrigger(CapabilityInfo);

  #[async_trait]
  impl TriggerCapability for MockTrigger {
    fn info(&self) -> &CapabilityInfo {
      &self.0
    }

    async fn register_trigger(
      &self,
      _request: CapabilityRequest,
    ) -> Result<ResponseStream, CapabilityError> {
      Ok(respond(vec![]))
    }

    async fn unregister_trigger(&self, _request: CapabilityRequest) -> Result<(), CapabilityError> {
      Ok(())
    }
  }

  fn info(id: &str, capability_type: CapabilityType) -> CapabilityInfo {
    CapabilityInfo::new(id, capability_type, format!("{id}-description"), "v1.0.0")
  }

  fn callback(id: &str, capability_type: CapabilityType) -> Capability {
    Capability::Callback(Arc::new(MockCallback(info(id, capability_type))))
  }

  fn trigger(id: &str, capability_type: CapabilityType) -> Capability {
    Capability::Trigger(Arc::new(MockTrigger(info(id, capability_type))))
  }

  #[tokio::test]
  async fn test_add_get_list() {
    let registry = InMemoryRegistry::new();
    registry
      .add(callback("capability-1", CapabilityType::Action))
      .await
      .unwrap();

    let got = registry.get("capability-1").await.unwrap();
    assert_eq!(got.id(), "capability-1");

    let all = registry.list().await;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id(), "capability-1");
  }

  #[tokio::test]
  async fn test_no_duplicate_ids() {
    let registry = InMemoryRegistry::new();
    registry
      .add(callback("capability-1", CapabilityType::Action))
      .await
      .unwrap();

    let err = registry
      .add(callback("capability-1", CapabilityType::Consensus))
      .await
      .unwrap_err();
    assert_eq!(
      err.to_string(),
      "capability with id: capability-1 already exists"
    );
  }

  #[tokio::test]
  async fn test_checks_contract_by_type() {
    let cases = [
      (callback("t", CapabilityType::Trigger), false),
      (trigger("t", CapabilityType::Trigger), true),
      (callback("a", CapabilityType::Action), true),
      (trigger("a", CapabilityType::Action), false),
      (callback("c", CapabilityType::Consensus), true),
      (trigger("c", CapabilityType::Consensus), false),
      (callback("g", CapabilityType::Target), true),
      (trigger("g", CapabilityType::Target), false),
    ];

    for (capability, ok) in cases {
      let registry = InMemoryRegistry::new();
      let label = format!("{capability:?}");
      let result = registry.add(capability).await;
      if ok {
        assert!(result.is_ok(), "{label}: {result:?}");
      } else {
        assert!(
          matches!(result, Err(RegistryError::ContractMismatch { .. })),
          "{label}: {result:?}"
        );
      }
    }
  }

  #[tokio::test]
  async fn test_typed_getters() {
    let registry = InMemoryRegistry::new();
    registry
      .add(trigger("on-tick", CapabilityType::Trigger))
      .await
      .unwrap();
    registry
      .add(callback("echo", CapabilityType::Action))
      .await
      .unwrap();
    registry
      .add(callback("agree", CapabilityType::Consensus))
      .await
      .unwrap();
    registry
      .add(callback("write", CapabilityType::Target))
      .await
      .unwrap();

    assert!(registry.get_trigger("on-tick").await.is_ok());
    assert!(registry.get_action("echo").await.is_ok());
    assert!(registry.get_consensus("agree").await.is_ok());
    assert!(registry.get_target("write").await.is_ok());

    let err = registry.get_action("write").await.err().unwrap();
    assert!(matches!(
      err,
      RegistryError::WrongType {
        expected: CapabilityType::Action,
        actual: CapabilityType::Target,
        ..
      }
    ));

    let err = registry.get_trigger("missing").await.err().unwrap();
    assert!(matches!(err, RegistryError::NotFound { .. }));
  }
}
