//! Weft Capability
//!
//! Capabilities are the executable units a workflow is made of. This crate
//! defines:
//!
//! - the request/response protocol exchanged with capabilities
//!   ([`CapabilityRequest`], [`CapabilityResponse`], registration requests)
//! - the two execution contracts: [`TriggerCapability`] (emits a stream of
//!   events once registered) and [`CallbackCapability`] (actions, consensus
//!   and targets, invoked per step)
//! - [`Capability`], the tagged variant stored in a registry, validated once
//!   against its declared [`CapabilityType`] when it is added
//! - [`CapabilityRegistry`] and the [`InMemoryRegistry`] implementation
//! - [`LocalTargetCapability`], the transmission adapter for targets that run
//!   on the local node only

mod capability;
mod error;
mod registry;
mod transmission;
mod types;

pub use capability::{
  CallbackCapability, Capability, ResponseStream, TriggerCapability, execute_sync, respond,
};
pub use error::{CapabilityError, RegistryError};
pub use registry::{CapabilityRegistry, InMemoryRegistry};
pub use transmission::{LocalTargetCapability, SleepFn, TransmissionSchedule};
pub use types::{
  CapabilityInfo, CapabilityRequest, CapabilityResponse, CapabilityType, Don, Node,
  RegisterToWorkflowRequest, RegistrationMetadata, RequestMetadata, TriggerEvent,
  UnregisterFromWorkflowRequest,
};
