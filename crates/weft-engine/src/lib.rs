//! Weft Workflow Engine
//!
//! This crate executes a validated workflow: it binds capabilities, listens
//! to triggers and runs the steps of each execution as their dependencies
//! complete.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        init task                            │
//! │  - resolves local node and capabilities, retrying           │
//! │  - resumes unfinished executions, registers triggers        │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  trigger forwarding tasks                   │
//! │  - one per trigger, relay tagged events                     │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      scheduling loop                        │
//! │  - creates executions, owns every state transition          │
//! │  - dispatches ready steps to workers (bounded)              │
//! │  - applies the completion policy to step updates            │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          workers                            │
//! │  - interpolate inputs, call the step capability             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use weft_engine::{Engine, EngineConfig};
//!
//! let config = EngineConfig::new("wf-1", definition, registry, store)
//!   .with_notifier(Arc::new(notifier));
//! let engine = Engine::new(config)?;
//! engine.start()?;
//! // ...
//! engine.close().await?;
//! ```

mod clock;
mod config;
mod engine;
mod error;
mod events;
mod init;
mod input;
mod scheduler;
mod trigger;
mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, EngineSettings, LocalNodeResolver, StaticNode};
pub use engine::Engine;
pub use error::{BoxError, EngineError, ErrorContext, ErrorKind};
pub use events::{ChannelNotifier, EngineEvent, EngineNotifier, NoopNotifier};
pub use init::InitState;
pub use input::{execution_context, interpolate_inputs};
pub use scheduler::execution_id;
