//! RunPool Request Dispatch
//!
//! This crate manages the lifecycle of runtime processes and dispatches
//! requests to them:
//! - Instance: admission control and lifecycle state machine for one runtime process
//! - RuntimeProxy: contract implemented by runtime process integrations
//! - InstanceFactory: creates configured instances for an instance pool
//! - RequestWindow: rolling 60-second latency/QPS bookkeeping
//! - RequestRegistry: resolves in-flight requests to their handling instance

pub mod error;
pub mod factory;
pub mod history;
pub mod instance;
pub mod proxy;
pub mod registry;

pub use error::DispatchError;
pub use factory::{InstanceFactory, RuntimeInstanceFactory};
pub use history::RequestWindow;
pub use instance::{Instance, QuitOptions};
pub use proxy::RuntimeProxy;
pub use registry::{InMemoryRequestRegistry, RequestRegistry};

pub type Result<T> = std::result::Result<T, DispatchError>;
