//! Request registry - resolves in-flight requests to handling instances
//!
//! API stubs invoked during a request need to answer "which instance is
//! this call running under". The instance records itself here as
//! handler-of-record at admission time, and the dispatcher clears the
//! entry once the response is fully written.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use rp_common::InstanceId;

use crate::error::DispatchError;
use crate::instance::Instance;
use crate::Result;

/// Receives handler-of-record notifications from instances.
pub trait RequestRegistry: Send + Sync {
    /// Record `instance` as the handler for `request_id`. Called once per
    /// admitted request, before the runtime proxy runs.
    fn set_request_instance(&self, request_id: &str, instance: &Arc<Instance>);

    /// Forget a completed request.
    fn clear_request(&self, request_id: &str);
}

/// In-memory [`RequestRegistry`] that also indexes serving instances by id.
///
/// Instances are held weakly; a dropped instance simply stops resolving.
#[derive(Default)]
pub struct InMemoryRequestRegistry {
    requests: DashMap<String, Weak<Instance>>,
    instances: DashMap<InstanceId, Weak<Instance>>,
}

impl InMemoryRequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `instance` resolvable by its id.
    pub fn register_instance(&self, instance: &Arc<Instance>) {
        self.instances
            .insert(instance.instance_id().clone(), Arc::downgrade(instance));
    }

    /// Remove an instance from the id index.
    pub fn unregister_instance(&self, instance_id: &InstanceId) {
        self.instances.remove(instance_id);
    }

    /// The instance currently handling `request_id`, if any.
    pub fn instance_for_request(&self, request_id: &str) -> Option<Arc<Instance>> {
        self.requests
            .get(request_id)
            .and_then(|entry| entry.value().upgrade())
    }

    /// Resolve a serving instance by id.
    pub fn instance(&self, instance_id: &InstanceId) -> Result<Arc<Instance>> {
        self.instances
            .get(instance_id)
            .and_then(|entry| entry.value().upgrade())
            .ok_or_else(|| DispatchError::InvalidInstanceId(instance_id.clone()))
    }
}

impl RequestRegistry for InMemoryRequestRegistry {
    fn set_request_instance(&self, request_id: &str, instance: &Arc<Instance>) {
        self.requests
            .insert(request_id.to_string(), Arc::downgrade(instance));
    }

    fn clear_request(&self, request_id: &str) {
        self.requests.remove(request_id);
    }
}
