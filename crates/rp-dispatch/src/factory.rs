//! InstanceFactory - creates configured instances for an instance pool
//!
//! Runtime integrations implement [`InstanceFactory`] to wire instances to
//! their process type; [`RuntimeInstanceFactory`] covers the common case
//! of a proxy constructor plus an [`InstanceConfig`]. The restart policy
//! and restart directories are declarative: the owning pool consults them
//! when files or configuration change.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use rp_common::{ConfigChange, FileChangeRestartPolicy, InstanceConfig, InstanceId, UrlMap};

use crate::instance::Instance;
use crate::proxy::RuntimeProxy;
use crate::registry::RequestRegistry;
use crate::Result;

/// Creates instances for an instance pool and answers its restart-policy
/// questions.
#[async_trait]
pub trait InstanceFactory: Send + Sync {
    /// Create a new instance wired to a freshly created runtime proxy.
    ///
    /// With `expect_ready_request`, the instance is sent a readiness
    /// request before it can handle external traffic.
    async fn new_instance(
        &self,
        instance_id: InstanceId,
        expect_ready_request: bool,
    ) -> Result<Arc<Instance>>;

    /// Directories whose changes should trigger a restart of all instances
    /// created by this factory.
    fn get_restart_directories(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    /// Called when a file relevant to the factory might have changed.
    fn files_changed(&self) {}

    /// Called when the module configuration has changed.
    fn configuration_changed(&self, _changes: &HashSet<ConfigChange>) {}

    /// How file changes affect instances that are already serving.
    fn file_change_restart_policy(&self) -> FileChangeRestartPolicy;

    /// Whether created instances support interactive command evaluation.
    fn supports_interactive_requests(&self) -> bool {
        false
    }

    /// Default handler for start probes when no user handler matches.
    fn start_url_map(&self) -> Option<UrlMap> {
        None
    }

    /// Default handler for warmup probes when no user handler matches.
    fn warmup_url_map(&self) -> Option<UrlMap> {
        None
    }

    /// Concurrent-request ceiling applied to created instances.
    fn max_concurrent_requests(&self) -> usize;

    /// Background-thread ceiling applied to created instances.
    fn max_background_threads(&self) -> usize;
}

/// Constructor producing the runtime proxy for a new instance.
pub type ProxyConstructor = dyn Fn(&InstanceId) -> Box<dyn RuntimeProxy> + Send + Sync;

/// [`InstanceFactory`] backed by a proxy constructor and an
/// [`InstanceConfig`].
pub struct RuntimeInstanceFactory {
    request_registry: Arc<dyn RequestRegistry>,
    config: InstanceConfig,
    new_proxy: Box<ProxyConstructor>,
}

impl RuntimeInstanceFactory {
    pub fn new(
        request_registry: Arc<dyn RequestRegistry>,
        config: InstanceConfig,
        new_proxy: impl Fn(&InstanceId) -> Box<dyn RuntimeProxy> + Send + Sync + 'static,
    ) -> Self {
        Self {
            request_registry,
            config,
            new_proxy: Box::new(new_proxy),
        }
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }
}

#[async_trait]
impl InstanceFactory for RuntimeInstanceFactory {
    async fn new_instance(
        &self,
        instance_id: InstanceId,
        expect_ready_request: bool,
    ) -> Result<Arc<Instance>> {
        debug!(
            instance_id = %instance_id,
            expect_ready_request,
            max_concurrent_requests = self.config.max_concurrent_requests,
            "Creating instance"
        );
        let proxy = (self.new_proxy)(&instance_id);
        Ok(Instance::new(
            self.request_registry.clone(),
            instance_id,
            proxy,
            self.config.max_concurrent_requests,
            self.config.max_background_threads,
            expect_ready_request,
        ))
    }

    fn get_restart_directories(&self) -> Vec<PathBuf> {
        self.config.restart_directories.clone()
    }

    fn file_change_restart_policy(&self) -> FileChangeRestartPolicy {
        self.config.restart_policy
    }

    fn max_concurrent_requests(&self) -> usize {
        self.config.max_concurrent_requests
    }

    fn max_background_threads(&self) -> usize {
        self.config.max_background_threads
    }
}
