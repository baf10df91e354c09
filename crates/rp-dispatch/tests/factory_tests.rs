//! InstanceFactory Tests
//!
//! Tests for:
//! - Config carry-over into created instances
//! - Restart directories and restart policy
//! - Default notification hooks

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use rp_common::{
    ConfigChange, Environ, FileChangeRestartPolicy, InstanceConfig, InstanceId, RequestKind,
    ResponseSink, UrlMap, UrlMatch,
};
use rp_dispatch::{InMemoryRequestRegistry, InstanceFactory, RuntimeInstanceFactory, RuntimeProxy};

#[derive(Default)]
struct NoopRuntimeProxy;

#[async_trait]
impl RuntimeProxy for NoopRuntimeProxy {
    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn handle(
        &self,
        _environ: &Environ,
        sink: &mut dyn ResponseSink,
        _url_map: &UrlMap,
        _url_match: &UrlMatch,
        _request_id: &str,
        _request_kind: RequestKind,
    ) -> anyhow::Result<Vec<Bytes>> {
        sink.start_response(200, Vec::new());
        Ok(Vec::new())
    }

    async fn quit(&self) {}
}

fn new_factory(config: InstanceConfig) -> (RuntimeInstanceFactory, Arc<AtomicU32>) {
    let registry = Arc::new(InMemoryRequestRegistry::new());
    let proxies_created = Arc::new(AtomicU32::new(0));
    let counter = proxies_created.clone();
    let factory = RuntimeInstanceFactory::new(registry, config, move |_id| {
        counter.fetch_add(1, Ordering::SeqCst);
        Box::new(NoopRuntimeProxy)
    });
    (factory, proxies_created)
}

#[tokio::test]
async fn test_new_instance_carries_factory_config() {
    let config = InstanceConfig {
        max_concurrent_requests: 7,
        max_background_threads: 3,
        ..Default::default()
    };
    let (factory, proxies_created) = new_factory(config);

    assert_eq!(factory.max_concurrent_requests(), 7);
    assert_eq!(factory.max_background_threads(), 3);

    let instance = factory
        .new_instance(InstanceId::from(0), false)
        .await
        .unwrap();
    assert_eq!(proxies_created.load(Ordering::SeqCst), 1);
    assert_eq!(instance.remaining_request_capacity(), 7);
    assert!(!instance.handling_ready_request());

    assert!(instance.start().await);
    assert_eq!(instance.remaining_background_thread_capacity(), 3);
}

#[tokio::test]
async fn test_new_instance_with_ready_request() {
    let (factory, _) = new_factory(InstanceConfig::default());

    let instance = factory
        .new_instance(InstanceId::from("warm-1"), true)
        .await
        .unwrap();
    assert!(instance.handling_ready_request());
    assert!(!instance.can_accept_requests());
    assert_eq!(instance.instance_id(), &InstanceId::from("warm-1"));
}

#[tokio::test]
async fn test_restart_directories_come_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = InstanceConfig {
        restart_directories: vec![dir.path().to_path_buf()],
        ..Default::default()
    };
    let (factory, _) = new_factory(config);

    assert_eq!(factory.get_restart_directories(), vec![dir.path().to_path_buf()]);
}

#[tokio::test]
async fn test_restart_policy_is_declarative() {
    let config = InstanceConfig {
        restart_policy: FileChangeRestartPolicy::Never,
        ..Default::default()
    };
    let (factory, _) = new_factory(config);

    assert_eq!(
        factory.file_change_restart_policy(),
        FileChangeRestartPolicy::Never
    );
}

#[tokio::test]
async fn test_default_hooks_are_noops() {
    let (factory, _) = new_factory(InstanceConfig::default());

    factory.files_changed();
    let mut changes = HashSet::new();
    changes.insert(ConfigChange::EnvVariablesChanged);
    changes.insert(ConfigChange::HandlersChanged);
    factory.configuration_changed(&changes);

    assert!(!factory.supports_interactive_requests());
    assert!(factory.start_url_map().is_none());
    assert!(factory.warmup_url_map().is_none());
}
