//! RuntimeProxy - contract for runtime process integrations
//!
//! A proxy wraps one backend process (interpreter, sandboxed worker) and
//! executes requests on its behalf. Each proxy is exclusively owned by the
//! [`Instance`](crate::Instance) that created it and is never shared.

use async_trait::async_trait;
use bytes::Bytes;
use rp_common::{Environ, RequestKind, ResponseSink, UrlMap, UrlMatch};

/// Manages a runtime process and executes requests against it.
///
/// The proxy must tolerate up to the instance's `max_concurrent_requests`
/// simultaneous `handle` calls.
#[async_trait]
pub trait RuntimeProxy: Send + Sync {
    /// Start the runtime process and wait until it is ready to serve.
    async fn start(&self) -> anyhow::Result<()>;

    /// Serve one request by forwarding it to the runtime process.
    ///
    /// Returns the fully materialized response body. Headers and status are
    /// reported through `sink` before the first body chunk.
    async fn handle(
        &self,
        environ: &Environ,
        sink: &mut dyn ResponseSink,
        url_map: &UrlMap,
        url_match: &UrlMatch,
        request_id: &str,
        request_kind: RequestKind,
    ) -> anyhow::Result<Vec<Bytes>>;

    /// Terminate the runtime process.
    ///
    /// The owning instance guarantees at most one call.
    async fn quit(&self);
}
