//! Instance - lifecycle and admission control for one runtime process
//!
//! An instance wraps one [`RuntimeProxy`] and gates every request through
//! its state machine: not started -> started -> (quitting) -> quit. It
//! enforces the concurrency ceiling, the mandatory readiness request, and
//! the graceful-shutdown handshake, and keeps the rolling latency/QPS
//! window the owning pool reads for load balancing.
//!
//! All mutable state lives behind one mutex per instance; the runtime
//! proxy itself is only ever invoked outside that lock.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use rp_common::{Environ, InstanceId, RequestKind, ResponseSink, UrlMap, UrlMatch};

use crate::error::DispatchError;
use crate::history::RequestWindow;
use crate::proxy::RuntimeProxy;
use crate::registry::RequestRegistry;
use crate::Result;

/// Options for [`Instance::quit`].
#[derive(Debug, Clone, Copy, Default)]
pub struct QuitOptions {
    allow_async: bool,
    force: bool,
    expect_shutdown: bool,
}

impl QuitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defer the quit until outstanding work completes, instead of failing
    /// when the instance is serving.
    pub fn allow_async(mut self) -> Self {
        self.allow_async = true;
        self
    }

    /// Quit even while requests are outstanding. Overrides `allow_async`.
    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }

    /// Do not quit yet: a shutdown request will be delivered first, and its
    /// completion triggers the actual teardown.
    pub fn expect_shutdown(mut self) -> Self {
        self.expect_shutdown = true;
        self
    }
}

/// Mutable instance state, guarded by the per-instance mutex.
struct InstanceState {
    num_outstanding_requests: usize,
    num_running_background_threads: usize,
    total_requests: u64,
    started: bool,
    quitting: bool,
    quit: bool,
    expecting_ready_request: bool,
    expecting_shutdown_request: bool,
    last_request_end_time: Instant,
    request_history: RequestWindow,
}

/// Handles requests through a [`RuntimeProxy`].
pub struct Instance {
    instance_id: InstanceId,
    max_concurrent_requests: usize,
    max_background_threads: usize,
    runtime_proxy: Box<dyn RuntimeProxy>,
    request_registry: Arc<dyn RequestRegistry>,
    state: Mutex<InstanceState>,
    /// Wakes tasks parked in [`Instance::wait`] when capacity frees up or
    /// the instance quits.
    capacity: Notify,
    healthy: AtomicBool,
    self_handle: Weak<Instance>,
}

impl Instance {
    /// Create an instance in the not-started state.
    ///
    /// `max_concurrent_requests` should be 1 for runtimes without
    /// concurrent-request support. With `expect_ready_request`, only a
    /// [`RequestKind::Ready`] request is admitted until one completes.
    pub fn new(
        request_registry: Arc<dyn RequestRegistry>,
        instance_id: InstanceId,
        runtime_proxy: Box<dyn RuntimeProxy>,
        max_concurrent_requests: usize,
        max_background_threads: usize,
        expect_ready_request: bool,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_handle| Self {
            instance_id,
            max_concurrent_requests,
            max_background_threads,
            runtime_proxy,
            request_registry,
            state: Mutex::new(InstanceState {
                num_outstanding_requests: 0,
                num_running_background_threads: 0,
                total_requests: 0,
                started: false,
                quitting: false,
                quit: false,
                expecting_ready_request: expect_ready_request,
                expecting_shutdown_request: false,
                last_request_end_time: Instant::now(),
                request_history: RequestWindow::new(),
            }),
            capacity: Notify::new(),
            healthy: AtomicBool::new(true),
            self_handle: self_handle.clone(),
        })
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// Total requests this instance has handled.
    pub fn total_requests(&self) -> u64 {
        self.state.lock().total_requests
    }

    /// Extra requests the instance can currently admit.
    pub fn remaining_request_capacity(&self) -> usize {
        let state = self.state.lock();
        self.max_concurrent_requests - state.num_outstanding_requests
    }

    /// Extra background threads the instance can currently reserve.
    pub fn remaining_background_thread_capacity(&self) -> usize {
        let state = self.state.lock();
        self.max_background_threads - state.num_running_background_threads
    }

    pub fn num_outstanding_requests(&self) -> usize {
        self.state.lock().num_outstanding_requests
    }

    /// How long the instance has been idle. Zero while handling requests
    /// or before the instance has started.
    pub fn idle_time(&self) -> Duration {
        let state = self.state.lock();
        if state.num_outstanding_requests > 0 || !state.started {
            Duration::ZERO
        } else {
            state.last_request_end_time.elapsed()
        }
    }

    /// True while the instance is handling, or will be sent, its readiness
    /// request.
    pub fn handling_ready_request(&self) -> bool {
        self.state.lock().expecting_ready_request
    }

    /// Mean request latency over the trailing 60 seconds.
    pub fn latency_60s(&self) -> Duration {
        self.state.lock().request_history.mean_latency()
    }

    /// Average queries-per-second over the trailing 60 seconds.
    pub fn qps_60s(&self) -> f64 {
        self.state.lock().request_history.qps()
    }

    /// True once a quit has been requested or scheduled, including a
    /// deferred quit that is still draining.
    pub fn has_quit(&self) -> bool {
        let state = self.state.lock();
        state.quit || state.quitting || state.expecting_shutdown_request
    }

    /// True if [`Instance::handle`] will accept ordinary requests. Does
    /// not consider outstanding request volume.
    pub fn can_accept_requests(&self) -> bool {
        let state = self.state.lock();
        !state.quit
            && !state.quitting
            && !state.expecting_ready_request
            && !state.expecting_shutdown_request
            && state.started
            && self.healthy.load(Ordering::Relaxed)
    }

    pub fn healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn set_health(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    /// Start the instance and its runtime proxy.
    ///
    /// Returns `true` if the instance started, `false` if it has already
    /// been quit or the proxy failed to start. A start failure leaves the
    /// instance not-started; the caller may retry or recreate it.
    pub async fn start(&self) -> bool {
        if self.state.lock().quit {
            return false;
        }

        if let Err(error) = self.runtime_proxy.start().await {
            tracing::error!(
                instance_id = %self.instance_id,
                error = %error,
                "Runtime proxy failed to start"
            );
            return false;
        }

        let quit_while_starting = {
            let mut state = self.state.lock();
            if state.quit {
                true
            } else {
                state.last_request_end_time = Instant::now();
                state.started = true;
                false
            }
        };

        if quit_while_starting {
            // Lost the race with quit(); quit() skipped the proxy because
            // the instance had not started, so tear it down here.
            self.runtime_proxy.quit().await;
            return false;
        }

        debug!(instance = %self, "Started instance");
        // Be optimistic about a fresh process so it can serve its first
        // request immediately.
        self.set_health(true);
        true
    }

    /// Quit the instance and its runtime proxy.
    ///
    /// With outstanding work and neither `force` nor `allow_async`, fails
    /// with [`DispatchError::CannotQuitServingInstance`]. See
    /// [`QuitOptions`] for the deferred and shutdown-handshake variants.
    pub async fn quit(&self, options: QuitOptions) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.quit {
                return Ok(());
            }
            if !state.started {
                state.quit = true;
                return Ok(());
            }
            if options.expect_shutdown {
                state.expecting_shutdown_request = true;
                return Ok(());
            }
            if (state.num_outstanding_requests > 0
                || state.num_running_background_threads > 0
                || state.expecting_shutdown_request)
                && !options.force
            {
                if options.allow_async {
                    state.quitting = true;
                    return Ok(());
                }
                return Err(DispatchError::CannotQuitServingInstance);
            }
            state.quit = true;
        }

        self.runtime_proxy.quit().await;
        self.capacity.notify_waiters();
        debug!(instance = %self, "Quit instance");
        Ok(())
    }

    /// Reserve a background thread slot.
    ///
    /// The reservation is released when the matching
    /// [`RequestKind::Background`] request completes through
    /// [`Instance::handle`].
    pub fn reserve_background_thread(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.quit {
            return Err(DispatchError::CannotAcceptRequests("instance has been quit"));
        }
        if !state.started {
            return Err(DispatchError::CannotAcceptRequests("instance has not started"));
        }
        if state.num_running_background_threads >= self.max_background_threads {
            return Err(DispatchError::CannotAcceptRequests(
                "instance has no additional background thread capacity",
            ));
        }
        state.num_running_background_threads += 1;
        Ok(())
    }

    /// Handle a request by forwarding it to the runtime proxy.
    ///
    /// Admission, request counting, and handler-of-record registration
    /// happen atomically before the proxy runs; completion bookkeeping runs
    /// whether the proxy succeeds or fails, and proxy failures then
    /// propagate to the caller.
    pub async fn handle(
        &self,
        environ: &Environ,
        sink: &mut dyn ResponseSink,
        url_map: &UrlMap,
        url_match: &UrlMatch,
        request_id: &str,
        request_kind: RequestKind,
    ) -> Result<Vec<Bytes>> {
        let start_time = Instant::now();
        {
            let mut state = self.state.lock();
            if state.quit {
                return Err(DispatchError::CannotAcceptRequests("instance has been quit"));
            }
            if !state.started {
                return Err(DispatchError::CannotAcceptRequests("instance has not started"));
            }

            if !matches!(request_kind, RequestKind::Background | RequestKind::Shutdown) {
                if state.quitting {
                    return Err(DispatchError::CannotAcceptRequests(
                        "instance is shutting down",
                    ));
                }
                if state.expecting_ready_request && request_kind != RequestKind::Ready {
                    return Err(DispatchError::CannotAcceptRequests(
                        "instance is waiting for its ready request",
                    ));
                }
                if state.num_outstanding_requests >= self.max_concurrent_requests {
                    return Err(DispatchError::CannotAcceptRequests(
                        "instance has no additional capacity",
                    ));
                }
                state.num_outstanding_requests += 1;
            }

            if let Some(instance) = self.self_handle.upgrade() {
                self.request_registry.set_request_instance(request_id, &instance);
            }
            state.total_requests += 1;
        }

        let result = self
            .runtime_proxy
            .handle(environ, sink, url_map, url_match, request_id, request_kind)
            .await;

        self.finish_request(request_kind, start_time).await;
        debug!(
            instance = %self,
            elapsed = ?start_time.elapsed(),
            "Request handled"
        );

        Ok(result?)
    }

    /// Completion bookkeeping for one request; runs on success and failure.
    async fn finish_request(&self, request_kind: RequestKind, start_time: Instant) {
        let (completed_shutdown, finalize_quit) = {
            let mut state = self.state.lock();
            if request_kind == RequestKind::Ready {
                state.expecting_ready_request = false;
            }
            if request_kind == RequestKind::Background {
                state.num_running_background_threads =
                    state.num_running_background_threads.saturating_sub(1);
            } else if request_kind != RequestKind::Shutdown {
                state.num_outstanding_requests = state.num_outstanding_requests.saturating_sub(1);
            }
            state.last_request_end_time = Instant::now();
            let last_request_end_time = state.last_request_end_time;
            state
                .request_history
                .record(start_time, last_request_end_time);

            match request_kind {
                RequestKind::Ready => {
                    // A newly-ready instance can admit a full burst.
                    for _ in 0..self.max_concurrent_requests {
                        self.capacity.notify_one();
                    }
                }
                RequestKind::Normal => self.capacity.notify_one(),
                _ => {}
            }

            let completed_shutdown = request_kind == RequestKind::Shutdown;
            if completed_shutdown {
                state.expecting_shutdown_request = false;
            }
            let finalize_quit = state.quitting
                && state.num_outstanding_requests == 0
                && state.num_running_background_threads == 0;
            (completed_shutdown, finalize_quit)
        };

        if completed_shutdown {
            // The shutdown request completing is itself the teardown
            // trigger.
            let _ = self.quit(QuitOptions::new().allow_async()).await;
        }
        if finalize_quit {
            // allow_async: an exempt request admitted after the check above
            // defers the quit again instead of failing it.
            let _ = self.quit(QuitOptions::new().allow_async()).await;
        }
    }

    /// Wait until the instance can admit a request, it quits, or the
    /// deadline passes.
    ///
    /// Returns whether capacity and acceptability held at return time. The
    /// admission predicate is re-checked on every wakeup.
    pub async fn wait(&self, deadline: tokio::time::Instant) -> bool {
        let mut notified = std::pin::pin!(self.capacity.notified());
        loop {
            // Register for wakeups before checking the predicate so a
            // notification between check and park is not lost.
            notified.as_mut().enable();
            {
                let state = self.state.lock();
                if self.admission_predicate(&state) {
                    return true;
                }
                if state.quit || state.quitting || state.expecting_shutdown_request {
                    return false;
                }
            }
            if tokio::time::timeout_at(deadline, notified.as_mut())
                .await
                .is_err()
            {
                let state = self.state.lock();
                return self.admission_predicate(&state);
            }
            notified.set(self.capacity.notified());
        }
    }

    fn admission_predicate(&self, state: &InstanceState) -> bool {
        state.num_outstanding_requests < self.max_concurrent_requests
            && !state.quit
            && !state.quitting
            && !state.expecting_ready_request
            && !state.expecting_shutdown_request
            && state.started
            && self.healthy.load(Ordering::Relaxed)
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        let mut tags = Vec::new();
        if !state.started {
            tags.push("not started");
        }
        if state.quitting {
            tags.push("quitting");
        }
        if state.quit {
            tags.push("quit");
        }
        if state.expecting_ready_request {
            tags.push("handling ready request");
        }

        write!(
            f,
            "<Instance {}: {}/{}, total: {}",
            self.instance_id,
            state.num_outstanding_requests,
            self.max_concurrent_requests,
            state.total_requests
        )?;
        if !tags.is_empty() {
            write!(f, " [{}]", tags.join(" "))?;
        }
        write!(f, ">")
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}
