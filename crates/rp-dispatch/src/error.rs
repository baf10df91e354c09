use rp_common::InstanceId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    /// Admission was refused: the instance is quit, not started, shutting
    /// down, waiting on its readiness request, or out of capacity. Callers
    /// should retry against another instance or wait for capacity.
    #[error("instance cannot accept requests: {0}")]
    CannotAcceptRequests(&'static str),

    /// An immediate quit was requested while requests or background
    /// threads are outstanding. Callers should quit asynchronously, force
    /// the quit, or wait for drain.
    #[error("instance is serving and cannot be quit")]
    CannotQuitServingInstance,

    /// The referenced instance id is not serving.
    #[error("no serving instance with id: {0}")]
    InvalidInstanceId(InstanceId),

    /// A runtime proxy failure, propagated unchanged to the dispatcher.
    #[error("runtime proxy error: {0}")]
    Runtime(#[from] anyhow::Error),
}
