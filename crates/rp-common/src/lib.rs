use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod config;
pub mod logging;

pub use config::{
    ConfigChange, ConfigError, DispatchConfig, FileChangeRestartPolicy, InstanceConfig,
};

// ============================================================================
// Request Types
// ============================================================================

/// The kind of request being dispatched to an instance.
///
/// Only `Normal` and `Interactive` requests represent ordinary traffic;
/// the other kinds are lifecycle probes with their own admission rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// An ordinary application request.
    Normal,
    /// The mandatory readiness/warmup probe sent before ordinary traffic.
    Ready,
    /// A request that runs a tracked background unit of work.
    Background,
    /// The graceful-teardown probe sent before the process is stopped.
    Shutdown,
    /// A command evaluation request, e.g. from an interactive shell.
    Interactive,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestKind::Normal => "normal",
            RequestKind::Ready => "ready",
            RequestKind::Background => "background",
            RequestKind::Shutdown => "shutdown",
            RequestKind::Interactive => "interactive",
        };
        f.write_str(name)
    }
}

/// A parsed request as handed over by the dispatcher.
///
/// The dispatch core never inspects these fields; they are carried through
/// to the runtime proxy unchanged.
#[derive(Debug, Clone, Default)]
pub struct Environ {
    pub method: String,
    pub path: String,
    pub query_string: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Environ {
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

// ============================================================================
// Response Sink
// ============================================================================

/// Receives the response produced by a runtime proxy.
///
/// `start_response` must be called at most once, before any body chunk is
/// written.
pub trait ResponseSink: Send {
    fn start_response(&mut self, status: u16, headers: Vec<(String, String)>);
    fn write_chunk(&mut self, chunk: Bytes);
}

/// A [`ResponseSink`] that buffers the full response in memory.
#[derive(Debug, Default)]
pub struct BufferedResponse {
    pub status: Option<u16>,
    pub headers: Vec<(String, String)>,
    pub chunks: Vec<Bytes>,
}

impl BufferedResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Concatenated body bytes written so far.
    pub fn body(&self) -> Vec<u8> {
        self.chunks.iter().flat_map(|c| c.iter().copied()).collect()
    }
}

impl ResponseSink for BufferedResponse {
    fn start_response(&mut self, status: u16, headers: Vec<(String, String)>) {
        self.status = Some(status);
        self.headers = headers;
    }

    fn write_chunk(&mut self, chunk: Bytes) {
        self.chunks.push(chunk);
    }
}

// ============================================================================
// Handler Configuration
// ============================================================================

/// Handler configuration matched against a request URL.
///
/// Opaque to the dispatch core; routing happens upstream and the matched
/// map is passed through to the runtime proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlMap {
    pub url: String,
    pub script: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub login_required: bool,
}

impl UrlMap {
    pub fn new(url: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            script: script.into(),
            secure: false,
            login_required: false,
        }
    }
}

/// Result of matching a request URL against a [`UrlMap`] pattern.
#[derive(Debug, Clone, Default)]
pub struct UrlMatch {
    pub pattern: String,
    pub captures: Vec<String>,
}

// ============================================================================
// Instance Identity
// ============================================================================

/// Unique (per module) id of an instance: a slot index or a symbolic name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InstanceId {
    Index(u32),
    Name(String),
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceId::Index(index) => write!(f, "{}", index),
            InstanceId::Name(name) => f.write_str(name),
        }
    }
}

impl From<u32> for InstanceId {
    fn from(index: u32) -> Self {
        InstanceId::Index(index)
    }
}

impl From<&str> for InstanceId {
    fn from(name: &str) -> Self {
        InstanceId::Name(name.to_string())
    }
}

impl From<String> for InstanceId {
    fn from(name: String) -> Self {
        InstanceId::Name(name)
    }
}
