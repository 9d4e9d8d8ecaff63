//! Audio server transport boundary

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Audio server object classes the bridge can control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Output device
    Sink,
    /// Input device
    Source,
    /// One application's playback stream
    StreamInput,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StreamKind::Sink => "sink",
            StreamKind::Source => "source",
            StreamKind::StreamInput => "sink-input",
        };
        f.write_str(label)
    }
}

/// Server-side identity of one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle {
    pub kind: StreamKind,
    pub index: u32,
}

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.kind, self.index)
    }
}

/// One stream as listed by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub index: u32,
    pub name: String,
    pub mute: bool,
}

/// Failures reported by an audio transport
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The session with the server is gone
    #[error("audio server disconnected: {0}")]
    Disconnected(String),

    /// A single call failed; the session is still usable
    #[error("audio operation failed: {0}")]
    Transient(String),

    /// Unrecognized failure; not retried
    #[error("audio backend failure: {0}")]
    Fatal(String),
}

/// Audio server transport used by [`super::Mixer`]
#[async_trait]
pub trait AudioBackend: Send {
    /// Open a session and subscribe to stream add/remove/mute/volume changes
    async fn connect(&mut self, client_label: &str) -> Result<(), BackendError>;

    /// List every stream of one kind, in server order
    async fn list(&mut self, kind: StreamKind) -> Result<Vec<StreamInfo>, BackendError>;

    /// Set all channels of a stream to a linear volume
    async fn set_volume(&mut self, stream: StreamHandle, volume: f32) -> Result<(), BackendError>;

    async fn set_mute(&mut self, stream: StreamHandle, mute: bool) -> Result<(), BackendError>;

    /// Wait up to `timeout` for change notifications; returns how many arrived
    async fn process_events(&mut self, timeout: Duration) -> Result<usize, BackendError>;

    /// Highest linear volume the server accepts
    fn volume_ceiling(&self) -> f32 {
        1.0
    }
}
