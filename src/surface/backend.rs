//! MIDI transport boundary
//!
//! The link only needs to list ports, open one input/output pair, drain raw
//! input and write raw output. Everything OS-specific lives behind
//! [`MidiBackend`].

use thiserror::Error;

/// One port descriptor as reported by the MIDI subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Index within its direction's port list
    pub id: usize,
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
}

/// A raw three-byte channel message with its arrival timestamp (microseconds)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawMessage {
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
    pub timestamp: u64,
}

impl RawMessage {
    pub fn new(status: u8, data1: u8, data2: u8) -> Self {
        Self { status, data1, data2, timestamp: 0 }
    }

    pub fn bytes(&self) -> [u8; 3] {
        [self.status, self.data1, self.data2]
    }
}

/// Failures reported by a MIDI transport
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Host or driver level failure (port vanished, sequencer error)
    #[error("MIDI driver error: {0}")]
    Driver(String),

    /// The transport rejected the data itself
    #[error("invalid MIDI data: {0}")]
    InvalidData(String),
}

/// MIDI transport used by [`super::ControlSurfaceLink`]
pub trait MidiBackend {
    /// List every input and output port currently present
    fn ports(&self) -> Result<Vec<PortInfo>, TransportError>;

    /// Open the given input and output ports, replacing any open pair
    fn open(&mut self, input: &PortInfo, output: &PortInfo) -> Result<(), TransportError>;

    /// Take up to `max` buffered input messages without blocking
    fn read(&mut self, max: usize) -> Vec<RawMessage>;

    /// Write raw bytes to the open output port
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Drop both ports
    fn close(&mut self);
}
