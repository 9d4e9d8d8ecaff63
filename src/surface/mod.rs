//! Control surface link
//!
//! Owns the hardware connection: opens the input/output port pair by exact
//! device name, decodes raw messages into edge-triggered [`ControlEvent`]s
//! and keeps track of which LED values were last written so redundant
//! writes never reach the wire.

pub mod backend;
pub mod midir_backend;

use thiserror::Error;
use tracing::{debug, info, trace, warn};

pub use backend::{MidiBackend, PortInfo, RawMessage, TransportError};
pub use midir_backend::MidirBackend;

use crate::config::DeviceConfig;
use crate::midi::{format_hex, MidiMessage};
use crate::status::ConnectionState;

/// Typed input event from the surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    Button { channel: usize, pressed: bool },
    Slider { channel: usize, position: u8 },
}

impl ControlEvent {
    pub fn channel(&self) -> usize {
        match *self {
            ControlEvent::Button { channel, .. } | ControlEvent::Slider { channel, .. } => channel,
        }
    }
}

/// Last-known state of one physical channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelState {
    pub pressed: bool,
    /// `None` until the first slider message after connecting
    pub slider: Option<u8>,
    /// `None` until the first LED write after connecting
    pub led: Option<bool>,
}

/// Errors surfaced by the link
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("MIDI device '{name}' not found (needs both an input and an output port)")]
    DeviceNotFound { name: String },

    #[error("MIDI link lost: {0}")]
    LinkLost(String),

    #[error("MIDI transport failure: {0}")]
    Fatal(String),
}

impl LinkError {
    /// Whether the reconnect loop should keep trying after this error
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, LinkError::Fatal(_))
    }
}

impl From<TransportError> for LinkError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Driver(reason) => LinkError::LinkLost(reason),
            TransportError::InvalidData(reason) => LinkError::Fatal(reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Touched {
    Button(usize),
    Slider(usize),
}

/// Connection to the physical control surface
pub struct ControlSurfaceLink {
    backend: Box<dyn MidiBackend>,
    channels: Vec<ChannelState>,
    state: ConnectionState,
    led_note_offset: u8,
    led_velocity: u8,
}

impl ControlSurfaceLink {
    pub fn new(backend: Box<dyn MidiBackend>, config: &DeviceConfig) -> Self {
        Self {
            backend,
            channels: vec![ChannelState::default(); config.channels],
            state: ConnectionState::Disconnected,
            led_note_offset: config.led_note_offset,
            led_velocity: config.led_velocity,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn channel_state(&self, channel: usize) -> Option<&ChannelState> {
        self.channels.get(channel)
    }

    /// Open the device whose input and output ports are both named `device_name`
    pub fn connect(&mut self, device_name: &str) -> Result<ConnectionState, LinkError> {
        if self.state.is_connected() {
            self.backend.close();
        }
        self.state = ConnectionState::Connecting;

        let result = self.open_ports(device_name);
        match result {
            Ok(()) => {
                self.channels.fill(ChannelState::default());
                self.state = ConnectionState::Connected;
                info!("Control surface '{}' connected", device_name);
            }
            Err(_) => {
                self.state = ConnectionState::Disconnected;
            }
        }
        result.map(|_| self.state)
    }

    fn open_ports(&mut self, device_name: &str) -> Result<(), LinkError> {
        let ports = self.backend.ports()?;

        let input = ports.iter().find(|p| p.is_input && p.name == device_name);
        let output = ports.iter().find(|p| p.is_output && p.name == device_name);

        let (input, output) = match (input, output) {
            (Some(input), Some(output)) => (input, output),
            _ => {
                debug!(
                    "Device '{}' incomplete: input={} output={}",
                    device_name,
                    input.is_some(),
                    output.is_some()
                );
                return Err(LinkError::DeviceNotFound { name: device_name.to_string() });
            }
        };

        debug!("Found input #{} and output #{} for '{}'", input.id, output.id, device_name);
        self.backend.open(input, output)?;
        Ok(())
    }

    /// Whether `device_name` still enumerates as both an input and an output
    pub fn device_present(&self, device_name: &str) -> Result<bool, LinkError> {
        let ports = self.backend.ports()?;
        let input = ports.iter().any(|p| p.is_input && p.name == device_name);
        let output = ports.iter().any(|p| p.is_output && p.name == device_name);
        Ok(input && output)
    }

    /// Drop both ports
    pub fn disconnect(&mut self) {
        self.backend.close();
        if self.state != ConnectionState::Disconnected {
            info!("Control surface disconnected");
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Record a confirmed unplug
    pub fn mark_lost(&mut self) {
        if self.state.is_connected() {
            warn!("Control surface link lost");
        }
        self.backend.close();
        self.state = ConnectionState::Disconnected;
        for channel in &mut self.channels {
            channel.led = None;
        }
    }

    /// Read up to `max_events` raw messages and report changed channels.
    ///
    /// Messages for the same channel within one call collapse to their final
    /// value; a channel whose final value equals the value before the call
    /// produces no event. Events are ordered by each channel's first message.
    pub fn poll(&mut self, max_events: usize) -> Vec<ControlEvent> {
        if !self.state.is_connected() {
            return Vec::new();
        }

        let raw = self.backend.read(max_events);
        if raw.is_empty() {
            return Vec::new();
        }

        let snapshot = self.channels.clone();
        let mut touched: Vec<Touched> = Vec::new();

        for message in &raw {
            let Some(parsed) = MidiMessage::parse(message.status, message.data1, message.data2) else {
                trace!("Surface RX {} (ignored)", format_hex(&message.bytes()));
                continue;
            };
            trace!("Surface RX {}", parsed);

            let (key, channel) = match parsed {
                MidiMessage::ControlChange { cc, value, .. } => {
                    let channel = cc as usize;
                    if let Some(state) = self.channels.get_mut(channel) {
                        state.slider = Some(value);
                    }
                    (Touched::Slider(channel), channel)
                }
                MidiMessage::NoteOn { note, .. } => {
                    let channel = note as usize;
                    if let Some(state) = self.channels.get_mut(channel) {
                        state.pressed = true;
                    }
                    (Touched::Button(channel), channel)
                }
                MidiMessage::NoteOff { note, .. } => {
                    let channel = note as usize;
                    if let Some(state) = self.channels.get_mut(channel) {
                        state.pressed = false;
                    }
                    (Touched::Button(channel), channel)
                }
            };

            if channel >= self.channels.len() {
                debug!("Ignoring message for channel {} (surface has {})", channel, self.channels.len());
                continue;
            }
            if !touched.contains(&key) {
                touched.push(key);
            }
        }

        touched
            .into_iter()
            .filter_map(|key| match key {
                Touched::Button(channel) => {
                    let pressed = self.channels[channel].pressed;
                    (pressed != snapshot[channel].pressed)
                        .then_some(ControlEvent::Button { channel, pressed })
                }
                Touched::Slider(channel) => {
                    let position = self.channels[channel].slider;
                    if position != snapshot[channel].slider {
                        position.map(|position| ControlEvent::Slider { channel, position })
                    } else {
                        None
                    }
                }
            })
            .collect()
    }

    /// Light (`on`) or darken the LED of `channel`.
    ///
    /// Skipped when `on` equals the last written value unless `force` is set.
    /// A driver-level write failure marks the link lost and returns
    /// [`LinkError::LinkLost`].
    pub fn set_led(&mut self, channel: usize, on: bool, force: bool) -> Result<(), LinkError> {
        let Some(state) = self.channels.get(channel) else {
            debug!("LED request for channel {} ignored (surface has {})", channel, self.channels.len());
            return Ok(());
        };

        if !force && state.led == Some(on) {
            return Ok(());
        }

        if !self.state.is_connected() {
            return Err(LinkError::LinkLost("control surface not connected".to_string()));
        }

        let note = (channel as u8).saturating_add(self.led_note_offset);
        let message = if on {
            MidiMessage::NoteOn { channel: 0, note, velocity: self.led_velocity }
        } else {
            MidiMessage::NoteOff { channel: 0, note, velocity: 0 }
        };

        match self.backend.send(&message.encode()) {
            Ok(()) => {
                self.channels[channel].led = Some(on);
                trace!("LED {} -> {}", channel, if on { "on" } else { "off" });
                Ok(())
            }
            Err(TransportError::Driver(reason)) => {
                warn!("LED write failed on channel {}: {}", channel, reason);
                self.mark_lost();
                Err(LinkError::LinkLost(reason))
            }
            Err(e) => Err(e.into()),
        }
    }
}
