//! MIDI utilities and message types
//!
//! Provides parsing and encoding for the channel messages a fader/button
//! surface speaks, plus hex formatting for trace output.

use std::fmt;

/// Status class nibbles
pub const NOTE_OFF: u8 = 0x80;
pub const NOTE_ON: u8 = 0x90;
pub const CONTROL_CHANGE: u8 = 0xB0;

/// MIDI message types understood by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    /// Note Off: channel (0-15), note (0-127), velocity (0-127)
    NoteOff { channel: u8, note: u8, velocity: u8 },

    /// Note On: channel (0-15), note (0-127), velocity (1-127)
    NoteOn { channel: u8, note: u8, velocity: u8 },

    /// Control Change: channel (0-15), cc (0-127), value (0-127)
    ControlChange { channel: u8, cc: u8, value: u8 },
}

impl MidiMessage {
    /// Parse a MIDI message from its status and data bytes.
    ///
    /// Returns `None` for every class other than note on/off and control
    /// change, and for data-first (running status) input.
    pub fn parse(status: u8, data1: u8, data2: u8) -> Option<Self> {
        if status < 0x80 || status >= 0xF0 {
            return None;
        }

        let channel = status & 0x0F;
        let data1 = data1 & 0x7F;
        let data2 = data2 & 0x7F;

        match status & 0xF0 {
            NOTE_OFF => Some(MidiMessage::NoteOff {
                channel,
                note: data1,
                velocity: data2,
            }),
            NOTE_ON => {
                // Note On with velocity 0 = Note Off
                if data2 == 0 {
                    Some(MidiMessage::NoteOff { channel, note: data1, velocity: 0 })
                } else {
                    Some(MidiMessage::NoteOn { channel, note: data1, velocity: data2 })
                }
            }
            CONTROL_CHANGE => Some(MidiMessage::ControlChange {
                channel,
                cc: data1,
                value: data2,
            }),
            _ => None,
        }
    }

    /// Encode the message to MIDI bytes
    pub fn encode(&self) -> [u8; 3] {
        match *self {
            MidiMessage::NoteOff { channel, note, velocity } => {
                [NOTE_OFF | (channel & 0x0F), note & 0x7F, velocity & 0x7F]
            }
            MidiMessage::NoteOn { channel, note, velocity } => {
                [NOTE_ON | (channel & 0x0F), note & 0x7F, velocity & 0x7F]
            }
            MidiMessage::ControlChange { channel, cc, value } => {
                [CONTROL_CHANGE | (channel & 0x0F), cc & 0x7F, value & 0x7F]
            }
        }
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MidiMessage::NoteOff { channel, note, velocity } => {
                write!(f, "NoteOff ch:{} n:{} v:{}", channel + 1, note, velocity)
            }
            MidiMessage::NoteOn { channel, note, velocity } => {
                write!(f, "NoteOn ch:{} n:{} v:{}", channel + 1, note, velocity)
            }
            MidiMessage::ControlChange { channel, cc, value } => {
                write!(f, "CC ch:{} cc:{} v:{}", channel + 1, cc, value)
            }
        }
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
