//! mixbridge - MIDI control surface to PulseAudio mixer bridge
//!
//! Each physical channel (slider + button + LED) of a small MIDI surface
//! controls one audio stream: the slider sets its volume, the button toggles
//! its mute, the LED shows whether it is audible. Changes made elsewhere are
//! reflected back on the LEDs, and the bridge survives unplug/replug and
//! audio server restarts.

pub mod binding;
pub mod config;
pub mod hotplug;
pub mod midi;
pub mod mixer;
pub mod paths;
pub mod status;
pub mod surface;
pub mod sync;

#[cfg(test)]
mod testing;
