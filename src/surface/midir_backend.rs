//! midir implementation of the MIDI transport

use midir::{MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection, SendError};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::backend::{MidiBackend, PortInfo, RawMessage, TransportError};
use crate::midi::format_hex;

/// Input queue depth; messages beyond it are dropped until the loop drains
const INPUT_QUEUE_CAPACITY: usize = 1000;

/// MIDI transport backed by midir (ALSA sequencer on Linux)
pub struct MidirBackend {
    client_name: String,
    input_conn: Option<MidiInputConnection<()>>,
    output_conn: Option<MidiOutputConnection>,
    event_rx: Option<mpsc::Receiver<RawMessage>>,
}

impl MidirBackend {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
            input_conn: None,
            output_conn: None,
            event_rx: None,
        }
    }

    fn driver_error(context: &str, e: impl std::fmt::Display) -> TransportError {
        TransportError::Driver(format!("{}: {}", context, e))
    }
}

impl MidiBackend for MidirBackend {
    fn ports(&self) -> Result<Vec<PortInfo>, TransportError> {
        let midi_in = MidiInput::new(&format!("{}-scanner-in", self.client_name))
            .map_err(|e| Self::driver_error("Failed to create MIDI input", e))?;
        let midi_out = MidiOutput::new(&format!("{}-scanner-out", self.client_name))
            .map_err(|e| Self::driver_error("Failed to create MIDI output", e))?;

        let mut ports = Vec::new();
        for (id, port) in midi_in.ports().iter().enumerate() {
            if let Ok(name) = midi_in.port_name(port) {
                ports.push(PortInfo { id, name, is_input: true, is_output: false });
            }
        }
        for (id, port) in midi_out.ports().iter().enumerate() {
            if let Ok(name) = midi_out.port_name(port) {
                ports.push(PortInfo { id, name, is_input: false, is_output: true });
            }
        }

        debug!("Found {} MIDI ports", ports.len());
        Ok(ports)
    }

    fn open(&mut self, input: &PortInfo, output: &PortInfo) -> Result<(), TransportError> {
        self.close();

        // Connect input
        let midi_in = MidiInput::new(&format!("{}-in", self.client_name))
            .map_err(|e| Self::driver_error("Failed to create MIDI input", e))?;

        let in_ports = midi_in.ports();
        let in_port = in_ports
            .get(input.id)
            .filter(|p| midi_in.port_name(p).ok().as_deref() == Some(input.name.as_str()))
            .ok_or_else(|| TransportError::Driver(format!("Input port '{}' vanished", input.name)))?;

        let (event_tx, event_rx) = mpsc::channel(INPUT_QUEUE_CAPACITY);

        let input_conn = midi_in
            .connect(
                in_port,
                &self.client_name,
                move |timestamp, data, _| {
                    trace!("RX {}", format_hex(data));
                    if data.len() < 2 {
                        return;
                    }
                    let message = RawMessage {
                        status: data[0],
                        data1: data[1],
                        data2: data.get(2).copied().unwrap_or(0),
                        timestamp,
                    };
                    if event_tx.try_send(message).is_err() {
                        warn!("MIDI input queue full, dropping {}", format_hex(data));
                    }
                },
                (),
            )
            .map_err(|e| Self::driver_error("Failed to connect to input port", e))?;

        // Connect output
        let midi_out = MidiOutput::new(&format!("{}-out", self.client_name))
            .map_err(|e| Self::driver_error("Failed to create MIDI output", e))?;

        let out_ports = midi_out.ports();
        let out_port = out_ports
            .get(output.id)
            .filter(|p| midi_out.port_name(p).ok().as_deref() == Some(output.name.as_str()))
            .ok_or_else(|| TransportError::Driver(format!("Output port '{}' vanished", output.name)))?;

        let output_conn = midi_out
            .connect(out_port, &self.client_name)
            .map_err(|e| Self::driver_error("Failed to connect to output port", e))?;

        self.input_conn = Some(input_conn);
        self.output_conn = Some(output_conn);
        self.event_rx = Some(event_rx);

        debug!("Opened MIDI ports '{}' / '{}'", input.name, output.name);
        Ok(())
    }

    fn read(&mut self, max: usize) -> Vec<RawMessage> {
        let mut messages = Vec::new();
        if let Some(rx) = self.event_rx.as_mut() {
            while messages.len() < max {
                match rx.try_recv() {
                    Ok(message) => messages.push(message),
                    Err(_) => break,
                }
            }
        }
        messages
    }

    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let conn = self
            .output_conn
            .as_mut()
            .ok_or_else(|| TransportError::Driver("Not connected to output port".to_string()))?;

        conn.send(data).map_err(|e| match e {
            SendError::InvalidData(reason) => TransportError::InvalidData(reason.to_string()),
            SendError::Other(reason) => TransportError::Driver(reason.to_string()),
        })?;

        trace!("TX {}", format_hex(data));
        Ok(())
    }

    fn close(&mut self) {
        if let Some(conn) = self.input_conn.take() {
            conn.close();
        }
        if let Some(conn) = self.output_conn.take() {
            conn.close();
        }
        self.event_rx = None;
    }
}
