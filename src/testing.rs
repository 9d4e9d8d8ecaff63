//! Scripted transport doubles for unit and scenario tests
//!
//! Each double is a cheap clone over shared state, so a test keeps one handle
//! to script and inspect traffic after boxing the other into a component.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::hotplug::{HotplugAction, HotplugSource};
use crate::mixer::{AudioBackend, BackendError, StreamHandle, StreamInfo, StreamKind};
use crate::surface::{MidiBackend, PortInfo, RawMessage, TransportError};

// ---------------------------------------------------------------------------
// MIDI
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MidiState {
    ports: Vec<PortInfo>,
    open: bool,
    inbox: VecDeque<RawMessage>,
    sent: Vec<[u8; 3]>,
    open_count: usize,
    send_error: Option<TransportError>,
}

#[derive(Clone, Default)]
pub struct FakeMidi {
    state: Arc<Mutex<MidiState>>,
}

impl FakeMidi {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fake with `name` present as both input and output
    pub fn with_device(name: &str) -> Self {
        let midi = Self::new();
        midi.plug(name);
        midi
    }

    pub fn add_port(&self, name: &str, is_input: bool, is_output: bool) {
        let mut state = self.state.lock();
        let id = state
            .ports
            .iter()
            .filter(|p| p.is_input == is_input && p.is_output == is_output)
            .count();
        state.ports.push(PortInfo { id, name: name.to_string(), is_input, is_output });
    }

    pub fn plug(&self, name: &str) {
        self.add_port(name, true, false);
        self.add_port(name, false, true);
        self.state.lock().send_error = None;
    }

    /// Remove every port; the open pair dies and writes fail at driver level
    pub fn unplug(&self) {
        let mut state = self.state.lock();
        state.ports.clear();
        state.open = false;
        state.inbox.clear();
        state.send_error = Some(TransportError::Driver("device unplugged".to_string()));
    }

    /// Ports stop enumerating while the open pair keeps accepting writes
    pub fn drop_ports(&self) {
        self.state.lock().ports.clear();
    }

    /// Queue one incoming message
    pub fn push(&self, status: u8, data1: u8, data2: u8) {
        self.state.lock().inbox.push_back(RawMessage::new(status, data1, data2));
    }

    pub fn fail_sends(&self, error: TransportError) {
        self.state.lock().send_error = Some(error);
    }

    pub fn sent(&self) -> Vec<[u8; 3]> {
        self.state.lock().sent.clone()
    }

    pub fn clear_sent(&self) {
        self.state.lock().sent.clear();
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().open_count
    }
}

impl MidiBackend for FakeMidi {
    fn ports(&self) -> Result<Vec<PortInfo>, TransportError> {
        Ok(self.state.lock().ports.clone())
    }

    fn open(&mut self, input: &PortInfo, output: &PortInfo) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.ports.contains(input) || !state.ports.contains(output) {
            return Err(TransportError::Driver("port vanished".to_string()));
        }
        state.open = true;
        state.open_count += 1;
        Ok(())
    }

    fn read(&mut self, max: usize) -> Vec<RawMessage> {
        let mut state = self.state.lock();
        if !state.open {
            return Vec::new();
        }
        let count = max.min(state.inbox.len());
        state.inbox.drain(..count).collect()
    }

    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if let Some(error) = state.send_error.clone() {
            return Err(error);
        }
        if !state.open {
            return Err(TransportError::Driver("port not open".to_string()));
        }
        let mut bytes = [0u8; 3];
        for (slot, byte) in bytes.iter_mut().zip(data) {
            *slot = *byte;
        }
        state.sent.push(bytes);
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().open = false;
    }
}

// ---------------------------------------------------------------------------
// Audio server
// ---------------------------------------------------------------------------

struct AudioState {
    server_up: bool,
    session_up: bool,
    refusals: u32,
    streams: Vec<(StreamKind, StreamInfo)>,
    next_index: u32,
    connects: usize,
    volume_calls: Vec<(u32, f32)>,
    mute_calls: Vec<(u32, bool)>,
    failures: VecDeque<BackendError>,
    pending: usize,
    ceiling: f32,
}

impl Default for AudioState {
    fn default() -> Self {
        Self {
            server_up: true,
            session_up: false,
            refusals: 0,
            streams: Vec::new(),
            next_index: 0,
            connects: 0,
            volume_calls: Vec::new(),
            mute_calls: Vec::new(),
            failures: VecDeque::new(),
            pending: 0,
            ceiling: 1.0,
        }
    }
}

impl AudioState {
    /// Scripted failure for list/set calls, then the session check
    fn check_call(&mut self) -> Result<(), BackendError> {
        if let Some(error) = self.failures.pop_front() {
            return Err(error);
        }
        if !self.session_up {
            return Err(BackendError::Disconnected("no session".to_string()));
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct FakeAudio {
    state: Arc<Mutex<AudioState>>,
}

impl FakeAudio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stream; returns its server index. Notifies a live session.
    pub fn add_stream(&self, kind: StreamKind, name: &str, mute: bool) -> u32 {
        let mut state = self.state.lock();
        let index = state.next_index;
        state.next_index += 1;
        state.streams.push((kind, StreamInfo { index, name: name.to_string(), mute }));
        if state.session_up {
            state.pending += 1;
        }
        index
    }

    pub fn remove_stream(&self, index: u32) {
        let mut state = self.state.lock();
        state.streams.retain(|(_, info)| info.index != index);
        if state.session_up {
            state.pending += 1;
        }
    }

    /// Flip a stream's mute from outside the bridge (another mixer UI)
    pub fn set_external_mute(&self, index: u32, mute: bool) {
        let mut state = self.state.lock();
        if let Some((_, info)) = state.streams.iter_mut().find(|(_, info)| info.index == index) {
            info.mute = mute;
        }
        state.pending += 1;
    }

    pub fn stream_mute(&self, index: u32) -> Option<bool> {
        let state = self.state.lock();
        state.streams.iter().find(|(_, info)| info.index == index).map(|(_, info)| info.mute)
    }

    pub fn set_server_up(&self, up: bool) {
        let mut state = self.state.lock();
        state.server_up = up;
        if !up {
            state.session_up = false;
        }
    }

    /// Kill the current session; the next wait reports a disconnect
    pub fn drop_session(&self) {
        self.state.lock().session_up = false;
    }

    /// Refuse the next `count` connect attempts
    pub fn refuse_connects(&self, count: u32) {
        self.state.lock().refusals = count;
    }

    /// Fail the next `count` list/set calls with `error`
    pub fn fail_next_calls(&self, error: BackendError, count: usize) {
        let mut state = self.state.lock();
        for _ in 0..count {
            state.failures.push_back(error.clone());
        }
    }

    /// Queue `count` change notifications
    pub fn notify(&self, count: usize) {
        self.state.lock().pending += count;
    }

    pub fn set_ceiling(&self, ceiling: f32) {
        self.state.lock().ceiling = ceiling;
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    pub fn volume_calls(&self) -> Vec<(u32, f32)> {
        self.state.lock().volume_calls.clone()
    }

    pub fn mute_calls(&self) -> Vec<(u32, bool)> {
        self.state.lock().mute_calls.clone()
    }
}

#[async_trait]
impl AudioBackend for FakeAudio {
    async fn connect(&mut self, _client_label: &str) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.connects += 1;
        if !state.server_up || state.refusals > 0 {
            state.refusals = state.refusals.saturating_sub(1);
            return Err(BackendError::Disconnected("Connection refused".to_string()));
        }
        state.session_up = true;
        state.pending = 0;
        Ok(())
    }

    async fn list(&mut self, kind: StreamKind) -> Result<Vec<StreamInfo>, BackendError> {
        let mut state = self.state.lock();
        state.check_call()?;
        Ok(state
            .streams
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, info)| info.clone())
            .collect())
    }

    async fn set_volume(&mut self, stream: StreamHandle, volume: f32) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.check_call()?;
        state.volume_calls.push((stream.index, volume));
        state.pending += 1;
        Ok(())
    }

    async fn set_mute(&mut self, stream: StreamHandle, mute: bool) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.check_call()?;
        state.mute_calls.push((stream.index, mute));
        if let Some((_, info)) = state.streams.iter_mut().find(|(_, info)| info.index == stream.index) {
            info.mute = mute;
        }
        state.pending += 1;
        Ok(())
    }

    async fn process_events(&mut self, timeout: Duration) -> Result<usize, BackendError> {
        {
            let mut state = self.state.lock();
            if !state.session_up {
                return Err(BackendError::Disconnected("session dropped".to_string()));
            }
            if state.pending > 0 {
                return Ok(std::mem::take(&mut state.pending));
            }
        }
        tokio::time::sleep(timeout).await;
        Ok(0)
    }

    fn volume_ceiling(&self) -> f32 {
        self.state.lock().ceiling
    }
}

// ---------------------------------------------------------------------------
// Hotplug
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct FakeHotplug {
    actions: Arc<Mutex<VecDeque<HotplugAction>>>,
    wake: Arc<Notify>,
}

impl FakeHotplug {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an action and wake a pending poll
    pub fn push(&self, action: HotplugAction) {
        self.actions.lock().push_back(action);
        self.wake.notify_one();
    }

    pub fn pending(&self) -> usize {
        self.actions.lock().len()
    }
}

#[async_trait]
impl HotplugSource for FakeHotplug {
    async fn poll_action(&mut self, timeout: Duration) -> Option<HotplugAction> {
        let next = self.actions.lock().pop_front();
        if next.is_some() {
            return next;
        }
        let _ = tokio::time::timeout(timeout, self.wake.notified()).await;
        self.actions.lock().pop_front()
    }
}
