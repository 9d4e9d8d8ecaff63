//! Audio mixer facade
//!
//! Owns the audio-server session, the ordered stream registry
//! (`sinks + sources (minus monitors) + stream inputs`) and the best-effort
//! volume/mute operations. Per-call failures are logged and absorbed;
//! session loss is repaired inside [`Mixer::wait_for_change`].

pub mod backend;
pub mod pactl;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

pub use backend::{AudioBackend, BackendError, StreamHandle, StreamInfo, StreamKind};
pub use pactl::PactlBackend;

use crate::config::MixerConfig;
use crate::status::ConnectionState;

/// One controllable stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioStream {
    pub handle: StreamHandle,
    pub name: String,
    pub mute: bool,
}

/// Ordered snapshot of controllable streams; index `i` binds to channel `i`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamRegistry {
    streams: Vec<AudioStream>,
}

impl StreamRegistry {
    pub fn new(streams: Vec<AudioStream>) -> Self {
        Self { streams }
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&AudioStream> {
        self.streams.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AudioStream> {
        self.streams.iter()
    }
}

/// Errors that escape the mixer
#[derive(Debug, Error)]
pub enum MixerError {
    #[error("audio server unavailable after {attempts} attempts: {last}")]
    AudioServerUnavailable { attempts: u32, last: String },

    #[error("audio backend failure: {0}")]
    Fatal(String),
}

/// Facade over the audio server
pub struct Mixer {
    backend: Box<dyn AudioBackend>,
    config: MixerConfig,
    registry: StreamRegistry,
    state: ConnectionState,
}

impl Mixer {
    pub fn new(backend: Box<dyn AudioBackend>, config: &MixerConfig) -> Self {
        Self {
            backend,
            config: config.clone(),
            registry: StreamRegistry::default(),
            state: ConnectionState::Disconnected,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Registry from the latest successful rebuild
    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    /// Connect with a bounded number of attempts and a fixed delay between them
    pub async fn connect(&mut self, client_label: &str) -> Result<ConnectionState, MixerError> {
        let attempts = self.config.connect_attempts.max(1);
        let mut last = String::new();

        for attempt in 1..=attempts {
            self.state = ConnectionState::Connecting;
            info!("Connecting to audio server as '{}' (attempt {}/{})", client_label, attempt, attempts);

            match self.backend.connect(client_label).await {
                Ok(()) => {
                    self.state = ConnectionState::Connected;
                    info!("Audio server connected");
                    return Ok(self.state);
                }
                Err(BackendError::Fatal(reason)) => {
                    self.state = ConnectionState::Disconnected;
                    return Err(MixerError::Fatal(reason));
                }
                Err(e) => {
                    warn!("Audio server connect attempt {} failed: {}", attempt, e);
                    last = e.to_string();
                }
            }

            self.state = ConnectionState::Disconnected;
            if attempt < attempts {
                sleep(self.config.connect_retry_delay()).await;
            }
        }

        Err(MixerError::AudioServerUnavailable { attempts, last })
    }

    /// Reconnect until the server answers; only fatal errors escape
    async fn reconnect(&mut self) -> Result<(), MixerError> {
        let label = self.config.client_label.clone();
        let mut round: u32 = 0;

        loop {
            round += 1;
            match self.connect(&label).await {
                Ok(_) => {
                    info!("Audio server reconnected after {} round(s)", round);
                    return Ok(());
                }
                Err(MixerError::AudioServerUnavailable { last, .. }) => {
                    warn!("Audio server still unavailable (round {}): {}", round, last);
                    sleep(self.config.connect_retry_delay()).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Wait up to `timeout` for change notifications.
    ///
    /// Returns `true` if anything changed since the previous call. A dropped
    /// session is re-established here and reported as a change so callers
    /// resynchronize everything.
    pub async fn wait_for_change(&mut self, timeout: std::time::Duration) -> Result<bool, MixerError> {
        if !self.state.is_connected() {
            self.reconnect().await?;
            return Ok(true);
        }

        match self.backend.process_events(timeout).await {
            Ok(count) => {
                if count > 0 {
                    debug!("{} audio server notification(s)", count);
                }
                Ok(count > 0)
            }
            Err(BackendError::Disconnected(reason)) => {
                warn!("Audio server connection lost: {}", reason);
                self.state = ConnectionState::Disconnected;
                self.reconnect().await?;
                Ok(true)
            }
            Err(BackendError::Transient(reason)) => {
                warn!("Audio notification wait failed: {}", reason);
                Ok(false)
            }
            Err(BackendError::Fatal(reason)) => Err(MixerError::Fatal(reason)),
        }
    }

    /// Rebuild the registry from the server.
    ///
    /// On a recoverable failure the previous registry is kept.
    pub async fn list_streams(&mut self) -> Result<&StreamRegistry, MixerError> {
        match self.fetch_registry().await {
            Ok(registry) => {
                if registry != self.registry {
                    debug!("Stream registry rebuilt: {} stream(s)", registry.len());
                }
                self.registry = registry;
            }
            Err(e) => self.absorb("list streams", e)?,
        }
        Ok(&self.registry)
    }

    async fn fetch_registry(&mut self) -> Result<StreamRegistry, BackendError> {
        let mut streams = Vec::new();

        for kind in [StreamKind::Sink, StreamKind::Source, StreamKind::StreamInput] {
            for info in self.backend.list(kind).await? {
                if kind == StreamKind::Source && self.is_excluded_monitor(&info.name) {
                    continue;
                }
                streams.push(AudioStream {
                    handle: StreamHandle { kind, index: info.index },
                    name: info.name,
                    mute: info.mute,
                });
            }
        }

        Ok(StreamRegistry::new(streams))
    }

    fn is_excluded_monitor(&self, name: &str) -> bool {
        self.config.exclude_monitors && name.contains(&self.config.monitor_pattern)
    }

    /// Set the volume of the stream at `index` (clamped to the backend ceiling)
    pub async fn set_volume(&mut self, index: usize, volume: f32) -> Result<(), MixerError> {
        let Some(stream) = self.registry.get(index) else {
            debug!("No stream at index {} ({} available), volume ignored", index, self.registry.len());
            return Ok(());
        };
        let handle = stream.handle;

        let ceiling = self.backend.volume_ceiling();
        let clamped = volume.clamp(0.0, ceiling);
        if clamped != volume {
            debug!("Volume {:.3} clamped to {:.3} for {}", volume, clamped, handle);
        }

        match self.backend.set_volume(handle, clamped).await {
            Ok(()) => {
                debug!("{} volume -> {:.3}", handle, clamped);
                Ok(())
            }
            Err(e) => self.absorb("set volume", e),
        }
    }

    /// Flip the mute state of the stream at `index`.
    ///
    /// Returns whether the server accepted the change. The registry is not
    /// patched; the next rebuild observes the new state.
    pub async fn toggle_mute(&mut self, index: usize) -> Result<bool, MixerError> {
        let Some(stream) = self.registry.get(index) else {
            debug!("No stream at index {} ({} available), mute ignored", index, self.registry.len());
            return Ok(false);
        };
        let handle = stream.handle;
        let mute = !stream.mute;

        match self.backend.set_mute(handle, mute).await {
            Ok(()) => {
                debug!("{} mute -> {}", handle, mute);
                Ok(true)
            }
            Err(e) => self.absorb("toggle mute", e).map(|_| false),
        }
    }

    /// Mute state of the stream at `index`, `None` when out of range
    pub fn is_muted(&self, index: usize) -> Option<bool> {
        self.registry.get(index).map(|stream| stream.mute)
    }

    /// Log recoverable failures, propagate the rest
    fn absorb(&mut self, operation: &str, error: BackendError) -> Result<(), MixerError> {
        match error {
            BackendError::Transient(reason) => {
                warn!("{} failed (transient backend failure): {}", operation, reason);
                Ok(())
            }
            BackendError::Disconnected(reason) => {
                warn!("{} failed, audio server disconnected: {}", operation, reason);
                self.state = ConnectionState::Disconnected;
                Ok(())
            }
            BackendError::Fatal(reason) => Err(MixerError::Fatal(reason)),
        }
    }
}
