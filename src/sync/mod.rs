//! Sync loop - keeps the surface and the audio server in agreement
//!
//! One cooperative task owns both sides. Each [`SyncLoop::step`] either
//! applies a batch of surface events to the mixer, or waits briefly for
//! audio-server notifications and repaints the LEDs. Every reconnect and
//! retry policy lives here; the components below only report what happened.

use anyhow::{Context, Result};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::binding::bind;
use crate::config::AppConfig;
use crate::hotplug::{HotplugAction, HotplugSource};
use crate::mixer::Mixer;
use crate::surface::{ControlEvent, ControlSurfaceLink, LinkError};

/// Log at info when verbose, otherwise at debug
macro_rules! trace_action {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            tracing::info!($($arg)+)
        } else {
            tracing::debug!($($arg)+)
        }
    };
}

/// Linear volume for a slider position
pub fn scaled_volume(position: u8, max_gain: f32) -> f32 {
    f32::from(position.min(127)) / 127.0 * max_gain
}

/// Bidirectional orchestrator between a control surface and the mixer
pub struct SyncLoop {
    link: ControlSurfaceLink,
    mixer: Mixer,
    hotplug: Option<Box<dyn HotplugSource>>,
    config: AppConfig,
    /// A removal was reported; the next repaint is forced to check liveness
    suspect: bool,
    /// Last enumeration check of the connected surface
    last_presence_check: Instant,
    repaints: usize,
    resyncs: usize,
}

impl SyncLoop {
    pub fn new(
        link: ControlSurfaceLink,
        mixer: Mixer,
        hotplug: Option<Box<dyn HotplugSource>>,
        config: AppConfig,
    ) -> Self {
        Self {
            link,
            mixer,
            hotplug,
            config,
            suspect: false,
            last_presence_check: Instant::now(),
            repaints: 0,
            resyncs: 0,
        }
    }

    pub fn link(&self) -> &ControlSurfaceLink {
        &self.link
    }

    pub fn mixer(&self) -> &Mixer {
        &self.mixer
    }

    /// LED repaint passes performed (including forced resyncs)
    pub fn repaint_count(&self) -> usize {
        self.repaints
    }

    /// Forced full resyncs after a (re)connect of the surface
    pub fn resync_count(&self) -> usize {
        self.resyncs
    }

    /// Connect both sides and run forever
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;
        info!("Sync loop running");
        loop {
            self.step().await?;
        }
    }

    /// Connect the mixer (fatal on exhaustion), wait for the surface, resync
    pub async fn start(&mut self) -> Result<()> {
        let label = self.config.mixer.client_label.clone();
        self.mixer
            .connect(&label)
            .await
            .context("Failed to connect to audio server")?;

        self.recover_link().await
    }

    /// One iteration: an event batch, or a bounded wait for server changes
    pub async fn step(&mut self) -> Result<()> {
        if !self.link.state().is_connected() {
            self.recover_link().await?;
        }

        if !self.mixer.state().is_connected() {
            // wait_for_change re-establishes the session and reports a change
            self.mixer.wait_for_change(Duration::ZERO).await?;
            self.refresh_and_repaint(false).await?;
        }

        let events = self.link.poll(self.config.device.max_events_per_poll);
        if events.is_empty() {
            return self.idle().await;
        }

        self.mixer.list_streams().await?;

        let mut toggled = false;
        for event in events {
            toggled |= self.apply(event).await?;
        }

        if toggled {
            self.refresh_and_repaint(false).await?;
        }
        Ok(())
    }

    async fn idle(&mut self) -> Result<()> {
        let changed = self.mixer.wait_for_change(self.config.sync.change_timeout()).await?;

        let mut force = false;
        if let Some(hotplug) = self.hotplug.as_mut() {
            while let Some(action) = hotplug.poll_action(Duration::ZERO).await {
                match action {
                    HotplugAction::Removed => {
                        info!("Hotplug removal reported, checking control surface");
                        self.suspect = true;
                    }
                    HotplugAction::Added => {
                        debug!("Hotplug add reported while connected, forcing repaint");
                        force = true;
                    }
                }
            }
        }
        force |= self.suspect;

        if self.last_presence_check.elapsed() >= self.config.sync.reconnect_interval() {
            self.last_presence_check = Instant::now();
            if !self.surface_still_present()? {
                self.link.mark_lost();
                return self.recover_link().await;
            }
            // Forced writes catch stale ports that still enumerate
            force = true;
        }

        if changed || force {
            self.refresh_and_repaint(force).await?;
        }
        Ok(())
    }

    /// Periodic check that the device still enumerates under its name
    fn surface_still_present(&self) -> Result<bool> {
        let name = &self.config.device.name;
        match self.link.device_present(name) {
            Ok(true) => Ok(true),
            Ok(false) => {
                warn!("Control surface '{}' no longer enumerates", name);
                Ok(false)
            }
            Err(e) if e.is_recoverable() => {
                warn!("Control surface enumeration failed: {}", e);
                Ok(false)
            }
            Err(e) => Err(e).context("Control surface transport failure"),
        }
    }

    /// Darken every LED and release the surface ports
    pub fn shutdown(&mut self) {
        if self.link.state().is_connected() {
            for channel in 0..self.link.num_channels() {
                if let Err(e) = self.link.set_led(channel, false, false) {
                    debug!("LED {} not cleared on shutdown: {}", channel, e);
                    break;
                }
            }
        }
        self.link.disconnect();
    }

    /// Apply one surface event; returns whether a mute toggle was accepted
    async fn apply(&mut self, event: ControlEvent) -> Result<bool> {
        let verbose = self.config.verbose;
        trace_action!(verbose, "Surface event: {:?}", event);

        let Some(index) = bind(event.channel(), self.mixer.registry()) else {
            debug!(
                "Channel {} has no stream ({} available), ignoring",
                event.channel(),
                self.mixer.registry().len()
            );
            return Ok(false);
        };

        match event {
            ControlEvent::Button { pressed: false, .. } => Ok(false),
            ControlEvent::Button { channel, pressed: true } => {
                let accepted = self.mixer.toggle_mute(index).await?;
                if accepted {
                    trace_action!(
                        verbose,
                        "Channel {}: mute toggled on {}",
                        channel,
                        self.stream_label(index)
                    );
                }
                Ok(accepted)
            }
            ControlEvent::Slider { channel, position } => {
                let volume = scaled_volume(position, self.config.mixer.max_gain());
                self.mixer.set_volume(index, volume).await?;
                trace_action!(
                    verbose,
                    "Channel {}: volume {:.3} on {}",
                    channel,
                    volume,
                    self.stream_label(index)
                );
                Ok(false)
            }
        }
    }

    fn stream_label(&self, index: usize) -> String {
        self.mixer
            .registry()
            .get(index)
            .map(|stream| format!("{} ({})", stream.handle, stream.name))
            .unwrap_or_else(|| format!("stream {}", index))
    }

    /// Rebuild the registry, then repaint; a lost surface enters recovery
    async fn refresh_and_repaint(&mut self, force: bool) -> Result<()> {
        self.mixer.list_streams().await?;

        match self.repaint(force) {
            Ok(()) => {
                if force && self.suspect {
                    info!("Control surface answered the liveness check");
                }
                if force {
                    self.suspect = false;
                }
                Ok(())
            }
            Err(e) if e.is_recoverable() => {
                warn!("Control surface lost during repaint: {}", e);
                self.recover_link().await
            }
            Err(e) => Err(e).context("Control surface transport failure"),
        }
    }

    /// Write every LED from the current registry.
    ///
    /// A channel is lit when it binds to an unmuted stream; inert channels are
    /// unlit.
    fn repaint(&mut self, force: bool) -> Result<(), LinkError> {
        self.repaints += 1;
        debug!("Repainting LEDs (force={})", force);

        for channel in 0..self.link.num_channels() {
            let lit = bind(channel, self.mixer.registry())
                .and_then(|index| self.mixer.is_muted(index))
                == Some(false);
            self.link.set_led(channel, lit, force)?;
        }
        Ok(())
    }

    /// Reconnect the surface until it answers, then resync every LED
    async fn recover_link(&mut self) -> Result<()> {
        let name = self.config.device.name.clone();
        let interval = self.config.sync.reconnect_interval();

        loop {
            let mut attempt: u32 = 0;
            loop {
                attempt += 1;
                match self.link.connect(&name) {
                    Ok(_) => break,
                    Err(e) if e.is_recoverable() => {
                        info!("Control surface unavailable (attempt {}): {}", attempt, e);
                        self.wait_for_device(interval).await;
                    }
                    Err(e) => return Err(e).context("Control surface transport failure"),
                }
            }

            self.mixer.list_streams().await?;
            match self.repaint(true) {
                Ok(()) => {
                    self.suspect = false;
                    self.last_presence_check = Instant::now();
                    self.resyncs += 1;
                    info!("Control surface resynchronized");
                    return Ok(());
                }
                Err(e) if e.is_recoverable() => {
                    warn!("Resync after reconnect failed: {}", e);
                }
                Err(e) => return Err(e).context("Control surface transport failure"),
            }
        }
    }

    /// Sleep up to `interval`, returning early when a device is added
    async fn wait_for_device(&mut self, interval: Duration) {
        let Some(hotplug) = self.hotplug.as_mut() else {
            sleep(interval).await;
            return;
        };

        let deadline = Instant::now() + interval;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return;
            }
            match hotplug.poll_action(remaining).await {
                Some(HotplugAction::Added) => {
                    debug!("Hotplug add reported, retrying now");
                    return;
                }
                Some(HotplugAction::Removed) => continue,
                None => return,
            }
        }
    }
}
