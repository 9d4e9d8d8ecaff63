//! PulseAudio backend driven through the `pactl` command-line client
//!
//! Enumeration uses `pactl --format=json list …`, mutation uses
//! `set-<kind>-volume` / `set-<kind>-mute`, and change notifications come
//! from a long-running `pactl subscribe` child whose stdout is forwarded into
//! a queue. When that child exits the session is considered dropped.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::backend::{AudioBackend, BackendError, StreamHandle, StreamInfo, StreamKind};

/// PulseAudio accepts more than unity; 150% matches the usual UI maximum
const PACTL_VOLUME_CEILING: f32 = 1.5;

/// One line of `pactl subscribe` output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEvent {
    pub action: String,
    pub facility: String,
    pub index: u32,
}

impl ServerEvent {
    /// Parse `Event 'change' on sink-input #12`
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.trim().strip_prefix("Event '")?;
        let (action, rest) = rest.split_once('\'')?;
        let rest = rest.trim_start().strip_prefix("on ")?;
        let (facility, index) = rest.rsplit_once(" #")?;

        Some(Self {
            action: action.to_string(),
            facility: facility.trim().to_string(),
            index: index.trim().parse().ok()?,
        })
    }

    /// Whether the event concerns a stream the bridge lists
    pub fn is_stream_event(&self) -> bool {
        matches!(self.facility.as_str(), "sink" | "source" | "sink-input")
    }
}

#[derive(Debug, Deserialize)]
struct PactlEntry {
    index: u32,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    mute: bool,
    #[serde(default)]
    properties: HashMap<String, serde_json::Value>,
}

impl PactlEntry {
    fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_str())
    }

    fn display_name(&self, kind: StreamKind) -> String {
        match kind {
            StreamKind::StreamInput => self
                .property("application.name")
                .or_else(|| self.property("media.name"))
                .map(str::to_string)
                .unwrap_or_else(|| format!("{} #{}", kind, self.index)),
            _ => self
                .name
                .clone()
                .unwrap_or_else(|| format!("{} #{}", kind, self.index)),
        }
    }
}

/// Parse the JSON output of `pactl --format=json list <kind>`
pub fn parse_stream_list(json: &str, kind: StreamKind) -> Result<Vec<StreamInfo>, BackendError> {
    let entries: Vec<PactlEntry> = serde_json::from_str(json)
        .map_err(|e| BackendError::Transient(format!("unexpected pactl output: {}", e)))?;

    Ok(entries
        .iter()
        .map(|entry| StreamInfo {
            index: entry.index,
            name: entry.display_name(kind),
            mute: entry.mute,
        })
        .collect())
}

/// Map a failed `pactl` invocation's stderr to an error class
fn classify_failure(stderr: &str) -> BackendError {
    let lower = stderr.to_lowercase();
    let message = stderr.trim().to_string();
    if lower.contains("connection failure")
        || lower.contains("connection refused")
        || lower.contains("connection terminated")
    {
        BackendError::Disconnected(message)
    } else {
        BackendError::Transient(message)
    }
}

fn list_target(kind: StreamKind) -> &'static str {
    match kind {
        StreamKind::Sink => "sinks",
        StreamKind::Source => "sources",
        StreamKind::StreamInput => "sink-inputs",
    }
}

/// PulseAudio (or pipewire-pulse) through `pactl`
pub struct PactlBackend {
    program: String,
    client_label: String,
    subscriber: Option<Child>,
    reader: Option<JoinHandle<()>>,
    events_rx: Option<mpsc::UnboundedReceiver<ServerEvent>>,
}

impl PactlBackend {
    pub fn new() -> Self {
        Self::with_program("pactl")
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            client_label: String::new(),
            subscriber: None,
            reader: None,
            events_rx: None,
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        if !self.client_label.is_empty() {
            command.arg(format!("--client-name={}", self.client_label));
        }
        command.stdin(Stdio::null());
        command
    }

    fn spawn_error(&self, e: std::io::Error) -> BackendError {
        if e.kind() == ErrorKind::NotFound {
            BackendError::Fatal(format!("'{}' not found: {}", self.program, e))
        } else {
            BackendError::Transient(format!("failed to run '{}': {}", self.program, e))
        }
    }

    /// Run one `pactl` invocation and return its stdout
    async fn run(&self, args: &[&str]) -> Result<String, BackendError> {
        trace!("{} {}", self.program, args.join(" "));

        let output = self
            .command()
            .args(args)
            .stderr(Stdio::piped())
            .stdout(Stdio::piped())
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(classify_failure(&String::from_utf8_lossy(&output.stderr)))
        }
    }

    async fn stop_subscriber(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut child) = self.subscriber.take() {
            if let Err(e) = child.kill().await {
                debug!("pactl subscribe already gone: {}", e);
            }
        }
        self.events_rx = None;
    }

    fn start_subscriber(&mut self) -> Result<(), BackendError> {
        let mut child = self
            .command()
            .arg("subscribe")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::Transient("pactl subscribe has no stdout".to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let Some(event) = ServerEvent::parse(&line) else {
                            trace!("Ignoring pactl line: {}", line);
                            continue;
                        };
                        if !event.is_stream_event() {
                            continue;
                        }
                        trace!("Audio event {} on {} #{}", event.action, event.facility, event.index);
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("pactl subscribe stream closed");
                        break;
                    }
                    Err(e) => {
                        warn!("pactl subscribe read failed: {}", e);
                        break;
                    }
                }
            }
        });

        self.subscriber = Some(child);
        self.reader = Some(reader);
        self.events_rx = Some(rx);
        Ok(())
    }
}

impl Default for PactlBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioBackend for PactlBackend {
    async fn connect(&mut self, client_label: &str) -> Result<(), BackendError> {
        self.stop_subscriber().await;
        self.client_label = client_label.to_string();

        // Query the server before subscribing so refusals surface as errors
        self.run(&["info"]).await?;
        self.start_subscriber()?;

        debug!("pactl session established as '{}'", client_label);
        Ok(())
    }

    async fn list(&mut self, kind: StreamKind) -> Result<Vec<StreamInfo>, BackendError> {
        let json = self.run(&["--format=json", "list", list_target(kind)]).await?;
        parse_stream_list(&json, kind)
    }

    async fn set_volume(&mut self, stream: StreamHandle, volume: f32) -> Result<(), BackendError> {
        let command = format!("set-{}-volume", stream.kind);
        let index = stream.index.to_string();
        let percent = format!("{}%", (volume * 100.0).round() as u32);
        self.run(&[&command, &index, &percent]).await.map(|_| ())
    }

    async fn set_mute(&mut self, stream: StreamHandle, mute: bool) -> Result<(), BackendError> {
        let command = format!("set-{}-mute", stream.kind);
        let index = stream.index.to_string();
        self.run(&[&command, &index, if mute { "1" } else { "0" }]).await.map(|_| ())
    }

    async fn process_events(&mut self, timeout: Duration) -> Result<usize, BackendError> {
        let rx = self
            .events_rx
            .as_mut()
            .ok_or_else(|| BackendError::Disconnected("no pactl subscription".to_string()))?;

        match tokio::time::timeout(timeout, rx.recv()).await {
            Err(_) => Ok(0),
            Ok(None) => {
                self.events_rx = None;
                Err(BackendError::Disconnected("pactl subscribe exited".to_string()))
            }
            Ok(Some(_)) => {
                let mut count = 1;
                while rx.try_recv().is_ok() {
                    count += 1;
                }
                Ok(count)
            }
        }
    }

    fn volume_ceiling(&self) -> f32 {
        PACTL_VOLUME_CEILING
    }
}
