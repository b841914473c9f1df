//! Control/heartbeat client
//!
//! Non-blocking state publisher and command poller for the dashboard wire
//! contract. State updates are fire-and-forget through a background task;
//! commands are drained on poll and folded into a local control view.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// Published agent state (wire shape; not authoritative on the agent side)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentState {
    pub is_running: bool,
    pub is_paused: bool,
    pub iteration: u64,
    pub current_task: String,
    pub last_log: Vec<String>,
    pub last_update_ts: f64,
}

/// Folded local view of pending control commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentControl {
    pub stop_requested: bool,
    pub pause_requested: bool,
    pub resume_requested: bool,
    pub skip_requested: bool,
}

/// Partial state update; unset fields are omitted from the wire payload
#[derive(Debug, Clone, Default, Serialize)]
pub struct StateUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_running: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_paused: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_log: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<f64>,
}

impl StateUpdate {
    pub fn task(task: impl Into<String>) -> Self {
        Self {
            current_task: Some(task.into()),
            ..Default::default()
        }
    }

    pub fn stopped(reason: impl Into<String>) -> Self {
        Self {
            is_running: Some(false),
            current_task: Some(reason.into()),
            ..Default::default()
        }
    }
}

/// Streaming progress from backends and tool execution, forwarded into
/// `report_state` by the loop
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub current_task: Option<String>,
    pub output_line: Option<String>,
}

impl StatusUpdate {
    pub fn task(task: impl Into<String>) -> Self {
        Self {
            current_task: Some(task.into()),
            output_line: None,
        }
    }

    pub fn line(line: impl Into<String>) -> Self {
        Self {
            current_task: None,
            output_line: Some(line.into()),
        }
    }
}

/// Channel end handed to backends and the tool executor
pub type StatusSender = mpsc::UnboundedSender<StatusUpdate>;

/// Commands understood by the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Stop,
    Pause,
    Resume,
    Skip,
}

impl ControlCommand {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stop" => Some(Self::Stop),
            "pause" => Some(Self::Pause),
            "resume" => Some(Self::Resume),
            "skip" => Some(Self::Skip),
            _ => None,
        }
    }
}

impl AgentControl {
    /// Apply a command to the folded view. Idempotent; resume clears pause.
    pub fn apply(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::Stop => self.stop_requested = true,
            ControlCommand::Pause => {
                self.pause_requested = true;
                self.resume_requested = false;
            }
            ControlCommand::Resume => {
                self.pause_requested = false;
                self.resume_requested = true;
            }
            ControlCommand::Skip => self.skip_requested = true,
        }
    }
}

/// Client for agents to publish state and poll commands
pub struct ControlClient {
    pub agent_id: String,
    pub dashboard_url: String,
    control: Arc<Mutex<AgentControl>>,
    heartbeat_tx: mpsc::UnboundedSender<StateUpdate>,
    http: reqwest::Client,
}

impl ControlClient {
    pub fn new(agent_id: impl Into<String>, dashboard_url: &str) -> Arc<Self> {
        let agent_id = agent_id.into();
        let dashboard_url = dashboard_url.trim_end_matches('/').to_string();
        debug!(%agent_id, %dashboard_url, "ControlClient::new: called");

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap_or_default();

        let (heartbeat_tx, mut heartbeat_rx) = mpsc::unbounded_channel::<StateUpdate>();

        let client = Arc::new(Self {
            agent_id: agent_id.clone(),
            dashboard_url: dashboard_url.clone(),
            control: Arc::new(Mutex::new(AgentControl::default())),
            heartbeat_tx,
            http: http.clone(),
        });

        // Single delivery task serializes outbound publishes; failures are
        // swallowed so a dead dashboard never stalls the agent.
        let url = format!("{}/api/agents/{}/heartbeat", dashboard_url, agent_id);
        tokio::spawn(async move {
            while let Some(update) = heartbeat_rx.recv().await {
                if let Err(e) = http.post(&url).json(&update).send().await {
                    debug!(error = %e, "Heartbeat delivery failed");
                }
            }
        });

        client
    }

    /// Enqueue a partial state update; returns immediately.
    pub fn report_state(&self, update: StateUpdate) {
        let _ = self.heartbeat_tx.send(update);
    }

    /// Poll pending commands and fold them into the local control view.
    pub async fn poll_commands(&self) -> AgentControl {
        let url = format!("{}/api/agents/{}/commands", self.dashboard_url, self.agent_id);

        if let Ok(response) = self.http.get(&url).send().await {
            if response.status().is_success() {
                if let Ok(body) = response.json::<serde_json::Value>().await {
                    if let Some(commands) = body["commands"].as_array() {
                        let mut control = self.control.lock().expect("control lock");
                        for command in commands.iter().filter_map(|c| c.as_str()) {
                            if let Some(parsed) = ControlCommand::parse(command) {
                                debug!(?parsed, "poll_commands: applying");
                                control.apply(parsed);
                            }
                        }
                    }
                }
            }
        }

        *self.control.lock().expect("control lock")
    }

    /// Snapshot the local control view without touching the network.
    pub fn local_control(&self) -> AgentControl {
        *self.control.lock().expect("control lock")
    }

    /// Clear the skip bit after the loop honours it.
    pub fn clear_skip(&self) {
        self.control.lock().expect("control lock").skip_requested = false;
    }
}

/// Forward streaming status updates into heartbeat publishes, keeping a
/// rolling window of recent output lines. The task ends when the sender is
/// dropped.
pub fn spawn_status_forwarder(
    control: Arc<ControlClient>,
    window: usize,
) -> (StatusSender, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<StatusUpdate>();

    let handle = tokio::spawn(async move {
        let mut turn_log: Vec<String> = Vec::new();
        while let Some(update) = rx.recv().await {
            let mut publish = StateUpdate {
                current_task: update.current_task,
                ..Default::default()
            };

            if let Some(line) = update.output_line {
                let clean = line.trim_end();
                if !clean.is_empty() {
                    turn_log.push(clean.to_string());
                    let start = turn_log.len().saturating_sub(window);
                    publish.last_log = Some(turn_log[start..].to_vec());
                }
            }

            if publish.current_task.is_some() || publish.last_log.is_some() {
                control.report_state(publish);
            }
        }
    });

    (tx, handle)
}
