pub mod ansi;
pub mod capture;
pub mod client;
pub mod control;
pub mod heuristics;
pub mod patterns;
pub mod protocol;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use capture::{CaptureOutcome, ContentCapture, ContentHash, ContentSnapshot};
pub use client::TmuxClient;
pub use control::{CommandChannel, ControlClient, ControlConfig, NotificationStream};
pub use heuristics::{
    AgentStatus, ClassificationResult, Evidence, StalenessGuard, StateInferenceEngine,
};
pub use patterns::{PatternOverrides, PatternRegistry, PatternSet, Tool};
pub use protocol::Notification;
pub use supervisor::{BackoffConfig, ChannelState, Supervisor, TmuxConnector};

use serde::{Deserialize, Serialize};

/// Represents a tmux session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TmuxSession {
    /// Session ID (e.g., "$0")
    pub id: String,
    /// Session name
    pub name: String,
    /// Unix timestamp when session was created
    pub created_at: u64,
    /// Number of attached clients
    pub attached_clients: usize,
}

/// One pane and what appears to be running in it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TmuxPane {
    /// Pane ID (e.g., "%3")
    pub id: String,
    pub session: String,
    pub window: u32,
    /// `#{pane_current_command}`
    pub current_command: String,
    /// The pane's process has exited (remain-on-exit)
    pub dead: bool,
    pub tool: Tool,
}

impl TmuxPane {
    /// Pattern set to classify this pane with: the detected tool, or the raw
    /// command name so user-defined tools can match it.
    pub fn tool_key(&self) -> &str {
        match self.tool {
            Tool::Shell if !self.current_command.is_empty() => &self.current_command,
            tool => tool.name(),
        }
    }
}
