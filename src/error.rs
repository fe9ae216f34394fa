//! Error types for panewatch.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PanewatchError {
    /// The control connection died. Recovered by the supervisor.
    #[error("control channel closed")]
    ChannelClosed,

    /// tmux rejected a command; carries the server's error text.
    #[error("tmux command failed: {0}")]
    Command(String),

    /// No response arrived in time. The request stays outstanding on the channel.
    #[error("tmux command timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The captured pane (or its window/session) no longer exists.
    #[error("pane gone: {0}")]
    PaneGone(String),

    #[error("attach failed: {0}")]
    Attach(String),

    #[error("invalid pattern for tool {tool}: {source}")]
    Pattern {
        tool: String,
        #[source]
        source: regex::Error,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PanewatchError {
    /// Whether a command error text means the target pane, window or session is gone.
    pub fn is_missing_target(&self) -> bool {
        match self {
            PanewatchError::Command(text) => {
                text.contains("can't find pane")
                    || text.contains("can't find window")
                    || text.contains("can't find session")
                    || text.contains("no such")
            }
            PanewatchError::PaneGone(_) => true,
            _ => false,
        }
    }
}
