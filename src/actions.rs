use crate::tmux::{ChannelState, ClassificationResult, Notification};

/// Events flowing into the monitor loop
#[derive(Debug, Clone)]
pub enum Action {
    /// A pane was captured and classified
    StatusUpdated {
        pane: String,
        result: ClassificationResult,
        /// Content differed from the previous capture
        changed: bool,
    },
    /// A tracked pane no longer exists
    PaneGone(String),
    /// Topology change reported by tmux
    Notification(Notification),
    /// The control channel connected or dropped
    ChannelState(ChannelState),
    /// An error occurred
    Error(String),
    /// Request to quit the application
    Quit,
}
