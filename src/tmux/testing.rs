//! Test doubles shared by the tmux modules.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;

use super::control::CommandChannel;
use crate::error::PanewatchError;
use crate::Result;

/// Replays canned responses in order and records every command sent.
/// Runs dry with `ChannelClosed`.
#[derive(Default)]
pub struct ScriptedChannel {
    responses: Mutex<VecDeque<Result<String>>>,
    commands: Mutex<Vec<String>>,
}

impl ScriptedChannel {
    pub fn with(responses: Vec<Result<String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

impl CommandChannel for ScriptedChannel {
    fn send(&self, command: &str) -> impl Future<Output = Result<String>> + Send {
        self.commands.lock().unwrap().push(command.to_string());
        let next = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(PanewatchError::ChannelClosed));
        async move { next }
    }
}
