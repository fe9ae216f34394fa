use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::actions::Action;
use crate::error::PanewatchError;
use crate::tmux::{
    AgentStatus, ChannelState, ClassificationResult, CommandChannel, ContentCapture,
    StalenessGuard, StateInferenceEngine, TmuxPane,
};

/// Main application state
#[derive(Default)]
pub struct App {
    /// Latest verdict per pane
    pub statuses: HashMap<String, ClassificationResult>,
    pub channel_state: Option<ChannelState>,
    /// Last error reported by a driver
    pub error_message: Option<String>,
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, pane: &str) -> Option<AgentStatus> {
        self.statuses.get(pane).map(|r| r.state)
    }

    /// Apply one action. Returns `true` when the loop should stop.
    pub fn handle_action(&mut self, action: Action) -> Result<bool> {
        match action {
            Action::StatusUpdated { pane, result, changed } => {
                let previous = self.statuses.get(&pane).map(|r| r.state);
                if previous != Some(result.state) {
                    info!(
                        "{}: {} -> {} ({:?}{})",
                        pane,
                        previous.map_or("-".to_string(), |s| s.to_string()),
                        result.state,
                        result.evidence,
                        result.detail.as_deref().map(|d| format!(": {}", d)).unwrap_or_default()
                    );
                } else {
                    trace!("{}: still {} (changed={})", pane, result.state, changed);
                }
                self.statuses.insert(pane, result);
                Ok(false)
            }
            Action::PaneGone(pane) => {
                if self.statuses.remove(&pane).is_some() {
                    info!("{}: gone", pane);
                }
                Ok(false)
            }
            Action::Notification(notification) => {
                debug!("tmux: {:?}", notification);
                Ok(false)
            }
            Action::ChannelState(state) => {
                if self.channel_state != Some(state) {
                    info!("control channel {:?}", state);
                }
                self.channel_state = Some(state);
                Ok(false)
            }
            Action::Error(msg) => {
                warn!("{}", msg);
                self.error_message = Some(msg);
                Ok(false)
            }
            Action::Quit => Ok(true),
        }
    }
}

/// Runs one capture driver per tracked pane.
pub struct Monitor<C: CommandChannel + 'static> {
    capture: Arc<ContentCapture<C>>,
    engine: Arc<StateInferenceEngine>,
    interval: Duration,
    stale_after: Option<Duration>,
    tx: mpsc::UnboundedSender<Action>,
    drivers: HashMap<String, JoinHandle<()>>,
}

impl<C: CommandChannel + 'static> Monitor<C> {
    pub fn new(
        capture: Arc<ContentCapture<C>>,
        engine: Arc<StateInferenceEngine>,
        interval: Duration,
        stale_after: Option<Duration>,
        tx: mpsc::UnboundedSender<Action>,
    ) -> Self {
        Self {
            capture,
            engine,
            interval,
            stale_after,
            tx,
            drivers: HashMap::new(),
        }
    }

    /// Make the tracked set match `panes`: start drivers for new live panes
    /// and stop drivers for panes that disappeared or died.
    ///
    /// New drivers are staggered across one polling round by their position
    /// in `panes`.
    pub fn track(&mut self, panes: &[TmuxPane]) {
        let live: Vec<&TmuxPane> = panes.iter().filter(|p| !p.dead).collect();

        let stale: Vec<String> = self
            .drivers
            .keys()
            .filter(|id| !live.iter().any(|p| &p.id == *id))
            .cloned()
            .collect();
        for id in stale {
            self.untrack(&id);
        }

        let count = live.len().max(1) as f64;
        for (i, pane) in live.iter().enumerate() {
            if self.drivers.get(&pane.id).is_some_and(|h| !h.is_finished()) {
                continue;
            }
            let offset = self.interval.mul_f64(i as f64 / count);
            debug!("tracking {} ({}) after {:?}", pane.id, pane.tool_key(), offset);
            let handle = tokio::spawn(drive_pane(
                (*pane).clone(),
                offset,
                self.interval,
                self.stale_after,
                self.capture.clone(),
                self.engine.clone(),
                self.tx.clone(),
            ));
            self.drivers.insert(pane.id.clone(), handle);
        }
    }

    pub fn untrack(&mut self, pane_id: &str) {
        if let Some(handle) = self.drivers.remove(pane_id) {
            handle.abort();
        }
        self.capture.forget(pane_id);
    }

    pub fn tracked(&self) -> usize {
        self.drivers.len()
    }
}

impl<C: CommandChannel + 'static> Drop for Monitor<C> {
    fn drop(&mut self) {
        for (_, handle) in self.drivers.drain() {
            handle.abort();
        }
    }
}

/// Capture, classify and report one pane every `interval` until it is gone
/// or nobody is listening.
async fn drive_pane<C: CommandChannel + 'static>(
    pane: TmuxPane,
    offset: Duration,
    interval: Duration,
    stale_after: Option<Duration>,
    capture: Arc<ContentCapture<C>>,
    engine: Arc<StateInferenceEngine>,
    tx: mpsc::UnboundedSender<Action>,
) {
    tokio::time::sleep(offset).await;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut guard = stale_after.map(StalenessGuard::new);
    let mut last: Option<ClassificationResult> = None;

    loop {
        ticker.tick().await;
        let action = match capture.capture(&pane.id).await {
            Ok(outcome) => {
                let verdict = match &last {
                    // Same content, same verdict; only the evaluation time moves.
                    Some(previous) if !outcome.changed => ClassificationResult {
                        evaluated_at: SystemTime::now(),
                        ..previous.clone()
                    },
                    _ => engine.classify(&pane.id, pane.tool_key(), &outcome.snapshot.stripped),
                };
                last = Some(verdict.clone());
                let result = match guard.as_mut() {
                    Some(guard) => guard.apply(outcome.snapshot.hash, verdict),
                    None => verdict,
                };
                Action::StatusUpdated {
                    pane: pane.id.clone(),
                    result,
                    changed: outcome.changed,
                }
            }
            Err(PanewatchError::PaneGone(_)) => {
                let _ = tx.send(Action::PaneGone(pane.id.clone()));
                return;
            }
            // The supervisor is reconnecting; try again next round.
            Err(PanewatchError::ChannelClosed) => continue,
            Err(e) => Action::Error(format!("capture {}: {}", pane.id, e)),
        };
        if tx.send(action).is_err() {
            return;
        }
    }
}
