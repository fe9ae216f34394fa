//! Interactive attach: run `tmux attach-session` on a pseudo-terminal wired to
//! the user's terminal.
//!
//! Every resource taken during an attach (raw mode, resize forwarding, input
//! pump) is owned by a guard, so teardown runs on success, error and panic
//! alike: resize forwarding stops first, then the terminal mode is restored,
//! then the pty is closed.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossterm::terminal;
use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::PanewatchError;
use crate::tmux::client::attach_command;
use crate::tmux::ControlConfig;
use crate::Result;

const FALLBACK_SIZE: (u16, u16) = (80, 24);
const STDIN_POLL_MS: i32 = 100;
/// How long to let the output pump drain after the child exits.
const OUTPUT_DRAIN: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachState {
    Detached,
    Attaching,
    Attached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachOutcome {
    pub exit_code: u32,
    /// Ended by [`AttachManager::detach`] rather than the client exiting.
    pub detached_by_user: bool,
}

type SharedMaster = Arc<Mutex<Box<dyn MasterPty + Send>>>;

/// Puts the terminal in raw mode; restores it when dropped.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> Result<Self> {
        terminal::enable_raw_mode()
            .map_err(|e| PanewatchError::Attach(format!("raw mode: {}", e)))?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = terminal::disable_raw_mode() {
            warn!(target: "panewatch::attach", "failed to restore terminal mode: {}", e);
        }
    }
}

/// Aborts a background task when dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Stops the stdin pump thread when dropped. The thread notices within one
/// poll interval.
struct InputPump {
    running: Arc<AtomicBool>,
}

impl Drop for InputPump {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Publishes `Detached` when dropped.
struct StateReset<'a>(&'a watch::Sender<AttachState>);

impl Drop for StateReset<'_> {
    fn drop(&mut self) {
        self.0.send_replace(AttachState::Detached);
    }
}

fn attach_err(context: &str) -> impl Fn(anyhow::Error) -> PanewatchError + '_ {
    move |e| PanewatchError::Attach(format!("{}: {}", context, e))
}

fn terminal_size() -> PtySize {
    let (cols, rows) = terminal::size().unwrap_or(FALLBACK_SIZE);
    PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

async fn forward_resizes(master: SharedMaster) {
    let mut winch = match signal(SignalKind::window_change()) {
        Ok(winch) => winch,
        Err(e) => {
            warn!(target: "panewatch::attach", "cannot listen for SIGWINCH: {}", e);
            return;
        }
    };
    while winch.recv().await.is_some() {
        let size = terminal_size();
        let resized = match master.lock() {
            Ok(master) => master.resize(size),
            Err(_) => return,
        };
        match resized {
            Ok(()) => debug!(
                target: "panewatch::attach",
                "resized pty to {}x{}",
                size.cols,
                size.rows
            ),
            Err(e) => warn!(target: "panewatch::attach", "failed to resize pty: {}", e),
        }
    }
}

/// Copy stdin to the pty until `running` clears. Polls so the thread can
/// exit without waiting for a keypress.
fn pump_input(mut writer: Box<dyn Write + Send>, running: Arc<AtomicBool>) {
    let mut buf = [0u8; 4096];
    while running.load(Ordering::SeqCst) {
        let mut fds = libc::pollfd {
            fd: libc::STDIN_FILENO,
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: `fds` is a single valid pollfd for the duration of the call.
        let ready = unsafe { libc::poll(&mut fds, 1, STDIN_POLL_MS) };
        if ready < 0 {
            if std::io::Error::last_os_error().kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            break;
        }
        if ready == 0 || fds.revents & libc::POLLIN == 0 {
            if fds.revents & (libc::POLLHUP | libc::POLLERR) != 0 {
                break;
            }
            continue;
        }
        // SAFETY: `buf` is valid for writes of `buf.len()` bytes.
        let n = unsafe { libc::read(libc::STDIN_FILENO, buf.as_mut_ptr().cast(), buf.len()) };
        if n <= 0 {
            break;
        }
        if writer.write_all(&buf[..n as usize]).and_then(|_| writer.flush()).is_err() {
            break;
        }
    }
}

fn pump_output(mut reader: Box<dyn Read + Send>) {
    let mut buf = [0u8; 8192];
    let mut stdout = std::io::stdout();
    loop {
        match reader.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if stdout.write_all(&buf[..n]).and_then(|_| stdout.flush()).is_err() {
                    break;
                }
            }
        }
    }
}

/// Runs one interactive attachment at a time.
pub struct AttachManager {
    tmux_path: String,
    socket_name: Option<String>,
    state: watch::Sender<AttachState>,
    detach: Mutex<Option<oneshot::Sender<()>>>,
}

impl AttachManager {
    pub fn new(config: &ControlConfig) -> Self {
        Self {
            tmux_path: config.tmux_path.clone(),
            socket_name: config.socket_name.clone(),
            state: watch::channel(AttachState::Detached).0,
            detach: Mutex::new(None),
        }
    }

    pub fn state(&self) -> AttachState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<AttachState> {
        self.state.subscribe()
    }

    /// End the current attachment, if any, by killing the attach client.
    /// The tmux session itself keeps running.
    pub fn detach(&self) {
        let sender = match self.detach.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }

    /// Attach the local terminal to `target` until the client exits or
    /// [`detach`](Self::detach) is called.
    pub async fn attach(&self, target: &str) -> Result<AttachOutcome> {
        let claimed = self.state.send_if_modified(|state| {
            if *state == AttachState::Detached {
                *state = AttachState::Attaching;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(PanewatchError::Attach("already attached".to_string()));
        }
        let _state = StateReset(&self.state);

        let argv = attach_command(&self.tmux_path, self.socket_name.as_deref(), target);
        let pair = native_pty_system()
            .openpty(terminal_size())
            .map_err(attach_err("open pty"))?;

        let mut cmd = CommandBuilder::new(&argv[0]);
        cmd.args(&argv[1..]);
        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(attach_err("spawn tmux attach"))?;
        drop(pair.slave);

        let mut killer = child.clone_killer();
        let reader = pair.master.try_clone_reader().map_err(attach_err("pty reader"));
        let writer = pair.master.take_writer().map_err(attach_err("pty writer"));
        let (reader, writer) = match (reader, writer) {
            (Ok(reader), Ok(writer)) => (reader, writer),
            (Err(e), _) | (_, Err(e)) => {
                let _ = killer.kill();
                return Err(e);
            }
        };
        let master: SharedMaster = Arc::new(Mutex::new(pair.master));

        let _raw = match RawModeGuard::enable() {
            Ok(guard) => guard,
            Err(e) => {
                let _ = killer.kill();
                return Err(e);
            }
        };
        let _resize = AbortOnDrop(tokio::spawn(forward_resizes(master.clone())));

        let running = Arc::new(AtomicBool::new(true));
        let _input = InputPump {
            running: running.clone(),
        };
        thread::spawn(move || pump_input(writer, running));
        let output = thread::spawn(move || pump_output(reader));

        let (detach_tx, detach_rx) = oneshot::channel();
        if let Ok(mut slot) = self.detach.lock() {
            *slot = Some(detach_tx);
        }
        self.state.send_replace(AttachState::Attached);
        info!(target: "panewatch::attach", "attached to {}", target);

        let mut wait = tokio::task::spawn_blocking(move || child.wait());
        let (status, detached_by_user) = tokio::select! {
            status = &mut wait => (status, false),
            Ok(()) = detach_rx => {
                debug!(target: "panewatch::attach", "detach requested");
                let _ = killer.kill();
                (wait.await, true)
            }
        };
        if let Ok(mut slot) = self.detach.lock() {
            slot.take();
        }

        let _ = tokio::time::timeout(
            OUTPUT_DRAIN,
            tokio::task::spawn_blocking(move || output.join()),
        )
        .await;

        let status = status
            .map_err(|e| PanewatchError::Attach(format!("wait task: {}", e)))?
            .map_err(PanewatchError::Io)?;
        info!(
            target: "panewatch::attach",
            "detached from {} (exit {})",
            target,
            status.exit_code()
        );

        Ok(AttachOutcome {
            exit_code: status.exit_code(),
            detached_by_user,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_failure_leaves_terminal_alone() {
        let config = ControlConfig {
            tmux_path: "/nonexistent/panewatch-tmux".to_string(),
            ..ControlConfig::default()
        };
        let manager = AttachManager::new(&config);
        let raw_before = terminal::is_raw_mode_enabled().unwrap_or(false);

        match manager.attach("work").await {
            Err(PanewatchError::Attach(_)) => {}
            other => panic!("expected attach error, got {:?}", other),
        }
        assert_eq!(manager.state(), AttachState::Detached);
        assert_eq!(terminal::is_raw_mode_enabled().unwrap_or(false), raw_before);
    }

    #[test]
    fn test_detach_without_attachment_is_noop() {
        let manager = AttachManager::new(&ControlConfig::default());
        manager.detach();
        assert_eq!(manager.state(), AttachState::Detached);
    }

    #[test]
    fn test_state_reset_on_drop() {
        let (tx, rx) = watch::channel(AttachState::Attached);
        drop(StateReset(&tx));
        assert_eq!(*rx.borrow(), AttachState::Detached);
    }
}
