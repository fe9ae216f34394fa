//! Persistent tmux control-mode connection.
//!
//! Command/response correlation is strictly FIFO: tmux answers commands in the
//! order they were written, so the writer task pushes each request onto the
//! pending queue immediately before writing it, and the reader task hands
//! every client block to the front of that queue.

use std::collections::VecDeque;
use std::future::Future;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::protocol::{quote_argument, BlockOutcome, FrameParser, Notification, ProtocolUnit};
use crate::error::PanewatchError;
use crate::Result;

const NOTIFICATION_CHANNEL_CAPACITY: usize = 1024;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// Anything that can run a tmux command and return its output.
pub trait CommandChannel: Send + Sync {
    fn send(&self, command: &str) -> impl Future<Output = Result<String>> + Send;
}

impl<T: CommandChannel> CommandChannel for Arc<T> {
    fn send(&self, command: &str) -> impl Future<Output = Result<String>> + Send {
        (**self).send(command)
    }
}

/// How to start the `tmux -C` process.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    pub tmux_path: String,
    /// `-L` socket name; `None` uses the default server.
    pub socket_name: Option<String>,
    /// Session the control client attaches to (created if missing).
    pub session_name: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tmux_path: "tmux".to_string(),
            socket_name: None,
            session_name: format!("_panewatch_{}", std::process::id()),
        }
    }
}

struct PendingRequest {
    command: String,
    reply: oneshot::Sender<Result<String>>,
}

#[derive(Default)]
struct RequestQueue {
    closed: bool,
    requests: VecDeque<PendingRequest>,
}

/// Marks the queue closed and fails everything still outstanding.
fn close_queue(queue: &Mutex<RequestQueue>, alive: &watch::Sender<bool>) {
    let drained: Vec<PendingRequest> = match queue.lock() {
        Ok(mut q) => {
            q.closed = true;
            q.requests.drain(..).collect()
        }
        Err(poisoned) => {
            let mut q = poisoned.into_inner();
            q.closed = true;
            q.requests.drain(..).collect()
        }
    };
    if !drained.is_empty() {
        debug!(target: "panewatch::control", "failing {} outstanding requests", drained.len());
    }
    for request in drained {
        let _ = request.reply.send(Err(PanewatchError::ChannelClosed));
    }
    alive.send_replace(false);
}

/// Filtered view over the notification fan-out.
pub struct NotificationStream {
    rx: broadcast::Receiver<Notification>,
    predicate: Box<dyn Fn(&Notification) -> bool + Send + Sync>,
}

impl NotificationStream {
    /// Next matching notification, or `None` once the source is gone.
    pub async fn next(&mut self) -> Option<Notification> {
        loop {
            match self.rx.recv().await {
                Ok(notification) if (self.predicate)(&notification) => return Some(notification),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        target: "panewatch::control",
                        "notification subscriber lagged, skipped {}",
                        skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// One control-mode connection to a tmux server.
pub struct ControlClient {
    commands: mpsc::UnboundedSender<PendingRequest>,
    queue: Arc<Mutex<RequestQueue>>,
    alive_tx: Arc<watch::Sender<bool>>,
    alive: watch::Receiver<bool>,
    notifications: broadcast::Sender<Notification>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    child: Mutex<Option<Child>>,
}

impl ControlClient {
    /// Start `tmux -C` and verify the pipe answers.
    pub async fn spawn(config: &ControlConfig) -> Result<Self> {
        let mut cmd = Command::new(&config.tmux_path);
        if let Some(socket) = &config.socket_name {
            cmd.args(["-L", socket.as_str()]);
        }
        cmd.args(["-C", "new-session", "-A", "-s", config.session_name.as_str()])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PanewatchError::Io(std::io::Error::other("tmux stdin unavailable")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PanewatchError::Io(std::io::Error::other("tmux stdout unavailable")))?;

        let client = Self::from_io(stdout, stdin);
        if let Ok(mut slot) = client.child.lock() {
            *slot = Some(child);
        }

        let output = client
            .send_timeout("display-message -p ok", HEALTH_CHECK_TIMEOUT)
            .await?;
        if output.trim() != "ok" {
            return Err(PanewatchError::Command(format!(
                "unexpected health check reply: {:?}",
                output
            )));
        }
        // The control session has no purpose once this client is gone.
        let cleanup = format!(
            "set-option -t {} destroy-unattached on",
            quote_argument(&config.session_name)
        );
        if let Err(e) = client.send_timeout(&cleanup, HEALTH_CHECK_TIMEOUT).await {
            warn!(
                target: "panewatch::control",
                "could not mark control session for cleanup: {}",
                e
            );
        }
        info!(target: "panewatch::control", "control channel up (session {})", config.session_name);
        Ok(client)
    }

    /// Build a client over an arbitrary byte stream pair.
    pub fn from_io<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let queue = Arc::new(Mutex::new(RequestQueue::default()));
        let (alive_tx, alive_rx) = watch::channel(true);
        let alive_tx = Arc::new(alive_tx);
        let (notifications, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
        let (commands, command_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(reader_loop(
            reader,
            queue.clone(),
            alive_tx.clone(),
            notifications.clone(),
        ));
        let writer = tokio::spawn(writer_loop(writer, command_rx, queue.clone(), alive_tx.clone()));

        Self {
            commands,
            queue,
            alive_tx,
            alive: alive_rx,
            notifications,
            reader,
            writer,
            child: Mutex::new(None),
        }
    }

    /// Run one command and wait for its block.
    ///
    /// Dropping the returned future does not cancel the command; its response
    /// is consumed and discarded when it arrives.
    pub async fn send(&self, command: &str) -> Result<String> {
        if command.contains('\n') {
            return Err(PanewatchError::Command(
                "command must be a single line".to_string(),
            ));
        }
        if !self.is_alive() {
            return Err(PanewatchError::ChannelClosed);
        }

        let (reply, response) = oneshot::channel();
        self.commands
            .send(PendingRequest {
                command: command.to_string(),
                reply,
            })
            .map_err(|_| PanewatchError::ChannelClosed)?;

        response.await.unwrap_or(Err(PanewatchError::ChannelClosed))
    }

    /// [`send`](Self::send) with a deadline. On timeout the request stays queued.
    pub async fn send_timeout(&self, command: &str, timeout: Duration) -> Result<String> {
        match tokio::time::timeout(timeout, self.send(command)).await {
            Ok(result) => result,
            Err(_) => Err(PanewatchError::Timeout(timeout)),
        }
    }

    /// Receive notifications matching `predicate`.
    pub fn subscribe<F>(&self, predicate: F) -> NotificationStream
    where
        F: Fn(&Notification) -> bool + Send + Sync + 'static,
    {
        NotificationStream {
            rx: self.notifications.subscribe(),
            predicate: Box::new(predicate),
        }
    }

    pub fn is_alive(&self) -> bool {
        *self.alive.borrow()
    }

    /// Resolves once the channel is dead.
    pub async fn closed(&self) {
        let mut alive = self.alive.clone();
        let _ = alive.wait_for(|up| !*up).await;
    }

    /// Tear the channel down: stop both tasks, kill the tmux process and
    /// fail whatever is still outstanding.
    pub fn close(&self) {
        self.reader.abort();
        self.writer.abort();
        if let Ok(mut slot) = self.child.lock() {
            if let Some(child) = slot.as_mut() {
                let _ = child.start_kill();
            }
        }
        close_queue(&self.queue, &self.alive_tx);
    }

    /// Number of requests written but not yet answered.
    pub fn outstanding(&self) -> usize {
        self.queue.lock().map(|q| q.requests.len()).unwrap_or(0)
    }
}

impl CommandChannel for ControlClient {
    fn send(&self, command: &str) -> impl Future<Output = Result<String>> + Send {
        ControlClient::send(self, command)
    }
}

impl Drop for ControlClient {
    fn drop(&mut self) {
        self.close();
    }
}

async fn writer_loop<W>(
    mut sink: W,
    mut commands: mpsc::UnboundedReceiver<PendingRequest>,
    queue: Arc<Mutex<RequestQueue>>,
    alive: Arc<watch::Sender<bool>>,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    while let Some(request) = commands.recv().await {
        let line = format!("{}\n", request.command);
        {
            let mut q = match queue.lock() {
                Ok(q) => q,
                Err(poisoned) => poisoned.into_inner(),
            };
            if q.closed {
                let _ = request.reply.send(Err(PanewatchError::ChannelClosed));
                continue;
            }
            trace!(target: "panewatch::control", "-> {}", request.command);
            q.requests.push_back(request);
        }

        let written = async {
            sink.write_all(line.as_bytes()).await?;
            sink.flush().await
        }
        .await;
        if let Err(e) = written {
            warn!(target: "panewatch::control", "control channel write failed: {}", e);
            close_queue(&queue, &alive);
            break;
        }
    }

    // Anything that raced in after the close gets failed too.
    commands.close();
    while let Ok(request) = commands.try_recv() {
        let _ = request.reply.send(Err(PanewatchError::ChannelClosed));
    }
}

async fn reader_loop<R>(
    source: R,
    queue: Arc<Mutex<RequestQueue>>,
    alive: Arc<watch::Sender<bool>>,
    notifications: broadcast::Sender<Notification>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(source);
    let mut parser = FrameParser::new();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                debug!(target: "panewatch::control", "control channel reached EOF");
                break;
            }
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.strip_suffix('\n').unwrap_or(&line);
                match parser.feed_line(line) {
                    Some(ProtocolUnit::Block(block)) => {
                        if !block.header.from_client() {
                            trace!(
                                target: "panewatch::control",
                                "discarding server block {}",
                                block.header.number
                            );
                            continue;
                        }
                        let request = match queue.lock() {
                            Ok(mut q) => q.requests.pop_front(),
                            Err(poisoned) => poisoned.into_inner().requests.pop_front(),
                        };
                        let Some(request) = request else {
                            warn!(
                                target: "panewatch::control",
                                "block {} with no pending request",
                                block.header.number
                            );
                            continue;
                        };
                        let result = match block.outcome {
                            BlockOutcome::Ok => Ok(block.payload()),
                            BlockOutcome::Error => Err(PanewatchError::Command(block.payload())),
                        };
                        trace!(
                            target: "panewatch::control",
                            "<- {} ({:?})",
                            request.command,
                            block.outcome
                        );
                        // The caller may have stopped waiting.
                        let _ = request.reply.send(result);
                    }
                    Some(ProtocolUnit::Notification(notification)) => {
                        if notification.is_exit() {
                            info!(
                                target: "panewatch::control",
                                "tmux reported exit: {:?}",
                                notification
                            );
                        }
                        let _ = notifications.send(notification);
                    }
                    None => {}
                }
            }
            Err(e) => {
                warn!(target: "panewatch::control", "control channel read failed: {}", e);
                break;
            }
        }
    }

    close_queue(&queue, &alive);
}
