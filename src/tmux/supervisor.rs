//! Keeps a control channel alive.
//!
//! The supervisor owns the only code path that (re)starts `tmux -C`. When the
//! current channel dies it publishes `Disconnected`, reconnects with capped
//! exponential backoff, and re-attaches every registered subscriber to the new
//! channel before publishing `Connected` again.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::control::{CommandChannel, ControlClient, ControlConfig};
use super::protocol::Notification;
use crate::error::PanewatchError;
use crate::Result;

const SUBSCRIBER_BUFFER: usize = 256;

/// A connection that stays up this long resets the backoff.
const STABLE_AFTER: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connected,
    Disconnected,
    Reconnecting,
}

/// Something that can open a fresh control channel.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> impl Future<Output = Result<ControlClient>> + Send;
}

/// Spawns `tmux -C`.
pub struct TmuxConnector {
    config: ControlConfig,
}

impl TmuxConnector {
    pub fn new(config: ControlConfig) -> Self {
        Self { config }
    }
}

impl Connector for TmuxConnector {
    fn connect(&self) -> impl Future<Output = Result<ControlClient>> + Send {
        ControlClient::spawn(&self.config)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 250,
            max_ms: 30_000,
            factor: 2.0,
        }
    }
}

/// Exponential delay sequence capped at `max`.
#[derive(Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    factor: f64,
    current: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        let initial = Duration::from_millis(config.initial_ms.max(1));
        let max = Duration::from_millis(config.max_ms).max(initial);
        Self {
            initial,
            max,
            factor: config.factor.max(1.0),
            current: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let grown = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.factor);
        self.current = grown.unwrap_or(self.max).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

type Predicate = Arc<dyn Fn(&Notification) -> bool + Send + Sync>;

struct Subscriber {
    predicate: Predicate,
    tx: mpsc::Sender<Notification>,
}

/// Notifications for one subscriber; survives reconnects.
pub struct Subscription {
    rx: mpsc::Receiver<Notification>,
}

impl Subscription {
    /// Next matching notification, or `None` after the supervisor is dropped.
    pub async fn next(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }
}

pub struct Supervisor<C: Connector> {
    connector: C,
    backoff: BackoffConfig,
    current: RwLock<Option<Arc<ControlClient>>>,
    subscribers: Mutex<Vec<Subscriber>>,
    forwarders: Mutex<Vec<JoinHandle<()>>>,
    state: watch::Sender<ChannelState>,
    shutdown: watch::Sender<bool>,
    attempts: AtomicU64,
}

impl<C: Connector> Supervisor<C> {
    pub fn new(connector: C, backoff: BackoffConfig) -> Arc<Self> {
        let (state, _) = watch::channel(ChannelState::Disconnected);
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            connector,
            backoff,
            current: RwLock::new(None),
            subscribers: Mutex::new(Vec::new()),
            forwarders: Mutex::new(Vec::new()),
            state,
            shutdown,
            attempts: AtomicU64::new(0),
        })
    }

    /// Spawn the supervision loop.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.run().await })
    }

    /// Stop the loop, including mid-backoff, and close the current channel.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    /// Resolves once a channel is connected.
    pub async fn wait_connected(&self) {
        let mut state = self.state.subscribe();
        let _ = state.wait_for(|s| *s == ChannelState::Connected).await;
    }

    /// Total connection attempts made so far.
    pub fn reconnect_attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn client(&self) -> Option<Arc<ControlClient>> {
        self.current.read().ok().and_then(|c| c.clone())
    }

    /// Run a command on the current channel.
    pub async fn send(&self, command: &str) -> Result<String> {
        let client = self.client().ok_or(PanewatchError::ChannelClosed)?;
        client.send(command).await
    }

    /// Register a subscriber that keeps receiving across reconnects.
    pub fn subscribe<F>(&self, predicate: F) -> Subscription
    where
        F: Fn(&Notification) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let subscriber = Subscriber {
            predicate: Arc::new(predicate),
            tx,
        };

        let mut subscribers = lock(&self.subscribers);
        if let Some(client) = self.client() {
            let handle = forward(&client, &subscriber);
            lock(&self.forwarders).push(handle);
        }
        subscribers.push(subscriber);
        Subscription { rx }
    }

    async fn run(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut backoff = Backoff::new(self.backoff);

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.state.send_replace(ChannelState::Reconnecting);
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

            let connected = tokio::select! {
                result = self.connector.connect() => result,
                _ = stopped(&mut shutdown) => break,
            };

            let client = match connected {
                Ok(client) => Arc::new(client),
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(
                        target: "panewatch::supervisor",
                        "connect attempt {} failed: {}; retrying in {:?}",
                        attempt,
                        e,
                        delay
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => continue,
                        _ = stopped(&mut shutdown) => break,
                    }
                }
            };

            let up_since = Instant::now();
            self.install(client.clone());
            self.state.send_replace(ChannelState::Connected);
            info!(
                target: "panewatch::supervisor",
                "control channel connected (attempt {})",
                attempt
            );

            let stopping = tokio::select! {
                _ = client.closed() => false,
                _ = stopped(&mut shutdown) => true,
            };

            self.uninstall();
            self.state.send_replace(ChannelState::Disconnected);
            if stopping {
                break;
            }

            if up_since.elapsed() >= STABLE_AFTER {
                backoff.reset();
            }
            let delay = backoff.next_delay();
            warn!(
                target: "panewatch::supervisor",
                "control channel lost; reconnecting in {:?}",
                delay
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stopped(&mut shutdown) => break,
            }
        }

        self.uninstall();
        self.state.send_replace(ChannelState::Disconnected);
        info!(target: "panewatch::supervisor", "supervisor stopped");
    }

    /// Make `client` current and attach every live subscriber to it.
    fn install(&self, client: Arc<ControlClient>) {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|s| !s.tx.is_closed());
        if let Ok(mut current) = self.current.write() {
            *current = Some(client.clone());
        }
        let mut forwarders = lock(&self.forwarders);
        for subscriber in subscribers.iter() {
            forwarders.push(forward(&client, subscriber));
        }
    }

    fn uninstall(&self) {
        let _subscribers = lock(&self.subscribers);
        if let Ok(mut current) = self.current.write() {
            if let Some(client) = current.take() {
                client.close();
            }
        }
        for handle in lock(&self.forwarders).drain(..) {
            handle.abort();
        }
    }
}

impl<C: Connector> CommandChannel for Supervisor<C> {
    fn send(&self, command: &str) -> impl Future<Output = Result<String>> + Send {
        Supervisor::send(self, command)
    }
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn forward(client: &ControlClient, subscriber: &Subscriber) -> JoinHandle<()> {
    let predicate = subscriber.predicate.clone();
    let mut stream = client.subscribe(move |n| predicate(n));
    let tx = subscriber.tx.clone();
    tokio::spawn(async move {
        while let Some(notification) = stream.next().await {
            if tx.send(notification).await.is_err() {
                break;
            }
        }
    })
}
