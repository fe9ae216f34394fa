use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use panewatch::actions::Action;
use panewatch::app::{App, Monitor};
use panewatch::attach::AttachManager;
use panewatch::config::Config;
use panewatch::tmux::{
    ChannelState, ContentCapture, Notification, StateInferenceEngine, Supervisor, TmuxClient,
    TmuxConnector,
};

const USAGE: &str = "usage: panewatch [attach <target>]";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load().context("Failed to load config")?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None => monitor(config).await,
        Some("attach") => {
            let target = args.get(1).context(USAGE)?;
            attach(&config, target).await
        }
        Some("-h") | Some("--help") => {
            println!("{}", USAGE);
            Ok(())
        }
        Some(other) => anyhow::bail!("unknown command '{}'\n{}", other, USAGE),
    }
}

async fn attach(config: &Config, target: &str) -> Result<()> {
    let manager = AttachManager::new(&config.control());
    let outcome = manager
        .attach(target)
        .await
        .with_context(|| format!("Failed to attach to {}", target))?;
    info!(
        "attach to {} ended (exit {}, detached by user: {})",
        target, outcome.exit_code, outcome.detached_by_user
    );
    Ok(())
}

/// Topology changes that can add or remove panes.
fn is_topology_change(notification: &Notification) -> bool {
    matches!(
        notification,
        Notification::WindowAdd { .. }
            | Notification::WindowClose { .. }
            | Notification::LayoutChange { .. }
            | Notification::SessionsChanged
            | Notification::SessionWindowChanged { .. }
    )
}

async fn monitor(config: Config) -> Result<()> {
    let registry = Arc::new(config.registry().context("Invalid pattern configuration")?);
    let engine = Arc::new(StateInferenceEngine::new(registry).with_window(config.window_lines));

    let supervisor = Supervisor::new(TmuxConnector::new(config.control()), config.backoff);
    let supervisor_task = supervisor.start();

    // Create event channel
    let (tx, mut rx) = mpsc::unbounded_channel::<Action>();

    // Forward channel state changes
    let state_tx = tx.clone();
    let mut states = supervisor.watch_state();
    tokio::spawn(async move {
        loop {
            let state = *states.borrow_and_update();
            if state_tx.send(Action::ChannelState(state)).is_err() {
                return;
            }
            if states.changed().await.is_err() {
                return;
            }
        }
    });

    // Forward topology notifications
    let topology_tx = tx.clone();
    let mut topology = supervisor.subscribe(is_topology_change);
    tokio::spawn(async move {
        while let Some(notification) = topology.next().await {
            if topology_tx.send(Action::Notification(notification)).is_err() {
                return;
            }
        }
    });

    let quit_tx = tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = quit_tx.send(Action::Quit);
        }
    });

    let client = TmuxClient::new(supervisor.clone(), &config.control());
    let capture = Arc::new(ContentCapture::new(supervisor.clone(), config.scrollback_lines));
    let mut monitor = Monitor::new(
        capture,
        engine,
        config.poll_interval(),
        config.stale_spinner(),
        tx,
    );
    let mut app = App::new();

    // Main event loop
    let result = loop {
        let Some(action) = rx.recv().await else {
            break Ok(());
        };
        let refresh = matches!(
            action,
            Action::Notification(_) | Action::ChannelState(ChannelState::Connected)
        );
        match app.handle_action(action) {
            Ok(true) => break Ok(()),
            Ok(false) => {}
            Err(e) => break Err(e),
        }
        if refresh {
            match client.list_panes().await {
                Ok(panes) => {
                    monitor.track(&panes);
                    info!("watching {} panes", monitor.tracked());
                }
                Err(e) => warn!("Failed to list panes: {}", e),
            }
        }
    };

    drop(monitor);
    supervisor.shutdown();
    let _ = supervisor_task.await;
    result
}
