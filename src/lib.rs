//! Watch AI coding agents running in tmux panes.
//!
//! A single control-mode connection ([`tmux::ControlClient`], kept alive by
//! [`tmux::Supervisor`]) carries every command. Pane content is captured and
//! hashed by [`tmux::ContentCapture`] and classified as busy, waiting or idle
//! by [`tmux::StateInferenceEngine`]. [`attach::AttachManager`] hands the
//! terminal to a pane interactively.

pub mod actions;
pub mod app;
pub mod attach;
pub mod config;
pub mod error;
pub mod tmux;

pub use error::PanewatchError;

pub type Result<T> = std::result::Result<T, PanewatchError>;
