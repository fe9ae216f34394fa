//! Pane capture, normalization and change detection.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;
use tracing::{debug, trace};

use super::ansi;
use super::control::CommandChannel;
use super::protocol::quote_argument;
use crate::error::PanewatchError;
use crate::Result;

/// `[=====>    ] 45%`, `[####....] 12.5 %`
static RE_PROGRESS_BAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[=#>\-\s.·█░▏▎▍▌▋▊▉]*\]\s*\d{1,3}(?:\.\d+)?\s?%").unwrap());

/// `12.3MB/45.6MB`, `512 KiB / 2 MiB`
static RE_BYTE_COUNTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d+(?:\.\d+)?\s?[KMGT]?i?B\s?/\s?\d+(?:\.\d+)?\s?[KMGT]?i?B").unwrap()
});

static RE_PERCENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{1,3}(?:\.\d+)?\s?%").unwrap());

/// Collapse animated substrings so cosmetic progress does not count as change.
pub fn normalize(stripped: &str) -> String {
    let text = RE_PROGRESS_BAR.replace_all(stripped, "[PROGRESS]");
    let text = RE_BYTE_COUNTER.replace_all(&text, "[BYTES]");
    let text = RE_PERCENT.replace_all(&text, "[PCT]");

    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        out.push_str(line.trim_end());
        out.push('\n');
    }
    // Trailing blank rows depend on pane height, not content.
    let trimmed = out.trim_end_matches('\n').len();
    out.truncate(trimmed);
    out
}

/// SHA-256 of normalized pane text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn of(normalized: &str) -> Self {
        Self(Sha256::digest(normalized.as_bytes()).into())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// One capture of a pane. Never modified after construction.
#[derive(Debug, Clone)]
pub struct ContentSnapshot {
    pub pane_id: String,
    pub raw: String,
    pub stripped: String,
    pub normalized: String,
    pub hash: ContentHash,
    pub captured_at: SystemTime,
}

impl ContentSnapshot {
    pub fn new(pane_id: &str, raw: String) -> Self {
        let stripped = ansi::strip(&raw).into_owned();
        let normalized = normalize(&stripped);
        let hash = ContentHash::of(&normalized);
        Self {
            pane_id: pane_id.to_string(),
            raw,
            stripped,
            normalized,
            hash,
            captured_at: SystemTime::now(),
        }
    }

    /// Same content after normalization.
    pub fn same_content(&self, other: &ContentSnapshot) -> bool {
        self.hash == other.hash
    }
}

#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub snapshot: Arc<ContentSnapshot>,
    /// False when the normalized hash equals the previous capture's.
    pub changed: bool,
}

#[derive(Debug, Default)]
struct PaneSnapshots {
    current: Option<Arc<ContentSnapshot>>,
    previous: Option<Arc<ContentSnapshot>>,
}

/// Captures panes through a command channel and keeps current/previous
/// snapshots per pane.
pub struct ContentCapture<C> {
    channel: C,
    scrollback: usize,
    panes: RwLock<HashMap<String, PaneSnapshots>>,
}

impl<C: CommandChannel> ContentCapture<C> {
    pub fn new(channel: C, scrollback: usize) -> Self {
        Self {
            channel,
            scrollback,
            panes: RwLock::new(HashMap::new()),
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    fn capture_command(&self, pane_id: &str) -> String {
        format!(
            "capture-pane -p -e -J -t {} -S -{}",
            quote_argument(pane_id),
            self.scrollback
        )
    }

    /// Capture `pane_id`, replacing its current snapshot.
    pub async fn capture(&self, pane_id: &str) -> Result<CaptureOutcome> {
        let raw = match self.channel.send(&self.capture_command(pane_id)).await {
            Ok(raw) => raw,
            Err(e) if e.is_missing_target() => {
                debug!(target: "panewatch::capture", "pane {} is gone: {}", pane_id, e);
                self.forget(pane_id);
                return Err(PanewatchError::PaneGone(pane_id.to_string()));
            }
            Err(e) => return Err(e),
        };

        let snapshot = Arc::new(ContentSnapshot::new(pane_id, raw));
        let mut panes = match self.panes.write() {
            Ok(panes) => panes,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = panes.entry(pane_id.to_string()).or_default();
        let changed = entry
            .current
            .as_ref()
            .map_or(true, |prev| !prev.same_content(&snapshot));
        entry.previous = entry.current.replace(snapshot.clone());
        trace!(
            target: "panewatch::capture",
            "captured {} ({}, changed={})",
            pane_id,
            snapshot.hash,
            changed
        );

        Ok(CaptureOutcome { snapshot, changed })
    }

    pub fn current(&self, pane_id: &str) -> Option<Arc<ContentSnapshot>> {
        self.panes
            .read()
            .ok()?
            .get(pane_id)
            .and_then(|p| p.current.clone())
    }

    pub fn previous(&self, pane_id: &str) -> Option<Arc<ContentSnapshot>> {
        self.panes
            .read()
            .ok()?
            .get(pane_id)
            .and_then(|p| p.previous.clone())
    }

    /// Drop stored snapshots for a pane that no longer exists.
    pub fn forget(&self, pane_id: &str) {
        if let Ok(mut panes) = self.panes.write() {
            panes.remove(pane_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmux::testing::ScriptedChannel;

    #[test]
    fn test_byte_counters_normalize_equal() {
        let a = normalize("Downloading... 1.2MB/5.6MB");
        let b = normalize("Downloading... 3.4MB/5.6MB");
        assert_eq!(a, "Downloading... [BYTES]");
        assert_eq!(ContentHash::of(&a), ContentHash::of(&b));
    }

    #[test]
    fn test_progress_bars_and_percentages_normalize_equal() {
        let a = normalize("[=====>    ] 45%\nbuilding 12%");
        let b = normalize("[========> ] 87%\nbuilding 99.5%");
        assert_eq!(a, "[PROGRESS]\nbuilding [PCT]");
        assert_eq!(a, b);
    }

    #[test]
    fn test_real_changes_still_differ() {
        assert_ne!(
            ContentHash::of(&normalize("step 1 of 3")),
            ContentHash::of(&normalize("step 2 of 3"))
        );
    }

    #[test]
    fn test_trailing_blank_rows_ignored() {
        assert_eq!(normalize("❯ \n\n\n"), normalize("❯"));
    }

    #[test]
    fn test_snapshot_strips_escapes() {
        let snap = ContentSnapshot::new("%1", "\x1b[1m✳ Working\x1b[0m 40%".to_string());
        assert_eq!(snap.stripped, "✳ Working 40%");
        assert_eq!(snap.normalized, "✳ Working [PCT]");
        assert_eq!(snap.hash.to_string().len(), 64);
    }

    #[tokio::test]
    async fn test_capture_tracks_current_and_previous() {
        let channel = ScriptedChannel::with(vec![
            Ok("Downloading... 1.2MB/5.6MB".to_string()),
            Ok("Downloading... 3.4MB/5.6MB".to_string()),
            Ok("Download complete".to_string()),
        ]);
        let capture = ContentCapture::new(channel, 200);

        let first = capture.capture("%3").await.unwrap();
        assert!(first.changed);
        let second = capture.capture("%3").await.unwrap();
        assert!(!second.changed);
        assert_eq!(first.snapshot.hash, second.snapshot.hash);
        // The earlier snapshot is untouched by the later capture.
        assert_eq!(first.snapshot.raw, "Downloading... 1.2MB/5.6MB");

        let third = capture.capture("%3").await.unwrap();
        assert!(third.changed);
        assert_eq!(capture.current("%3").unwrap().raw, "Download complete");
        assert_eq!(
            capture.previous("%3").unwrap().raw,
            "Downloading... 3.4MB/5.6MB"
        );

        let commands = capture.channel().commands();
        assert_eq!(commands[0], "capture-pane -p -e -J -t '%3' -S -200");
    }

    #[tokio::test]
    async fn test_missing_pane_is_pane_gone() {
        let channel = ScriptedChannel::with(vec![
            Ok("hello".to_string()),
            Err(PanewatchError::Command("can't find pane: %9".to_string())),
        ]);
        let capture = ContentCapture::new(channel, 50);
        capture.capture("%9").await.unwrap();
        match capture.capture("%9").await {
            Err(PanewatchError::PaneGone(pane)) => assert_eq!(pane, "%9"),
            other => panic!("expected PaneGone, got {:?}", other),
        }
        assert!(capture.current("%9").is_none());
    }

    #[tokio::test]
    async fn test_channel_errors_pass_through() {
        let capture = ContentCapture::new(ScriptedChannel::default(), 50);
        assert!(matches!(
            capture.capture("%1").await,
            Err(PanewatchError::ChannelClosed)
        ));
    }
}
