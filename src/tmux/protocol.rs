//! tmux control-mode framing.
//!
//! The control stream interleaves command responses with notifications:
//!
//! ```text
//! %begin 1700000000 12 1      <- block header: timestamp, command number, flags
//! ...payload lines...
//! %end 1700000000 12 1        <- or %error
//! %output %3 hello\015\012    <- notification, only ever between blocks
//! ```
//!
//! [`FrameParser`] is a two-state machine. Inside a block, only an `%end` or
//! `%error` carrying the block's own command number closes it; every other
//! line is payload, even when it starts with `%` (pane ids do). Outside a
//! block, `%` lines are notifications.

use tracing::trace;

/// Header fields shared by `%begin`, `%end` and `%error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub timestamp: i64,
    pub number: u64,
    /// tmux sets bit 0 when the command came from this control client.
    pub flags: u32,
}

impl BlockHeader {
    fn parse(rest: &str) -> Option<Self> {
        let mut parts = rest.split_whitespace();
        let timestamp = parts.next()?.parse().ok()?;
        let number = parts.next()?.parse().ok()?;
        let flags = parts.next().and_then(|f| f.parse().ok()).unwrap_or(0);
        Some(Self {
            timestamp,
            number,
            flags,
        })
    }

    pub fn from_client(&self) -> bool {
        self.flags & 1 == 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    Ok,
    Error,
}

/// Response to one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub lines: Vec<String>,
    pub outcome: BlockOutcome,
}

impl Block {
    pub fn payload(&self) -> String {
        self.lines.join("\n")
    }
}

/// Asynchronous event line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// `%output %<pane> <data>`, octal escapes decoded.
    Output { pane_id: String, data: String },
    /// `%extended-output %<pane> <age> ... : <data>`
    ExtendedOutput { pane_id: String, data: String },
    LayoutChange { window_id: String, layout: String },
    WindowAdd { window_id: String },
    WindowClose { window_id: String },
    WindowRenamed { window_id: String, name: String },
    WindowPaneChanged { window_id: String, pane_id: String },
    SessionChanged { session_id: String, name: String },
    SessionRenamed { session_id: String, name: String },
    SessionWindowChanged { session_id: String, window_id: String },
    SessionsChanged,
    PaneModeChanged { pane_id: String },
    ClientDetached { client: String },
    /// The server is exiting or detached this client.
    Exit { reason: Option<String> },
    /// Anything else; consumers skip these.
    Unrecognized { kind: String, args: String },
}

impl Notification {
    /// Parse a `%`-prefixed line. Never fails: unknown kinds become `Unrecognized`.
    pub fn parse(line: &str) -> Notification {
        let body = line.strip_prefix('%').unwrap_or(line);
        let (kind, rest) = body.split_once(' ').unwrap_or((body, ""));
        let two = |rest: &str| {
            let (a, b) = rest.split_once(' ').unwrap_or((rest, ""));
            (a.to_string(), b.to_string())
        };

        match kind {
            "output" => {
                let (pane_id, data) = rest.split_once(' ').unwrap_or((rest, ""));
                Notification::Output {
                    pane_id: pane_id.to_string(),
                    data: decode_octal_escapes(data),
                }
            }
            "extended-output" => {
                let pane_id = rest.split_whitespace().next().unwrap_or_default().to_string();
                let data = rest
                    .split_once(" : ")
                    .map(|(_, d)| decode_octal_escapes(d))
                    .unwrap_or_default();
                Notification::ExtendedOutput { pane_id, data }
            }
            "layout-change" => {
                let mut parts = rest.split_whitespace();
                Notification::LayoutChange {
                    window_id: parts.next().unwrap_or_default().to_string(),
                    layout: parts.next().unwrap_or_default().to_string(),
                }
            }
            "window-add" => Notification::WindowAdd {
                window_id: rest.trim().to_string(),
            },
            "window-close" | "unlinked-window-close" => Notification::WindowClose {
                window_id: rest.trim().to_string(),
            },
            "window-renamed" => {
                let (window_id, name) = two(rest);
                Notification::WindowRenamed { window_id, name }
            }
            "window-pane-changed" => {
                let (window_id, pane_id) = two(rest);
                Notification::WindowPaneChanged { window_id, pane_id }
            }
            "session-changed" => {
                let (session_id, name) = two(rest);
                Notification::SessionChanged { session_id, name }
            }
            "session-renamed" => {
                let (session_id, name) = two(rest);
                Notification::SessionRenamed { session_id, name }
            }
            "session-window-changed" => {
                let (session_id, window_id) = two(rest);
                Notification::SessionWindowChanged {
                    session_id,
                    window_id,
                }
            }
            "sessions-changed" => Notification::SessionsChanged,
            "pane-mode-changed" => Notification::PaneModeChanged {
                pane_id: rest.trim().to_string(),
            },
            "client-detached" => Notification::ClientDetached {
                client: rest.trim().to_string(),
            },
            "exit" => Notification::Exit {
                reason: Some(rest.trim().to_string()).filter(|r| !r.is_empty()),
            },
            _ => Notification::Unrecognized {
                kind: kind.to_string(),
                args: rest.to_string(),
            },
        }
    }

    /// Pane this event concerns, if any.
    pub fn pane_id(&self) -> Option<&str> {
        match self {
            Notification::Output { pane_id, .. }
            | Notification::ExtendedOutput { pane_id, .. }
            | Notification::WindowPaneChanged { pane_id, .. }
            | Notification::PaneModeChanged { pane_id } => Some(pane_id),
            _ => None,
        }
    }

    pub fn is_exit(&self) -> bool {
        matches!(self, Notification::Exit { .. })
    }
}

/// One parsed item from the control stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolUnit {
    Block(Block),
    Notification(Notification),
}

#[derive(Debug, Default)]
enum FrameState {
    #[default]
    AwaitingBlock,
    InBlock {
        header: BlockHeader,
        lines: Vec<String>,
    },
}

/// Line-at-a-time parser for the control stream.
#[derive(Debug, Default)]
pub struct FrameParser {
    state: FrameState,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_block(&self) -> bool {
        matches!(self.state, FrameState::InBlock { .. })
    }

    /// Feed one line (without its newline). Returns a unit when one completes.
    pub fn feed_line(&mut self, line: &str) -> Option<ProtocolUnit> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        match &mut self.state {
            FrameState::InBlock { header, lines } => {
                let outcome = if let Some(rest) = line.strip_prefix("%end ") {
                    Some((BlockOutcome::Ok, rest))
                } else if let Some(rest) = line.strip_prefix("%error ") {
                    Some((BlockOutcome::Error, rest))
                } else {
                    None
                };

                if let Some((outcome, rest)) = outcome {
                    if BlockHeader::parse(rest).is_some_and(|end| end.number == header.number) {
                        let header = *header;
                        let lines = std::mem::take(lines);
                        self.state = FrameState::AwaitingBlock;
                        return Some(ProtocolUnit::Block(Block {
                            header,
                            lines,
                            outcome,
                        }));
                    }
                }
                lines.push(line.to_string());
                None
            }
            FrameState::AwaitingBlock => {
                if let Some(rest) = line.strip_prefix("%begin ") {
                    if let Some(header) = BlockHeader::parse(rest) {
                        self.state = FrameState::InBlock {
                            header,
                            lines: Vec::new(),
                        };
                        return None;
                    }
                }
                if line.starts_with('%') {
                    return Some(ProtocolUnit::Notification(Notification::parse(line)));
                }
                if !line.is_empty() {
                    trace!(target: "panewatch::protocol", "stray line outside block: {:?}", line);
                }
                None
            }
        }
    }
}

/// Decode tmux's `\ooo` octal escapes. Multi-byte UTF-8 arrives as one
/// escape per byte, so decoding goes through a byte buffer.
pub fn decode_octal_escapes(input: &str) -> String {
    let src = input.as_bytes();
    let mut buf = Vec::with_capacity(src.len());
    let mut i = 0;

    while i < src.len() {
        if src[i] == b'\\' && i + 3 < src.len() {
            let digits = &src[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits
                    .iter()
                    .fold(0u16, |acc, d| acc * 8 + u16::from(d - b'0'));
                if let Ok(byte) = u8::try_from(value) {
                    buf.push(byte);
                    i += 4;
                    continue;
                }
            }
        }
        buf.push(src[i]);
        i += 1;
    }

    String::from_utf8_lossy(&buf).into_owned()
}

/// Quote an argument for a control-mode command line.
///
/// Single quotes stop tmux expanding `$VARS` and `#{formats}`; embedded
/// quotes become `'\''`.
pub fn quote_argument(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len() + 2);
    out.push('\'');
    for c in arg.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}
