use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use super::ansi;
use super::capture::ContentHash;
use super::patterns::{PatternRegistry, PatternSet};

/// Number of trailing non-empty lines the classifier looks at.
pub const DEFAULT_WINDOW_LINES: usize = 15;
/// Spinners and prompts only count near the bottom of the window.
const TAIL_LINES: usize = 3;
/// Longest typed input still accepted after a prompt glyph.
const MAX_TYPED_CHARS: usize = 80;

/// Status of an agent running in a pane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Agent is actively processing (spinning, thinking)
    Busy,
    /// Agent is waiting for the user (confirmation, question, prompt)
    Waiting,
    /// Nothing recognisable on screen
    #[default]
    Idle,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AgentStatus::Busy => "busy",
            AgentStatus::Waiting => "waiting",
            AgentStatus::Idle => "idle",
        })
    }
}

/// Which rule produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Evidence {
    BusyPattern,
    Spinner,
    WhimsicalWord,
    PermissionPrompt,
    InputPrompt,
    CompletionPrompt,
    NoMatch,
    /// A spinner verdict overridden because the pane stopped changing.
    StaleSpinner,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub state: AgentStatus,
    pub evidence: Evidence,
    /// The matched text, when a rule matched.
    pub detail: Option<String>,
    pub evaluated_at: SystemTime,
}

/// The lines a verdict is drawn from, plus their lowercased form for literal
/// matching.
struct Window<'a> {
    lines: Vec<&'a str>,
    lowered: Vec<String>,
}

impl<'a> Window<'a> {
    fn new(content: &'a str, size: usize) -> Self {
        let mut lines: Vec<&str> = content
            .lines()
            .rev()
            .filter(|l| !l.trim().is_empty())
            .take(size)
            .collect();
        lines.reverse();
        let lowered = lines.iter().map(|l| l.to_lowercase()).collect();
        Self { lines, lowered }
    }

    fn tail(&self) -> &[&'a str] {
        &self.lines[self.lines.len().saturating_sub(TAIL_LINES)..]
    }

    fn last(&self) -> Option<&'a str> {
        self.lines.last().copied()
    }
}

fn is_box_drawing(c: char) -> bool {
    ('\u{2500}'..='\u{257F}').contains(&c)
}

fn starts_with_box_drawing(line: &str) -> bool {
    line.trim_start().chars().next().is_some_and(is_box_drawing)
}

/// Remove input-box borders so `│ > text │` reads as `> text`.
fn peel_borders(line: &str) -> &str {
    line.trim_matches(|c: char| c.is_whitespace() || is_box_drawing(c))
}

/// A prompt glyph at the start of the line, optionally followed by a short
/// piece of typed input.
fn leading_prompt<'a>(line: &'a str, glyphs: &[String]) -> Option<&'a str> {
    glyphs.iter().find_map(|glyph| {
        let rest = line.strip_prefix(glyph.as_str())?;
        let typed = rest.trim();
        let ok = typed.is_empty()
            || (rest.starts_with(char::is_whitespace) && typed.chars().count() <= MAX_TYPED_CHARS);
        ok.then_some(&line[..glyph.len()])
    })
}

/// Shell prompts end in their glyph: `user@host:~$`.
fn trailing_prompt<'a>(line: &'a str, glyphs: &[String]) -> Option<&'a str> {
    glyphs.iter().find_map(|glyph| {
        let head = line.strip_suffix(glyph.as_str())?;
        // "50%" is output, not a zsh prompt.
        if head.chars().next_back().is_some_and(|c| c.is_ascii_digit()) {
            return None;
        }
        Some(&line[head.len()..])
    })
}

type Check = fn(&PatternSet, &Window<'_>) -> Option<String>;

/// One step of the priority cascade.
pub struct Rule {
    pub state: AgentStatus,
    pub evidence: Evidence,
    check: Check,
}

fn busy_pattern(set: &PatternSet, window: &Window<'_>) -> Option<String> {
    window
        .lowered
        .iter()
        .find_map(|l| set.busy_literal_in(l))
        .or_else(|| window.lines.iter().find_map(|l| set.busy_regex_in(l)))
        .map(str::to_string)
}

fn spinner(set: &PatternSet, window: &Window<'_>) -> Option<String> {
    window
        .tail()
        .iter()
        .filter(|l| !starts_with_box_drawing(l))
        .find_map(|l| set.spinner_in(l))
        .map(String::from)
}

fn whimsical_word(set: &PatternSet, window: &Window<'_>) -> Option<String> {
    window
        .lines
        .iter()
        .filter(|l| !starts_with_box_drawing(l))
        .find_map(|l| set.whimsical_in(l))
        .map(|m| m.trim().to_string())
}

fn permission_prompt(set: &PatternSet, window: &Window<'_>) -> Option<String> {
    window
        .lowered
        .iter()
        .find_map(|l| set.waiting_literal_in(l))
        .or_else(|| window.lines.iter().find_map(|l| set.waiting_regex_in(l)))
        .map(str::to_string)
}

/// The line holding the input prompt: the last line, or the first line with
/// text above a footer hint such as `? for shortcuts`.
fn prompt_line<'a>(set: &PatternSet, window: &Window<'a>) -> Option<&'a str> {
    let mut lines = window.lines.iter().rev().copied().map(peel_borders);
    let last = lines.next()?;
    if !set.prompt_footer_in(&last.to_lowercase()) {
        return Some(last);
    }
    lines.find(|l| !l.is_empty())
}

fn input_prompt(set: &PatternSet, window: &Window<'_>) -> Option<String> {
    let line = prompt_line(set, window)?;
    leading_prompt(line, set.prompt_glyphs())
        .or_else(|| {
            set.prompt_suffix()
                .then(|| trailing_prompt(line, set.prompt_glyphs()))
                .flatten()
        })
        .map(|_| line.to_string())
}

fn completion_prompt(set: &PatternSet, window: &Window<'_>) -> Option<String> {
    let bare_prompt = window.tail().iter().any(|l| {
        let peeled = peel_borders(l);
        set.prompt_glyphs().iter().any(|g| peeled == g.as_str())
    });
    if !bare_prompt {
        return None;
    }
    window
        .lowered
        .iter()
        .find_map(|l| set.completion_phrase_in(l))
        .map(str::to_string)
}

/// Evaluated in order; the first match wins.
pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule {
            state: AgentStatus::Busy,
            evidence: Evidence::BusyPattern,
            check: busy_pattern,
        },
        Rule {
            state: AgentStatus::Busy,
            evidence: Evidence::Spinner,
            check: spinner,
        },
        Rule {
            state: AgentStatus::Busy,
            evidence: Evidence::WhimsicalWord,
            check: whimsical_word,
        },
        Rule {
            state: AgentStatus::Waiting,
            evidence: Evidence::PermissionPrompt,
            check: permission_prompt,
        },
        Rule {
            state: AgentStatus::Waiting,
            evidence: Evidence::InputPrompt,
            check: input_prompt,
        },
        Rule {
            state: AgentStatus::Waiting,
            evidence: Evidence::CompletionPrompt,
            check: completion_prompt,
        },
    ]
}

/// Engine for inferring agent status from pane content
pub struct StateInferenceEngine {
    registry: Arc<PatternRegistry>,
    rules: Vec<Rule>,
    window_lines: usize,
}

impl StateInferenceEngine {
    pub fn new(registry: Arc<PatternRegistry>) -> Self {
        Self {
            registry,
            rules: default_rules(),
            window_lines: DEFAULT_WINDOW_LINES,
        }
    }

    pub fn with_window(mut self, lines: usize) -> Self {
        self.window_lines = lines.max(1);
        self
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Classify the recent content of a pane running `tool`.
    ///
    /// Never fails: content no rule recognises is `Idle`.
    pub fn classify(&self, pane_id: &str, tool: &str, content: &str) -> ClassificationResult {
        let set = self.registry.get(tool);
        let stripped = ansi::strip(content);
        let window = Window::new(&stripped, self.window_lines);

        let (state, evidence, detail) = self
            .rules
            .iter()
            .find_map(|rule| {
                (rule.check)(set.as_ref(), &window)
                    .map(|detail| (rule.state, rule.evidence, Some(detail)))
            })
            .unwrap_or((AgentStatus::Idle, Evidence::NoMatch, None));

        tracing::trace!(
            target: "panewatch::heuristics",
            "{} ({}): {} via {:?} {:?}",
            pane_id,
            set.tool(),
            state,
            evidence,
            detail
        );

        ClassificationResult {
            state,
            evidence,
            detail,
            evaluated_at: SystemTime::now(),
        }
    }
}

/// Downgrades a spinner-only busy verdict once the pane has stopped changing.
///
/// A spinner glyph frozen on screen (crashed tool, suspended process) would
/// otherwise read as busy forever. Tracks one pane.
#[derive(Debug)]
pub struct StalenessGuard {
    threshold: Duration,
    last: Option<(ContentHash, Instant)>,
}

impl StalenessGuard {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold, last: None }
    }

    pub fn apply(
        &mut self,
        hash: ContentHash,
        result: ClassificationResult,
    ) -> ClassificationResult {
        self.apply_at(hash, result, Instant::now())
    }

    pub fn apply_at(
        &mut self,
        hash: ContentHash,
        result: ClassificationResult,
        now: Instant,
    ) -> ClassificationResult {
        let since = match self.last {
            Some((last, since)) if last == hash => since,
            _ => {
                self.last = Some((hash, now));
                now
            }
        };

        let frozen = now.saturating_duration_since(since) > self.threshold;
        if frozen && result.state == AgentStatus::Busy && result.evidence == Evidence::Spinner {
            return ClassificationResult {
                state: AgentStatus::Idle,
                evidence: Evidence::StaleSpinner,
                ..result
            };
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmux::patterns::PatternOverrides;
    use std::collections::HashMap;

    fn engine() -> StateInferenceEngine {
        StateInferenceEngine::new(Arc::new(PatternRegistry::with_defaults().unwrap()))
    }

    fn state(tool: &str, content: &str) -> AgentStatus {
        engine().classify("%0", tool, content).state
    }

    #[test]
    fn test_whimsical_status_line_is_busy() {
        let result = engine().classify("%1", "claude", "✳ Gusting… (35s · 673 tokens)");
        assert_eq!(result.state, AgentStatus::Busy);
        assert_eq!(result.evidence, Evidence::BusyPattern);
    }

    #[test]
    fn test_lone_prompt_is_waiting() {
        let content = "Wrote 3 files\n\n❯\n";
        let result = engine().classify("%1", "claude", content);
        assert_eq!(result.state, AgentStatus::Waiting);
        assert_eq!(result.evidence, Evidence::InputPrompt);
    }

    #[test]
    fn test_completion_needs_prompt() {
        assert_eq!(state("claude", "Task completed\n❯"), AgentStatus::Waiting);
        assert_eq!(state("claude", "Task completed\nsome other output"), AgentStatus::Idle);
        assert_eq!(state("shell", "Task completed\nsome other output"), AgentStatus::Idle);
    }

    #[test]
    fn test_busy_beats_waiting_in_either_order() {
        let below = "Do you want to proceed?\n✳ Gusting… (35s · 673 tokens)";
        let above = "✻ Noodling… (2s · esc to interrupt)\nDo you want to proceed?";
        assert_eq!(state("claude", below), AgentStatus::Busy);
        assert_eq!(state("claude", above), AgentStatus::Busy);
    }

    #[test]
    fn test_spinner_inside_box_is_not_busy() {
        let content =
            "╭────────────────────────╮\n│ ✻ Welcome to the tool! │\n╰────────────────────────╯";
        let result = engine().classify("%1", "claude", content);
        assert_eq!(result.state, AgentStatus::Idle);
        assert_eq!(result.evidence, Evidence::NoMatch);
    }

    #[test]
    fn test_bare_spinner_near_bottom_is_busy() {
        let result = engine().classify("%1", "claude", "reading files\n✶ Reticulating");
        assert_eq!(result.state, AgentStatus::Busy);
        assert_eq!(result.evidence, Evidence::Spinner);
        assert_eq!(result.detail.as_deref(), Some("✶"));
    }

    #[test]
    fn test_spinner_scrolled_out_of_tail_is_ignored() {
        let content = "✶ old frame\nline a\nline b\nline c";
        assert_eq!(state("claude", content), AgentStatus::Idle);
    }

    #[test]
    fn test_whimsical_word_without_spinner_is_not_busy() {
        assert_eq!(state("claude", "Gusting… (35s · 673 tokens)"), AgentStatus::Idle);
        assert_eq!(state("claude", "Thinking about the weather (3s)"), AgentStatus::Idle);
    }

    #[test]
    fn test_whimsical_rule_with_spinner_and_timing() {
        // Spinner scrolled past the tail, so only the word rule can see it.
        let overrides = HashMap::from([(
            "claude".to_string(),
            PatternOverrides {
                busy_patterns: Some(Vec::new()),
                busy_regex: Some(Vec::new()),
                ..Default::default()
            },
        )]);
        let registry = Arc::new(PatternRegistry::new(&overrides).unwrap());
        let content = "✽ Pondering (12s)\nline a\nline b\nline c";
        let result = StateInferenceEngine::new(registry).classify("%1", "claude", content);
        assert_eq!(result.state, AgentStatus::Busy);
        assert_eq!(result.evidence, Evidence::WhimsicalWord);
    }

    #[test]
    fn test_permission_dialog_is_waiting() {
        let content = "Bash command\n  rm -rf target\nDo you want to proceed?\n❯ 1. Yes\n  2. No";
        let result = engine().classify("%1", "claude", content);
        assert_eq!(result.state, AgentStatus::Waiting);
        assert_eq!(result.evidence, Evidence::PermissionPrompt);
    }

    #[test]
    fn test_prompt_inside_input_box() {
        let content = "│ > fix the tests │";
        assert_eq!(state("claude", content), AgentStatus::Waiting);

        let long = format!("> {}", "x".repeat(MAX_TYPED_CHARS + 1));
        assert_eq!(state("claude", &long), AgentStatus::Idle);
    }

    #[test]
    fn test_prompt_above_shortcut_hint() {
        let content = "Tests pass.\n────────────\n> \n────────────\n  ? for shortcuts";
        let result = engine().classify("%1", "claude", content);
        assert_eq!(result.state, AgentStatus::Waiting);
        assert_eq!(result.evidence, Evidence::InputPrompt);

        let boxed = "╭──────╮\n│ >    │\n╰──────╯\n  ? for shortcuts";
        assert_eq!(engine().classify("%1", "claude", boxed).evidence, Evidence::InputPrompt);

        let hint_only = "Reading files\n  ? for shortcuts";
        assert_eq!(engine().classify("%1", "claude", hint_only).evidence, Evidence::NoMatch);
    }

    #[test]
    fn test_codex_message_bullet_is_not_a_spinner() {
        let content = "• Updated src/lib.rs and ran the tests.\n\n› ";
        let result = engine().classify("%1", "codex", content);
        assert_eq!(result.state, AgentStatus::Waiting);
        assert_eq!(result.evidence, Evidence::InputPrompt);

        let working = "• Working (5s • esc to interrupt)\n\n› ";
        let result = engine().classify("%1", "codex", working);
        assert_eq!(result.state, AgentStatus::Busy);
        assert_eq!(result.evidence, Evidence::BusyPattern);
    }

    #[test]
    fn test_completion_with_boxed_prompt() {
        let content = "All set.\n╭─────╮\n│ ❯   │\n╰─────╯";
        let result = engine().classify("%1", "claude", content);
        assert_eq!(result.state, AgentStatus::Waiting);
        assert_eq!(result.evidence, Evidence::CompletionPrompt);
        assert_eq!(result.detail.as_deref(), Some("all set"));

        let no_phrase = "Still here.\n╭─────╮\n│ ❯   │\n╰─────╯";
        assert_eq!(state("claude", no_phrase), AgentStatus::Idle);
    }

    #[test]
    fn test_shell_prompt_suffix() {
        assert_eq!(state("shell", "make: done\nuser@host:~/src$ "), AgentStatus::Waiting);
        assert_eq!(state("shell", "copying\nprogress 50%"), AgentStatus::Idle);
        assert_eq!(state("unknown-tool", "Overwrite file? (y/n)"), AgentStatus::Waiting);
    }

    #[test]
    fn test_escapes_are_stripped_before_matching() {
        let content = "\x1b[2m✳\x1b[0m \x1b[1mGusting…\x1b[0m (35s · 673 tokens)";
        assert_eq!(state("claude", content), AgentStatus::Busy);
    }

    #[test]
    fn test_window_limits_lookback() {
        let mut content = String::from("Do you want to proceed?\n");
        for i in 0..DEFAULT_WINDOW_LINES {
            content.push_str(&format!("log line {}\n", i));
        }
        assert_eq!(state("claude", &content), AgentStatus::Idle);
        let wide = engine().with_window(DEFAULT_WINDOW_LINES + 1);
        assert_eq!(wide.classify("%0", "claude", &content).state, AgentStatus::Waiting);
    }

    #[test]
    fn test_empty_content_is_idle() {
        let result = engine().classify("%1", "claude", "");
        assert_eq!(result.state, AgentStatus::Idle);
        assert_eq!(result.evidence, Evidence::NoMatch);
        assert!(result.detail.is_none());
    }

    #[test]
    fn test_rule_order() {
        let order: Vec<Evidence> = engine().rules().iter().map(|r| r.evidence).collect();
        assert_eq!(
            order,
            vec![
                Evidence::BusyPattern,
                Evidence::Spinner,
                Evidence::WhimsicalWord,
                Evidence::PermissionPrompt,
                Evidence::InputPrompt,
                Evidence::CompletionPrompt,
            ]
        );
    }

    #[test]
    fn test_staleness_guard_downgrades_frozen_spinner() {
        let engine = engine();
        let mut guard = StalenessGuard::new(Duration::from_secs(30));
        let hash = ContentHash::of("✶ Reticulating");
        let start = Instant::now();

        let verdict = || engine.classify("%1", "claude", "✶ Reticulating");
        let fresh = guard.apply_at(hash, verdict(), start);
        assert_eq!(fresh.state, AgentStatus::Busy);

        let later = guard.apply_at(hash, verdict(), start + Duration::from_secs(31));
        assert_eq!(later.state, AgentStatus::Idle);
        assert_eq!(later.evidence, Evidence::StaleSpinner);

        // New content restarts the clock.
        let moved = ContentHash::of("✷ Reticulating");
        let after = guard.apply_at(moved, verdict(), start + Duration::from_secs(32));
        assert_eq!(after.state, AgentStatus::Busy);
    }

    #[test]
    fn test_staleness_guard_keeps_explicit_busy() {
        let engine = engine();
        let mut guard = StalenessGuard::new(Duration::from_secs(1));
        let hash = ContentHash::of("same");
        let start = Instant::now();
        let content = "✻ Noodling… (2s · esc to interrupt)";
        guard.apply_at(hash, engine.classify("%1", "claude", content), start);
        let later = guard.apply_at(
            hash,
            engine.classify("%1", "claude", content),
            start + Duration::from_secs(60),
        );
        assert_eq!(later.state, AgentStatus::Busy);
        assert_eq!(later.evidence, Evidence::BusyPattern);
    }
}
