//! Per-tool status patterns.
//!
//! Each supported tool has a built-in [`PatternSource`]. User configuration can
//! replace any field outright or extend it; the merged source is compiled once
//! into an immutable [`PatternSet`] and shared through the [`PatternRegistry`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::PanewatchError;
use crate::Result;

/// Name of the fallback pattern set used for unrecognized tools.
pub const SHELL_TOOL: &str = "shell";

/// Braille spinner frames shared by most CLIs.
const BRAILLE_SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Tools with built-in patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    Claude,
    Gemini,
    Codex,
    OpenCode,
    Shell,
}

impl Tool {
    pub const ALL: [Tool; 5] = [
        Tool::Claude,
        Tool::Gemini,
        Tool::Codex,
        Tool::OpenCode,
        Tool::Shell,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Tool::Claude => "claude",
            Tool::Gemini => "gemini",
            Tool::Codex => "codex",
            Tool::OpenCode => "opencode",
            Tool::Shell => SHELL_TOOL,
        }
    }

    pub fn from_name(name: &str) -> Option<Tool> {
        let name = name.trim().to_ascii_lowercase();
        Tool::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Guess the tool from a pane's current command (`#{pane_current_command}`).
    pub fn detect(current_command: &str) -> Tool {
        let command = current_command.trim().to_ascii_lowercase();
        let base = command.rsplit('/').next().unwrap_or(&command);
        match base {
            c if c.starts_with("claude") => Tool::Claude,
            c if c.starts_with("gemini") => Tool::Gemini,
            c if c.starts_with("codex") => Tool::Codex,
            c if c.starts_with("opencode") => Tool::OpenCode,
            _ => Tool::Shell,
        }
    }

    /// Built-in pattern lists for this tool.
    pub fn default_source(&self) -> PatternSource {
        match self {
            Tool::Claude => claude_defaults(),
            Tool::Gemini => gemini_defaults(),
            Tool::Codex => codex_defaults(),
            Tool::OpenCode => opencode_defaults(),
            Tool::Shell => shell_defaults(),
        }
    }
}

/// Uncompiled pattern lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternSource {
    /// Case-insensitive substrings that mean the tool is working.
    pub busy_patterns: Vec<String>,
    pub busy_regex: Vec<String>,
    /// Case-insensitive substrings of permission/confirmation dialogs.
    pub waiting_patterns: Vec<String>,
    pub waiting_regex: Vec<String>,
    pub spinner_chars: Vec<String>,
    /// Animated status words shown next to the spinner while working.
    pub whimsical_words: Vec<String>,
    pub completion_phrases: Vec<String>,
    pub prompt_glyphs: Vec<String>,
    /// Case-insensitive substrings of hint lines drawn below the input prompt.
    pub prompt_footers: Vec<String>,
    /// Also treat a trailing line that *ends* in a prompt glyph as a prompt.
    pub prompt_suffix: bool,
}

/// User adjustments to one tool's patterns.
///
/// A field set to `Some` replaces the default entirely (an empty list disables
/// that check). `extra_*` lists are appended after replacement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternOverrides {
    pub busy_patterns: Option<Vec<String>>,
    pub busy_regex: Option<Vec<String>>,
    pub waiting_patterns: Option<Vec<String>>,
    pub waiting_regex: Option<Vec<String>>,
    pub spinner_chars: Option<Vec<String>>,
    pub whimsical_words: Option<Vec<String>>,
    pub completion_phrases: Option<Vec<String>>,
    pub prompt_glyphs: Option<Vec<String>>,
    pub prompt_footers: Option<Vec<String>>,

    pub extra_busy_patterns: Vec<String>,
    pub extra_busy_regex: Vec<String>,
    pub extra_waiting_patterns: Vec<String>,
    pub extra_waiting_regex: Vec<String>,
    pub extra_spinner_chars: Vec<String>,
    pub extra_whimsical_words: Vec<String>,
    pub extra_completion_phrases: Vec<String>,
    pub extra_prompt_glyphs: Vec<String>,
    pub extra_prompt_footers: Vec<String>,
}

fn merge_field(field: &mut Vec<String>, replace: &Option<Vec<String>>, extra: &[String]) {
    if let Some(replacement) = replace {
        *field = replacement.clone();
    }
    field.extend(extra.iter().cloned());
}

impl PatternOverrides {
    pub fn apply(&self, mut source: PatternSource) -> PatternSource {
        merge_field(&mut source.busy_patterns, &self.busy_patterns, &self.extra_busy_patterns);
        merge_field(&mut source.busy_regex, &self.busy_regex, &self.extra_busy_regex);
        merge_field(
            &mut source.waiting_patterns,
            &self.waiting_patterns,
            &self.extra_waiting_patterns,
        );
        merge_field(&mut source.waiting_regex, &self.waiting_regex, &self.extra_waiting_regex);
        merge_field(&mut source.spinner_chars, &self.spinner_chars, &self.extra_spinner_chars);
        merge_field(
            &mut source.whimsical_words,
            &self.whimsical_words,
            &self.extra_whimsical_words,
        );
        merge_field(
            &mut source.completion_phrases,
            &self.completion_phrases,
            &self.extra_completion_phrases,
        );
        merge_field(&mut source.prompt_glyphs, &self.prompt_glyphs, &self.extra_prompt_glyphs);
        merge_field(
            &mut source.prompt_footers,
            &self.prompt_footers,
            &self.extra_prompt_footers,
        );
        source
    }
}

/// Compiled, immutable patterns for one tool.
#[derive(Debug)]
pub struct PatternSet {
    tool: String,
    busy_literals: Vec<String>,
    busy_regex: Vec<Regex>,
    waiting_literals: Vec<String>,
    waiting_regex: Vec<Regex>,
    spinner_chars: Vec<char>,
    whimsical_words: Vec<String>,
    completion_phrases: Vec<String>,
    prompt_glyphs: Vec<String>,
    prompt_footers: Vec<String>,
    prompt_suffix: bool,
    /// spinner + whimsical word + ellipsis + token count
    busy_combo: Option<Regex>,
    /// spinner + whimsical word + timing or token marker
    whimsical_marker: Option<Regex>,
}

fn compile_all(tool: &str, patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|source| PanewatchError::Pattern {
                tool: tool.to_string(),
                source,
            })
        })
        .collect()
}

fn lowercase_all(items: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

impl PatternSet {
    pub fn compile(tool: &str, source: &PatternSource) -> Result<Self> {
        let spinner_chars: Vec<char> = source
            .spinner_chars
            .iter()
            .filter_map(|s| s.trim().chars().next())
            .collect();
        let whimsical_words: Vec<String> = source
            .whimsical_words
            .iter()
            .map(|w| w.trim().to_string())
            .filter(|w| !w.is_empty())
            .collect();

        let derive_combos = !spinner_chars.is_empty() && !whimsical_words.is_empty();
        let (busy_combo, whimsical_marker) = if !derive_combos {
            (None, None)
        } else {
            let spin: String = spinner_chars
                .iter()
                .map(|c| regex::escape(&c.to_string()))
                .collect();
            let words = whimsical_words
                .iter()
                .map(|w| regex::escape(w))
                .collect::<Vec<_>>()
                .join("|");
            let combo = format!(
                r"(?i)(?:^|\s)[{spin}]\s*(?:{words})(?:…|\.\.\.)\s*\(.*?\d[\d.,]*k?\s*tokens"
            );
            let marker = format!(
                r"(?i)(?:^|\s)[{spin}]\s*(?:{words})\b(?:…|\.\.\.)?.*?(?:\(\s*\d+\s*[smh]\b|\d[\d.,]*k?\s*tokens|esc to interrupt)"
            );
            let compile = |pattern: &str| {
                Regex::new(pattern).map_err(|source| PanewatchError::Pattern {
                    tool: tool.to_string(),
                    source,
                })
            };
            (Some(compile(&combo)?), Some(compile(&marker)?))
        };

        Ok(Self {
            tool: tool.to_string(),
            busy_literals: lowercase_all(&source.busy_patterns),
            busy_regex: compile_all(tool, &source.busy_regex)?,
            waiting_literals: lowercase_all(&source.waiting_patterns),
            waiting_regex: compile_all(tool, &source.waiting_regex)?,
            spinner_chars,
            whimsical_words,
            completion_phrases: lowercase_all(&source.completion_phrases),
            prompt_glyphs: source
                .prompt_glyphs
                .iter()
                .map(|g| g.trim().to_string())
                .filter(|g| !g.is_empty())
                .collect(),
            prompt_footers: lowercase_all(&source.prompt_footers),
            prompt_suffix: source.prompt_suffix,
            busy_combo,
            whimsical_marker,
        })
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// First busy literal contained in `lowered` (already lowercased).
    pub fn busy_literal_in(&self, lowered: &str) -> Option<&str> {
        self.busy_literals
            .iter()
            .find(|lit| lowered.contains(lit.as_str()))
            .map(String::as_str)
    }

    /// First busy regex (user or derived combo) matching `line`.
    pub fn busy_regex_in<'a>(&self, line: &'a str) -> Option<&'a str> {
        self.busy_regex
            .iter()
            .chain(self.busy_combo.iter())
            .find_map(|re| re.find(line).map(|m| m.as_str()))
    }

    pub fn waiting_literal_in(&self, lowered: &str) -> Option<&str> {
        self.waiting_literals
            .iter()
            .find(|lit| lowered.contains(lit.as_str()))
            .map(String::as_str)
    }

    pub fn waiting_regex_in<'a>(&self, line: &'a str) -> Option<&'a str> {
        self.waiting_regex
            .iter()
            .find_map(|re| re.find(line).map(|m| m.as_str()))
    }

    pub fn spinner_in(&self, line: &str) -> Option<char> {
        line.chars().find(|c| self.spinner_chars.contains(c))
    }

    pub fn whimsical_in<'a>(&self, line: &'a str) -> Option<&'a str> {
        self.whimsical_marker
            .as_ref()
            .and_then(|re| re.find(line))
            .map(|m| m.as_str())
    }

    pub fn completion_phrase_in(&self, lowered: &str) -> Option<&str> {
        self.completion_phrases
            .iter()
            .find(|p| contains_word(lowered, p))
            .map(String::as_str)
    }

    pub fn prompt_glyphs(&self) -> &[String] {
        &self.prompt_glyphs
    }

    /// Whether `lowered` is a hint line shown under the input prompt.
    pub fn prompt_footer_in(&self, lowered: &str) -> bool {
        self.prompt_footers
            .iter()
            .any(|footer| lowered.contains(footer.as_str()))
    }

    pub fn prompt_suffix(&self) -> bool {
        self.prompt_suffix
    }

    pub fn whimsical_words(&self) -> &[String] {
        &self.whimsical_words
    }

    pub fn spinner_chars(&self) -> &[char] {
        &self.spinner_chars
    }
}

/// Substring match that requires non-alphanumeric neighbours, so "done" does
/// not match inside "abandoned".
fn contains_word(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// All compiled pattern sets, keyed by lowercase tool name.
#[derive(Debug)]
pub struct PatternRegistry {
    sets: HashMap<String, Arc<PatternSet>>,
    fallback: Arc<PatternSet>,
}

impl PatternRegistry {
    /// Built-in patterns only.
    pub fn with_defaults() -> Result<Self> {
        Self::new(&HashMap::new())
    }

    /// Merge `overrides` into the built-in defaults and compile every set.
    ///
    /// Override keys that do not name a built-in tool create a new tool based
    /// on the shell defaults.
    pub fn new(overrides: &HashMap<String, PatternOverrides>) -> Result<Self> {
        let overrides: HashMap<String, &PatternOverrides> = overrides
            .iter()
            .map(|(name, o)| (name.trim().to_ascii_lowercase(), o))
            .collect();

        let mut sets = HashMap::new();
        for tool in Tool::ALL {
            let mut source = tool.default_source();
            if let Some(o) = overrides.get(tool.name()) {
                source = o.apply(source);
            }
            sets.insert(
                tool.name().to_string(),
                Arc::new(PatternSet::compile(tool.name(), &source)?),
            );
        }
        for (name, o) in &overrides {
            if sets.contains_key(name) {
                continue;
            }
            let source = o.apply(shell_defaults());
            sets.insert(name.clone(), Arc::new(PatternSet::compile(name, &source)?));
        }

        let fallback = sets
            .get(SHELL_TOOL)
            .cloned()
            .ok_or_else(|| PanewatchError::Config("shell pattern set missing".to_string()))?;
        Ok(Self { sets, fallback })
    }

    /// Patterns for `tool`, falling back to generic shell detection.
    pub fn get(&self, tool: &str) -> Arc<PatternSet> {
        let key = tool.trim().to_ascii_lowercase();
        self.sets
            .get(&key)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    pub fn tools(&self) -> impl Iterator<Item = &str> {
        self.sets.keys().map(String::as_str)
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn claude_defaults() -> PatternSource {
    let mut spinner = strings(&["✳", "✽", "✶", "✻", "✢"]);
    spinner.extend(strings(BRAILLE_SPINNER));
    PatternSource {
        busy_patterns: strings(&["esc to interrupt", "ctrl+c to interrupt"]),
        busy_regex: vec![
            // Any status word with elapsed time, e.g. "· Noodling… (1m 3s · ↓ 2.1k tokens)".
            r"^\s*[✳✽✶✻✢·⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏]\s+\S+(?:…|\.\.\.)\s*\(\s*(?:\d+h\s*)?(?:\d+m\s*)?\d+s\s*·"
                .to_string(),
        ],
        waiting_patterns: strings(&[
            "do you want to proceed?",
            "do you want to make this edit",
            "do you want to create",
            "do you want to run",
            "yes, and don't ask again",
            "yes, allow all edits",
            "no, and tell claude what to do differently",
            "do you trust the files in this folder?",
            "enter to confirm",
        ]),
        waiting_regex: vec![r"(?i)\[y/n\]".to_string(), r"^\s*❯\s*1\.\s+\S".to_string()],
        spinner_chars: spinner,
        whimsical_words: strings(&[
            "Accomplishing", "Actioning", "Actualizing", "Baking", "Booping", "Brewing",
            "Calculating", "Cerebrating", "Channelling", "Churning", "Clauding", "Coalescing",
            "Cogitating", "Combobulating", "Computing", "Concocting", "Conjuring", "Considering",
            "Contemplating", "Cooking", "Crafting", "Creating", "Crunching", "Deciphering",
            "Deliberating", "Determining", "Discombobulating", "Divining", "Doing", "Effecting",
            "Elucidating", "Enchanting", "Envisioning", "Finagling", "Flibbertigibbeting",
            "Forging", "Forming", "Frolicking", "Generating", "Germinating", "Gusting",
            "Hatching", "Herding", "Honking", "Hustling", "Ideating", "Imagining", "Incubating",
            "Inferring", "Jiving", "Manifesting", "Marinating", "Meandering", "Moseying",
            "Mulling", "Mustering", "Musing", "Noodling", "Percolating", "Perusing",
            "Philosophising", "Pondering", "Pontificating", "Processing", "Puttering",
            "Puzzling", "Reticulating", "Ruminating", "Scheming", "Schlepping", "Shimmying",
            "Shucking", "Simmering", "Smooshing", "Spelunking", "Spinning", "Stewing",
            "Sussing", "Synthesizing", "Thinking", "Tinkering", "Transmuting", "Unfurling",
            "Unravelling", "Vibing", "Wandering", "Whirring", "Wibbling", "Wizarding",
            "Working", "Wrangling",
        ]),
        completion_phrases: strings(&[
            "done",
            "completed",
            "finished",
            "what would you like",
            "anything else",
            "how can i help",
            "all set",
        ]),
        prompt_glyphs: strings(&["❯", ">"]),
        prompt_footers: strings(&["? for shortcuts"]),
        prompt_suffix: false,
    }
}

fn gemini_defaults() -> PatternSource {
    PatternSource {
        busy_patterns: strings(&["esc to cancel"]),
        busy_regex: Vec::new(),
        waiting_patterns: strings(&[
            "allow execution",
            "waiting for user confirmation",
            "yes, allow once",
            "yes, allow always",
            "do you want to proceed",
        ]),
        waiting_regex: vec![r"(?i)\[y/n\]".to_string()],
        spinner_chars: strings(BRAILLE_SPINNER),
        whimsical_words: Vec::new(),
        completion_phrases: strings(&["done", "completed", "finished"]),
        prompt_glyphs: strings(&[">"]),
        prompt_footers: Vec::new(),
        prompt_suffix: false,
    }
}

fn codex_defaults() -> PatternSource {
    PatternSource {
        busy_patterns: strings(&["esc to interrupt", "ctrl+c to interrupt"]),
        busy_regex: Vec::new(),
        waiting_patterns: strings(&[
            "allow command?",
            "would you like to run the following command",
            "would you like to make the following edits",
            "yes, proceed",
            "press enter to confirm",
        ]),
        waiting_regex: vec![r"(?i)\[y/n\]".to_string()],
        spinner_chars: strings(BRAILLE_SPINNER),
        whimsical_words: strings(&["Working", "Thinking"]),
        completion_phrases: strings(&["done", "completed", "finished"]),
        prompt_glyphs: strings(&["›", "▌", ">"]),
        prompt_footers: Vec::new(),
        prompt_suffix: false,
    }
}

fn opencode_defaults() -> PatternSource {
    PatternSource {
        busy_patterns: strings(&["esc interrupt", "esc to interrupt"]),
        busy_regex: Vec::new(),
        waiting_patterns: strings(&["permission required", "allow once", "allow always"]),
        waiting_regex: vec![r"(?i)\[y/n\]".to_string()],
        spinner_chars: strings(BRAILLE_SPINNER),
        whimsical_words: Vec::new(),
        completion_phrases: strings(&["done", "completed", "finished"]),
        prompt_glyphs: strings(&[">"]),
        prompt_footers: Vec::new(),
        prompt_suffix: false,
    }
}

fn shell_defaults() -> PatternSource {
    PatternSource {
        busy_patterns: Vec::new(),
        busy_regex: Vec::new(),
        waiting_patterns: strings(&[
            "[y/n]",
            "(y/n)",
            "(yes/no)",
            "[yes/no]",
            "press enter to continue",
            "press any key",
            "continue?",
            "password:",
            "passphrase",
        ]),
        waiting_regex: Vec::new(),
        spinner_chars: strings(BRAILLE_SPINNER),
        whimsical_words: Vec::new(),
        completion_phrases: strings(&["done", "completed", "finished"]),
        prompt_glyphs: strings(&["$", "#", "%", "❯", ">", "➜", "λ"]),
        prompt_footers: Vec::new(),
        prompt_suffix: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_compile_for_every_tool() {
        let registry = PatternRegistry::with_defaults().unwrap();
        for tool in Tool::ALL {
            assert_eq!(registry.get(tool.name()).tool(), tool.name());
        }
    }

    #[test]
    fn test_unknown_tool_falls_back_to_shell() {
        let registry = PatternRegistry::with_defaults().unwrap();
        assert_eq!(registry.get("aider").tool(), SHELL_TOOL);
        assert_eq!(registry.get("CLAUDE").tool(), "claude");
    }

    #[test]
    fn test_override_replaces_and_empty_disables() {
        let overrides = PatternOverrides {
            busy_patterns: Some(Vec::new()),
            waiting_patterns: Some(vec!["Approve?".to_string()]),
            ..Default::default()
        };
        let source = overrides.apply(Tool::Claude.default_source());
        assert!(source.busy_patterns.is_empty());
        assert_eq!(source.waiting_patterns, vec!["Approve?".to_string()]);
        // Untouched fields keep their defaults.
        assert_eq!(source.spinner_chars, Tool::Claude.default_source().spinner_chars);

        let set = PatternSet::compile("claude", &source).unwrap();
        assert!(set.busy_literal_in("esc to interrupt").is_none());
        assert_eq!(set.waiting_literal_in("approve? [y/n]"), Some("approve?"));
    }

    #[test]
    fn test_extra_fields_extend_defaults() {
        let mut map = HashMap::new();
        map.insert(
            "claude".to_string(),
            PatternOverrides {
                extra_whimsical_words: vec!["Befuddling".to_string()],
                ..Default::default()
            },
        );
        let registry = PatternRegistry::new(&map).unwrap();
        let set = registry.get("claude");
        assert!(set.whimsical_words().iter().any(|w| w == "Befuddling"));
        assert!(set.whimsical_words().iter().any(|w| w == "Thinking"));
        assert!(set.whimsical_in("✶ Befuddling… (12s · 40 tokens)").is_some());
    }

    #[test]
    fn test_custom_tool_builds_on_shell() {
        let mut map = HashMap::new();
        map.insert(
            "Aider".to_string(),
            PatternOverrides {
                extra_busy_patterns: vec!["Waiting for LLM".to_string()],
                ..Default::default()
            },
        );
        let registry = PatternRegistry::new(&map).unwrap();
        let set = registry.get("aider");
        assert_eq!(set.tool(), "aider");
        assert!(set.busy_literal_in("waiting for llm...").is_some());
        assert!(set.prompt_suffix());
    }

    #[test]
    fn test_invalid_regex_is_reported_with_tool() {
        let mut map = HashMap::new();
        map.insert(
            "gemini".to_string(),
            PatternOverrides {
                extra_busy_regex: vec!["(unclosed".to_string()],
                ..Default::default()
            },
        );
        match PatternRegistry::new(&map) {
            Err(PanewatchError::Pattern { tool, .. }) => assert_eq!(tool, "gemini"),
            other => panic!("expected pattern error, got {:?}", other),
        }
    }

    #[test]
    fn test_combo_requires_spinner_prefix() {
        let set = PatternSet::compile("claude", &Tool::Claude.default_source()).unwrap();
        assert!(set.busy_regex_in("✳ Gusting… (35s · 673 tokens)").is_some());
        assert!(set.busy_regex_in("Thinking… about 673 tokens").is_none());
        assert!(set.whimsical_in("Thinking about it (3s)").is_none());
    }

    #[test]
    fn test_empty_spinner_disables_derived_combos() {
        let mut source = Tool::Claude.default_source();
        source.spinner_chars.clear();
        source.busy_regex.clear();
        let set = PatternSet::compile("claude", &source).unwrap();
        assert!(set.busy_regex_in("✳ Thinking… (3s · 10 tokens)").is_none());
        assert!(set.whimsical_in("✳ Thinking… (3s · 10 tokens)").is_none());
    }

    #[test]
    fn test_completion_phrase_needs_word_boundary() {
        let set = PatternSet::compile("claude", &Tool::Claude.default_source()).unwrap();
        assert_eq!(set.completion_phrase_in("task done."), Some("done"));
        assert!(set.completion_phrase_in("abandoned the branch").is_none());
    }

    #[test]
    fn test_detect_tool_from_command() {
        assert_eq!(Tool::detect("claude"), Tool::Claude);
        assert_eq!(Tool::detect("/usr/local/bin/gemini"), Tool::Gemini);
        assert_eq!(Tool::detect("codex"), Tool::Codex);
        assert_eq!(Tool::detect("opencode"), Tool::OpenCode);
        assert_eq!(Tool::detect("zsh"), Tool::Shell);
        assert_eq!(Tool::from_name(" OpenCode "), Some(Tool::OpenCode));
    }
}
