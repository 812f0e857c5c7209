//! Reasoning-stream processing.
//!
//! Models disclose their reasoning in two styles: `<think>...</think>`
//! blocks and plain lines opening with a "Strategy Analysis" label. Both
//! are routed into one de-duplicated thought log. A labelled line stays in
//! the transcript the first time its thought is seen; repeats, and lines
//! already captured from a block, are hidden. The transcript is also
//! scrubbed of tool-call echoes and provider control tokens.
//!
//! [`extract_thinking_blocks`] is the whole-buffer form. [`ReasoningProcessor`]
//! does the same work incrementally: a [`ThinkParser`] state machine handles
//! tags split across chunk boundaries and each transcript line is classified
//! exactly once, when it is complete.

use regex_lite::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<think>(.*?)</think>").expect("think pattern is valid"));
static THINK_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</?think>").expect("think tag pattern is valid"));
static MARKUP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<.*?>").expect("markup pattern is valid"));

const OPEN_TAG: &str = "<think>";
const CLOSE_TAG: &str = "</think>";
const THOUGHT_EMOJI: &str = "💭";
const THOUGHT_LABELS: &[&str] = &["strategy analysis", "strategic analysis"];

/// Split `text` into the text outside every complete think block and the
/// trimmed, non-empty contents of those blocks. An unclosed `<think>` is left
/// in place.
pub fn extract_thinking_blocks(text: &str) -> (String, Vec<String>) {
    if text.is_empty() {
        return (String::new(), Vec::new());
    }
    let thoughts = THINK_BLOCK
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    let filtered = THINK_BLOCK.replace_all(text, "").into_owned();
    (filtered, thoughts)
}

/// Deduplication key of a thought: no emoji, markup, bold markers or
/// punctuation, lowercase, single-spaced.
pub fn normalize_thought(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let s = text.replace(THOUGHT_EMOJI, " ");
    let s = MARKUP.replace_all(&s, " ");
    let s = s.replace("**", "").to_lowercase();
    let s: String = s
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Append `raw` to `log` as a "Thinking" entry unless an equivalent thought
/// is already in `seen`. Returns whether it was added.
pub fn add_unique_thought(log: &mut String, seen: &mut HashSet<String>, raw: &str) -> bool {
    let key = normalize_thought(raw);
    if key.is_empty() || !seen.insert(key) {
        return false;
    }
    log.push_str(&format!("{THOUGHT_EMOJI} **Thinking:** {raw}\n"));
    true
}

/// The rendered reasoning log plus the keys it already holds.
#[derive(Debug, Clone, Default)]
pub struct ThoughtLog {
    text: String,
    seen: HashSet<String>,
}

impl ThoughtLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_unique(&mut self, raw: &str) -> bool {
        add_unique_thought(&mut self.text, &mut self.seen, raw)
    }

    pub fn contains(&self, raw: &str) -> bool {
        self.seen.contains(&normalize_thought(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// What one [`ThinkParser::feed`] call produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedChunk {
    /// Text outside think blocks that is safe to show.
    pub visible: String,
    /// Blocks closed by this chunk, trimmed.
    pub thoughts: Vec<String>,
}

/// Incremental `<think>` splitter. Tags are matched case-insensitively and
/// may be split across any number of chunks.
#[derive(Debug, Clone, Default)]
pub struct ThinkParser {
    inside: bool,
    /// Tail that may be the start of the next tag.
    carry: String,
    block: String,
}

impl ThinkParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_inside(&self) -> bool {
        self.inside
    }

    pub fn feed(&mut self, chunk: &str) -> ParsedChunk {
        let mut out = ParsedChunk::default();
        let mut input = std::mem::take(&mut self.carry);
        input.push_str(chunk);
        let mut rest = input.as_str();

        loop {
            let tag = if self.inside { CLOSE_TAG } else { OPEN_TAG };
            match find_ignore_case(rest, tag) {
                Some(pos) => {
                    self.take_text(&rest[..pos], &mut out);
                    if self.inside {
                        let thought = self.block.trim();
                        if !thought.is_empty() {
                            out.thoughts.push(thought.to_string());
                        }
                        self.block.clear();
                    }
                    self.inside = !self.inside;
                    rest = &rest[pos + tag.len()..];
                }
                None => {
                    let split = rest.len() - partial_tag_len(rest, tag);
                    self.take_text(&rest[..split], &mut out);
                    self.carry = rest[split..].to_string();
                    break;
                }
            }
        }
        out
    }

    /// Flush held-back text. A block still open at the end of the stream is
    /// reported as a thought.
    pub fn finish(&mut self) -> ParsedChunk {
        let mut out = ParsedChunk::default();
        let carry = std::mem::take(&mut self.carry);
        self.take_text(&carry, &mut out);
        if self.inside {
            let thought = self.block.trim();
            if !thought.is_empty() {
                out.thoughts.push(thought.to_string());
            }
            self.block.clear();
            self.inside = false;
        }
        out
    }

    fn take_text(&mut self, text: &str, out: &mut ParsedChunk) {
        if self.inside {
            self.block.push_str(text);
        } else {
            out.visible.push_str(text);
        }
    }
}

fn find_ignore_case(haystack: &str, tag: &str) -> Option<usize> {
    // ASCII lowercasing keeps byte offsets intact.
    haystack.to_ascii_lowercase().find(tag)
}

/// Length of the longest suffix of `text` that is a proper prefix of `tag`.
fn partial_tag_len(text: &str, tag: &str) -> usize {
    (1..tag.len())
        .rev()
        .find(|&k| {
            k <= text.len()
                && text.is_char_boundary(text.len() - k)
                && text[text.len() - k..].eq_ignore_ascii_case(&tag[..k])
        })
        .unwrap_or(0)
}

/// Provider control tokens, tool-call echoes, uncertainty placeholders and
/// stale delegation chatter.
pub fn is_noise_line(line: &str) -> bool {
    let trimmed = line.trim();
    let lower = trimmed.to_lowercase();
    lower.starts_with("running:")
        || lower.contains("<|channel|>")
        || (line.contains("<|") && line.contains("|>"))
        || lower.contains("commentary to=")
        || lower.contains("function?")
        || lower.starts_with("???")
        || lower.contains("call_data_analyst")
        || lower.contains("call_news_researcher")
        || lower.contains("transfer_task_to")
        || lower.contains("transfer to data_analyst")
        || lower.contains("transfer to news")
        || lower.contains("transferring to")
        || lower.contains("calling agent")
}

fn is_thought_line(line: &str) -> bool {
    let trimmed = line.trim();
    let lower = trimmed.to_lowercase();
    trimmed.starts_with(THOUGHT_EMOJI) || THOUGHT_LABELS.iter().any(|l| lower.starts_with(l))
}

fn has_think_tag(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower.contains(OPEN_TAG) || lower.contains(CLOSE_TAG)
}

const CLEANUP_MARKERS: &[&str] = &[
    "running:",
    "transfer_task_to",
    OPEN_TAG,
    CLOSE_TAG,
    "call_data_analyst",
    "call_news_researcher",
    "<|channel|>",
    "<|",
    "commentary to=",
    "function?",
    "???",
];

/// Last pass over a finished transcript: drops blank lines and any line
/// still carrying a technical marker.
pub fn final_cleanup(text: &str) -> String {
    text.trim()
        .split('\n')
        .filter(|line| {
            let lower = line.to_lowercase();
            let trimmed = line.trim();
            !trimmed.is_empty()
                && !CLEANUP_MARKERS.iter().any(|m| lower.contains(m))
                && !(trimmed.starts_with("<|") && line.contains("|>"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Streams a supervisor response into a clean transcript and a thought log.
#[derive(Debug, Default)]
pub struct ReasoningProcessor {
    parser: ThinkParser,
    thoughts: ThoughtLog,
    /// Classified, kept lines.
    transcript: String,
    /// Incomplete last line, not yet classified.
    partial: String,
}

impl ReasoningProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns the transcript lines it completed.
    pub fn push(&mut self, chunk: &str) -> &str {
        let before = self.transcript.len();
        let parsed = self.parser.feed(chunk);
        self.absorb(parsed);
        &self.transcript[before..]
    }

    /// Flush the stream and return the complete visible transcript.
    pub fn finish(&mut self) -> String {
        let parsed = self.parser.finish();
        self.absorb(parsed);
        let last = std::mem::take(&mut self.partial);
        if !last.is_empty() {
            self.classify_line(&last);
        }
        self.transcript.clone()
    }

    pub fn thoughts(&self) -> &ThoughtLog {
        &self.thoughts
    }

    /// Kept lines so far.
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    /// The incomplete last line, unless it already looks like something
    /// that will be hidden.
    pub fn pending(&self) -> Option<&str> {
        let line = self.partial.as_str();
        let hidden = line.is_empty()
            || is_noise_line(line)
            || has_think_tag(line)
            || (is_thought_line(line) && self.thoughts.contains(line.trim()));
        (!hidden).then_some(line)
    }

    /// Kept lines plus the pending line.
    pub fn visible(&self) -> String {
        let mut out = self.transcript.clone();
        if let Some(line) = self.pending() {
            out.push_str(line);
        }
        out
    }

    fn absorb(&mut self, parsed: ParsedChunk) {
        for thought in &parsed.thoughts {
            self.thoughts.add_unique(thought);
        }
        self.partial.push_str(&parsed.visible);
        while let Some(pos) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=pos).collect();
            self.classify_line(line.trim_end_matches('\n'));
        }
    }

    fn classify_line(&mut self, line: &str) {
        if is_noise_line(line) {
            return;
        }
        if has_think_tag(line) {
            let lower = line.to_ascii_lowercase();
            if lower.contains(OPEN_TAG) && lower.contains(CLOSE_TAG) {
                let clean = THINK_TAG.replace_all(line, "");
                self.thoughts.add_unique(clean.trim());
            }
            return;
        }
        if is_thought_line(line) && !self.thoughts.add_unique(line.trim()) {
            return;
        }
        self.transcript.push_str(line);
        self.transcript.push('\n');
    }
}
