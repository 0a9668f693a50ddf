use std::fmt;

use serde::{Deserialize, Serialize};

/// Typing indicator shown after a live reply.
pub const CURSOR: char = '▌';
pub const FENCE: &str = "```";
pub const ERROR_FRAGMENT_PREFIX: &str = "\n\n⚠️ Error communicating with the model: ";

const LIVE_SUFFIX: &str = "▌";
const CLOSE_FENCE_SUFFIX: &str = "```\n▌";
const NEWLINE_CLOSE_FENCE_SUFFIX: &str = "\n```\n▌";
const MAX_FENCE_INDENT: usize = 3;

/// How open code fences are detected in a partial reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FenceMode {
    /// Every non-overlapping "```" flips the state, wherever it appears.
    #[default]
    Toggle,
    /// Only lines starting with "```" after at most three spaces flip the state.
    Line,
}

#[derive(Debug, Clone)]
enum FenceTracker {
    Toggle {
        open: bool,
        scan_from: usize,
    },
    Line {
        open: bool,
        line_start: usize,
    },
}

impl FenceTracker {
    fn new(mode: FenceMode) -> Self {
        match mode {
            FenceMode::Toggle => Self::Toggle {
                open: false,
                scan_from: 0,
            },
            FenceMode::Line => Self::Line {
                open: false,
                line_start: 0,
            },
        }
    }

    // Only text after the previous scan position is examined, so tracking stays
    // linear in the total reply length.
    fn advance(&mut self, buffer: &str) {
        match self {
            Self::Toggle { open, scan_from } => {
                let mut cursor = *scan_from;
                while let Some(found) = buffer[cursor..].find(FENCE) {
                    *open = !*open;
                    cursor += found + FENCE.len();
                }
                // Trailing backticks may still become a fence with the next fragment.
                let pending = buffer[cursor..]
                    .bytes()
                    .rev()
                    .take_while(|byte| *byte == b'`')
                    .count();
                *scan_from = buffer.len() - pending;
            }
            Self::Line { open, line_start } => {
                while let Some(newline) = buffer[*line_start..].find('\n') {
                    let line_end = *line_start + newline;
                    if is_fence_line(&buffer[*line_start..line_end]) {
                        *open = !*open;
                    }
                    *line_start = line_end + 1;
                }
            }
        }
    }

    fn is_open(&self, buffer: &str) -> bool {
        match self {
            Self::Toggle { open, .. } => *open,
            // An unfinished fence line already shows as a fence.
            Self::Line { open, line_start } => *open != is_fence_line(&buffer[*line_start..]),
        }
    }
}

/// Inline text reporting a failed exchange with the model.
pub fn error_fragment(message: &str) -> String {
    format!("{ERROR_FRAGMENT_PREFIX}{message}")
}

fn is_fence_line(line: &str) -> bool {
    let indent = line.bytes().take_while(|byte| *byte == b' ').count();
    indent <= MAX_FENCE_INDENT && line[indent..].starts_with(FENCE)
}

/// What the renderer shows for the reply right now.
///
/// The body is always the received text; the suffix holds the synthetic
/// closing fence and cursor, which never become part of the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Presented<'a> {
    body: &'a str,
    suffix: &'static str,
}

impl<'a> Presented<'a> {
    pub fn body(&self) -> &'a str {
        self.body
    }

    pub fn suffix(&self) -> &'static str {
        self.suffix
    }

    /// True once the reply has terminated and the value equals the committed text.
    pub fn is_final(&self) -> bool {
        self.suffix.is_empty()
    }
}

impl fmt::Display for Presented<'_> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.body)?;
        formatter.write_str(self.suffix)
    }
}

/// Markdown-safe accumulation of one streamed assistant reply.
#[derive(Debug, Clone)]
pub struct StreamAccumulator {
    buffer: String,
    tracker: FenceTracker,
    complete: bool,
}

impl StreamAccumulator {
    pub fn new(mode: FenceMode) -> Self {
        Self {
            buffer: String::new(),
            tracker: FenceTracker::new(mode),
            complete: false,
        }
    }

    pub fn push(&mut self, fragment: &str) -> Presented<'_> {
        if self.complete {
            tracing::debug!(
                fragment_len = fragment.len(),
                "ignoring fragment after completion"
            );
        } else if !fragment.is_empty() {
            self.buffer.push_str(fragment);
            self.tracker.advance(&self.buffer);
        }
        self.presented()
    }

    /// Appends the inline error fragment for a failed reply.
    pub fn fail(&mut self, message: &str) -> Presented<'_> {
        self.push(&error_fragment(message))
    }

    pub fn complete(&mut self) -> Presented<'_> {
        self.complete = true;
        self.presented()
    }

    pub fn presented(&self) -> Presented<'_> {
        let suffix = if self.complete {
            ""
        } else if self.fence_open() {
            if self.buffer.ends_with('\n') {
                CLOSE_FENCE_SUFFIX
            } else {
                NEWLINE_CLOSE_FENCE_SUFFIX
            }
        } else {
            LIVE_SUFFIX
        };

        Presented {
            body: &self.buffer,
            suffix,
        }
    }

    pub fn fence_open(&self) -> bool {
        self.tracker.is_open(&self.buffer)
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn into_content(self) -> String {
        self.buffer
    }
}

impl Default for StreamAccumulator {
    fn default() -> Self {
        Self::new(FenceMode::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fence_count(text: &str) -> usize {
        text.matches(FENCE).count()
    }

    fn presented_values(mode: FenceMode, fragments: &[&str]) -> Vec<String> {
        let mut accumulator = StreamAccumulator::new(mode);
        fragments
            .iter()
            .map(|fragment| accumulator.push(fragment).to_string())
            .collect()
    }

    #[test]
    fn open_fence_is_closed_synthetically_while_streaming() {
        let mut accumulator = StreamAccumulator::default();

        let first = accumulator.push("```py\ndef f():").to_string();
        assert_eq!(first, "```py\ndef f():\n```\n▌");

        let second = accumulator.push(" return 1").to_string();
        assert!(second.ends_with("\n```\n▌"));

        let third = accumulator.push("\n```").to_string();
        assert_eq!(third, "```py\ndef f(): return 1\n```▌");

        let done = accumulator.complete().to_string();
        assert_eq!(done, "```py\ndef f(): return 1\n```");
        assert_eq!(accumulator.into_content(), done);
    }

    #[test]
    fn no_extra_newline_when_buffer_ends_with_one() {
        let mut accumulator = StreamAccumulator::default();
        assert_eq!(accumulator.push("```\ncode\n").to_string(), "```\ncode\n```\n▌");
    }

    #[test]
    fn plain_text_only_gets_a_cursor() {
        let values = presented_values(FenceMode::Toggle, &["Hello", ", world"]);
        assert_eq!(values, vec!["Hello▌", "Hello, world▌"]);
    }

    #[test]
    fn presented_value_always_has_even_fence_count() {
        let fragments = [
            "intro ``", "`rust\nfn main", "() {}\n`", "``\ntext ```", "js\nlet a",
            " = 1;`", "``", "`` tail `",
        ];
        let mut accumulator = StreamAccumulator::default();
        let mut raw = String::new();
        for fragment in fragments {
            raw.push_str(fragment);
            let presented = accumulator.push(fragment).to_string();
            assert_eq!(fence_count(&presented) % 2, 0, "presented: {presented:?}");
            assert_eq!(accumulator.fence_open(), fence_count(&raw) % 2 == 1);
        }
    }

    #[test]
    fn fence_split_across_fragments_is_counted_once() {
        let mut accumulator = StreamAccumulator::default();
        accumulator.push("``");
        assert!(!accumulator.fence_open());
        accumulator.push("`");
        assert!(accumulator.fence_open());
        accumulator.push("``");
        assert!(accumulator.fence_open());
        accumulator.push("`");
        assert!(!accumulator.fence_open());
    }

    #[test]
    fn committed_text_never_holds_cursor_or_synthetic_fence() {
        let mut accumulator = StreamAccumulator::default();
        accumulator.push("before\n```sh\nls");
        accumulator.fail("connection reset");
        let presented = accumulator.complete().to_string();
        let content = accumulator.into_content();

        assert_eq!(presented, content);
        assert!(!content.contains(CURSOR));
        assert_eq!(
            content,
            "before\n```sh\nls\n\n⚠️ Error communicating with the model: connection reset"
        );
    }

    #[test]
    fn fragments_after_completion_are_ignored() {
        let mut accumulator = StreamAccumulator::default();
        accumulator.push("done");
        accumulator.complete();
        assert_eq!(accumulator.push(" more").to_string(), "done");
    }

    #[test]
    fn line_mode_ignores_inline_backticks() {
        let mut accumulator = StreamAccumulator::new(FenceMode::Line);
        accumulator.push("use ```code``` inline\n");
        assert!(!accumulator.fence_open());

        accumulator.push("   ```toml\n[package]\n");
        assert!(accumulator.fence_open());

        accumulator.push("    ```\n");
        assert!(accumulator.fence_open());

        accumulator.push("```\nafter");
        assert!(!accumulator.fence_open());
        assert_eq!(accumulator.presented().suffix(), "▌");
    }

    #[test]
    fn line_mode_sees_unfinished_fence_line() {
        let mut accumulator = StreamAccumulator::new(FenceMode::Line);
        let presented = accumulator.push("```py").to_string();
        assert_eq!(presented, "```py\n```\n▌");
        accumulator.push("\nprint(1)\n``");
        assert!(accumulator.fence_open());
        accumulator.push("`");
        assert!(!accumulator.fence_open());
    }
}
