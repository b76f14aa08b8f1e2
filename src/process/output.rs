//! Scrubbing of Copilot CLI text output.
//!
//! In silent mode the CLI prints mostly plain text, but markup fragments,
//! tool-invocation markers (`● <tool> args`), stats lines and echoed shell
//! prompts still leak through.  [`parse_output`] keeps only the answer.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

use crate::turn::ToolUse;

static TOOL_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"●\s*<([^>]+)>(.*)").expect("tool marker regex"));

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("tag regex"));

/// Result of scrubbing one CLI run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedOutput {
    pub content: String,
    pub tools: Vec<ToolUse>,
}

/// Split stdout into answer text and tool invocations.
pub fn parse_output(stdout: &str) -> ParsedOutput {
    let mut content_parts: Vec<&str> = Vec::new();
    let mut tools = Vec::new();

    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('<') && line.ends_with('>') {
            if let Some(tool) = parse_tool_marker(line) {
                tools.push(tool);
            }
            continue;
        }

        // Stats footer and progress ellipses.
        if line.starts_with("///") || line.starts_with("...") {
            continue;
        }

        if line.starts_with('$') {
            continue;
        }

        content_parts.push(line);
    }

    let joined = content_parts.join("\n");
    ParsedOutput {
        content: strip_tags(&joined).trim().to_string(),
        tools,
    }
}

/// Remove HTML-like tags, keeping their text.
pub fn strip_tags(text: &str) -> String {
    TAG.replace_all(text, "").into_owned()
}

fn parse_tool_marker(line: &str) -> Option<ToolUse> {
    let caps = TOOL_MARKER.captures(line)?;
    let name = caps.get(1)?.as_str().trim();
    if name.is_empty() {
        return None;
    }
    // Arguments are kept verbatim, trailing markup included.
    let args = caps.get(2).map_or("", |m| m.as_str()).trim().to_string();
    Some(ToolUse {
        name: name.to_string(),
        input: json!({ "command": args }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passes_through() {
        let out = parse_output("Hello!\n");
        assert_eq!(out.content, "Hello!");
        assert!(out.tools.is_empty());
    }

    #[test]
    fn blank_and_noise_lines_dropped() {
        let out = parse_output("\n  First line  \n/// 3 requests\n... working\n$ ls\nSecond line\n");
        assert_eq!(out.content, "First line\nSecond line");
    }

    #[test]
    fn pure_markup_lines_dropped() {
        let out = parse_output("<p>\nanswer <b>bold</b> text\n</p>\n");
        assert_eq!(out.content, "answer bold text");
    }

    #[test]
    fn tool_markers_are_collected() {
        let out = parse_output("<p>● <bash>ls -la</p>\nDone listing.\n");
        assert_eq!(out.content, "Done listing.");
        assert_eq!(out.tools.len(), 1);
        assert_eq!(out.tools[0].name, "bash");
        assert_eq!(out.tools[0].input["command"], "ls -la</p>");
    }

    #[test]
    fn markup_without_marker_is_not_a_tool() {
        let out = parse_output("<div class=\"x\">\n");
        assert!(out.tools.is_empty());
        assert_eq!(out.content, "");
    }

    #[test]
    fn empty_output() {
        assert_eq!(parse_output(""), ParsedOutput::default());
    }
}
