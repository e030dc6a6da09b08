//! Compact session transcript.
//!
//! ```text
//! U> find the structure for NaCl
//!
//! D[data_access_agent] Download the most stable NaCl structure
//! T[search_materials_by_formula] {"formula":"NaCl"}
//! R> {
//!      "num_results": 1,
//!      ...
//!    }
//!
//! A> Downloaded outputs/mp-22862.cif
//! ```
//!
//! - `U>` user message
//! - `A>` assistant reply
//! - `D[agent]` delegation with its task
//! - `T[tool]` tool call with JSON arguments
//! - `R>` tool result, or the folded error

use serde_json::Value;

fn prefixed(prefix: &str, text: &str) -> String {
    let mut output = String::from(prefix);
    for (i, line) in text.lines().enumerate() {
        if i > 0 {
            output.push_str("\n   ");
        }
        output.push_str(line);
    }
    output.push_str("\n\n");
    output
}

/// Format a user message.
pub fn format_user_message(message: &str) -> String {
    prefixed("U> ", message)
}

/// Format an assistant reply.
pub fn format_assistant_message(message: &str) -> String {
    prefixed("A> ", message)
}

/// Format a delegation to `agent`.
pub fn format_delegation(agent: &str, task: &str) -> String {
    let task = task.lines().collect::<Vec<_>>().join(" ");
    format!("D[{agent}] {task}\n")
}

/// Format a tool call.
pub fn format_tool_call(tool_name: &str, params: &Value) -> String {
    let params_str = serde_json::to_string(params).unwrap_or_else(|_| "{}".to_string());
    format!("T[{tool_name}] {params_str}\n")
}

/// Format a tool result.
pub fn format_tool_result(result: &Value) -> String {
    let result_str = serde_json::to_string_pretty(result).unwrap_or_else(|_| "null".to_string());
    let indented: String = result_str
        .lines()
        .enumerate()
        .map(|(i, line)| {
            if i == 0 {
                format!("R> {line}")
            } else {
                format!("   {line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!("{indented}\n\n")
}

/// Count user messages, assistant replies, delegations and tool calls.
pub fn parse_transcript_stats(transcript: &str) -> TranscriptStats {
    let mut stats = TranscriptStats::default();
    for line in transcript.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("U>") {
            stats.user_messages += 1;
        } else if trimmed.starts_with("A>") {
            stats.assistant_messages += 1;
        } else if trimmed.starts_with("D[") {
            stats.delegations += 1;
        } else if trimmed.starts_with("T[") {
            stats.tool_calls += 1;
        }
    }
    stats
}

/// Line counts from [`parse_transcript_stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranscriptStats {
    /// `U>` lines
    pub user_messages: usize,
    /// `A>` lines
    pub assistant_messages: usize,
    /// `D[..]` lines
    pub delegations: usize,
    /// `T[..]` lines
    pub tool_calls: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_user_message_multiline() {
        assert_eq!(format_user_message("Line 1\nLine 2"), "U> Line 1\n   Line 2\n\n");
    }

    #[test]
    fn test_format_delegation_single_line() {
        assert_eq!(
            format_delegation("structure_agent", "read\nthe file"),
            "D[structure_agent] read the file\n"
        );
    }

    #[test]
    fn test_format_tool_result() {
        let formatted = format_tool_result(&serde_json::json!({"distance_angstrom": 2.845}));
        assert!(formatted.starts_with("R> {"));
        assert!(formatted.contains("   \"distance_angstrom\": 2.845"));
    }

    #[test]
    fn test_parse_transcript_stats() {
        let transcript = r#"
U> Hello

A> Hi there!

U> Download NaCl

D[data_access_agent] Download NaCl
T[download_structure] {"material_id": "mp-22862"}
R> {"path": "outputs/mp-22862.cif"}

A> Done
"#;
        let stats = parse_transcript_stats(transcript);
        assert_eq!(
            stats,
            TranscriptStats {
                user_messages: 2,
                assistant_messages: 2,
                delegations: 1,
                tool_calls: 1,
            }
        );
    }
}
