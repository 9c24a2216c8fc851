//! Agent CLI `stream-json` events and their one-line descriptions.

use serde::Deserialize;
use serde_json::Value;

/// One line of `--output-format stream-json`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Assistant { message: AssistantMessage },
    User {},
    Result {
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        num_turns: Option<u32>,
    },
    System {
        #[serde(default)]
        subtype: String,
    },
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    ToolUse { name: String, input: Value },
    Text { text: String },
    #[serde(other)]
    Other,
}

fn input_str<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input.get(key).and_then(|v| v.as_str())
}

/// Short description of a tool call, e.g. `Editing: src/lib.rs`.
pub fn describe_tool_use(name: &str, input: &Value) -> String {
    let path = || {
        input_str(input, "file_path")
            .map(last_two_components)
            .unwrap_or_else(|| "file".to_string())
    };
    match name {
        "Read" => format!("Reading: {}", path()),
        "Write" => format!("Creating: {}", path()),
        "Edit" | "MultiEdit" => format!("Editing: {}", path()),
        "Bash" => format!(
            "Running: {}",
            input_str(input, "command").map_or("command".to_string(), |c| truncate(c, 50))
        ),
        "Glob" => format!("Searching: {}", input_str(input, "pattern").unwrap_or("*")),
        "Grep" => format!(
            "Grep: {}",
            input_str(input, "pattern").map_or("pattern".to_string(), |p| truncate(p, 30))
        ),
        "Task" => format!(
            "Agent: {}",
            input_str(input, "description").unwrap_or("subagent")
        ),
        _ => name.to_string(),
    }
}

pub fn tool_emoji(name: &str) -> &'static str {
    match name {
        "Read" => "\u{1F4D6}",
        "Write" => "\u{1F4DD}",
        "Edit" | "MultiEdit" => "\u{270F}\u{FE0F}",
        "Bash" => "\u{2699}\u{FE0F}",
        "Glob" | "Grep" => "\u{1F50D}",
        "Task" => "\u{1F916}",
        _ => "\u{1F527}",
    }
}

fn last_two_components(path: &str) -> String {
    let parts: Vec<&str> = path.rsplitn(3, '/').collect();
    match parts.as_slice() {
        [file, dir, _] => format!("{}/{}", dir, file),
        _ => path.to_string(),
    }
}

/// Truncate on a char boundary, appending `...` when shortened.
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", kept)
}

/// First line of a text block, shortened for a status line.
pub fn snippet(text: &str, max_chars: usize) -> String {
    truncate(text.lines().next().unwrap_or("").trim(), max_chars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tool_use_event() {
        let json = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t1","name":"Edit","input":{"file_path":"/repo/src/lib.rs"}}]},"session_id":"s"}"#;
        let StreamEvent::Assistant { message } = serde_json::from_str(json).unwrap() else {
            panic!("Expected Assistant event");
        };
        let ContentBlock::ToolUse { name, input } = &message.content[0] else {
            panic!("Expected ToolUse");
        };
        assert_eq!(describe_tool_use(name, input), "Editing: src/lib.rs");
        assert_eq!(tool_emoji(name), "\u{270F}\u{FE0F}");
    }

    #[test]
    fn test_parse_result_event() {
        let json = r#"{"type":"result","subtype":"success","result":"done\nCLAW_STATUS: COMPLETE","is_error":false,"num_turns":4}"#;
        let event: StreamEvent = serde_json::from_str(json).unwrap();
        match event {
            StreamEvent::Result {
                result,
                is_error,
                num_turns,
            } => {
                assert!(result.unwrap().ends_with("COMPLETE"));
                assert!(!is_error);
                assert_eq!(num_turns, Some(4));
            }
            _ => panic!("Expected Result event"),
        }
    }

    #[test]
    fn test_unknown_content_block_is_tolerated() {
        let json = r#"{"type":"assistant","message":{"content":[{"type":"thinking","thinking":"hmm"},{"type":"text","text":"hi"}]}}"#;
        let StreamEvent::Assistant { message } = serde_json::from_str(json).unwrap() else {
            panic!("Expected Assistant event");
        };
        assert!(matches!(message.content[0], ContentBlock::Other));
        assert!(matches!(&message.content[1], ContentBlock::Text { text } if text == "hi"));
    }

    #[test]
    fn test_describe_bash_truncates() {
        let input = serde_json::json!({"command": "x".repeat(80)});
        let desc = describe_tool_use("Bash", &input);
        assert!(desc.ends_with("..."));
        assert_eq!(desc.chars().count(), "Running: ".len() + 50);
    }

    #[test]
    fn test_snippet_first_line() {
        assert_eq!(snippet("  Looking at tests\nmore", 60), "Looking at tests");
        assert_eq!(truncate("héllo wörld", 8), "héllo...");
    }
}
