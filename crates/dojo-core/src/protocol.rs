//! The mentor wire protocol: free-form markdown, a literal `|||JSON|||`
//! delimiter, then one raw JSON control object.
//!
//! A missing or malformed control block is valid steady-state behavior (the
//! mentor simply chatting without advancing the task), so decode failures are
//! logged and swallowed. They never block delivery of the visible text.

use serde::{Deserialize, Serialize};

/// Literal sequence separating conversational text from the control payload.
pub const CONTROL_DELIMITER: &str = "|||JSON|||";

/// Structured control metadata embedded at the tail of a mentor response.
///
/// Every field is optional on the wire; a missing `pass` is falsy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlBlock {
    #[serde(default)]
    pub pass: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_objective: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// A fully accumulated model response split into its two halves.
#[derive(Debug, Clone, Default)]
pub struct DecodedReply {
    /// User-visible conversational text, trimmed, delimiter and payload removed.
    pub visible: String,
    /// Parsed control block, when one was present and parseable.
    pub control: Option<ControlBlock>,
}

/// Splits `raw` on the first delimiter occurrence and parses the trailing
/// JSON object (first `{` to last `}` of the tail, tolerating stray prose
/// around it). Parse failures yield `control: None`.
pub fn decode(raw: &str) -> DecodedReply {
    let Some((visible, tail)) = raw.split_once(CONTROL_DELIMITER) else {
        return DecodedReply {
            visible: raw.trim().to_string(),
            control: None,
        };
    };

    let visible = visible.trim().to_string();
    let control = parse_control(tail);
    DecodedReply { visible, control }
}

fn parse_control(tail: &str) -> Option<ControlBlock> {
    let start = tail.find('{')?;
    let end = tail.rfind('}')?;
    if end < start {
        tracing::warn!(
            target: "dojo::protocol",
            "Control block braces out of order, ignoring payload"
        );
        return None;
    }
    match serde_json::from_str::<ControlBlock>(&tail[start..=end]) {
        Ok(block) => Some(block),
        Err(e) => {
            tracing::warn!(
                target: "dojo::protocol",
                "Control block parse failed (mentor chatting without advancing): {}",
                e
            );
            None
        }
    }
}

/// Assembles a response in wire format. Used by the mock model and tests.
pub fn encode(visible: &str, control: &ControlBlock) -> String {
    let json = serde_json::to_string(control).unwrap_or_else(|_| "{}".to_string());
    format!("{}\n{}\n{}", visible, CONTROL_DELIMITER, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let raw = format!("Hello{}{{\"pass\":false}}", CONTROL_DELIMITER);
        let decoded = decode(&raw);
        assert_eq!(decoded.visible, "Hello");
        let block = decoded.control.unwrap();
        assert!(!block.pass);
        assert_eq!(block.new_objective, None);
    }

    #[test]
    fn test_no_delimiter_yields_full_visible_text() {
        let decoded = decode("Just chatting, no payload today.");
        assert_eq!(decoded.visible, "Just chatting, no payload today.");
        assert!(decoded.control.is_none());
    }

    #[test]
    fn test_truncated_json_is_swallowed() {
        let raw = format!("Visible part{}{{\"pass\": tru", CONTROL_DELIMITER);
        let decoded = decode(&raw);
        assert_eq!(decoded.visible, "Visible part");
        assert!(decoded.control.is_none());
    }

    #[test]
    fn test_prose_around_json_is_tolerated() {
        let raw = format!(
            "Nice work!{}\nhere is the data:\n{{\"pass\":true,\"newObjective\":\"Loops\",\"language\":\"python\"}}\nthanks",
            CONTROL_DELIMITER
        );
        let decoded = decode(&raw);
        assert_eq!(decoded.visible, "Nice work!");
        let block = decoded.control.unwrap();
        assert!(block.pass);
        assert_eq!(block.new_objective.as_deref(), Some("Loops"));
        assert_eq!(block.language.as_deref(), Some("python"));
        assert_eq!(block.new_snippet, None);
    }

    #[test]
    fn test_missing_pass_is_falsy() {
        let raw = format!("Hi{}{{\"newObjective\":\"X\"}}", CONTROL_DELIMITER);
        let block = decode(&raw).control.unwrap();
        assert!(!block.pass);
    }

    #[test]
    fn test_encode_then_decode() {
        let block = ControlBlock {
            pass: true,
            new_objective: Some("React: The Entry Point".to_string()),
            new_snippet: Some("// TODO: mount the App component\n".to_string()),
            language: Some("react".to_string()),
        };
        let decoded = decode(&encode("Onward.", &block));
        assert_eq!(decoded.visible, "Onward.");
        assert_eq!(decoded.control, Some(block));
    }

    #[test]
    fn test_delimiter_splits_on_first_occurrence() {
        let raw = format!(
            "A{}{{\"pass\":false}}{}garbage",
            CONTROL_DELIMITER, CONTROL_DELIMITER
        );
        let decoded = decode(&raw);
        assert_eq!(decoded.visible, "A");
        // Tail brace scan spans the second delimiter but still lands on valid JSON.
        assert!(decoded.control.is_some());
    }
}
