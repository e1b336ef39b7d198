//! Timeline compaction (spec §4.6): role-aware render-time rewriting. Runs
//! during `render` (spec §4.1 step 1); the persisted timeline in
//! `tentickle-store` is never touched — this produces a *copy* for model
//! consumption only.

use std::collections::BTreeMap;

use tentickle_store::types::{BlockType, ContentBlock, Message, MessageRole};

use crate::knobs::{ref_knob, KnobMap};

/// Below this char count a tool/user text is left as-is; at/above it, the
/// 140+140 ellipsis truncation kicks in (spec §4.6).
const TRUNCATE_THRESHOLD: usize = 280;
const HEAD_CHARS: usize = 140;
const TAIL_CHARS: usize = 140;

/// Rewrite `timeline` for model consumption. `execution_start` is the
/// current execution's `started_at` (RFC3339); entries with
/// `created_at < execution_start` are eligible for summarization.
/// `knobs` supplies the one-shot `ref:<index>` expansion overrides (spec
/// §4.6: "setting this knob to true in the next render pass expands the
/// message back to full fidelity; one-shot, resets each execution").
pub fn compact_timeline(
    timeline: &[Message],
    execution_start: &str,
    knobs: &KnobMap,
) -> Vec<Message> {
    timeline
        .iter()
        .enumerate()
        .map(|(index, message)| compact_one(index, message, execution_start, knobs))
        .collect()
}

fn compact_one(
    index: usize,
    message: &Message,
    execution_start: &str,
    knobs: &KnobMap,
) -> Message {
    let is_older = message.created_at.as_str() < execution_start;

    match message.role {
        // Never modify assistant history — altering prior assistant text
        // risks in-context-learning corruption (spec §4.6).
        MessageRole::Assistant => message.clone(),

        MessageRole::Tool => {
            if !is_older || knobs.get_bool(&ref_knob(index)) {
                return message.clone();
            }
            summarize_tool(message)
        }

        MessageRole::User => {
            if !is_older || !has_media_block(message) {
                return message.clone();
            }
            summarize_user(message)
        }

        MessageRole::System | MessageRole::Event => message.clone(),
    }
}

/// Media block detection MUST distinguish `tool_use` (never media) from
/// `image|audio|video|document` (always media) — spec §4.6.
fn has_media_block(message: &Message) -> bool {
    message.blocks.iter().any(|b| b.block_type.is_media())
}

fn summarize_tool(message: &Message) -> Message {
    let mut text_parts = Vec::new();
    let mut non_text_counts: BTreeMap<&'static str, usize> = BTreeMap::new();

    for block in &message.blocks {
        match block.block_type {
            BlockType::Text => {
                if let Some(t) = &block.text_content {
                    text_parts.push(t.as_str());
                }
            }
            other => {
                *non_text_counts.entry(other.as_str()).or_insert(0) += 1;
            }
        }
    }

    let joined_text = text_parts.join("\n");
    let mut summary = if joined_text.is_empty() {
        String::new()
    } else {
        truncate_around_ellipsis(&joined_text)
    };

    if !non_text_counts.is_empty() {
        let list = non_text_counts
            .iter()
            .map(|(kind, count)| {
                if *count == 1 {
                    format!("{kind}")
                } else {
                    format!("{kind} \u{d7}{count}")
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        if !summary.is_empty() {
            summary.push(' ');
        }
        summary.push('[');
        summary.push_str(&list);
        summary.push(']');
    }

    if summary.is_empty() {
        summary = "[tool result]".to_string();
    }

    replace_with_single_text_block(message, summary)
}

fn summarize_user(message: &Message) -> Message {
    let mut text_parts = Vec::new();
    let mut media_kinds = Vec::new();

    for block in &message.blocks {
        if block.block_type.is_media() {
            media_kinds.push(block.block_type.as_str());
        } else if block.block_type == BlockType::Text {
            if let Some(t) = &block.text_content {
                text_parts.push(t.as_str());
            }
        }
    }

    let joined_text = text_parts.join("\n");
    let mut summary = if joined_text.len() >= TRUNCATE_THRESHOLD {
        truncate_around_ellipsis(&joined_text)
    } else {
        joined_text
    };

    if !media_kinds.is_empty() {
        if !summary.is_empty() {
            summary.push(' ');
        }
        summary.push('[');
        summary.push_str(&media_kinds.join(", "));
        summary.push(']');
    }

    replace_with_single_text_block(message, summary)
}

/// Truncate `text` to `HEAD_CHARS` leading + `TAIL_CHARS` trailing
/// characters around an ellipsis, only above `TRUNCATE_THRESHOLD` chars
/// (spec §4.6).
fn truncate_around_ellipsis(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() < TRUNCATE_THRESHOLD {
        return text.to_string();
    }
    let head: String = chars[..HEAD_CHARS].iter().collect();
    let tail: String = chars[chars.len() - TAIL_CHARS..].iter().collect();
    format!("{head} ... {tail}")
}

fn replace_with_single_text_block(message: &Message, text: String) -> Message {
    let mut rewritten = message.clone();
    rewritten.blocks = vec![ContentBlock {
        id: format!("{}-compacted", message.id),
        message_id: message.id.clone(),
        position: 0,
        block_type: BlockType::Text,
        text_content: Some(text.clone()),
        content_json: serde_json::json!({ "text": text }),
        metadata: serde_json::json!({ "compacted": true }),
    }];
    rewritten
}

#[cfg(test)]
mod tests {
    use super::*;
    use tentickle_store::types::Visibility;

    fn msg(id: &str, role: MessageRole, created_at: &str, blocks: Vec<ContentBlock>) -> Message {
        Message {
            id: id.to_string(),
            session_id: "s1".to_string(),
            execution_id: None,
            entity_id: None,
            role,
            tick: 0,
            sequence_in_tick: 0,
            text_preview: None,
            visibility: Visibility::Model,
            tags: vec![],
            token_count: 0,
            metadata: serde_json::json!({}),
            created_at: created_at.to_string(),
            blocks,
        }
    }

    fn text_block(text: &str) -> ContentBlock {
        ContentBlock {
            id: "b1".to_string(),
            message_id: "m1".to_string(),
            position: 0,
            block_type: BlockType::Text,
            text_content: Some(text.to_string()),
            content_json: serde_json::json!({ "text": text }),
            metadata: serde_json::json!({}),
        }
    }

    fn media_block(kind: BlockType) -> ContentBlock {
        ContentBlock {
            id: "b2".to_string(),
            message_id: "m1".to_string(),
            position: 1,
            block_type: kind,
            text_content: None,
            content_json: serde_json::json!({}),
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn assistant_messages_are_never_modified() {
        let m = msg(
            "m1",
            MessageRole::Assistant,
            "2020-01-01T00:00:00Z",
            vec![text_block(&"x".repeat(1000))],
        );
        let knobs = KnobMap::new();
        let out = compact_timeline(&[m.clone()], "2025-01-01T00:00:00Z", &knobs);
        assert_eq!(out[0].blocks[0].text_content, m.blocks[0].text_content);
    }

    #[test]
    fn old_tool_message_is_summarized_with_ellipsis() {
        let long_text = "a".repeat(1000);
        let m = msg(
            "m1",
            MessageRole::Tool,
            "2020-01-01T00:00:00Z",
            vec![text_block(&long_text), media_block(BlockType::Image)],
        );
        let knobs = KnobMap::new();
        let out = compact_timeline(&[m], "2025-01-01T00:00:00Z", &knobs);
        let summarized = out[0].blocks[0].text_content.clone().unwrap();
        assert!(summarized.contains("..."));
        assert!(summarized.contains("[image]"));
    }

    #[test]
    fn ref_knob_expands_tool_message_back() {
        let long_text = "a".repeat(1000);
        let m = msg(
            "m1",
            MessageRole::Tool,
            "2020-01-01T00:00:00Z",
            vec![text_block(&long_text)],
        );
        let mut knobs = KnobMap::new();
        knobs.set(ref_knob(0), serde_json::json!(true));
        let out = compact_timeline(&[m], "2025-01-01T00:00:00Z", &knobs);
        assert_eq!(out[0].blocks[0].text_content, Some(long_text));
    }

    #[test]
    fn user_message_with_media_is_summarized_when_old() {
        let m = msg(
            "m1",
            MessageRole::User,
            "2020-01-01T00:00:00Z",
            vec![text_block("look at this"), media_block(BlockType::Document)],
        );
        let knobs = KnobMap::new();
        let out = compact_timeline(&[m], "2025-01-01T00:00:00Z", &knobs);
        let summarized = out[0].blocks[0].text_content.clone().unwrap();
        assert!(summarized.contains("look at this"));
        assert!(summarized.contains("[document]"));
    }

    #[test]
    fn user_message_without_media_is_untouched() {
        let m = msg(
            "m1",
            MessageRole::User,
            "2020-01-01T00:00:00Z",
            vec![text_block("plain text only")],
        );
        let knobs = KnobMap::new();
        let out = compact_timeline(&[m.clone()], "2025-01-01T00:00:00Z", &knobs);
        assert_eq!(out[0].blocks[0].text_content, m.blocks[0].text_content);
    }

    #[test]
    fn current_execution_messages_are_untouched() {
        let m = msg(
            "m1",
            MessageRole::Tool,
            "2030-01-01T00:00:00Z",
            vec![text_block(&"a".repeat(1000))],
        );
        let knobs = KnobMap::new();
        let out = compact_timeline(&[m.clone()], "2025-01-01T00:00:00Z", &knobs);
        assert_eq!(out[0].blocks[0].text_content, m.blocks[0].text_content);
    }
}
