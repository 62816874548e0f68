//! Export format detection and preview extraction.
//!
//! Three incompatible JSON layouts are recognized:
//!
//! | Format | Top level | Marker |
//! |--------|-----------|--------|
//! | LibreChat | object | `conversationId` plus `messages` or `messagesTree` |
//! | ChatGPT | array | first element has `mapping` |
//! | Claude | array | first element has `chat_messages` |
//!
//! Extraction is total over well-formed input: missing optional fields fall
//! back to defaults instead of failing.
//!
//! # Example
//!
//! ```rust
//! use convo_import_core::models::ImportFormat;
//! use convo_import_core::parser::parse_import_file;
//!
//! let json = r#"[{"id":"c1","title":"T","mapping":{"m1":{"message":{
//!     "author":{"role":"user"},"content":{"parts":["Hello"]}}}}}]"#;
//! let result = parse_import_file(json).unwrap();
//! assert_eq!(result.format, ImportFormat::ChatGpt);
//! assert_eq!(result.conversations[0].first_message_preview, "Hello");
//! ```

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::error::ImportError;
use crate::models::{ConversationPreview, ImportFormat, ParseResult};

/// Maximum characters kept from the first user message.
pub const PREVIEW_CHARS: usize = 100;

const UNTITLED: &str = "Untitled Conversation";
const DEFAULT_CHATGPT_MODEL: &str = "gpt-3.5-turbo";

/// Classify a parsed export.
pub fn detect_format(value: &Value) -> Result<ImportFormat, ImportError> {
    if let Value::Object(obj) = value {
        if obj.contains_key("conversationId")
            && (obj.contains_key("messages") || obj.contains_key("messagesTree"))
        {
            return Ok(ImportFormat::LibreChat);
        }
    }

    if let Some(Value::Object(first)) = value.as_array().and_then(|a| a.first()) {
        if first.contains_key("mapping") {
            return Ok(ImportFormat::ChatGpt);
        }
        if first.contains_key("chat_messages") {
            return Ok(ImportFormat::Claude);
        }
    }

    Err(ImportError::UnsupportedFormat)
}

/// Parse an export file's text into previews, using the current time for
/// conversations without a usable timestamp.
pub fn parse_import_file(json: &str) -> Result<ParseResult, ImportError> {
    parse_import_file_at(json, Utc::now())
}

/// Same as [`parse_import_file`], with an explicit fallback timestamp.
pub fn parse_import_file_at(json: &str, now: DateTime<Utc>) -> Result<ParseResult, ImportError> {
    let data: Value =
        serde_json::from_str(json).map_err(|e| ImportError::InvalidJson(e.to_string()))?;
    parse_value_at(&data, now)
}

/// Extract previews from an already-parsed export.
pub fn parse_value_at(data: &Value, now: DateTime<Utc>) -> Result<ParseResult, ImportError> {
    let format = detect_format(data)?;
    let conversations = match format {
        ImportFormat::ChatGpt => parse_chatgpt(as_items(data), now),
        ImportFormat::LibreChat => vec![parse_librechat(data, now)],
        ImportFormat::Claude => parse_claude(as_items(data), now),
    };

    Ok(ParseResult {
        format,
        total_count: conversations.len(),
        conversations,
    })
}

fn as_items(data: &Value) -> &[Value] {
    data.as_array().map(Vec::as_slice).unwrap_or(&[])
}

// ═══════════════════════════════════════════════════════════════════════
// ChatGPT
// ═══════════════════════════════════════════════════════════════════════

fn parse_chatgpt(items: &[Value], now: DateTime<Utc>) -> Vec<ConversationPreview> {
    let empty = Map::new();
    items
        .iter()
        .enumerate()
        .map(|(index, conv)| {
            let mapping = conv
                .get("mapping")
                .and_then(Value::as_object)
                .unwrap_or(&empty);

            let conversation_id = non_empty_str(conv, "id")
                .or_else(|| non_empty_str(conv, "conversation_id"))
                .map(str::to_string)
                .unwrap_or_else(|| format!("unknown-{}", index));

            let created_at = conv
                .get("create_time")
                .and_then(Value::as_f64)
                .filter(|t| *t != 0.0)
                .and_then(|secs| Utc.timestamp_millis_opt((secs * 1000.0) as i64).single())
                .unwrap_or(now);

            ConversationPreview {
                id: format!("chatgpt-{}", index),
                conversation_id,
                title: title_or_default(conv, "title"),
                created_at,
                model: chatgpt_model(mapping),
                message_count: chatgpt_message_count(mapping),
                first_message_preview: chatgpt_first_user_message(mapping),
                is_duplicate: false,
                raw_data: conv.clone(),
            }
        })
        .collect()
}

fn chatgpt_model(mapping: &Map<String, Value>) -> String {
    mapping
        .values()
        .find_map(|node| {
            node.pointer("/message/metadata/model_slug")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
        })
        .unwrap_or(DEFAULT_CHATGPT_MODEL)
        .to_string()
}

/// Nodes carrying a message whose author is anything but `system`.
fn chatgpt_message_count(mapping: &Map<String, Value>) -> usize {
    mapping
        .values()
        .filter(|node| match node.get("message") {
            Some(msg) if !msg.is_null() => {
                msg.pointer("/author/role").and_then(Value::as_str) != Some("system")
            }
            _ => false,
        })
        .count()
}

fn chatgpt_first_user_message(mapping: &Map<String, Value>) -> String {
    for node in mapping.values() {
        if node.pointer("/message/author/role").and_then(Value::as_str) != Some("user") {
            continue;
        }
        let first_part = node
            .pointer("/message/content/parts")
            .and_then(Value::as_array)
            .and_then(|parts| parts.first());
        if let Some(part) = first_part {
            let text = match part {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return truncate_chars(&text, PREVIEW_CHARS);
        }
    }
    String::new()
}

// ═══════════════════════════════════════════════════════════════════════
// LibreChat
// ═══════════════════════════════════════════════════════════════════════

fn parse_librechat(data: &Value, now: DateTime<Utc>) -> ConversationPreview {
    let messages: &[Value] = ["messagesTree", "messages"]
        .iter()
        .find_map(|key| data.get(*key).and_then(Value::as_array))
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    let first_user = messages.iter().find(|m| {
        m.get("isCreatedByUser")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    });

    let created_at = first_user
        .and_then(|m| m.get("createdAt"))
        .and_then(parse_timestamp)
        .unwrap_or(now);

    let preview = first_user
        .and_then(|m| m.get("text"))
        .and_then(Value::as_str)
        .map(|t| truncate_chars(t, PREVIEW_CHARS))
        .unwrap_or_default();

    let model = non_empty_str(data, "endpoint")
        .or_else(|| non_empty_str(data, "model"))
        .unwrap_or("unknown")
        .to_string();

    ConversationPreview {
        id: "librechat-0".to_string(),
        conversation_id: data
            .get("conversationId")
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default(),
        title: title_or_default(data, "title"),
        created_at,
        model,
        message_count: messages.len(),
        first_message_preview: preview,
        is_duplicate: false,
        raw_data: data.clone(),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Claude
// ═══════════════════════════════════════════════════════════════════════

fn parse_claude(items: &[Value], now: DateTime<Utc>) -> Vec<ConversationPreview> {
    items
        .iter()
        .enumerate()
        .map(|(index, conv)| {
            let messages: &[Value] = conv
                .get("chat_messages")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or(&[]);

            let first_human = messages
                .iter()
                .find(|m| m.get("sender").and_then(Value::as_str) == Some("human"));

            let text = first_human.map(claude_message_text).unwrap_or_default();

            ConversationPreview {
                id: format!("claude-{}", index),
                conversation_id: non_empty_str(conv, "uuid")
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("unknown-{}", index)),
                title: title_or_default(conv, "name"),
                created_at: conv
                    .get("created_at")
                    .and_then(parse_timestamp)
                    .unwrap_or(now),
                model: "claude".to_string(),
                message_count: messages.len(),
                first_message_preview: truncate_chars(&text, PREVIEW_CHARS),
                is_duplicate: false,
                raw_data: conv.clone(),
            }
        })
        .collect()
}

/// Text of a Claude message: the first `type == "text"` content block,
/// falling back to the legacy top-level `text` field.
fn claude_message_text(message: &Value) -> String {
    let from_content = message
        .get("content")
        .and_then(Value::as_array)
        .and_then(|blocks| {
            blocks
                .iter()
                .find(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        })
        .and_then(|b| b.get("text"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty());

    from_content
        .or_else(|| non_empty_str(message, "text"))
        .unwrap_or_default()
        .to_string()
}

// ═══════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════

fn non_empty_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn title_or_default(value: &Value, key: &str) -> String {
    non_empty_str(value, key).unwrap_or(UNTITLED).to_string()
}

/// Accepts RFC 3339 strings and epoch milliseconds.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

/// Truncate to at most `max` characters without splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn detects_librechat_with_messages_or_tree() {
        let a = json!({"conversationId": "x", "messages": []});
        let b = json!({"conversationId": "x", "messagesTree": []});
        assert_eq!(detect_format(&a).unwrap(), ImportFormat::LibreChat);
        assert_eq!(detect_format(&b).unwrap(), ImportFormat::LibreChat);
    }

    #[test]
    fn detects_array_formats_by_first_element() {
        assert_eq!(
            detect_format(&json!([{"mapping": {}}])).unwrap(),
            ImportFormat::ChatGpt
        );
        assert_eq!(
            detect_format(&json!([{"chat_messages": []}])).unwrap(),
            ImportFormat::Claude
        );
    }

    #[test]
    fn rejects_unknown_shapes() {
        for value in [
            json!([]),
            json!({"conversationId": "x"}),
            json!({"messages": []}),
            json!([{"title": "no marker"}]),
            json!("text"),
            json!(42),
        ] {
            assert_eq!(
                detect_format(&value).unwrap_err(),
                ImportError::UnsupportedFormat,
                "{}",
                value
            );
        }
    }

    #[test]
    fn invalid_json_is_reported() {
        assert!(matches!(
            parse_import_file("{not json"),
            Err(ImportError::InvalidJson(_))
        ));
    }

    #[test]
    fn chatgpt_end_to_end_example() {
        let input = r#"[{"id":"c1","title":"T","mapping":{"m1":{"message":{"author":{"role":"user"},"content":{"parts":["Hello"]},"create_time":1705276800}}}}]"#;
        let result = parse_import_file_at(input, fixed_now()).unwrap();
        assert_eq!(result.format, ImportFormat::ChatGpt);
        assert_eq!(result.total_count, 1);
        let p = &result.conversations[0];
        assert_eq!(p.id, "chatgpt-0");
        assert_eq!(p.conversation_id, "c1");
        assert_eq!(p.title, "T");
        assert_eq!(p.message_count, 1);
        assert_eq!(p.first_message_preview, "Hello");
        assert_eq!(p.model, "gpt-3.5-turbo");
        assert_eq!(p.created_at, fixed_now());
        assert!(!p.is_duplicate);
    }

    #[test]
    fn chatgpt_fields_and_defaults() {
        let input = json!([
            {
                "id": "a",
                "create_time": 1705276800.5,
                "mapping": {
                    "root": {"message": null},
                    "sys": {"message": {"author": {"role": "system"}, "content": {"parts": [""]}}},
                    "u1": {"message": {"author": {"role": "user"}, "content": {"parts": ["x".repeat(150)]}}},
                    "a1": {"message": {"author": {"role": "assistant"}, "metadata": {"model_slug": "gpt-4o"}, "content": {"parts": ["hi"]}}}
                }
            },
            {"conversation_id": "b", "mapping": {}},
            {"mapping": {"u": {"message": {"author": {"role": "user"}, "content": {"parts": [{"asset": 1}]}}}}}
        ]);
        let result = parse_value_at(&input, fixed_now()).unwrap();
        assert_eq!(result.conversations.len(), 3);

        let a = &result.conversations[0];
        assert_eq!(a.title, "Untitled Conversation");
        assert_eq!(a.model, "gpt-4o");
        assert_eq!(a.message_count, 2);
        assert_eq!(a.first_message_preview.chars().count(), 100);
        assert_eq!(a.created_at.timestamp_millis(), 1_705_276_800_500);

        let b = &result.conversations[1];
        assert_eq!(b.conversation_id, "b");
        assert_eq!(b.message_count, 0);
        assert_eq!(b.first_message_preview, "");

        let c = &result.conversations[2];
        assert_eq!(c.conversation_id, "unknown-2");
        assert_eq!(c.first_message_preview, r#"{"asset":1}"#);
    }

    #[test]
    fn chatgpt_count_matches_input_length() {
        let items: Vec<Value> = (0..37)
            .map(|i| json!({"id": format!("c{}", i), "mapping": {}}))
            .collect();
        let result = parse_value_at(&Value::Array(items), fixed_now()).unwrap();
        assert_eq!(result.format, ImportFormat::ChatGpt);
        assert_eq!(result.conversations.len(), 37);
        assert_eq!(result.total_count, 37);
    }

    #[test]
    fn librechat_single_conversation() {
        let input = json!({
            "conversationId": "lc-1",
            "title": "Trip planning",
            "endpoint": "openAI",
            "messagesTree": [
                {"isCreatedByUser": false, "text": "system hello"},
                {"isCreatedByUser": true, "text": "Plan a trip", "createdAt": "2024-01-15T00:00:00.000Z"},
                {"isCreatedByUser": false, "text": "Sure"}
            ],
            "messages": [{"text": "ignored"}]
        });
        let result = parse_value_at(&input, fixed_now()).unwrap();
        assert_eq!(result.format, ImportFormat::LibreChat);
        assert_eq!(result.conversations.len(), 1);
        let p = &result.conversations[0];
        assert_eq!(p.id, "librechat-0");
        assert_eq!(p.conversation_id, "lc-1");
        assert_eq!(p.message_count, 3);
        assert_eq!(p.model, "openAI");
        assert_eq!(p.first_message_preview, "Plan a trip");
        assert_eq!(
            p.created_at,
            Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn librechat_without_user_message() {
        let input = json!({"conversationId": "lc-2", "messages": [{"text": "bot"}]});
        let p = &parse_value_at(&input, fixed_now()).unwrap().conversations[0];
        assert_eq!(p.message_count, 1);
        assert_eq!(p.created_at, fixed_now());
        assert_eq!(p.first_message_preview, "");
        assert_eq!(p.model, "unknown");
        assert_eq!(p.title, "Untitled Conversation");
    }

    #[test]
    fn claude_conversations() {
        let input = json!([
            {
                "uuid": "u-1",
                "name": "Poem",
                "created_at": "2024-03-01T10:00:00Z",
                "chat_messages": [
                    {"sender": "assistant", "text": "hi"},
                    {"sender": "human", "content": [{"type": "image"}, {"type": "text", "text": "Write a poem"}]},
                    {"sender": "human", "text": "second"}
                ]
            },
            {"chat_messages": [{"sender": "human", "text": "legacy text"}]}
        ]);
        let result = parse_value_at(&input, fixed_now()).unwrap();
        assert_eq!(result.format, ImportFormat::Claude);
        let a = &result.conversations[0];
        assert_eq!(a.id, "claude-0");
        assert_eq!(a.conversation_id, "u-1");
        assert_eq!(a.title, "Poem");
        assert_eq!(a.model, "claude");
        assert_eq!(a.message_count, 3);
        assert_eq!(a.first_message_preview, "Write a poem");

        let b = &result.conversations[1];
        assert_eq!(b.conversation_id, "unknown-1");
        assert_eq!(b.first_message_preview, "legacy text");
        assert_eq!(b.created_at, fixed_now());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("短い文章です", 3), "短い文");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn raw_data_is_kept() {
        let conv = json!({"id": "c1", "mapping": {}, "extra": [1, 2, 3]});
        let result = parse_value_at(&json!([conv.clone()]), fixed_now()).unwrap();
        assert_eq!(result.conversations[0].raw_data, conv);
    }
}
