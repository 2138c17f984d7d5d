//! Response normalisation: whatever the provider returned → one answer string.
//!
//! Providers and proxies disagree about response shape. The Responses API
//! returns `output_text` (sometimes as an array) or a nested `output[]` of
//! role-tagged messages; chat-completions-compatible proxies return
//! `choices[0].message.content`; some gateways return plain text or JSON
//! wrapped in a string.
//!
//! [`normalize_response`] runs an ordered table of extractors against the value and
//! takes the first hit. The tag of the winning extractor is kept on the answer for
//! diagnostics. It never panics; when nothing matches, the whole object is
//! pretty-printed so the user still sees what came back.

use crate::pipeline::llm::RawResponse;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Which shape extractor produced the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceTag {
    #[serde(rename = "string")]
    String,
    #[serde(rename = "responses.output_text")]
    OutputText,
    #[serde(rename = "responses.output_text[]")]
    OutputTextArray,
    #[serde(rename = "responses.output.assistant.content.text")]
    AssistantContent,
    #[serde(rename = "responses.output.content.text")]
    FirstOutputContent,
    #[serde(rename = "chat.choices.message")]
    ChatMessage,
    #[serde(rename = "chat.choices.text")]
    ChatText,
    #[serde(rename = "json-stringify")]
    JsonDump,
    #[serde(rename = "unknown")]
    Unknown,
}

impl SourceTag {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceTag::String => "string",
            SourceTag::OutputText => "responses.output_text",
            SourceTag::OutputTextArray => "responses.output_text[]",
            SourceTag::AssistantContent => "responses.output.assistant.content.text",
            SourceTag::FirstOutputContent => "responses.output.content.text",
            SourceTag::ChatMessage => "chat.choices.message",
            SourceTag::ChatText => "chat.choices.text",
            SourceTag::JsonDump => "json-stringify",
            SourceTag::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The user-facing answer and the extractor that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedAnswer {
    pub text: String,
    pub source: SourceTag,
}

impl NormalizedAnswer {
    fn new(text: impl Into<String>, source: SourceTag) -> Self {
        Self {
            text: text.into(),
            source,
        }
    }
}

type Extractor = fn(&Map<String, Value>) -> Option<String>;

/// Object extractors, first match wins.
const OBJECT_EXTRACTORS: &[(SourceTag, Extractor)] = &[
    (SourceTag::OutputText, extract_output_text),
    (SourceTag::OutputTextArray, extract_output_text_array),
    (SourceTag::AssistantContent, extract_assistant_content),
    (SourceTag::FirstOutputContent, extract_first_output_content),
    (SourceTag::ChatMessage, extract_chat_message),
    (SourceTag::ChatText, extract_chat_text),
];

/// Normalise a transport result.
pub fn normalize_response(raw: &RawResponse) -> NormalizedAnswer {
    match raw {
        RawResponse::Json(value) => normalize_value(value),
        RawResponse::Text(text) => normalize_text(text),
    }
}

/// Normalise a string body, parsing it when it looks like JSON.
pub fn normalize_text(raw: &str) -> NormalizedAnswer {
    let trimmed = raw.trim();
    let looks_like_json = (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'));
    if looks_like_json {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            return normalize_value(&value);
        }
    }
    NormalizedAnswer::new(trimmed, SourceTag::String)
}

/// Normalise an already-decoded JSON value.
pub fn normalize_value(value: &Value) -> NormalizedAnswer {
    match value {
        Value::String(s) => normalize_text(s),
        Value::Object(map) => {
            for (tag, extract) in OBJECT_EXTRACTORS {
                if let Some(text) = extract(map) {
                    return NormalizedAnswer::new(text, *tag);
                }
            }
            json_dump(value)
        }
        // No extractor applies to a bare array.
        Value::Array(_) => json_dump(value),
        Value::Null => NormalizedAnswer::new("null", SourceTag::Unknown),
        other => NormalizedAnswer::new(other.to_string(), SourceTag::Unknown),
    }
}

fn json_dump(value: &Value) -> NormalizedAnswer {
    match serde_json::to_string_pretty(value) {
        Ok(dump) => NormalizedAnswer::new(dump, SourceTag::JsonDump),
        Err(_) => NormalizedAnswer::new(value.to_string(), SourceTag::Unknown),
    }
}

// ── Extractors ───────────────────────────────────────────────────────────────

fn extract_output_text(map: &Map<String, Value>) -> Option<String> {
    map.get("output_text")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn extract_output_text_array(map: &Map<String, Value>) -> Option<String> {
    let parts: Vec<&str> = map
        .get("output_text")?
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .collect();
    (!parts.is_empty()).then(|| parts.join("\n\n"))
}

fn extract_assistant_content(map: &Map<String, Value>) -> Option<String> {
    let output = non_empty_array(map.get("output"))?;
    let message = output
        .iter()
        .rev()
        .find(|m| m.get("role").and_then(Value::as_str) == Some("assistant"))
        .or_else(|| output.last())?;
    text_of_content(message.get("content"))
}

fn extract_first_output_content(map: &Map<String, Value>) -> Option<String> {
    let output = non_empty_array(map.get("output"))?;
    text_of_content(output[0].get("content"))
}

fn extract_chat_message(map: &Map<String, Value>) -> Option<String> {
    first_choice(map)?
        .get("message")?
        .get("content")
        .filter(|v| is_truthy(v))
        .map(stringify)
}

fn extract_chat_text(map: &Map<String, Value>) -> Option<String> {
    first_choice(map)?
        .get("text")
        .filter(|v| is_truthy(v))
        .map(stringify)
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn non_empty_array(value: Option<&Value>) -> Option<&Vec<Value>> {
    value?.as_array().filter(|a| !a.is_empty())
}

fn first_choice(map: &Map<String, Value>) -> Option<&Value> {
    map.get("choices")?.as_array()?.first()
}

/// Concatenated text of a `content` array, `None` when empty.
fn text_of_content(content: Option<&Value>) -> Option<String> {
    let mut out = String::new();
    if let Some(nodes) = content.and_then(Value::as_array) {
        for node in nodes {
            collect_text(node, &mut out);
        }
    }
    (!out.is_empty()).then_some(out)
}

/// Prefer `text`, then `value`, then a nested `content` array; bare strings
/// are taken as-is.
fn collect_text(node: &Value, out: &mut String) {
    match node {
        Value::String(s) => out.push_str(s),
        Value::Object(obj) => {
            if let Some(text) = obj.get("text").filter(|v| is_truthy(v)) {
                match text {
                    Value::String(s) => out.push_str(s),
                    nested => collect_text(nested, out),
                }
            } else if let Some(Value::String(s)) = obj.get("value").filter(|v| is_truthy(v)) {
                out.push_str(s);
            } else if let Some(Value::Array(children)) = obj.get("content") {
                for child in children {
                    collect_text(child, out);
                }
            }
        }
        _ => {}
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
