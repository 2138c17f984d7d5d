//! Request building: prompt + optional files → Responses API payload.
//!
//! ## Message Layout
//!
//! The `input` array contains (in order):
//! 1. **System message** *(only when the trimmed system prompt is non-empty)*
//! 2. **User message** whose first content block is always the prompt text,
//!    followed by one `input_file` block per well-formed PDF payload
//!
//! Files with an empty payload or an empty filename are skipped, never fatal.

use crate::config::{AskConfig, ReasoningEffort, TextVerbosity};
use crate::pipeline::encode::{to_data_uri, Base64Payload};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

/// A fully-specified request, built fresh per question.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    pub model: String,
    pub system_prompt: Option<String>,
    pub user_text: String,
    pub files: Vec<Base64Payload>,
    pub max_output_tokens: u32,
    pub top_p: f32,
    pub store: bool,
    pub reasoning_effort: ReasoningEffort,
    pub text_verbosity: TextVerbosity,
    pub extra: Map<String, Value>,
}

/// Assemble an [`LlmRequest`] from the prompt, optional files and config.
///
/// Takes the payloads by value; each is embedded once and then dropped with
/// the request.
pub fn build_request(
    user_text: &str,
    system_prompt: Option<&str>,
    files: Vec<Base64Payload>,
    config: &AskConfig,
) -> LlmRequest {
    let system_prompt = system_prompt
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string);

    let files: Vec<Base64Payload> = files
        .into_iter()
        .filter(|f| {
            let ok = f.is_well_formed();
            if !ok {
                warn!("Skipping malformed file entry '{}'", f.filename());
            }
            ok
        })
        .collect();

    debug!(
        "Built request: model={}, {} file(s), system prompt: {}",
        config.model,
        files.len(),
        system_prompt.is_some()
    );

    LlmRequest {
        model: config.model.clone(),
        system_prompt,
        user_text: user_text.to_string(),
        files,
        max_output_tokens: config.max_output_tokens,
        top_p: config.top_p,
        store: config.store,
        reasoning_effort: config.reasoning_effort,
        text_verbosity: config.text_verbosity,
        extra: config.extra.clone(),
    }
}

impl LlmRequest {
    /// The Responses API JSON body.
    pub fn to_body(&self) -> Value {
        let mut input = Vec::with_capacity(2);

        if let Some(ref system) = self.system_prompt {
            input.push(json!({
                "role": "system",
                "content": [{ "type": "input_text", "text": system }],
            }));
        }

        let mut content = vec![json!({ "type": "input_text", "text": self.user_text })];
        content.extend(self.files.iter().map(|f| {
            json!({
                "type": "input_file",
                "filename": f.filename(),
                "file_data": to_data_uri(f),
            })
        }));
        input.push(json!({ "role": "user", "content": content }));

        let mut body = json!({
            "model": self.model,
            "input": input,
            "text": {
                "format": { "type": "text" },
                "verbosity": self.text_verbosity.as_str(),
            },
            "reasoning": { "effort": self.reasoning_effort.as_str() },
            "tools": [],
            "max_output_tokens": self.max_output_tokens,
            "top_p": self.top_p,
            "store": self.store,
        });

        if let Value::Object(ref mut map) = body {
            for (k, v) in &self.extra {
                map.insert(k.clone(), v.clone());
            }
        }
        body
    }

    /// Sum of the approximate decoded sizes of the attached files.
    pub fn attached_bytes(&self) -> usize {
        self.files.iter().map(Base64Payload::approx_decoded_bytes).sum()
    }
}
