//! Configuration types for asking questions about a library item.
//!
//! All request behaviour is controlled through [`AskConfig`], built via its
//! [`AskConfigBuilder`] or overlaid from the host's preference store with
//! [`AskConfig::from_preferences`].

use crate::error::AskError;
use crate::host::PreferenceStore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default Responses API endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/responses";

/// Default model identifier.
pub const DEFAULT_MODEL: &str = "gpt-5-mini";

/// Preference keys under which the host stores settings.
pub mod pref_keys {
    pub const API_KEY: &str = "llmKey";
    pub const MODEL: &str = "openaiModel";
    pub const MAX_TOKENS: &str = "openaiMaxTokens";
    pub const TOP_P: &str = "openaiTopP";
    pub const SYSTEM_PROMPT: &str = "openaiSystemPrompt";
}

/// Configuration for a single question.
///
/// # Example
/// ```rust
/// use refmind::AskConfig;
///
/// let config = AskConfig::builder()
///     .model("gpt-4.1-mini")
///     .max_output_tokens(1024)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_output_tokens, 1024);
/// ```
#[derive(Clone, PartialEq)]
pub struct AskConfig {
    /// Responses API URL. Default: [`DEFAULT_ENDPOINT`].
    pub endpoint: String,

    /// Model identifier. Default: [`DEFAULT_MODEL`].
    pub model: String,

    /// Optional system prompt; blank means no system block is sent.
    pub system_prompt: Option<String>,

    /// Upper bound on generated tokens. Default: 2048.
    pub max_output_tokens: u32,

    /// Nucleus sampling. Range 0.0–1.0. Default: 1.0.
    pub top_p: f32,

    /// Ask the provider to keep the response server-side. Default: false.
    pub store: bool,

    /// Reasoning effort sent as `reasoning.effort`. Default: low.
    pub reasoning_effort: ReasoningEffort,

    /// Verbosity sent as `text.verbosity`. Default: medium.
    pub text_verbosity: TextVerbosity,

    /// Extra top-level fields merged into the request body last.
    pub extra: serde_json::Map<String, serde_json::Value>,

    /// Look up and send the item's PDF. Default: true.
    pub attach_pdf: bool,
}

impl Default for AskConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            system_prompt: None,
            max_output_tokens: 2048,
            top_p: 1.0,
            store: false,
            reasoning_effort: ReasoningEffort::default(),
            text_verbosity: TextVerbosity::default(),
            extra: serde_json::Map::new(),
            attach_pdf: true,
        }
    }
}

impl fmt::Debug for AskConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AskConfig")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field(
                "system_prompt",
                &self.system_prompt.as_ref().map(|p| format!("<{} chars>", p.len())),
            )
            .field("max_output_tokens", &self.max_output_tokens)
            .field("top_p", &self.top_p)
            .field("store", &self.store)
            .field("reasoning_effort", &self.reasoning_effort)
            .field("text_verbosity", &self.text_verbosity)
            .field("extra_keys", &self.extra.keys().collect::<Vec<_>>())
            .field("attach_pdf", &self.attach_pdf)
            .finish()
    }
}

impl AskConfig {
    /// Create a new builder for `AskConfig`.
    pub fn builder() -> AskConfigBuilder {
        AskConfigBuilder {
            config: Self::default(),
        }
    }

    /// Builder starting from this config, for layering further overrides.
    pub fn into_builder(self) -> AskConfigBuilder {
        AskConfigBuilder { config: self }
    }

    /// Overlay stored preferences on the defaults.
    ///
    /// Blank values are ignored; unparsable numbers are an error so a typo in
    /// the preferences pane doesn't silently fall back to defaults.
    pub fn from_preferences(prefs: &dyn PreferenceStore) -> Result<Self, AskError> {
        let mut builder = Self::builder();

        if let Some(model) = stored(prefs, pref_keys::MODEL) {
            builder = builder.model(model);
        }
        if let Some(raw) = stored(prefs, pref_keys::MAX_TOKENS) {
            let n = raw.parse::<u32>().map_err(|_| AskError::Preference {
                key: pref_keys::MAX_TOKENS.into(),
                value: raw.clone(),
            })?;
            builder = builder.max_output_tokens(n);
        }
        if let Some(raw) = stored(prefs, pref_keys::TOP_P) {
            let p = raw.parse::<f32>().map_err(|_| AskError::Preference {
                key: pref_keys::TOP_P.into(),
                value: raw.clone(),
            })?;
            builder = builder.top_p(p);
        }
        if let Some(prompt) = stored(prefs, pref_keys::SYSTEM_PROMPT) {
            builder = builder.system_prompt(prompt);
        }

        builder.build()
    }

    /// The system prompt if it has any content.
    pub fn effective_system_prompt(&self) -> Option<&str> {
        self.system_prompt
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

/// Read the stored API key, if any.
pub fn api_key_from(prefs: &dyn PreferenceStore) -> Option<String> {
    stored(prefs, pref_keys::API_KEY)
}

fn stored(prefs: &dyn PreferenceStore, key: &str) -> Option<String> {
    prefs
        .get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Builder for [`AskConfig`].
#[derive(Debug)]
pub struct AskConfigBuilder {
    config: AskConfig,
}

impl AskConfigBuilder {
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint = url.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn max_output_tokens(mut self, n: u32) -> Self {
        self.config.max_output_tokens = n.max(1);
        self
    }

    pub fn top_p(mut self, p: f32) -> Self {
        self.config.top_p = if p.is_nan() { 1.0 } else { p.clamp(0.0, 1.0) };
        self
    }

    pub fn store(mut self, v: bool) -> Self {
        self.config.store = v;
        self
    }

    pub fn reasoning_effort(mut self, effort: ReasoningEffort) -> Self {
        self.config.reasoning_effort = effort;
        self
    }

    pub fn text_verbosity(mut self, verbosity: TextVerbosity) -> Self {
        self.config.text_verbosity = verbosity;
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.config.extra.insert(key.into(), value);
        self
    }

    pub fn attach_pdf(mut self, v: bool) -> Self {
        self.config.attach_pdf = v;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AskConfig, AskError> {
        let c = &self.config;
        if c.model.trim().is_empty() {
            return Err(AskError::InvalidConfig("model must not be empty".into()));
        }
        if !(c.endpoint.starts_with("https://") || c.endpoint.starts_with("http://")) {
            return Err(AskError::InvalidConfig(format!(
                "endpoint must be an HTTP(S) URL, got '{}'",
                c.endpoint
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// `reasoning.effort` for reasoning-capable models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Minimal,
    #[default]
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(self) -> &'static str {
        match self {
            ReasoningEffort::Minimal => "minimal",
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

/// `text.verbosity` hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextVerbosity {
    Low,
    #[default]
    Medium,
    High,
}

impl TextVerbosity {
    pub fn as_str(self) -> &'static str {
        match self {
            TextVerbosity::Low => "low",
            TextVerbosity::Medium => "medium",
            TextVerbosity::High => "high",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::MemoryPreferences;

    #[test]
    fn defaults() {
        let c = AskConfig::default();
        assert_eq!(c.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(c.max_output_tokens, 2048);
        assert_eq!(c.top_p, 1.0);
        assert!(!c.store);
        assert!(c.attach_pdf);
    }

    #[test]
    fn builder_clamps() {
        let c = AskConfig::builder()
            .top_p(3.0)
            .max_output_tokens(0)
            .build()
            .unwrap();
        assert_eq!(c.top_p, 1.0);
        assert_eq!(c.max_output_tokens, 1);
    }

    #[test]
    fn builder_rejects_bad_endpoint() {
        let err = AskConfig::builder().endpoint("ftp://x").build().unwrap_err();
        assert!(matches!(err, AskError::InvalidConfig(_)));
    }

    #[test]
    fn preferences_overlay_defaults() {
        let prefs = MemoryPreferences::from_pairs([
            (pref_keys::MODEL, "gpt-4.1"),
            (pref_keys::MAX_TOKENS, "512"),
            (pref_keys::TOP_P, "0.5"),
            (pref_keys::SYSTEM_PROMPT, "  "),
            (pref_keys::API_KEY, " sk-abc "),
        ]);
        let c = AskConfig::from_preferences(&prefs).unwrap();
        assert_eq!(c.model, "gpt-4.1");
        assert_eq!(c.max_output_tokens, 512);
        assert_eq!(c.top_p, 0.5);
        assert_eq!(c.system_prompt, None);
        assert_eq!(api_key_from(&prefs).as_deref(), Some("sk-abc"));
    }

    #[test]
    fn preferences_reject_garbage_numbers() {
        let prefs = MemoryPreferences::from_pairs([(pref_keys::MAX_TOKENS, "many")]);
        let err = AskConfig::from_preferences(&prefs).unwrap_err();
        assert!(matches!(err, AskError::Preference { .. }));
    }

    #[test]
    fn blank_system_prompt_is_ignored() {
        let c = AskConfig::builder().system_prompt("   ").build().unwrap();
        assert_eq!(c.effective_system_prompt(), None);
        let c = AskConfig::builder().system_prompt(" Be terse. ").build().unwrap();
        assert_eq!(c.effective_system_prompt(), Some("Be terse."));
    }

    #[test]
    fn debug_does_not_dump_prompt() {
        let c = AskConfig::builder().system_prompt("secret sauce").build().unwrap();
        assert!(!format!("{c:?}").contains("secret sauce"));
    }
}
