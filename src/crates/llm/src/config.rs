//! Environment-driven provider configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub api_key: String,
    /// API origin; providers supply their own default
    #[serde(default)]
    pub base_url: Option<String>,
    pub default_model: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_sec")]
    pub timeout_sec: u64,
}

fn default_timeout_sec() -> u64 {
    60
}

impl ProviderSettings {
    pub fn new(api_key: impl Into<String>, default_model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            default_model: default_model.into(),
            timeout_sec: default_timeout_sec(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_sec)
    }

    /// Read `<PREFIX>_API_KEY` and optional `<PREFIX>_MODEL` /
    /// `<PREFIX>_BASE_URL` overrides. `None` when the key is unset.
    pub fn from_env(prefix: &str, default_model: &str) -> Option<Self> {
        let api_key = std::env::var(format!("{prefix}_API_KEY")).ok()?;
        if api_key.is_empty() {
            return None;
        }
        let mut settings = Self::new(api_key, default_model);
        if let Ok(model) = std::env::var(format!("{prefix}_MODEL")) {
            if !model.is_empty() {
                settings.default_model = model;
            }
        }
        if let Ok(base_url) = std::env::var(format!("{prefix}_BASE_URL")) {
            if !base_url.is_empty() {
                settings.base_url = Some(base_url);
            }
        }
        Some(settings)
    }
}

/// Full LLM configuration: one block per provider plus the default route.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_provider")]
    pub default_provider: String,
    #[serde(default)]
    pub openai: Option<ProviderSettings>,
    #[serde(default)]
    pub anthropic: Option<ProviderSettings>,
    #[serde(default)]
    pub bedrock: Option<ProviderSettings>,
    /// AWS region for the Bedrock runtime endpoint
    #[serde(default = "default_bedrock_region")]
    pub bedrock_region: String,
    #[serde(default)]
    pub gemini: Option<ProviderSettings>,
}

fn default_provider() -> String {
    "openai".into()
}

fn default_bedrock_region() -> String {
    "us-east-1".into()
}

impl LlmSettings {
    /// Assemble settings from process environment variables.
    pub fn from_env() -> Self {
        Self {
            default_provider: std::env::var("LLM_DEFAULT_PROVIDER")
                .unwrap_or_else(|_| default_provider()),
            openai: ProviderSettings::from_env("OPENAI", "gpt-4o-mini"),
            anthropic: ProviderSettings::from_env("ANTHROPIC", "claude-sonnet-4-5-20250929"),
            bedrock: ProviderSettings::from_env("BEDROCK", "anthropic.claude-3-haiku-20240307-v1:0"),
            bedrock_region: std::env::var("BEDROCK_REGION")
                .unwrap_or_else(|_| default_bedrock_region()),
            gemini: ProviderSettings::from_env("GEMINI", "gemini-1.5-flash"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let settings = ProviderSettings::new("sk-test", "gpt-4o-mini")
            .with_base_url("https://proxy.example.com/v1");
        assert_eq!(settings.timeout(), Duration::from_secs(60));
        assert_eq!(settings.base_url.as_deref(), Some("https://proxy.example.com/v1"));
    }

    #[test]
    fn settings_deserialize_with_defaults() {
        let settings: LlmSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.default_provider, "openai");
        assert_eq!(settings.bedrock_region, "us-east-1");
        assert!(settings.openai.is_none());
    }
}
