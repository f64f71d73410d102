//! Language-model provider client (OpenAI-compatible chat completions)

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use crate::aggregator::MarketSummary;
use crate::config::InsightsConfig;
use crate::error::ProviderError;

const SYSTEM_PROMPT: &str =
    "You are an airline industry analyst expert at interpreting market data and trends.";

/// Insight text returned by a provider, before it is tied to a summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInsights {
    #[serde(default)]
    pub demand_insights: Vec<String>,
    #[serde(default)]
    pub price_insights: Vec<String>,
    #[serde(default)]
    pub route_insights: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub summary: String,
}

impl ProviderInsights {
    pub fn is_empty(&self) -> bool {
        self.demand_insights.is_empty()
            && self.price_insights.is_empty()
            && self.route_insights.is_empty()
            && self.recommendations.is_empty()
            && self.summary.trim().is_empty()
    }

    /// Interpret a model reply. JSON replies (optionally fenced) map field by
    /// field; anything else becomes a single demand insight.
    pub fn from_reply(content: &str) -> Result<Self, ProviderError> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(ProviderError::Decode("empty reply".to_string()));
        }
        let body = trimmed
            .strip_prefix("```json")
            .or_else(|| trimmed.strip_prefix("```"))
            .and_then(|rest| rest.strip_suffix("```"))
            .map(str::trim)
            .unwrap_or(trimmed);

        match serde_json::from_str::<ProviderInsights>(body) {
            Ok(parsed) if !parsed.is_empty() => Ok(parsed),
            _ => Ok(ProviderInsights {
                demand_insights: vec![trimmed.to_string()],
                ..Default::default()
            }),
        }
    }
}

/// Trait for insight providers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InsightProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// One attempt at generating insights for `summary`
    async fn complete(&self, summary: &MarketSummary) -> Result<ProviderInsights, ProviderError>;
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions client
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
}

impl OpenAiProvider {
    pub fn new(base_url: &str, api_key: String, model: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
            max_tokens: 1000,
            temperature: 0.7,
        }
    }

    /// Build from config. Returns `None` when disabled or no key is set.
    pub fn from_config(config: &InsightsConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let key = config.api_key.clone().filter(|k| !k.trim().is_empty())?;
        let mut provider = Self::new(&config.api_base_url, key, &config.model, config.timeout());
        provider.max_tokens = config.max_tokens;
        provider.temperature = config.temperature;
        Some(provider)
    }

    fn prompt(summary: &MarketSummary) -> Result<String, ProviderError> {
        let data = serde_json::to_string_pretty(summary)
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        Ok(format!(
            "Analyze this airline booking market summary and provide insights:\n\n\
             {data}\n\n\
             Please provide insights on:\n\
             1. Market demand patterns\n\
             2. Price trends and fluctuations\n\
             3. Route performance\n\
             4. Recommendations for the business\n\n\
             Format your response as JSON with these keys:\n\
             {{\"demand_insights\": [...], \"price_insights\": [...], \
             \"route_insights\": [...], \"recommendations\": [...], \"summary\": \"...\"}}"
        ))
    }
}

#[async_trait]
impl InsightProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(&self, summary: &MarketSummary) -> Result<ProviderInsights, ProviderError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": Self::prompt(summary)?},
            ],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: text.chars().take(200).collect(),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::Decode("reply has no choices".to_string()))?;

        ProviderInsights::from_reply(&content)
    }
}
