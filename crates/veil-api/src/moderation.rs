use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

/// Per-category score thresholds; content is flagged when any category's
/// score crosses its threshold. The model's own `flagged` verdict is ignored
/// in favor of these.
const CATEGORY_THRESHOLDS: &[(&str, f64)] = &[
    ("sexual", 0.95),
    ("hate", 0.9),
    ("harassment", 0.99),
    ("self-harm", 0.95),
    ("sexual/minors", 0.5),
    ("hate/threatening", 0.75),
    ("violence/graphic", 0.75),
    ("self-harm/intent", 0.95),
    ("self-harm/instructions", 0.95),
    ("harassment/threatening", 0.95),
    ("violence", 0.95),
];

const MODERATION_URL: &str = "https://api.openai.com/v1/moderations";

/// Black-box content moderation collaborator. Scoring runs concurrently with
/// the primary write path; failures degrade to "not flagged" rather than
/// blocking the message.
#[derive(Clone)]
pub struct ModerationClient {
    http: reqwest::Client,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModerationResponse {
    results: Vec<ModerationResult>,
}

#[derive(Debug, Deserialize)]
struct ModerationResult {
    category_scores: HashMap<String, f64>,
}

impl ModerationClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
        }
    }

    /// Score content, returning whether it should be flagged. Unscorable
    /// content (no API key configured, provider down) is not flagged.
    pub async fn flagged(&self, content: &str) -> bool {
        let Some(api_key) = &self.api_key else {
            return false;
        };

        match self.score(api_key, content).await {
            Ok(flagged) => flagged,
            Err(e) => {
                warn!("moderation scoring failed, treating as clean: {:#}", e);
                false
            }
        }
    }

    async fn score(&self, api_key: &str, content: &str) -> Result<bool> {
        let response: ModerationResponse = self
            .http
            .post(MODERATION_URL)
            .bearer_auth(api_key)
            .json(&serde_json::json!({ "input": content }))
            .send()
            .await
            .context("moderation request failed")?
            .error_for_status()
            .context("moderation returned error status")?
            .json()
            .await
            .context("moderation response malformed")?;

        let result = response
            .results
            .first()
            .context("moderation response empty")?;

        Ok(exceeds_thresholds(&result.category_scores))
    }
}

fn exceeds_thresholds(scores: &HashMap<String, f64>) -> bool {
    CATEGORY_THRESHOLDS.iter().any(|(category, threshold)| {
        scores
            .get(*category)
            .is_some_and(|score| score > threshold)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_below_thresholds_pass() {
        let scores = HashMap::from([("hate".to_string(), 0.5), ("violence".to_string(), 0.9)]);
        assert!(!exceeds_thresholds(&scores));
    }

    #[test]
    fn any_category_over_threshold_flags() {
        let scores = HashMap::from([
            ("hate".to_string(), 0.1),
            ("sexual/minors".to_string(), 0.51),
        ]);
        assert!(exceeds_thresholds(&scores));
    }

    #[test]
    fn unknown_categories_are_ignored() {
        let scores = HashMap::from([("brand-new-category".to_string(), 1.0)]);
        assert!(!exceeds_thresholds(&scores));
    }

    #[tokio::test]
    async fn no_api_key_means_never_flagged() {
        let client = ModerationClient::new(None);
        assert!(!client.flagged("anything at all").await);
    }
}
