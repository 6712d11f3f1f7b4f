use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Outbound SMS collaborator (SignalWire-compatible LAML messaging API).
/// When unconfigured, codes are logged instead of delivered so local
/// development works without an account.
#[derive(Clone)]
pub struct SmsClient {
    http: reqwest::Client,
    config: Option<SmsConfig>,
}

#[derive(Clone)]
pub struct SmsConfig {
    pub space_url: String,
    pub project_id: String,
    pub api_token: String,
    pub from_number: String,
}

impl SmsClient {
    pub fn new(config: Option<SmsConfig>) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub async fn send(&self, to: i64, content: &str) -> Result<()> {
        let Some(config) = &self.config else {
            debug!("SMS (unconfigured) to +{}: {}", to, content);
            return Ok(());
        };

        let url = format!(
            "https://{}/api/laml/2010-04-01/Accounts/{}/Messages.json",
            config.space_url, config.project_id
        );

        self.http
            .post(&url)
            .basic_auth(&config.project_id, Some(&config.api_token))
            .form(&[
                ("From", config.from_number.as_str()),
                ("To", &format!("+{to}")),
                ("Body", content),
            ])
            .send()
            .await
            .context("SMS request failed")?
            .error_for_status()
            .context("SMS provider returned error status")?;

        Ok(())
    }

    /// Fire-and-forget variant for notification paths where delivery failure
    /// must not affect the caller.
    pub fn send_detached(&self, to: i64, content: String) {
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(e) = client.send(to, &content).await {
                warn!("SMS delivery to +{} failed: {:#}", to, e);
            }
        });
    }
}
