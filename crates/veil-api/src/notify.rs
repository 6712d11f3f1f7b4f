use tracing::warn;

/// Fire-and-forget operational notification webhook (a chat-ops channel).
/// Failures are logged and never affect the committed write that triggered
/// the notification.
#[derive(Clone)]
pub struct Notifier {
    http: reqwest::Client,
    webhook_url: Option<String>,
}

impl Notifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            webhook_url,
        }
    }

    pub fn send(&self, content: String) {
        let Some(url) = self.webhook_url.clone() else {
            return;
        };
        let http = self.http.clone();
        tokio::spawn(async move {
            let result = http
                .post(&url)
                .json(&serde_json::json!({ "content": content }))
                .send()
                .await;
            if let Err(e) = result {
                warn!("notification webhook failed: {}", e);
            }
        });
    }
}
