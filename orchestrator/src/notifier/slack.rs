use super::{failure_message, Notifier, NotifyError};
use async_trait::async_trait;
use log::info;
use serde::Deserialize;
use serde_json::json;

const POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";

/// Posts failure messages to a Slack channel through `chat.postMessage`.
pub struct SlackNotifier {
    client: reqwest::Client,
    token: String,
    channel: String,
    endpoint: String,
}

#[derive(Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

impl SlackNotifier {
    pub fn new(token: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
            channel: channel.into(),
            endpoint: POST_MESSAGE_URL.to_string(),
        }
    }

    /// Points the notifier at another API base, e.g. a local stub.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify_failure(&self, config_name: &str, reason: &str) -> Result<(), NotifyError> {
        let text = failure_message(config_name, reason);
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&json!({ "channel": self.channel, "text": text }))
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        // Slack answers 200 even for rejected messages; the verdict is in the body.
        let body: PostMessageResponse = response
            .json()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        if !body.ok {
            return Err(NotifyError::Rejected(
                body.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        info!("Sent Slack notification: {}", text);
        Ok(())
    }
}
