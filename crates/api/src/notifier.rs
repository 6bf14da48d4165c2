//! Client for the messaging platform's bot API.
//!
//! Used by the delivery step to notify users of terminal job outcomes, and
//! by the active-services init path to register the inbound webhook.

/// HTTP client bound to one bot identity.
pub struct Notifier {
    client: reqwest::Client,
    base_url: String,
}

/// Errors from the messaging API layer.
#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The platform returned a non-2xx status code.
    #[error("Messaging API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for diagnostics.
        body: String,
    },
}

impl Notifier {
    /// Create a client for one bot.
    ///
    /// * `api_url`  - platform base URL, e.g. `https://api.telegram.org`.
    /// * `bot_token` - the shared bot token.
    pub fn new(api_url: &str, bot_token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!("{api_url}/bot{bot_token}"),
        }
    }

    /// Send a text message to a chat.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), NotifierError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });

        let response = self
            .client
            .post(format!("{}/sendMessage", self.base_url))
            .json(&body)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Register `url` as the platform's delivery endpoint for this bot.
    /// Idempotent on the platform side; called on every activation.
    pub async fn set_webhook(&self, url: &str) -> Result<(), NotifierError> {
        let body = serde_json::json!({ "url": url });

        let response = self
            .client
            .post(format!("{}/setWebhook", self.base_url))
            .json(&body)
            .send()
            .await?;

        Self::check_status(response).await
    }

    // ---- private helpers ----

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), NotifierError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(NotifierError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
