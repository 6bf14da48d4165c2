//! REST client for the generation service's HTTP endpoints.
//!
//! Wraps task creation and status polling using [`reqwest`]. Error
//! classification (retryable 5xx vs terminal 4xx) happens at the call site
//! via [`GenApiError::status`]; this layer only reports what happened.

use serde::Deserialize;

use crate::status::TaskStatus;

/// HTTP client for the generation API.
pub struct GenApi {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

/// Response returned by the task-creation endpoint.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued task.
    pub task_id: String,
}

/// Errors from the generation API layer.
#[derive(Debug, thiserror::Error)]
pub enum GenApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("Generation API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for diagnostics.
        body: String,
    },

    /// A 2xx response whose body matched none of the known shapes.
    #[error("Unrecognized response shape: {0}")]
    UnknownShape(String),
}

impl GenApiError {
    /// HTTP status of an API-level failure, if there is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            GenApiError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl GenApi {
    /// Create a client for the generation service.
    ///
    /// * `api_url` - base URL, e.g. `https://gen.example.com/api/v2`.
    /// * `api_key` - the shared account key; all instances use the same one.
    pub fn new(api_url: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
            api_key,
        }
    }

    /// Submit a generation task.
    ///
    /// `POST /tasks` with the model id, inputs, and the callback URL the
    /// service should notify on completion. Returns the server-assigned
    /// task id.
    pub async fn create_task(
        &self,
        model_id: &str,
        inputs: &serde_json::Value,
        callback_url: &str,
    ) -> Result<SubmitResponse, GenApiError> {
        let body = serde_json::json!({
            "model": model_id,
            "input": inputs,
            "webhook": callback_url,
        });

        let response = self
            .client
            .post(format!("{}/tasks", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let value: serde_json::Value = Self::parse_response(response).await?;

        // Older deployments return {"task_id": ...}, newer ones nest it
        // under "data".
        let task_id = value
            .get("task_id")
            .or_else(|| value.get("data").and_then(|d| d.get("task_id")))
            .or_else(|| value.get("data").and_then(|d| d.get("id")))
            .and_then(|v| v.as_str())
            .ok_or_else(|| GenApiError::UnknownShape(value.to_string()))?;

        Ok(SubmitResponse {
            task_id: task_id.to_string(),
        })
    }

    /// Poll the status of a task.
    ///
    /// `GET /tasks/{task_id}`. The raw body is normalized through
    /// [`TaskStatus::from_payload`] because the field layout varies across
    /// service versions.
    pub async fn task_status(&self, task_id: &str) -> Result<TaskStatus, GenApiError> {
        let response = self
            .client
            .get(format!("{}/tasks/{}", self.api_url, task_id))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let value: serde_json::Value = Self::parse_response(response).await?;

        TaskStatus::from_payload(&value)
            .ok_or_else(|| GenApiError::UnknownShape(value.to_string()))
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the response
    /// unchanged on success, or a [`GenApiError::Api`] containing the
    /// status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, GenApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(GenApiError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, GenApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}
