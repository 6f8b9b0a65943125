//! OpenAI-compatible API client
//!
//! Covers the two surfaces the personalization chain uses:
//! - Assistants v2: threads, thread messages, runs
//! - Stateless chat completions
//!
//! A fallback credential is tried once when the primary key is rejected
//! (401/403) or rate limited (429).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum OpenAiError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("No API key configured")]
    MissingKey,
    #[error("Unexpected response: {0}")]
    Malformed(String),
}

impl OpenAiError {
    /// Whether the failure is tied to the credential rather than the request
    fn is_credential_rejection(&self) -> bool {
        matches!(self, OpenAiError::Api { status, .. } if matches!(status, 401 | 403 | 429))
    }
}

/// Token usage reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Lifecycle of an assistant run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    /// No further transitions will happen on the provider side
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            RunStatus::Queued | RunStatus::InProgress | RunStatus::Cancelling
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Run {
    pub id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub last_error: Option<Value>,
}

/// A message as stored on a provider thread, flattened to its text parts
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadMessage {
    pub id: String,
    pub role: String,
    pub text: String,
    pub created_at: i64,
    /// Run that authored the message, for assistant replies
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub text: String,
    pub usage: Usage,
}

#[derive(Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: Arc<String>,
    api_keys: Arc<Vec<String>>,
}

impl OpenAiClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        fallback_api_key: Option<String>,
    ) -> Result<Self, OpenAiError> {
        Self::with_timeout(base_url, api_key, fallback_api_key, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: &str,
        api_key: Option<String>,
        fallback_api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, OpenAiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("Revive/0.1.0")
            .build()?;

        let api_keys: Vec<String> = [api_key, fallback_api_key]
            .into_iter()
            .flatten()
            .filter(|k| !k.trim().is_empty())
            .collect();

        Ok(Self {
            client,
            base_url: Arc::new(base_url.trim_end_matches('/').to_string()),
            api_keys: Arc::new(api_keys),
        })
    }

    /// Create an empty thread and return its id
    pub async fn create_thread(&self) -> Result<String, OpenAiError> {
        let body = self.post("/threads", &json!({}), true).await?;
        string_field(&body, "id")
    }

    /// Append a message to a thread and return its id
    pub async fn add_message(
        &self,
        thread_id: &str,
        role: &str,
        content: &str,
    ) -> Result<String, OpenAiError> {
        let body = self
            .post(
                &format!("/threads/{}/messages", thread_id),
                &json!({ "role": role, "content": content }),
                true,
            )
            .await?;
        string_field(&body, "id")
    }

    /// Start a run of `assistant_id` on a thread
    pub async fn create_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
        additional_instructions: Option<&str>,
    ) -> Result<Run, OpenAiError> {
        let mut payload = json!({ "assistant_id": assistant_id });
        if let Some(instructions) = additional_instructions {
            payload["additional_instructions"] = json!(instructions);
        }

        let body = self
            .post(&format!("/threads/{}/runs", thread_id), &payload, true)
            .await?;
        serde_json::from_value(body).map_err(|e| OpenAiError::Malformed(e.to_string()))
    }

    pub async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run, OpenAiError> {
        let body = self
            .get(&format!("/threads/{}/runs/{}", thread_id, run_id))
            .await?;
        serde_json::from_value(body).map_err(|e| OpenAiError::Malformed(e.to_string()))
    }

    /// List thread messages, newest first
    pub async fn list_messages(
        &self,
        thread_id: &str,
        limit: u32,
    ) -> Result<Vec<ThreadMessage>, OpenAiError> {
        let body = self
            .get(&format!(
                "/threads/{}/messages?order=desc&limit={}",
                thread_id,
                limit.clamp(1, 100)
            ))
            .await?;

        let data = body["data"]
            .as_array()
            .ok_or_else(|| OpenAiError::Malformed("missing 'data' array".to_string()))?;

        Ok(data.iter().filter_map(parse_thread_message).collect())
    }

    pub async fn chat_completion(
        &self,
        request: &ChatRequest,
    ) -> Result<ChatCompletion, OpenAiError> {
        let payload =
            serde_json::to_value(request).map_err(|e| OpenAiError::Malformed(e.to_string()))?;
        let body = self.post("/chat/completions", &payload, false).await?;

        let text = body["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| OpenAiError::Malformed("missing completion content".to_string()))?;

        let usage: Usage = serde_json::from_value(body["usage"].clone()).unwrap_or_default();

        Ok(ChatCompletion { text, usage })
    }

    async fn get(&self, path: &str) -> Result<Value, OpenAiError> {
        self.send(reqwest::Method::GET, path, None, true).await
    }

    async fn post(&self, path: &str, body: &Value, beta: bool) -> Result<Value, OpenAiError> {
        self.send(reqwest::Method::POST, path, Some(body), beta)
            .await
    }

    /// Send a request with the primary key, retrying once with the fallback
    /// key when the primary is rejected
    async fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&Value>,
        beta: bool,
    ) -> Result<Value, OpenAiError> {
        if self.api_keys.is_empty() {
            return Err(OpenAiError::MissingKey);
        }

        let url = format!("{}{}", self.base_url, path);
        let mut last_error = OpenAiError::MissingKey;

        for (index, key) in self.api_keys.iter().enumerate() {
            debug!("OpenAI {} {} (key #{})", method, path, index + 1);

            let mut request = self
                .client
                .request(method.clone(), &url)
                .header("Authorization", format!("Bearer {}", key))
                .header("Content-Type", "application/json");
            if beta {
                request = request.header("OpenAI-Beta", "assistants=v2");
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            match Self::read(request.send().await?).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_credential_rejection() && index + 1 < self.api_keys.len() => {
                    warn!("Primary OpenAI key rejected ({}), trying fallback key", e);
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error)
    }

    async fn read(response: reqwest::Response) -> Result<Value, OpenAiError> {
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(OpenAiError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }
        Ok(response.json().await?)
    }
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("api_keys", &format!("[{} redacted]", self.api_keys.len()))
            .finish()
    }
}

fn string_field(body: &Value, field: &str) -> Result<String, OpenAiError> {
    body[field]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| OpenAiError::Malformed(format!("missing '{}' field", field)))
}

/// Flatten a thread message's content parts into plain text
fn parse_thread_message(value: &Value) -> Option<ThreadMessage> {
    let text = value["content"]
        .as_array()?
        .iter()
        .filter(|part| part["type"] == "text")
        .filter_map(|part| part["text"]["value"].as_str())
        .collect::<Vec<_>>()
        .join("\n");

    Some(ThreadMessage {
        id: value["id"].as_str()?.to_string(),
        role: value["role"].as_str()?.to_string(),
        text,
        created_at: value["created_at"].as_i64().unwrap_or_default(),
        run_id: value["run_id"].as_str().map(String::from),
    })
}
