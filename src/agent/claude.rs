use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::ClaudeConfig;
use crate::error::{AppError, Result};

const API_VERSION: &str = "2023-06-01";

/// Minimal Messages API client with retry on overload and rate limiting.
pub struct ClaudeClient {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    max_retries: u32,
    retry_delay: Duration,
}

impl ClaudeClient {
    pub fn new(config: &ClaudeConfig) -> Self {
        Self {
            client: Client::new(),
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Base delay between retries; doubled on each further attempt.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub async fn send_message(&self, request: &MessagesRequest) -> Result<MessagesResponse> {
        let mut attempt = 0u32;
        loop {
            let response = self
                .client
                .post(&self.api_url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", API_VERSION)
                .json(request)
                .send()
                .await?;

            let status = response.status();
            if status.is_success() {
                return Ok(response.json::<MessagesResponse>().await?);
            }

            let body = response.text().await.unwrap_or_default();
            if !is_retryable(status) || attempt >= self.max_retries {
                return Err(AppError::ClaudeApi(format!("API returned {status}: {body}")));
            }

            let delay = self.retry_delay * 2u32.saturating_pow(attempt);
            attempt += 1;
            tracing::warn!(
                %status,
                attempt,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                "Claude API busy, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status.as_u16() == 529
        || matches!(
            status,
            StatusCode::INTERNAL_SERVER_ERROR
                | StatusCode::BAD_GATEWAY
                | StatusCode::SERVICE_UNAVAILABLE
        )
}

// --- Request types ---

#[derive(Debug, Serialize)]
pub struct MessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    pub system: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Blocks(blocks),
        }
    }

    pub fn assistant_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Blocks(blocks),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

// --- Response types ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct MessagesResponse {
    pub id: String,
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<StopReason>,
    pub usage: Usage,
}

#[derive(Debug, Default, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A local stand-in for the Messages API that replays canned replies.
#[cfg(test)]
pub(crate) mod stub {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::Value;

    use crate::config::ClaudeConfig;

    #[derive(Clone, Default)]
    pub struct StubApi {
        replies: Arc<Mutex<VecDeque<(u16, Value)>>>,
        pub requests: Arc<Mutex<Vec<Value>>>,
    }

    impl StubApi {
        pub fn reply(&self, status: u16, body: Value) -> &Self {
            self.replies.lock().unwrap().push_back((status, body));
            self
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        /// Serve on an ephemeral port and return a config pointing at it.
        pub async fn serve(&self) -> ClaudeConfig {
            let app = Router::new()
                .route("/v1/messages", post(handle))
                .with_state(self.clone());
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });

            let mut config: ClaudeConfig =
                toml::from_str(r#"api_key = "test-key""#).unwrap();
            config.api_url = format!("http://{addr}/v1/messages");
            config
        }
    }

    async fn handle(State(api): State<StubApi>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
        api.requests.lock().unwrap().push(body);
        let (status, reply) = api
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or((500, serde_json::json!({"error": "no reply queued"})));
        (StatusCode::from_u16(status).unwrap(), Json(reply))
    }

    pub fn text_reply(text: &str) -> Value {
        serde_json::json!({
            "id": "msg_end",
            "content": [{"type": "text", "text": text}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 3, "output_tokens": 2}
        })
    }
}
