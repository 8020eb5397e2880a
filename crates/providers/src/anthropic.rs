//! Anthropic native model client.
//!
//! Uses Anthropic's Messages API directly.
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Streaming via SSE, decoded into block-level [`ModelStreamEvent`]s

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use toolrelay_core::error::ModelError;
use toolrelay_core::message::{ContentBlock, ConversationTurn};
use toolrelay_core::provider::*;
use tracing::{debug, trace, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Anthropic native Messages API client.
pub struct AnthropicClient {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicClient {
    /// Create a new Anthropic client with the default request timeout.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ModelError> {
        Self::with_timeout(api_key, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a client whose requests (including whole streams) time out after `timeout`.
    pub fn with_timeout(api_key: impl Into<String>, timeout: Duration) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ModelError::NotConfigured(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Use a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Convert the turn history to Anthropic API messages.
    ///
    /// Consecutive tool result turns are folded into a single `user` message,
    /// because the API expects every result for one assistant turn together.
    fn to_api_messages(turns: &[ConversationTurn]) -> Vec<AnthropicMessage> {
        let mut result: Vec<AnthropicMessage> = Vec::new();

        for turn in turns {
            match turn {
                ConversationTurn::UserText { text } => {
                    result.push(AnthropicMessage {
                        role: "user".into(),
                        content: AnthropicContent::Text(text.clone()),
                    });
                }
                ConversationTurn::AssistantContent { blocks } => {
                    let blocks = blocks
                        .iter()
                        .map(|b| match b {
                            ContentBlock::Text { text } => ApiBlock::Text { text: text.clone() },
                            ContentBlock::ToolUse { id, name, input } => ApiBlock::ToolUse {
                                id: id.clone(),
                                name: name.clone(),
                                input: input.clone(),
                            },
                        })
                        .collect();
                    result.push(AnthropicMessage {
                        role: "assistant".into(),
                        content: AnthropicContent::Blocks(blocks),
                    });
                }
                ConversationTurn::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => {
                    let block = ApiBlock::ToolResult {
                        tool_use_id: tool_use_id.clone(),
                        content: content.clone(),
                        is_error: *is_error,
                    };
                    match result.last_mut() {
                        Some(AnthropicMessage {
                            role,
                            content: AnthropicContent::Blocks(blocks),
                        }) if role == "user" => blocks.push(block),
                        _ => result.push(AnthropicMessage {
                            role: "user".into(),
                            content: AnthropicContent::Blocks(vec![block]),
                        }),
                    }
                }
            }
        }

        result
    }

    /// Convert tool definitions to Anthropic format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.input_schema.clone(),
            })
            .collect()
    }

    fn request_body(request: &ModelRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.turns),
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        if let Some(ref sys) = request.system {
            body["system"] = serde_json::json!(sys);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
            body["tool_choice"] = serde_json::json!({ "type": "auto" });
        }

        if stream {
            body["stream"] = serde_json::json!(true);
        }

        body
    }

    async fn send(
        &self,
        body: &serde_json::Value,
        stream: bool,
    ) -> Result<reqwest::Response, ModelError> {
        let url = format!("{}/v1/messages", self.base_url);

        let mut builder = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json");
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder.json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                ModelError::Timeout(e.to_string())
            } else {
                ModelError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(ModelError::RateLimited { retry_after_secs });
        }
        if status == 401 || status == 403 {
            return Err(ModelError::AuthenticationFailed(
                "Invalid Anthropic API key".into(),
            ));
        }
        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(ModelError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        Ok(response)
    }

    /// Convert an Anthropic API response to our ModelResponse.
    fn response_to_model_response(resp: AnthropicResponse) -> ModelResponse {
        let content = resp
            .content
            .into_iter()
            .filter_map(|block| match block {
                ResponseContentBlock::Text { text } => Some(ContentBlock::Text { text }),
                ResponseContentBlock::ToolUse { id, name, input } => {
                    Some(ContentBlock::ToolUse { id, name, input })
                }
                ResponseContentBlock::Other => None,
            })
            .collect();

        ModelResponse {
            content,
            stop_reason: resp
                .stop_reason
                .map(StopReason::from)
                .unwrap_or_else(|| StopReason::Other("missing".into())),
            usage: Some(Usage {
                input_tokens: resp.usage.input_tokens,
                output_tokens: resp.usage.output_tokens,
            }),
            model: resp.model,
        }
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        let body = Self::request_body(&request, false);
        debug!(client = "anthropic", model = %request.model, turns = request.turns.len(), "Sending completion request");

        let response = self.send(&body, false).await?;
        let api_resp: AnthropicResponse = response.json().await.map_err(|e| {
            ModelError::InvalidResponse(format!("Failed to parse Anthropic response: {e}"))
        })?;

        Ok(Self::response_to_model_response(api_resp))
    }

    async fn stream(&self, request: ModelRequest) -> Result<ModelEventReceiver, ModelError> {
        let body = Self::request_body(&request, true);
        debug!(client = "anthropic", model = %request.model, turns = request.turns.len(), "Sending streaming request");

        let response = self.send(&body, true).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut decoder = SseDecoder::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ModelError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for item in decoder.push(&bytes) {
                    let is_err = item.is_err();
                    // Receiver gone: the caller abandoned the call.
                    if tx.send(item).await.is_err() || is_err {
                        return;
                    }
                }

                if decoder.is_finished() {
                    return;
                }
            }

            let _ = tx
                .send(Err(ModelError::StreamInterrupted(
                    "stream ended before message_stop".into(),
                )))
                .await;
        });

        Ok(rx)
    }
}

/// Incremental decoder for the Anthropic SSE wire format.
///
/// Bytes go in as they arrive; complete `data:` lines come out as
/// block-level events. `message_delta` is folded into the terminal
/// `MessageStop` so that it carries the stop reason and final usage.
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Undecoded tail; may end inside a multi-byte character
    buffer: Vec<u8>,
    stop_reason: Option<StopReason>,
    usage: Usage,
    /// Blocks of kinds we do not surface (e.g. thinking); their deltas are dropped
    skipped: HashSet<usize>,
    finished: bool,
}

impl SseDecoder {
    /// Whether `message_stop` has been decoded.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed a chunk of the response body, returning every event it completes.
    ///
    /// Only complete lines are decoded as UTF-8, so a character split across
    /// two chunks survives intact.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<ModelStreamEvent, ModelError>> {
        self.buffer.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&raw[..line_end])
                .trim_end_matches('\r')
                .to_string();

            if self.finished || line.is_empty() || line.starts_with(':') {
                continue;
            }

            // Event names are repeated inside the data payload
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data.is_empty() {
                continue;
            }

            let event: serde_json::Value = match serde_json::from_str(data) {
                Ok(v) => v,
                Err(e) => {
                    trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                    continue;
                }
            };

            if let Some(item) = self.decode(&event) {
                let is_err = item.is_err();
                out.push(item);
                if is_err {
                    self.finished = true;
                }
            }
        }

        out
    }

    fn decode(&mut self, event: &serde_json::Value) -> Option<Result<ModelStreamEvent, ModelError>> {
        let index = event["index"].as_u64().map(|i| i as usize);

        match event["type"].as_str().unwrap_or("") {
            "message_start" => {
                let message = &event["message"];
                if let Some(input) = message["usage"]["input_tokens"].as_u64() {
                    self.usage.input_tokens = input as u32;
                }
                if let Some(output) = message["usage"]["output_tokens"].as_u64() {
                    self.usage.output_tokens = output as u32;
                }
                Some(Ok(ModelStreamEvent::MessageStart {
                    id: message["id"].as_str().unwrap_or("").to_string(),
                    role: message["role"].as_str().unwrap_or("assistant").to_string(),
                    model: message["model"].as_str().unwrap_or("").to_string(),
                }))
            }
            "content_block_start" => {
                let index = index?;
                let block = &event["content_block"];
                let start = match block["type"].as_str() {
                    Some("text") => BlockStart::Text {
                        text: block["text"].as_str().unwrap_or("").to_string(),
                    },
                    Some("tool_use") => BlockStart::ToolUse {
                        id: block["id"].as_str().unwrap_or("").to_string(),
                        name: block["name"].as_str().unwrap_or("").to_string(),
                    },
                    other => {
                        trace!(index, kind = ?other, "Skipping unsupported content block");
                        self.skipped.insert(index);
                        return None;
                    }
                };
                Some(Ok(ModelStreamEvent::ContentBlockStart {
                    index,
                    block: start,
                }))
            }
            "content_block_delta" => {
                let index = index?;
                if self.skipped.contains(&index) {
                    return None;
                }
                let delta = &event["delta"];
                let delta = match delta["type"].as_str() {
                    Some("text_delta") => BlockDelta::TextDelta {
                        text: delta["text"].as_str().unwrap_or("").to_string(),
                    },
                    Some("input_json_delta") => BlockDelta::InputJsonDelta {
                        partial_json: delta["partial_json"].as_str().unwrap_or("").to_string(),
                    },
                    _ => return None,
                };
                Some(Ok(ModelStreamEvent::ContentBlockDelta { index, delta }))
            }
            "content_block_stop" => {
                let index = index?;
                if self.skipped.remove(&index) {
                    return None;
                }
                Some(Ok(ModelStreamEvent::ContentBlockStop { index }))
            }
            "message_delta" => {
                if let Some(reason) = event["delta"]["stop_reason"].as_str() {
                    self.stop_reason = Some(StopReason::from(reason.to_string()));
                }
                if let Some(output) = event["usage"]["output_tokens"].as_u64() {
                    self.usage.output_tokens = output as u32;
                }
                None
            }
            "message_stop" => {
                self.finished = true;
                match self.stop_reason.take() {
                    Some(stop_reason) => Some(Ok(ModelStreamEvent::MessageStop {
                        stop_reason,
                        usage: Some(self.usage),
                    })),
                    None => Some(Err(ModelError::InvalidResponse(
                        "message_stop arrived without a stop_reason".into(),
                    ))),
                }
            }
            "error" => {
                let message = event["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown stream error")
                    .to_string();
                Some(Err(ModelError::StreamInterrupted(message)))
            }
            _ => None,
        }
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<ApiBlock>),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ApiBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}
