//! Streaming client for the upstream model.
//!
//! Live mode talks to an OpenRouter/OpenAI-compatible `chat/completions`
//! endpoint with `stream: true` and parses the SSE `data:` framing off the
//! byte stream. Mock mode produces a deterministic mentor reply (complete
//! with control block) and streams it word by word, so the whole pipeline is
//! exercisable offline.

use crate::chat::{ChatTurn, Role};
use crate::error::GatewayError;
use crate::protocol::{self, ControlBlock};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

const ENV_LLM_MODE: &str = "DOJO_LLM_MODE";
const ENV_LLM_API_URL: &str = "DOJO_LLM_API_URL";
const ENV_LLM_API_KEY: &str = "DOJO_LLM_API_KEY";
const ENV_OPENROUTER_API_KEY: &str = "OPENROUTER_API_KEY";
const ENV_LLM_MODEL: &str = "DOJO_LLM_MODEL";
const DEFAULT_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const DEFAULT_MODEL: &str = "google/gemini-2.5-flash";

/// Sampling defaults carried over from the product tuning.
const DEFAULT_TEMPERATURE: f32 = 1.0;
const DEFAULT_TOP_P: f32 = 0.95;

/// Mode for model invocation: mock (deterministic local generation) or live
/// (external API).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LlmMode {
    #[default]
    Mock,
    Live,
}

impl LlmMode {
    pub fn from_env() -> Self {
        match std::env::var(ENV_LLM_MODE).as_deref() {
            Ok("live") => LlmMode::Live,
            _ => LlmMode::Mock,
        }
    }
}

// OpenAI-compatible request/response structures
#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

/// Streaming chunk from an OpenAI-compatible API (SSE data format)
#[derive(Deserialize, Debug)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize, Debug)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// A single streamed fragment, or the mid-stream error that ended the turn.
pub type StreamItem = Result<String, String>;

/// Invokes the mentor model and yields response text incrementally.
pub struct ModelClient {
    mode: LlmMode,
    client: reqwest::Client,
}

impl Default for ModelClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelClient {
    pub fn new() -> Self {
        Self {
            mode: LlmMode::from_env(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_mode(mode: LlmMode) -> Self {
        Self {
            mode,
            client: reqwest::Client::new(),
        }
    }

    pub fn mode(&self) -> LlmMode {
        self.mode
    }

    /// API key: DOJO_LLM_API_KEY, or OPENROUTER_API_KEY as fallback.
    fn api_key() -> Result<String, GatewayError> {
        let key = std::env::var(ENV_LLM_API_KEY)
            .or_else(|_| std::env::var(ENV_OPENROUTER_API_KEY))
            .map_err(|_| {
                GatewayError::UpstreamModel(
                    "Missing DOJO_LLM_API_KEY or OPENROUTER_API_KEY".to_string(),
                )
            })?;
        let key = key.trim().to_string();
        if key.is_empty() {
            return Err(GatewayError::UpstreamModel(
                "Missing DOJO_LLM_API_KEY or OPENROUTER_API_KEY".to_string(),
            ));
        }
        Ok(key)
    }

    fn build_messages(system_instruction: &str, turns: &[ChatTurn]) -> Vec<WireMessage> {
        let mut messages = Vec::with_capacity(turns.len() + 1);
        messages.push(WireMessage {
            role: "system",
            content: system_instruction.to_string(),
        });
        for turn in turns {
            // System-role entries are UI markers, never conversational turns.
            let role = match turn.role {
                Role::User => "user",
                Role::Model => "assistant",
                Role::System => continue,
            };
            messages.push(WireMessage {
                role,
                content: turn.content.clone(),
            });
        }
        messages
    }

    /// Opens an incremental response stream for one mentor turn. The last
    /// entry of `turns` is the new user turn; earlier entries are history.
    ///
    /// An `Err` return means the call failed before any token arrived; an
    /// `Err` item on the channel means the stream broke mid-flight.
    pub async fn stream_reply(
        &self,
        system_instruction: &str,
        turns: &[ChatTurn],
    ) -> Result<mpsc::Receiver<StreamItem>, GatewayError> {
        match self.mode {
            LlmMode::Mock => Ok(self.mock_stream_reply(turns)),
            LlmMode::Live => self.live_stream_reply(system_instruction, turns).await,
        }
    }

    async fn live_stream_reply(
        &self,
        system_instruction: &str,
        turns: &[ChatTurn],
    ) -> Result<mpsc::Receiver<StreamItem>, GatewayError> {
        let url = std::env::var(ENV_LLM_API_URL).unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let key = Self::api_key()?;
        let model = std::env::var(ENV_LLM_MODEL).unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        tracing::info!(
            target: "dojo::model",
            model = %model,
            turns = turns.len(),
            "[ModelClient] Streaming session started"
        );

        let request_body = ChatCompletionRequest {
            model: model.clone(),
            messages: Self::build_messages(system_instruction, turns),
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            stream: Some(true),
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", key))
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| GatewayError::UpstreamModel(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!(
                target: "dojo::model",
                status = %status,
                "[ModelClient] HTTP {} from model endpoint: {}",
                status,
                error_text
            );
            return Err(GatewayError::UpstreamModel(format!(
                "Model API error ({}): {}",
                status, error_text
            )));
        }

        let (tx, rx) = mpsc::channel::<StreamItem>(100);

        let model_for_log = model.clone();
        tokio::spawn(async move {
            use futures_util::TryStreamExt;
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();

            loop {
                let bytes = match stream.try_next().await {
                    Ok(Some(bytes)) => bytes,
                    Ok(None) => break,
                    Err(e) => {
                        // Transport died mid-stream; surface it as an item so
                        // the pipeline can emit the inline terminal marker.
                        let _ = tx.send(Err(e.to_string())).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                // Process complete SSE lines
                while let Some(newline_pos) = buffer.find('\n') {
                    let line = buffer[..newline_pos].trim().to_string();
                    buffer = buffer[newline_pos + 1..].to_string();

                    if line.is_empty() {
                        continue;
                    }

                    // SSE format: "data: {...}" or "data: [DONE]"
                    if let Some(data) = line.strip_prefix("data: ") {
                        if data == "[DONE]" {
                            tracing::info!(
                                target: "dojo::model",
                                "[ModelClient] Stream completed for model: {}",
                                model_for_log
                            );
                            return;
                        }

                        match serde_json::from_str::<StreamChunk>(data) {
                            Ok(chunk) => {
                                if let Some(choice) = chunk.choices.first() {
                                    if let Some(content) = &choice.delta.content {
                                        if !content.is_empty()
                                            && tx.send(Ok(content.clone())).await.is_err()
                                        {
                                            // Receiver dropped, stop processing
                                            return;
                                        }
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::debug!(
                                    target: "dojo::model",
                                    "[ModelClient] Failed to parse SSE chunk: {} - data: {}",
                                    e,
                                    data
                                );
                            }
                        }
                    }
                }
            }
        });

        Ok(rx)
    }

    /// Mock streaming: a deterministic in-character reply, word by word.
    fn mock_stream_reply(&self, turns: &[ChatTurn]) -> mpsc::Receiver<StreamItem> {
        let (tx, rx) = mpsc::channel::<StreamItem>(100);
        let reply = Self::mock_reply(turns);

        tokio::spawn(async move {
            for word in reply.split_inclusive(' ') {
                if tx.send(Ok(word.to_string())).await.is_err() {
                    break;
                }
                tokio::time::sleep(tokio::time::Duration::from_millis(5)).await;
            }
        });

        rx
    }

    /// Deterministic mentor output. Passing turns ("review my code" or
    /// "I want to learn ...") advance the objective so the whole level
    /// machinery is testable without a network.
    fn mock_reply(turns: &[ChatTurn]) -> String {
        let last = turns
            .last()
            .map(|t| t.content.to_lowercase())
            .unwrap_or_default();

        if last.contains("review my code") || last.contains("i want to learn") {
            let block = ControlBlock {
                pass: true,
                new_objective: Some("Next Objective: Apply the Pattern".to_string()),
                new_snippet: Some("// TODO: apply the pattern from the docs\n".to_string()),
                language: Some("javascript".to_string()),
            };
            protocol::encode(
                "Acceptable. The next task is already in your editor. Read it this time.",
                &block,
            )
        } else {
            protocol::encode(
                "It's in the docs. Here is the pattern again; apply it in the editor.",
                &ControlBlock::default(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(mut rx: mpsc::Receiver<StreamItem>) -> String {
        let mut full = String::new();
        while let Some(item) = rx.recv().await {
            full.push_str(&item.expect("mock stream never errors"));
        }
        full
    }

    #[tokio::test]
    async fn test_mock_stream_decodes_to_control_block() {
        let client = ModelClient::with_mode(LlmMode::Mock);
        let rx = client
            .stream_reply("instruction", &[ChatTurn::user("I want to learn React")])
            .await
            .unwrap();
        let full = collect(rx).await;
        let decoded = protocol::decode(&full);
        assert!(!decoded.visible.is_empty());
        let block = decoded.control.unwrap();
        assert!(block.pass);
        assert!(block.new_objective.is_some());
    }

    #[tokio::test]
    async fn test_mock_chat_turn_does_not_pass() {
        let client = ModelClient::with_mode(LlmMode::Mock);
        let rx = client
            .stream_reply("instruction", &[ChatTurn::user("what is a closure?")])
            .await
            .unwrap();
        let decoded = protocol::decode(&collect(rx).await);
        assert!(!decoded.control.unwrap().pass);
    }

    #[test]
    fn test_build_messages_filters_system_turns() {
        let turns = vec![
            ChatTurn::user("hi"),
            ChatTurn {
                role: Role::System,
                content: "🎯 Current Task: X".to_string(),
            },
            ChatTurn::model("hello"),
        ];
        let messages = ModelClient::build_messages("sys", &turns);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[2].role, "assistant");
    }
}
