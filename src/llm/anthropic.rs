//! Anthropic 兼容 Messages API 客户端
//!
//! 通过 reqwest 调用 /v1/messages：携带 system、工具 schema 与完整历史，
//! 解析内容块与 stop_reason。可选「扩展思考」模式：服务端拒绝时对该次调用
//! 透明回退到标准模式，不影响后续调用。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::AgentError;
use crate::llm::{ChatResponse, ReasoningClient, StopReason, ToolDefinition};
use crate::session::{ChatMessage, ContentBlock};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Token 使用统计（进程内累计值）
#[derive(Debug, Default)]
pub struct TokenUsage {
    pub input_tokens: AtomicU64,
    pub output_tokens: AtomicU64,
}

impl TokenUsage {
    pub fn add(&self, input: u64, output: u64) {
        self.input_tokens.fetch_add(input, Ordering::Relaxed);
        self.output_tokens.fetch_add(output, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64) {
        (
            self.input_tokens.load(Ordering::Relaxed),
            self.output_tokens.load(Ordering::Relaxed),
        )
    }
}

/// Messages API 响应体（只取本地需要的字段）
#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

/// Anthropic 客户端：持有 HTTP 客户端、模型名与扩展思考开关
pub struct AnthropicClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    extended_thinking: bool,
    thinking_budget_tokens: u32,
    pub usage: TokenUsage,
}

impl AnthropicClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        base_url: Option<&str>,
        model: &str,
        api_key: &str,
        max_tokens: u32,
        extended_thinking: bool,
        thinking_budget_tokens: u32,
        request_timeout_secs: u64,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(request_timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url
                .unwrap_or("https://api.anthropic.com")
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            max_tokens,
            extended_thinking,
            thinking_budget_tokens,
            usage: TokenUsage::default(),
        }
    }

    pub fn token_usage(&self) -> (u64, u64) {
        self.usage.get()
    }

    fn build_body(
        &self,
        system: &str,
        tools: &[ToolDefinition],
        messages: &[ChatMessage],
        with_thinking: bool,
    ) -> Value {
        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": messages,
        });
        if !system.is_empty() {
            body["system"] = json!(system);
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }
        if with_thinking {
            body["thinking"] = json!({
                "type": "enabled",
                "budget_tokens": self.thinking_budget_tokens,
            });
        }
        body
    }

    /// 单次请求：返回 (HTTP 状态, 响应文本)
    async fn post_once(&self, body: &Value) -> Result<(reqwest::StatusCode, String), AgentError> {
        let resp = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| AgentError::LlmError(e.to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| AgentError::LlmError(e.to_string()))?;
        Ok((status, text))
    }
}

#[async_trait]
impl ReasoningClient for AnthropicClient {
    async fn chat(
        &self,
        system: &str,
        tools: &[ToolDefinition],
        messages: &[ChatMessage],
    ) -> Result<ChatResponse, AgentError> {
        let body = self.build_body(system, tools, messages, self.extended_thinking);
        let (mut status, mut text) = self.post_once(&body).await?;

        // 扩展思考被服务端拒绝（如模型不支持）：仅本次调用回退到标准模式
        if self.extended_thinking
            && status == reqwest::StatusCode::BAD_REQUEST
            && text.contains("thinking")
        {
            tracing::warn!("Extended thinking rejected by service, falling back for this call");
            let body = self.build_body(system, tools, messages, false);
            (status, text) = self.post_once(&body).await?;
        }

        if !status.is_success() {
            let preview: String = text.chars().take(500).collect();
            return Err(AgentError::LlmError(format!("HTTP {status}: {preview}")));
        }

        let parsed: ApiResponse = serde_json::from_str(&text).map_err(|e| {
            let preview: String = text.chars().take(200).collect();
            AgentError::ProtocolError(format!("unparseable response: {e}: {preview}"))
        })?;

        if let Some(usage) = &parsed.usage {
            self.usage.add(
                usage.input_tokens.unwrap_or(0),
                usage.output_tokens.unwrap_or(0),
            );
        }

        let stop_reason = match parsed.stop_reason.as_deref() {
            Some("tool_use") => StopReason::ToolUse,
            _ => StopReason::End,
        };

        // thinking 等未知块不回灌历史，避免线格式不兼容
        let content: Vec<ContentBlock> = parsed
            .content
            .into_iter()
            .filter(|b| !matches!(b, ContentBlock::Unknown))
            .collect();

        Ok(ChatResponse {
            content,
            stop_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tool_use_response() {
        let raw = r#"{
            "content": [
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "toolu_01", "name": "run_command", "input": {"command": "dir"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 12, "output_tokens": 34}
        }"#;
        let parsed: ApiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.stop_reason.as_deref(), Some("tool_use"));
        assert_eq!(parsed.content.len(), 2);
        assert!(matches!(
            parsed.content[1],
            ContentBlock::ToolUse { .. }
        ));
    }

    #[test]
    fn test_unknown_blocks_filtered() {
        let raw = r#"{
            "content": [
                {"type": "thinking", "thinking": "hmm", "signature": "x"},
                {"type": "text", "text": "done"}
            ],
            "stop_reason": "end_turn"
        }"#;
        let parsed: ApiResponse = serde_json::from_str(raw).unwrap();
        let kept: Vec<ContentBlock> = parsed
            .content
            .into_iter()
            .filter(|b| !matches!(b, ContentBlock::Unknown))
            .collect();
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_body_includes_thinking_only_when_enabled() {
        let client = AnthropicClient::new(None, "m", "k", 1024, true, 512, 30);
        let with = client.build_body("sys", &[], &[], true);
        let without = client.build_body("sys", &[], &[], false);
        assert!(with.get("thinking").is_some());
        assert!(without.get("thinking").is_none());
    }
}
