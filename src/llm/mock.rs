//! Mock 推理客户端（用于测试，无需 API）
//!
//! 按脚本依次吐出预设响应；脚本耗尽后固定返回一条纯文本结束响应。
//! 记录调用次数与每次收到的历史长度，供断言循环轮数与协议不变量。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::AgentError;
use crate::llm::{ChatResponse, ReasoningClient, StopReason, ToolDefinition};
use crate::session::{ChatMessage, ContentBlock};

/// 脚本化 Mock：依次弹出预设响应
pub struct ScriptedClient {
    script: Mutex<Vec<ChatResponse>>,
    calls: AtomicUsize,
    /// 为 Some 时：所有调用直接返回该错误（模拟推理服务不可用）
    fail_with: Option<String>,
}

impl ScriptedClient {
    pub fn new(mut responses: Vec<ChatResponse>) -> Self {
        responses.reverse();
        Self {
            script: Mutex::new(responses),
            calls: AtomicUsize::new(0),
            fail_with: None,
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            fail_with: Some(message.into()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 便捷构造：纯文本结束响应
    pub fn text_response(text: impl Into<String>) -> ChatResponse {
        ChatResponse {
            content: vec![ContentBlock::Text { text: text.into() }],
            stop_reason: StopReason::End,
        }
    }

    /// 便捷构造：请求一组工具调用的响应
    pub fn tool_response(uses: Vec<(&str, &str, serde_json::Value)>) -> ChatResponse {
        ChatResponse {
            content: uses
                .into_iter()
                .map(|(id, name, input)| ContentBlock::ToolUse {
                    id: id.to_string(),
                    name: name.to_string(),
                    input,
                })
                .collect(),
            stop_reason: StopReason::ToolUse,
        }
    }
}

#[async_trait]
impl ReasoningClient for ScriptedClient {
    async fn chat(
        &self,
        _system: &str,
        _tools: &[ToolDefinition],
        _messages: &[ChatMessage],
    ) -> Result<ChatResponse, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = &self.fail_with {
            return Err(AgentError::LlmError(msg.clone()));
        }
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        Ok(script
            .pop()
            .unwrap_or_else(|| Self::text_response("Done.")))
    }
}
