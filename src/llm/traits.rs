//! 推理服务客户端抽象
//!
//! 所有后端（Anthropic 兼容 / Mock）实现 ReasoningClient：一次对话补全，
//! 输入为 system + 工具 schema + 协议可见历史，输出为内容块序列与停止原因。

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::core::AgentError;
use crate::session::{ChatMessage, ContentBlock};

/// 暴露给推理服务的工具定义（JSON Schema 形参数）
#[derive(Clone, Debug, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// 响应的停止原因：要么请求工具调用，要么本轮结束
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    ToolUse,
    End,
}

/// 一次补全的结果：内容块 + 停止原因
#[derive(Clone, Debug)]
pub struct ChatResponse {
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
}

impl ChatResponse {
    /// 拼接响应中的全部文本块
    pub fn text(&self) -> String {
        let mut out = String::new();
        for block in &self.content {
            if let ContentBlock::Text { text } = block {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }

    pub fn has_tool_use(&self) -> bool {
        self.content
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolUse { .. }))
    }

    /// 以本响应内容构造协议可见的 assistant 消息
    pub fn to_assistant_message(&self) -> ChatMessage {
        ChatMessage::assistant_blocks(self.content.clone())
    }
}

/// 推理服务客户端 trait：单次补全；重试语义由实现自行约定，调用方不再包一层
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    async fn chat(
        &self,
        system: &str,
        tools: &[ToolDefinition],
        messages: &[ChatMessage],
    ) -> Result<ChatResponse, AgentError>;
}
