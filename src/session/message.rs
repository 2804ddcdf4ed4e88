//! 协议可见的对话消息
//!
//! 与推理服务的 Messages 线格式一一对应：一条消息 = 角色 + 内容块序列。
//! 内容块按 `type` 标签区分 text / tool_use / tool_result / image；
//! 工具调用只由推理服务产生，工具结果只由编排器产生。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 消息角色（与线格式一致，只有 user / assistant 两种）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// base64 图片源（`{"type": "base64", "media_type": ..., "data": ...}`）
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub source_type: String,
    pub media_type: String,
    pub data: String,
}

impl ImageSource {
    pub fn base64(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            source_type: "base64".to_string(),
            media_type: media_type.into(),
            data: data.into(),
        }
    }
}

/// 消息内容块
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    /// 推理服务请求的一次工具调用（id 用于匹配随后的 tool_result）
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    /// 工具调用的结果记录，content 为统一结果信封的 JSON 文本
    ToolResult {
        tool_use_id: String,
        content: String,
    },
    Image {
        source: ImageSource,
    },
    /// 未知块（如服务端的 thinking 块）：解析容错用，客户端解析后即丢弃
    #[serde(other)]
    Unknown,
}

/// 一条协议可见消息：角色 + 内容块序列，顺序有意义
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl ChatMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn user_blocks(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }

    pub fn assistant_blocks(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// 拼接消息中的全部文本块
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

    /// 消息中的全部工具调用请求，按出现顺序
    pub fn tool_uses(&self) -> Vec<(&str, &str, &Value)> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => {
                    Some((id.as_str(), name.as_str(), input))
                }
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_block_wire_format() {
        let msg = ChatMessage::assistant_blocks(vec![
            ContentBlock::Text {
                text: "looking".to_string(),
            },
            ContentBlock::ToolUse {
                id: "toolu_1".to_string(),
                name: "run_command".to_string(),
                input: serde_json::json!({"command": "dir"}),
            },
        ]);
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["role"], "assistant");
        assert_eq!(v["content"][0]["type"], "text");
        assert_eq!(v["content"][1]["type"], "tool_use");
        assert_eq!(v["content"][1]["id"], "toolu_1");
    }

    #[test]
    fn test_unknown_block_tolerated() {
        let raw = r#"{"role":"assistant","content":[{"type":"thinking","thinking":"..."},{"type":"text","text":"hi"}]}"#;
        let msg: ChatMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.text(), "hi");
    }

    #[test]
    fn test_tool_uses_in_order() {
        let msg = ChatMessage::assistant_blocks(vec![
            ContentBlock::ToolUse {
                id: "a".to_string(),
                name: "x".to_string(),
                input: Value::Null,
            },
            ContentBlock::ToolUse {
                id: "b".to_string(),
                name: "y".to_string(),
                input: Value::Null,
            },
        ]);
        let ids: Vec<&str> = msg.tool_uses().iter().map(|(id, _, _)| *id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
