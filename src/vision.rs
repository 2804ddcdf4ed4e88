//! 图像 / 语音理解（外部协作者的窄契约）
//!
//! 图像分析走推理服务本身：图片以 base64 内容块嵌入一条 user 消息。
//! 语音转写走 OpenAI 兼容的 /audio/transcriptions 端点。两者都只返回
//! 文本或错误，不承诺更多。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;

use crate::core::AgentError;
use crate::llm::ReasoningClient;
use crate::session::{ChatMessage, ContentBlock, ImageSource, Role};

pub struct VisionService {
    llm: Arc<dyn ReasoningClient>,
    http: reqwest::Client,
    transcription_base_url: String,
    transcription_model: String,
}

impl VisionService {
    pub fn new(
        llm: Arc<dyn ReasoningClient>,
        transcription_base_url: String,
        transcription_model: String,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();
        Self {
            llm,
            http,
            transcription_base_url,
            transcription_model,
        }
    }

    /// 用推理服务描述一张本地图片
    pub async fn analyze_image(&self, path: &Path, prompt: &str) -> Result<String, AgentError> {
        let bytes = tokio::fs::read(path).await?;
        let data = base64::engine::general_purpose::STANDARD.encode(&bytes);
        let media_type = media_type_for(path);

        let message = ChatMessage {
            role: Role::User,
            content: vec![
                ContentBlock::Image {
                    source: ImageSource::base64(media_type, data),
                },
                ContentBlock::Text {
                    text: prompt.to_string(),
                },
            ],
        };

        let response = self.llm.chat("", &[], &[message]).await?;
        let text = response.text();
        if text.is_empty() {
            return Err(AgentError::ProtocolError(
                "image analysis returned no text".to_string(),
            ));
        }
        Ok(text)
    }

    /// 转写一段本地音频；需要 OPENAI_API_KEY
    pub async fn transcribe(&self, path: &Path) -> Result<String, AgentError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| AgentError::ConfigError("OPENAI_API_KEY is not set".to_string()))?;

        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio.ogg".to_string());
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.transcription_model.clone());

        let resp = self
            .http
            .post(format!(
                "{}/audio/transcriptions",
                self.transcription_base_url.trim_end_matches('/')
            ))
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| AgentError::LlmError(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| AgentError::LlmError(e.to_string()))?;
        if !status.is_success() {
            let preview: String = text.chars().take(300).collect();
            return Err(AgentError::LlmError(format!("HTTP {status}: {preview}")));
        }
        let value: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| AgentError::ProtocolError(format!("transcription payload: {e}")))?;
        value
            .get("text")
            .and_then(|t| t.as_str())
            .map(|t| t.to_string())
            .ok_or_else(|| AgentError::ProtocolError("transcription has no text field".to_string()))
    }
}

/// 按扩展名猜 MIME 类型，未知时按 jpeg 处理
fn media_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_mapping() {
        assert_eq!(media_type_for(Path::new("a.png")), "image/png");
        assert_eq!(media_type_for(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(media_type_for(Path::new("photo")), "image/jpeg");
    }
}
