//! Telegram Bot API 集成
//!
//! 长轮询 getUpdates 收消息，sendMessage / sendPhoto / sendDocument 回发。
//! 消息超长按 Telegram 的 4096 字符上限分段发送；附件经 getFile 下载到本地。

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::AgentError;
use crate::transport::{is_transient_error, MessageSink};

/// 单段消息的最大字符数（上限 4096，留出余量）
const CHUNK_CHARS: usize = 4000;
/// 瞬时网络错误的最大重试次数
const MAX_RETRIES: u32 = 3;
/// 首次重试前的退避基数
const BACKOFF_BASE_MS: u64 = 500;

/// 一条收到的更新
#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Incoming>,
}

/// 收到的消息（只保留本系统关心的字段）
#[derive(Debug, Deserialize)]
pub struct Incoming {
    pub message_id: i64,
    pub chat: Chat,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub photo: Option<Vec<PhotoSize>>,
    pub voice: Option<Voice>,
    pub document: Option<Document>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub file_size: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct Voice {
    pub file_id: String,
}

#[derive(Debug, Deserialize)]
pub struct Document {
    pub file_id: String,
    pub file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    ok: bool,
    description: Option<String>,
    result: Option<Value>,
}

/// Telegram 传输：持有 HTTP 客户端与 bot token
pub struct TelegramTransport {
    http: reqwest::Client,
    base: String,
    file_base: String,
}

impl TelegramTransport {
    pub fn new(token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: format!("https://api.telegram.org/bot{token}"),
            file_base: format!("https://api.telegram.org/file/bot{token}"),
        }
    }

    /// JSON 方法调用，瞬时网络错误有界退避重试；业务错误（ok=false）不重试
    async fn call(&self, method: &str, body: &Value) -> Result<Value, AgentError> {
        let url = format!("{}/{method}", self.base);
        let mut attempt = 0u32;
        loop {
            let sent = self
                .http
                .post(&url)
                .timeout(Duration::from_secs(90))
                .json(body)
                .send()
                .await;
            match sent {
                Ok(resp) => {
                    let envelope: ApiEnvelope = resp
                        .json()
                        .await
                        .map_err(|e| AgentError::TransportError(e.to_string()))?;
                    if envelope.ok {
                        return Ok(envelope.result.unwrap_or(Value::Null));
                    }
                    return Err(AgentError::TransportError(
                        envelope
                            .description
                            .unwrap_or_else(|| format!("{method} failed")),
                    ));
                }
                Err(e) => {
                    let msg = e.to_string();
                    if attempt < MAX_RETRIES && is_transient_error(&msg) {
                        let delay = BACKOFF_BASE_MS << attempt;
                        tracing::warn!(method, attempt, delay_ms = delay, error = %msg, "transient transport error, retrying");
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(AgentError::TransportError(msg));
                }
            }
        }
    }

    /// 带文件的 multipart 方法调用；每次重试重建表单
    async fn call_with_file(
        &self,
        method: &str,
        field: &str,
        chat_id: i64,
        path: &Path,
        caption: Option<&str>,
    ) -> Result<(), AgentError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            AgentError::TransportError(format!("cannot read '{}': {e}", path.display()))
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file.bin".to_string());
        let url = format!("{}/{method}", self.base);

        let mut attempt = 0u32;
        loop {
            let part = reqwest::multipart::Part::bytes(bytes.clone()).file_name(file_name.clone());
            let mut form = reqwest::multipart::Form::new()
                .text("chat_id", chat_id.to_string())
                .part(field.to_string(), part);
            if let Some(c) = caption {
                form = form.text("caption", c.to_string());
            }
            let sent = self
                .http
                .post(&url)
                .timeout(Duration::from_secs(120))
                .multipart(form)
                .send()
                .await;
            match sent {
                Ok(resp) => {
                    let envelope: ApiEnvelope = resp
                        .json()
                        .await
                        .map_err(|e| AgentError::TransportError(e.to_string()))?;
                    if envelope.ok {
                        return Ok(());
                    }
                    return Err(AgentError::TransportError(
                        envelope
                            .description
                            .unwrap_or_else(|| format!("{method} failed")),
                    ));
                }
                Err(e) => {
                    let msg = e.to_string();
                    if attempt < MAX_RETRIES && is_transient_error(&msg) {
                        let delay = BACKOFF_BASE_MS << attempt;
                        tracing::warn!(method, attempt, delay_ms = delay, error = %msg, "transient transport error, retrying");
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(AgentError::TransportError(msg));
                }
            }
        }
    }

    /// 长轮询拉取更新
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, AgentError> {
        let url = format!("{}/getUpdates", self.base);
        let resp = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(timeout_secs + 15))
            .query(&[("offset", offset), ("timeout", timeout_secs as i64)])
            .send()
            .await
            .map_err(|e| AgentError::TransportError(e.to_string()))?;
        let envelope: ApiEnvelope = resp
            .json()
            .await
            .map_err(|e| AgentError::TransportError(e.to_string()))?;
        if !envelope.ok {
            return Err(AgentError::TransportError(
                envelope
                    .description
                    .unwrap_or_else(|| "getUpdates failed".to_string()),
            ));
        }
        let updates: Vec<Update> =
            serde_json::from_value(envelope.result.unwrap_or(Value::Array(vec![])))
                .map_err(|e| AgentError::ProtocolError(format!("getUpdates payload: {e}")))?;
        Ok(updates)
    }

    /// 经 getFile 下载附件到 dest_dir，返回本地路径
    pub async fn download_file(&self, file_id: &str, dest_dir: &Path) -> Result<PathBuf, AgentError> {
        let result = self
            .call("getFile", &json!({"file_id": file_id}))
            .await?;
        let remote_path = result
            .get("file_path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AgentError::ProtocolError("getFile: no file_path".to_string()))?;

        let extension = Path::new(remote_path)
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_else(|| "bin".to_string());
        let local = dest_dir.join(format!(
            "tg-{}-{}.{extension}",
            chrono::Local::now().format("%Y%m%d-%H%M%S"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        ));

        tokio::fs::create_dir_all(dest_dir).await?;
        let url = format!("{}/{remote_path}", self.file_base);
        let bytes = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(120))
            .send()
            .await
            .map_err(|e| AgentError::TransportError(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| AgentError::TransportError(e.to_string()))?;
        tokio::fs::write(&local, &bytes).await?;
        Ok(local)
    }
}

/// 超长文本按字符数分段
fn chunk_text(text: &str) -> Vec<String> {
    if text.chars().count() <= CHUNK_CHARS {
        return vec![text.to_string()];
    }
    text.chars()
        .collect::<Vec<_>>()
        .chunks(CHUNK_CHARS)
        .map(|c| c.iter().collect())
        .collect()
}

#[async_trait]
impl MessageSink for TelegramTransport {
    async fn send_text(&self, chat_id: i64, text: &str) -> bool {
        let text = if text.trim().is_empty() { "(empty)" } else { text };
        for chunk in chunk_text(text) {
            let body = json!({"chat_id": chat_id, "text": chunk});
            if let Err(e) = self.call("sendMessage", &body).await {
                tracing::error!(chat_id, error = %e, "sendMessage failed");
                return false;
            }
        }
        true
    }

    async fn send_photo(&self, chat_id: i64, path: &Path, caption: Option<&str>) -> bool {
        match self
            .call_with_file("sendPhoto", "photo", chat_id, path, caption)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(chat_id, error = %e, "sendPhoto failed");
                false
            }
        }
    }

    async fn send_document(&self, chat_id: i64, path: &Path, caption: Option<&str>) -> bool {
        match self
            .call_with_file("sendDocument", "document", chat_id, path, caption)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(chat_id, error = %e, "sendDocument failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_single_chunk() {
        assert_eq!(chunk_text("hello").len(), 1);
    }

    #[test]
    fn test_long_text_chunked_and_lossless() {
        let long: String = "好".repeat(CHUNK_CHARS * 2 + 10);
        let chunks = chunk_text(&long);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), long);
    }

    #[test]
    fn test_update_parsing_with_photo() {
        let raw = r#"{
            "update_id": 7,
            "message": {
                "message_id": 1,
                "chat": {"id": 42},
                "caption": "what is this",
                "photo": [
                    {"file_id": "small", "file_size": 100},
                    {"file_id": "large", "file_size": 9000}
                ]
            }
        }"#;
        let update: Update = serde_json::from_str(raw).unwrap();
        let msg = update.message.unwrap();
        assert_eq!(msg.chat.id, 42);
        assert_eq!(msg.photo.unwrap().len(), 2);
    }
}
