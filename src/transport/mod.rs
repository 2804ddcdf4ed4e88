//! 消息传输层
//!
//! 发送侧契约：尽力送达并返回是否成功，从不向调用方抛错；瞬时网络错误
//! （连接重置 / 超时 / 拒绝 / 域名解析失败 / 对端挂断）在传输层内部
//! 有界指数退避重试。工具执行路径不做这种重试。

pub mod telegram;

use std::path::Path;

use async_trait::async_trait;

pub use telegram::TelegramTransport;

/// 消息发送契约（投递失败返回 false，绝不 panic / 抛错）
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> bool;
    async fn send_photo(&self, chat_id: i64, path: &Path, caption: Option<&str>) -> bool;
    async fn send_document(&self, chat_id: i64, path: &Path, caption: Option<&str>) -> bool;
}

/// 空传输：测试与无聊天端场景使用
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl MessageSink for NullSink {
    async fn send_text(&self, _chat_id: i64, _text: &str) -> bool {
        true
    }
    async fn send_photo(&self, _chat_id: i64, _path: &Path, _caption: Option<&str>) -> bool {
        true
    }
    async fn send_document(&self, _chat_id: i64, _path: &Path, _caption: Option<&str>) -> bool {
        true
    }
}

/// 错误文本是否属于可重试的瞬时网络故障
pub fn is_transient_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    const TRANSIENT: &[&str] = &[
        "connection reset",
        "timed out",
        "timeout",
        "connection refused",
        "dns error",
        "failed to lookup",
        "connection closed before message completed",
        "broken pipe",
        "unexpected eof",
    ];
    TRANSIENT.iter().any(|t| lower.contains(t))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(is_transient_error("error sending request: Connection reset by peer"));
        assert!(is_transient_error("operation timed out"));
        assert!(is_transient_error("dns error: failed to lookup address"));
        assert!(is_transient_error("connection closed before message completed"));
        assert!(!is_transient_error("HTTP 403: bot was blocked by the user"));
        assert!(!is_transient_error("invalid file id"));
    }
}
