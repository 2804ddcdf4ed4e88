//! 会话存储：按会话 id 保存有界的协议可见历史
//!
//! 历史只在一次请求完整结束后的回合边界整体写回，循环中途不落盘；
//! 超出上限时丢弃最旧的消息。除历史外还保存最近一次的非文本附件路径
//! （照片 / 语音），供后续轮次的视觉理解使用。
//!
//! 已知风险：同一会话 id 的两个并发请求会交错各自的快照-写回，后写的覆盖先写的
//! （丢失更新）。不同会话 id 之间完全独立。需要强保证的部署可在本存储外
//! 按会话 id 串行化请求；这里不做互斥。

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::RwLock;

use crate::session::ChatMessage;

/// 单个会话的状态：有界消息序列 + 最近一次附件
#[derive(Clone, Debug, Default)]
pub struct SessionState {
    pub messages: Vec<ChatMessage>,
    pub last_attachment: Option<PathBuf>,
}

/// 进程内会话存储（可注入实例，测试各自构造，不依赖全局量）
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionState>>,
    /// 每会话保留的最大消息条数，超出时丢弃最旧的
    max_messages: usize,
}

impl SessionStore {
    pub fn new(max_messages: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_messages: max_messages.max(2),
        }
    }

    /// 读取会话历史快照（不存在则为空）
    pub async fn snapshot(&self, chat_id: &str) -> Vec<ChatMessage> {
        let sessions = self.sessions.read().await;
        sessions
            .get(chat_id)
            .map(|s| s.messages.clone())
            .unwrap_or_default()
    }

    /// 回合边界整体写回历史，应用长度上限（丢弃最旧）
    pub async fn replace(&self, chat_id: &str, mut messages: Vec<ChatMessage>) {
        if messages.len() > self.max_messages {
            let drop = messages.len() - self.max_messages;
            messages.drain(..drop);
        }
        let mut sessions = self.sessions.write().await;
        sessions.entry(chat_id.to_string()).or_default().messages = messages;
    }

    /// 记录最近一次非文本附件（覆盖旧值）
    pub async fn set_attachment(&self, chat_id: &str, path: PathBuf) {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(chat_id.to_string())
            .or_default()
            .last_attachment = Some(path);
    }

    pub async fn attachment(&self, chat_id: &str) -> Option<PathBuf> {
        let sessions = self.sessions.read().await;
        sessions.get(chat_id).and_then(|s| s.last_attachment.clone())
    }

    pub async fn clear(&self, chat_id: &str) {
        let mut sessions = self.sessions.write().await;
        sessions.remove(chat_id);
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
