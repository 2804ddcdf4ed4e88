//! 会话层：协议可见消息类型与按会话 id 的有界历史存储

pub mod message;
pub mod store;

pub use message::{ChatMessage, ContentBlock, ImageSource, Role};
pub use store::{SessionState, SessionStore};
