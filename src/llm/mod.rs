//! 推理服务客户端：抽象与实现（Anthropic 兼容 / Mock）

pub mod anthropic;
pub mod mock;
pub mod traits;

pub use anthropic::AnthropicClient;
pub use mock::ScriptedClient;
pub use traits::{ChatResponse, ReasoningClient, StopReason, ToolDefinition};
