//! Agent 错误类型
//!
//! 只承载需要跨层传播的失败：推理服务、协议、传输、配置与子进程。
//! 策略拒绝与命令执行失败不走这里 —— 它们折叠进 ExecutionResult / 工具
//! 结果信封回传给推理服务；只有编排层错误直达最终用户。

use thiserror::Error;

/// Agent 运行过程中可能出现的错误（推理服务、协议、工具、子进程、传输等）
#[derive(Error, Debug)]
pub enum AgentError {
    /// 推理服务调用本身失败（网络 / HTTP 状态码非 2xx）
    #[error("Reasoning service error: {0}")]
    LlmError(String),

    /// 推理服务或浏览器桥返回了不可解析的内容
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    /// 浏览器自动化桥进程失败（启动失败、stdout 非 JSON 等）
    #[error("Browser bridge error: {0}")]
    BridgeError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
