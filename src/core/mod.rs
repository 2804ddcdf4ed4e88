//! 核心类型：错误枚举

pub mod error;

pub use error::AgentError;
