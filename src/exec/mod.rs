//! 命令调度层
//!
//! 把「命令/脚本文本 + shell 提示」变成一次安全、确定的系统调用：
//! - shell 族识别（结构化 shell vs 基础解释器）
//! - 基础解释器路径上的安全规则表（拒绝 / 改写 / 改道直启浏览器）
//! - 带超时的执行，所有失败折叠进 ExecutionResult，绝不向上抛

pub mod browser;
pub mod dispatch;
pub mod safety;
pub mod shell;

pub use dispatch::CommandDispatcher;
pub use shell::{ShellKind, ShellPref};

use std::path::PathBuf;

/// 一次执行请求：command 与 script 恰有其一
#[derive(Clone, Debug, Default)]
pub struct ExecutionSpec {
    pub command: Option<String>,
    pub script: Option<String>,
    pub shell: ShellPref,
    /// 脚本写入的目标路径；缺省时使用新生成的临时文件
    pub file_path: Option<PathBuf>,
    pub cwd: Option<PathBuf>,
    pub timeout_ms: u64,
}

/// 一次执行的结果；error 覆盖策略拒绝、启动失败与超时
#[derive(Clone, Debug, Default)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// stdout 与 stderr 合并为一段文本（stderr 以标记行分隔）
    pub fn combined_output(&self) -> String {
        let stdout = self.stdout.trim_end();
        let stderr = self.stderr.trim_end();
        if stderr.is_empty() {
            stdout.to_string()
        } else if stdout.is_empty() {
            format!("stderr: {stderr}")
        } else {
            format!("{stdout}\nstderr: {stderr}")
        }
    }
}
