//! repair_dependencies 工具：修复浏览器桥的 Python 依赖
//!
//! pip 升级一次可能要跑几分钟，且重复跑没有意义：进程生命周期内
//! 「已尝试」守卫保证至多真正执行一次，之后的调用作为成功的空操作返回。

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::ToolOutcome;

/// 进程级「修复已尝试」守卫。可注入：测试各自构造，互不串扰。
#[derive(Debug, Default)]
pub struct RepairGuard {
    attempted: AtomicBool,
}

impl RepairGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// 声明本次要执行修复；返回 true 表示是本进程第一次
    pub fn claim(&self) -> bool {
        !self.attempted.swap(true, Ordering::SeqCst)
    }

    pub fn already_attempted(&self) -> bool {
        self.attempted.load(Ordering::SeqCst)
    }
}

/// 修复动作的执行报告
#[derive(Debug)]
pub struct RepairReport {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub output: String,
}

/// 用 pip 升级浏览器桥依赖；硬超时，超时杀进程
pub async fn run_pip_upgrade(
    python_exe: &str,
    packages: &[String],
    timeout: Duration,
) -> RepairReport {
    let mut cmd = tokio::process::Command::new(python_exe);
    cmd.arg("-m")
        .arg("pip")
        .arg("install")
        .arg("--upgrade")
        .args(packages)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::info!(python = python_exe, ?packages, "running dependency repair");

    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => {
            let mut text = String::from_utf8_lossy(&output.stdout).to_string();
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.trim().is_empty() {
                text.push_str("\nstderr: ");
                text.push_str(stderr.trim());
            }
            // 长输出只保留尾部，推理服务不需要整页 pip 日志
            let tail: String = text
                .lines()
                .rev()
                .take(20)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            RepairReport {
                success: output.status.success(),
                exit_code: output.status.code(),
                output: tail,
            }
        }
        Ok(Err(e)) => RepairReport {
            success: false,
            exit_code: None,
            output: format!("Failed to start '{python_exe}': {e}"),
        },
        Err(_) => RepairReport {
            success: false,
            exit_code: None,
            output: format!(
                "Dependency repair timed out after {}s and was terminated",
                timeout.as_secs()
            ),
        },
    }
}

/// repair_dependencies 的参数
#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RepairArgs {
    /// Why the repair is being requested (informational only).
    pub reason: Option<String>,
}

pub struct RepairTool {
    python_exe: String,
    packages: Vec<String>,
    timeout: Duration,
    guard: Arc<RepairGuard>,
}

impl RepairTool {
    pub fn new(
        python_exe: String,
        packages: Vec<String>,
        timeout_secs: u64,
        guard: Arc<RepairGuard>,
    ) -> Self {
        Self {
            python_exe,
            packages,
            timeout: Duration::from_secs(timeout_secs),
            guard,
        }
    }

    pub async fn run(&self, input: Value) -> ToolOutcome {
        let args: RepairArgs = match serde_json::from_value(input) {
            Ok(a) => a,
            Err(e) => {
                return ToolOutcome::err(format!(
                    "Invalid arguments for repair_dependencies: {e}"
                ))
            }
        };
        if let Some(reason) = &args.reason {
            tracing::info!(reason, "dependency repair requested");
        }

        if !self.guard.claim() {
            return ToolOutcome::ok(
                "Dependency repair was already attempted in this process; skipping.",
            )
            .with("skipped", true);
        }

        let report = run_pip_upgrade(&self.python_exe, &self.packages, self.timeout).await;
        let mut outcome = if report.success {
            ToolOutcome::ok(report.output)
        } else {
            ToolOutcome::err(report.output)
        };
        if let Some(code) = report.exit_code {
            outcome = outcome.with("exit_code", code);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_guard_claims_once() {
        let guard = RepairGuard::new();
        assert!(!guard.already_attempted());
        assert!(guard.claim());
        assert!(!guard.claim());
        assert!(guard.already_attempted());
    }

    #[tokio::test]
    async fn test_second_invocation_skips() {
        let guard = Arc::new(RepairGuard::new());
        guard.claim();
        let tool = RepairTool::new(
            "definitely-not-a-python".to_string(),
            vec!["browser-use".to_string()],
            5,
            guard,
        );
        let outcome = tool.run(json!({"reason": "test"})).await;
        assert!(outcome.success);
        assert!(outcome.output.unwrap().contains("skipping"));
        assert_eq!(outcome.extra.get("skipped"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_missing_python_reports_failure() {
        let tool = RepairTool::new(
            "definitely-not-a-python".to_string(),
            vec!["browser-use".to_string()],
            5,
            Arc::new(RepairGuard::new()),
        );
        let outcome = tool.run(json!({})).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("Failed to start"));
    }
}
