//! browse_site 工具：驱动外部浏览器自动化桥
//!
//! 桥是一个独立的 Python 进程：stdin 收 JSON 任务，stdout 回 JSON 结果
//! （stdout 保证只有 JSON）。"module not found" 与 "browser disconnected"
//! 视为可恢复：各自做一次补救（依赖修复 / 换新进程）后重试一次。

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;

use crate::core::AgentError;
use crate::tools::repair::{run_pip_upgrade, RepairGuard};
use crate::tools::{InvokeContext, ToolOutcome};
use crate::transport::MessageSink;

/// 浏览器桥内部使用的 LLM 提供方
#[derive(Clone, Copy, Debug, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Openai,
    Anthropic,
}

impl LlmProvider {
    fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::Openai => "openai",
            LlmProvider::Anthropic => "anthropic",
        }
    }
}

/// browse_site 的参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct BrowseSiteArgs {
    /// Target address; only http/https URLs are accepted.
    pub url: String,
    /// What to do on the site (default: summarize the page).
    #[serde(default)]
    pub task: Option<String>,
    /// Maximum agent steps (default 25).
    #[serde(default)]
    pub max_steps: Option<u32>,
    /// Run the browser headless (default true).
    #[serde(default)]
    pub headless: Option<bool>,
    /// Let the browsing agent look at page screenshots.
    #[serde(default)]
    pub use_vision: Option<bool>,
    /// LLM provider for the browsing agent: openai or anthropic.
    #[serde(default)]
    pub llm_provider: Option<LlmProvider>,
    /// Model name for the browsing agent.
    #[serde(default)]
    pub llm_model: Option<String>,
    /// Take a final screenshot and send it to the chat.
    #[serde(default)]
    pub screenshot: Option<bool>,
    /// Capture the full page instead of the viewport.
    #[serde(default)]
    pub full_page: Option<bool>,
    /// Caption for the screenshot message.
    #[serde(default)]
    pub caption: Option<String>,
}

/// 桥进程 stdout 的结果 JSON
#[derive(Debug, Deserialize)]
struct BridgeResult {
    #[serde(default)]
    success: bool,
    final_result: Option<String>,
    error: Option<String>,
    screenshot_path: Option<String>,
}

pub struct BrowseTool {
    python_exe: String,
    runner_script: PathBuf,
    output_dir: PathBuf,
    timeout: Duration,
    repair_packages: Vec<String>,
    repair_timeout: Duration,
    guard: Arc<RepairGuard>,
    transport: Arc<dyn MessageSink>,
}

impl BrowseTool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        python_exe: String,
        runner_script: PathBuf,
        output_dir: PathBuf,
        timeout_secs: u64,
        repair_packages: Vec<String>,
        repair_timeout_secs: u64,
        guard: Arc<RepairGuard>,
        transport: Arc<dyn MessageSink>,
    ) -> Self {
        Self {
            python_exe,
            runner_script,
            output_dir,
            timeout: Duration::from_secs(timeout_secs),
            repair_packages,
            repair_timeout: Duration::from_secs(repair_timeout_secs),
            guard,
            transport,
        }
    }

    pub async fn run(&self, input: Value, ctx: &InvokeContext) -> ToolOutcome {
        let args: BrowseSiteArgs = match serde_json::from_value(input) {
            Ok(a) => a,
            Err(e) => return ToolOutcome::err(format!("Invalid arguments for browse_site: {e}")),
        };

        let url = args.url.trim();
        let lower = url.to_lowercase();
        if !(lower.starts_with("http://") || lower.starts_with("https://")) {
            return ToolOutcome::err(format!(
                "Only http/https URLs can be browsed, got '{url}'"
            ));
        }

        let payload = self.payload(&args, url);

        // 第一次尝试；可恢复错误做补救后重试一次
        let first = self.run_bridge(&payload).await;
        let result = match classify_recoverable(&first) {
            Some(Recoverable::MissingModule) => {
                if self.guard.claim() {
                    let report = run_pip_upgrade(
                        &self.python_exe,
                        &self.repair_packages,
                        self.repair_timeout,
                    )
                    .await;
                    tracing::info!(success = report.success, "bridge dependency repair finished");
                } else {
                    tracing::info!("bridge dependency repair already attempted, retrying as-is");
                }
                self.run_bridge(&payload).await
            }
            Some(Recoverable::BrowserDisconnected) => {
                tracing::warn!("browser disconnected, retrying with a fresh bridge process");
                self.run_bridge(&payload).await
            }
            None => first,
        };

        match result {
            Ok(bridge) => {
                let mut outcome = if bridge.success {
                    ToolOutcome::ok(
                        bridge
                            .final_result
                            .clone()
                            .unwrap_or_else(|| "Browsing finished.".to_string()),
                    )
                } else {
                    ToolOutcome::err(
                        bridge
                            .error
                            .clone()
                            .unwrap_or_else(|| "Browsing failed without detail".to_string()),
                    )
                };
                if let Some(shot) = &bridge.screenshot_path {
                    let path = PathBuf::from(shot);
                    if path.exists() {
                        let delivered = self
                            .transport
                            .send_photo(ctx.chat_id, &path, args.caption.as_deref())
                            .await;
                        outcome = outcome.with("delivered", delivered);
                    }
                    outcome = outcome.with("screenshot_path", shot.clone());
                }
                outcome
            }
            Err(e) => ToolOutcome::err(e.to_string()),
        }
    }

    fn payload(&self, args: &BrowseSiteArgs, url: &str) -> Value {
        let task = match args.task.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => format!("Go to {url} and then: {t}"),
            _ => format!("Go to {url} and summarize what the page shows."),
        };
        json!({
            "task": task,
            "llm_provider": args.llm_provider.unwrap_or_default().as_str(),
            "llm_model": args.llm_model.clone().unwrap_or_default(),
            "max_steps": args.max_steps.unwrap_or(25),
            "headless": args.headless.unwrap_or(true),
            "use_vision": args.use_vision.unwrap_or(false),
            "screenshot": args.screenshot.unwrap_or(false),
            "screenshot_full_page": args.full_page.unwrap_or(false),
            "output_dir": self.output_dir.to_string_lossy(),
        })
    }

    /// 拉起一个新的桥进程：stdin 写任务 JSON，stdout 读结果 JSON
    async fn run_bridge(&self, payload: &Value) -> Result<BridgeResult, AgentError> {
        let mut cmd = tokio::process::Command::new(&self.python_exe);
        cmd.arg(&self.runner_script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| AgentError::BridgeError(format!("cannot start bridge: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(payload.to_string().as_bytes())
                .await
                .map_err(|e| AgentError::BridgeError(format!("cannot write task: {e}")))?;
            // drop 关闭 stdin，桥才会开始读
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                AgentError::ToolTimeout(format!(
                    "browser bridge timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| AgentError::BridgeError(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let preview: String = stderr.chars().take(300).collect();
            return Err(AgentError::BridgeError(format!(
                "bridge produced no output: {preview}"
            )));
        }
        serde_json::from_str(trimmed).map_err(|e| {
            let preview: String = trimmed.chars().take(200).collect();
            AgentError::ProtocolError(format!("bridge returned non-JSON output: {e}: {preview}"))
        })
    }
}

enum Recoverable {
    MissingModule,
    BrowserDisconnected,
}

/// 桥的失败是否可恢复（可恢复 -> 补救后重试一次）
fn classify_recoverable(result: &Result<BridgeResult, AgentError>) -> Option<Recoverable> {
    let text = match result {
        Ok(r) if !r.success => r.error.clone().unwrap_or_default(),
        Err(e) => e.to_string(),
        Ok(_) => return None,
    };
    let lower = text.to_lowercase();
    if lower.contains("module not found") || lower.contains("modulenotfounderror") {
        Some(Recoverable::MissingModule)
    } else if lower.contains("browser disconnected") {
        Some(Recoverable::BrowserDisconnected)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::NullSink;
    use serde_json::json;

    fn tool(python_exe: &str, runner: &std::path::Path) -> BrowseTool {
        BrowseTool::new(
            python_exe.to_string(),
            runner.to_path_buf(),
            PathBuf::from("/tmp"),
            10,
            vec!["browser-use".to_string()],
            5,
            Arc::new(RepairGuard::new()),
            Arc::new(NullSink),
        )
    }

    #[tokio::test]
    async fn test_non_http_url_rejected() {
        let outcome = tool("python", std::path::Path::new("/nonexistent.py"))
            .run(json!({"url": "file:///etc/passwd"}), &InvokeContext { chat_id: 1 })
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("http"));
    }

    #[test]
    fn test_payload_defaults_match_bridge_contract() {
        let t = tool("python", std::path::Path::new("/r.py"));
        let args: BrowseSiteArgs =
            serde_json::from_value(json!({"url": "https://example.com"})).unwrap();
        let payload = t.payload(&args, "https://example.com");
        assert_eq!(payload["max_steps"], 25);
        assert_eq!(payload["headless"], true);
        assert_eq!(payload["llm_provider"], "openai");
        assert!(payload["task"]
            .as_str()
            .unwrap()
            .contains("https://example.com"));
    }

    #[test]
    fn test_classify_recoverable_substrings() {
        let missing: Result<BridgeResult, AgentError> = Ok(BridgeResult {
            success: false,
            final_result: None,
            error: Some("ModuleNotFoundError: No module named 'browser_use'".to_string()),
            screenshot_path: None,
        });
        assert!(matches!(
            classify_recoverable(&missing),
            Some(Recoverable::MissingModule)
        ));

        let disconnected: Result<BridgeResult, AgentError> =
            Err(AgentError::BridgeError("Browser disconnected mid-run".to_string()));
        assert!(matches!(
            classify_recoverable(&disconnected),
            Some(Recoverable::BrowserDisconnected)
        ));

        let ok: Result<BridgeResult, AgentError> = Ok(BridgeResult {
            success: true,
            final_result: Some("done".to_string()),
            error: None,
            screenshot_path: None,
        });
        assert!(classify_recoverable(&ok).is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bridge_stub_round_trip() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let stub = dir.path().join("stub.sh");
        std::fs::write(
            &stub,
            "#!/bin/sh\ncat > /dev/null\necho '{\"success\": true, \"final_result\": \"stub ok\"}'\n",
        )
        .unwrap();
        std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();

        // python_exe 指向 stub，runner 路径成为其第一个参数（被忽略）
        let outcome = tool(stub.to_str().unwrap(), std::path::Path::new("/ignored.py"))
            .run(
                json!({"url": "https://example.com", "task": "read the title"}),
                &InvokeContext { chat_id: 1 },
            )
            .await;
        assert!(outcome.success, "error: {:?}", outcome.error);
        assert_eq!(outcome.output.unwrap(), "stub ok");
    }
}
