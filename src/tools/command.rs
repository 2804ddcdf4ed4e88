//! run_command 工具：把请求参数规整为 ExecutionSpec，交给命令调度器

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::exec::{CommandDispatcher, ExecutionSpec, ShellPref};
use crate::tools::ToolOutcome;

/// run_command 的参数
#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RunCommandArgs {
    /// Single-line command text to run. Prefer this over 'script' for one-liners.
    pub command: Option<String>,
    /// Multi-line script text; it is written to a file and executed.
    pub script: Option<String>,
    /// Shell to use. 'auto' detects PowerShell-style input; explicit values always win.
    pub shell: ShellPref,
    /// Optional path to write the script to (default: a fresh temp file).
    pub file_path: Option<String>,
    /// Timeout in milliseconds (default 30000). The process is killed on expiry.
    pub timeout_ms: Option<u64>,
    /// Working directory for the command.
    pub cwd: Option<String>,
    /// Force the structured shell (PowerShell), equivalent to shell="powershell".
    pub use_structured_shell: Option<bool>,
}

pub struct CommandTool {
    dispatcher: Arc<CommandDispatcher>,
    default_timeout_ms: u64,
}

impl CommandTool {
    pub fn new(dispatcher: Arc<CommandDispatcher>, default_timeout_ms: u64) -> Self {
        Self {
            dispatcher,
            default_timeout_ms,
        }
    }

    pub async fn run(&self, input: Value) -> ToolOutcome {
        let args: RunCommandArgs = match serde_json::from_value(input) {
            Ok(a) => a,
            Err(e) => return ToolOutcome::err(format!("Invalid arguments for run_command: {e}")),
        };

        // command 与 script 同时给出时优先 command
        let (command, script) = match (args.command, args.script) {
            (Some(c), _) if !c.trim().is_empty() => (Some(c), None),
            (_, Some(s)) if !s.trim().is_empty() => (None, Some(s)),
            _ => return ToolOutcome::err("Provide 'command' or 'script' to run"),
        };

        let shell = if args.use_structured_shell == Some(true) {
            ShellPref::Powershell
        } else {
            args.shell
        };

        let spec = ExecutionSpec {
            command,
            script,
            shell,
            file_path: args.file_path.map(Into::into),
            cwd: args.cwd.map(Into::into),
            timeout_ms: args.timeout_ms.unwrap_or(self.default_timeout_ms),
        };

        let result = self.dispatcher.execute(&spec).await;

        let output = {
            let combined = result.combined_output();
            if combined.is_empty() && result.success {
                "(no output)".to_string()
            } else {
                combined
            }
        };
        let error = result.error.clone().or_else(|| {
            if result.success {
                None
            } else {
                Some(match result.exit_code {
                    Some(code) => format!("Exit code {code}"),
                    None => "Process terminated without exit code".to_string(),
                })
            }
        });

        let mut outcome = ToolOutcome {
            success: result.success,
            output: Some(output),
            error,
            extra: serde_json::Map::new(),
        };
        if let Some(code) = result.exit_code {
            outcome = outcome.with("exit_code", code);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool() -> CommandTool {
        CommandTool::new(Arc::new(CommandDispatcher::default()), 30_000)
    }

    #[tokio::test]
    async fn test_missing_command_and_script() {
        let outcome = tool().run(json!({})).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("command"));
    }

    #[tokio::test]
    async fn test_start_scenario_refused() {
        let outcome = tool()
            .run(json!({"command": "start", "shell": "cmd"}))
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("Refusing to run"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_preferred_over_script() {
        let outcome = tool()
            .run(json!({
                "command": "echo from-command",
                "script": "echo from-script",
                "shell": "bash"
            }))
            .await;
        assert!(outcome.success);
        assert!(outcome.output.unwrap().contains("from-command"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_use_structured_shell_forces_powershell() {
        // pwsh 通常不存在：能观测到的是「启动 pwsh 失败」而不是 bash 成功
        let outcome = tool()
            .run(json!({
                "command": "echo hi",
                "shell": "bash",
                "use_structured_shell": true
            }))
            .await;
        if !outcome.success {
            assert!(outcome.error.unwrap().contains("pwsh"));
        }
    }
}
