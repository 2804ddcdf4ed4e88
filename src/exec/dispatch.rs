//! 命令调度器：execute(spec) -> ExecutionResult
//!
//! 选 shell、过安全规则（仅基础解释器的命令路径）、多行脚本落临时文件、
//! 带超时执行并捕获输出。所有失败折叠进结果，绝不向调用方抛错；
//! 超时通过 kill_on_drop 保证子进程在任何退出路径上都被终止。

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::exec::safety::{self, SafetyAction, SafetyContext};
use crate::exec::shell::{self, ShellKind};
use crate::exec::{browser, ExecutionResult, ExecutionSpec};

/// 解释器可执行文件覆盖与运行目录等，按调用读取配置而来
pub struct CommandDispatcher {
    browser_override: Option<std::path::PathBuf>,
    powershell_exe: Option<String>,
    cmd_exe: Option<String>,
    bash_exe: Option<String>,
    /// 临时脚本目录
    script_dir: std::path::PathBuf,
    /// 浏览器启动后的确认延迟
    launch_verify_delay_ms: u64,
}

impl CommandDispatcher {
    pub fn new(
        browser_override: Option<std::path::PathBuf>,
        powershell_exe: Option<String>,
        cmd_exe: Option<String>,
        bash_exe: Option<String>,
        script_dir: Option<std::path::PathBuf>,
        launch_verify_delay_ms: u64,
    ) -> Self {
        Self {
            browser_override,
            powershell_exe,
            cmd_exe,
            bash_exe,
            script_dir: script_dir.unwrap_or_else(std::env::temp_dir),
            launch_verify_delay_ms,
        }
    }

    /// 执行一次请求；command / script 必须恰有其一
    pub async fn execute(&self, spec: &ExecutionSpec) -> ExecutionResult {
        let start = Instant::now();

        let (text, script_mode) = match (&spec.command, &spec.script) {
            (Some(c), None) => (c.as_str(), false),
            (None, Some(s)) => (s.as_str(), true),
            (Some(_), Some(_)) => {
                return ExecutionResult::failure(
                    "Provide either 'command' or 'script', not both",
                )
            }
            (None, None) => {
                return ExecutionResult::failure("Provide 'command' or 'script' to run")
            }
        };
        if text.trim().is_empty() {
            return ExecutionResult::failure("Empty command");
        }

        let kind = shell::resolve(spec.shell, text);

        // 安全规则只挂在基础解释器的命令路径上：引号歧义在这里才会变成系统弹窗
        if !script_mode && kind == ShellKind::Cmd {
            let ctx = SafetyContext {
                browser_override: self.browser_override.clone(),
            };
            match safety::normalize(text, &ctx) {
                SafetyAction::Allow => {}
                SafetyAction::Reject { reason } => {
                    self.audit(kind, script_mode, false, "rejected", start);
                    return ExecutionResult::failure(reason);
                }
                SafetyAction::LaunchBrowser(launch) => {
                    let result =
                        browser::launch_and_verify(&launch, self.launch_verify_delay_ms).await;
                    self.audit(
                        kind,
                        script_mode,
                        result.success,
                        "browser-launch",
                        start,
                    );
                    return result;
                }
            }
        }

        // 脚本模式：写入调用方指定路径或新命名的临时文件
        let script_path = if script_mode {
            let path = match &spec.file_path {
                Some(p) => p.clone(),
                None => self.script_dir.join(format!(
                    "wasp-{}-{}.{}",
                    chrono::Local::now().format("%Y%m%d-%H%M%S"),
                    &uuid::Uuid::new_v4().simple().to_string()[..8],
                    kind.script_extension()
                )),
            };
            if let Err(e) = tokio::fs::write(&path, text).await {
                return ExecutionResult::failure(format!(
                    "Failed to write script file '{}': {e}",
                    path.display()
                ));
            }
            Some(path)
        } else {
            None
        };

        let (program, args) = self.interpreter_invocation(kind, text, script_path.as_deref());

        let mut cmd = tokio::process::Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // 超时丢弃 future 时由运行时杀掉子进程：任何退出路径都不留孤儿
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        let result = match timeout(Duration::from_millis(spec.timeout_ms), cmd.output()).await {
            Ok(Ok(output)) => ExecutionResult {
                success: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                exit_code: output.status.code(),
                error: None,
            },
            Ok(Err(e)) => {
                ExecutionResult::failure(format!("Failed to start '{program}': {e}"))
            }
            Err(_) => ExecutionResult::failure(format!(
                "Command timed out after {}ms and was terminated",
                spec.timeout_ms
            )),
        };

        let outcome = if result.error.is_some() {
            "error"
        } else if result.success {
            "ok"
        } else {
            "nonzero-exit"
        };
        self.audit(kind, script_mode, result.success, outcome, start);
        result
    }

    /// 每次调用输出一行结构化审计日志（JSON）
    fn audit(&self, kind: ShellKind, script_mode: bool, ok: bool, outcome: &str, start: Instant) {
        let audit = serde_json::json!({
            "event": "dispatch_audit",
            "shell": format!("{kind:?}"),
            "mode": if script_mode { "script" } else { "command" },
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
        });
        tracing::info!(audit = %audit.to_string(), "dispatch");
    }

    /// 组装解释器与参数；解释器路径可被配置覆盖
    fn interpreter_invocation(
        &self,
        kind: ShellKind,
        text: &str,
        script_path: Option<&std::path::Path>,
    ) -> (String, Vec<String>) {
        match kind {
            ShellKind::Cmd => {
                let exe = self.cmd_exe.clone().unwrap_or_else(|| "cmd".to_string());
                let arg = script_path
                    .map(|p| p.to_string_lossy().to_string())
                    .unwrap_or_else(|| text.to_string());
                (exe, vec!["/C".to_string(), arg])
            }
            ShellKind::PowerShell => {
                let exe = self.powershell_exe.clone().unwrap_or_else(|| {
                    if cfg!(windows) {
                        "powershell".to_string()
                    } else {
                        "pwsh".to_string()
                    }
                });
                let mut args = vec![
                    "-NoProfile".to_string(),
                    "-NonInteractive".to_string(),
                    "-ExecutionPolicy".to_string(),
                    "Bypass".to_string(),
                ];
                match script_path {
                    Some(p) => {
                        args.push("-File".to_string());
                        args.push(p.to_string_lossy().to_string());
                    }
                    None => {
                        args.push("-Command".to_string());
                        args.push(text.to_string());
                    }
                }
                (exe, args)
            }
            ShellKind::Bash => {
                let exe = self.bash_exe.clone().unwrap_or_else(|| "bash".to_string());
                match script_path {
                    Some(p) => (exe, vec![p.to_string_lossy().to_string()]),
                    None => (exe, vec!["-c".to_string(), text.to_string()]),
                }
            }
        }
    }
}

impl Default for CommandDispatcher {
    fn default() -> Self {
        Self::new(None, None, None, None, None, 1500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ShellPref;

    fn spec_command(text: &str, shell: ShellPref, timeout_ms: u64) -> ExecutionSpec {
        ExecutionSpec {
            command: Some(text.to_string()),
            shell,
            timeout_ms,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_missing_input_is_captured() {
        let d = CommandDispatcher::default();
        let result = d.execute(&ExecutionSpec::default()).await;
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_bare_start_rejected_without_spawn() {
        let d = CommandDispatcher::default();
        let result = d
            .execute(&spec_command("start", ShellPref::Cmd, 5_000))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Refusing to run"));
        // 未曾执行：没有退出码
        assert_eq!(result.exit_code, None);
    }

    #[tokio::test]
    async fn test_leading_separator_url_rejected_with_suggestion() {
        let d = CommandDispatcher::default();
        let result = d
            .execute(&spec_command(r"\\https://example.com", ShellPref::Cmd, 5_000))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("https://example.com"));
        assert_eq!(result.exit_code, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_command_captures_stdout() {
        let d = CommandDispatcher::default();
        let result = d
            .execute(&spec_command("echo hello", ShellPref::Bash, 5_000))
            .await;
        assert!(result.success, "error: {:?}", result.error);
        assert!(result.stdout.contains("hello"));
        assert_eq!(result.exit_code, Some(0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_not_success() {
        let d = CommandDispatcher::default();
        let result = d
            .execute(&spec_command("exit 3", ShellPref::Bash, 5_000))
            .await;
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(3));
        assert!(result.error.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_terminates_child() {
        let d = CommandDispatcher::default();
        let started = Instant::now();
        let result = d
            .execute(&spec_command("sleep 30", ShellPref::Bash, 300))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_script_mode_writes_file_and_runs() {
        let dir = tempfile::tempdir().unwrap();
        let d = CommandDispatcher::new(
            None,
            None,
            None,
            None,
            Some(dir.path().to_path_buf()),
            1500,
        );
        let result = d
            .execute(&ExecutionSpec {
                script: Some("echo one\necho two".to_string()),
                shell: ShellPref::Bash,
                timeout_ms: 5_000,
                ..Default::default()
            })
            .await;
        assert!(result.success, "error: {:?}", result.error);
        assert!(result.stdout.contains("one"));
        assert!(result.stdout.contains("two"));
        // 临时脚本落在指定目录且带 shell 对应扩展名
        let wrote: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert!(wrote.iter().any(|n| n.starts_with("wasp-") && n.ends_with(".sh")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cwd_is_honored() {
        let dir = tempfile::tempdir().unwrap();
        let d = CommandDispatcher::default();
        let result = d
            .execute(&ExecutionSpec {
                command: Some("pwd".to_string()),
                shell: ShellPref::Bash,
                cwd: Some(dir.path().to_path_buf()),
                timeout_ms: 5_000,
                ..Default::default()
            })
            .await;
        assert!(result.success);
        assert!(result
            .stdout
            .trim()
            .ends_with(dir.path().file_name().unwrap().to_str().unwrap()));
    }
}
