//! Shell 族识别
//!
//! 未显式指定 shell 时按文本特征分类：含换行、`$变量`、cmdlet 风格的
//! 动词-名词 token（Get-* / Set-* / ... / Start-*）或管道喂给这类动词，
//! 判为结构化 shell（PowerShell）；否则用基础解释器（Windows 为 cmd，
//! 其它平台为 bash）。显式提示永远优先于启发式。

use std::sync::OnceLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;

/// 调用方给出的 shell 提示（工具参数 `shell` 的取值）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ShellPref {
    #[default]
    Auto,
    Cmd,
    Powershell,
    Bash,
}

/// 实际选定的解释器
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShellKind {
    Cmd,
    PowerShell,
    Bash,
}

impl ShellKind {
    /// 脚本文件扩展名
    pub fn script_extension(&self) -> &'static str {
        match self {
            ShellKind::Cmd => "cmd",
            ShellKind::PowerShell => "ps1",
            ShellKind::Bash => "sh",
        }
    }
}

static VARIABLE_RE: OnceLock<Regex> = OnceLock::new();
static CMDLET_RE: OnceLock<Regex> = OnceLock::new();
static PIPE_CMDLET_RE: OnceLock<Regex> = OnceLock::new();

const CMDLET_VERBS: &str = "Get|Set|New|Remove|Write|Select|Where|ForEach|Out|Format|Start";

fn variable_re() -> &'static Regex {
    VARIABLE_RE.get_or_init(|| Regex::new(r"\$[A-Za-z_][A-Za-z0-9_]*").unwrap())
}

fn cmdlet_re() -> &'static Regex {
    CMDLET_RE.get_or_init(|| {
        Regex::new(&format!(r"(?i)\b(?:{CMDLET_VERBS})-[A-Za-z]+\b")).unwrap()
    })
}

fn pipe_cmdlet_re() -> &'static Regex {
    PIPE_CMDLET_RE.get_or_init(|| {
        Regex::new(&format!(r"(?i)\|\s*(?:{CMDLET_VERBS})-[A-Za-z]+\b")).unwrap()
    })
}

/// 文本是否应交给结构化 shell
pub fn is_structured(text: &str) -> bool {
    text.contains('\n')
        || variable_re().is_match(text)
        || cmdlet_re().is_match(text)
        || pipe_cmdlet_re().is_match(text)
}

/// 结合显式提示与启发式，决定最终解释器
pub fn resolve(pref: ShellPref, text: &str) -> ShellKind {
    match pref {
        ShellPref::Cmd => ShellKind::Cmd,
        ShellPref::Powershell => ShellKind::PowerShell,
        ShellPref::Bash => ShellKind::Bash,
        ShellPref::Auto => {
            if is_structured(text) {
                ShellKind::PowerShell
            } else if cfg!(windows) {
                ShellKind::Cmd
            } else {
                ShellKind::Bash
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newline_and_cmdlet_selects_structured() {
        let text = "echo starting\nGet-Process | Sort-Object CPU";
        assert!(is_structured(text));
        assert_eq!(resolve(ShellPref::Auto, text), ShellKind::PowerShell);
    }

    #[test]
    fn test_variable_sigil_selects_structured() {
        assert!(is_structured("$env:PATH"));
        assert!(is_structured("echo $name"));
    }

    #[test]
    fn test_cmdlet_token_alone_selects_structured() {
        assert!(is_structured("Get-ChildItem C:\\Users"));
        assert!(is_structured("Start-Process notepad"));
    }

    #[test]
    fn test_pipe_into_cmdlet_selects_structured() {
        assert!(is_structured("tasklist | Select-String chrome"));
    }

    #[test]
    fn test_plain_command_is_basic() {
        assert!(!is_structured("dir C:\\Users"));
        assert!(!is_structured("ipconfig /all"));
        assert!(!is_structured("echo hello"));
    }

    #[test]
    fn test_explicit_hint_overrides_heuristic() {
        // 含 cmdlet token，但显式 cmd 提示优先
        assert_eq!(
            resolve(ShellPref::Cmd, "Get-Process"),
            ShellKind::Cmd
        );
        assert_eq!(resolve(ShellPref::Bash, "dir"), ShellKind::Bash);
        assert_eq!(
            resolve(ShellPref::Powershell, "echo hi"),
            ShellKind::PowerShell
        );
    }
}
