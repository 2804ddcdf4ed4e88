//! 基础解释器路径上的安全规则表
//!
//! 有序的（模式 -> 动作）规则，按声明顺序逐条尝试，首个命中者生效：
//! 1. 裸 `start` 且目标为空/纯引号 —— 拒绝（会触发系统「找不到路径」弹窗）
//! 2. 前导路径分隔符 + 其余部分是 http(s) 地址 —— 拒绝并给出纠正后的地址
//! 3. 浏览器可见启动意图（地址 / 新窗口旗标 / 直接绝对路径）—— 改道为
//!    直接拉起浏览器进程（绕过解释器的引号陷阱与挂起）
//! 4. 两段式网络路径缺少共享段 —— 拒绝
//!
//! 这是针对手滑输入与弹窗陷阱的尽力而为防护，不是安全边界；
//! 操作者本就拥有这台机器的完全控制权。

use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;

/// 规则评估所需的外部配置（仅浏览器可执行文件覆盖）
#[derive(Debug, Default)]
pub struct SafetyContext {
    pub browser_override: Option<PathBuf>,
}

/// 改道直启浏览器所需的信息
#[derive(Clone, Debug)]
pub struct BrowserLaunch {
    pub exe: PathBuf,
    pub args: Vec<String>,
}

/// 规则命中后的动作
#[derive(Clone, Debug)]
pub enum SafetyAction {
    Allow,
    Reject { reason: String },
    LaunchBrowser(BrowserLaunch),
}

struct Rule {
    name: &'static str,
    apply: fn(&str, &SafetyContext) -> Option<SafetyAction>,
}

const RULES: &[Rule] = &[
    Rule {
        name: "bare-start-empty-target",
        apply: bare_start_empty_target,
    },
    Rule {
        name: "leading-separator-url",
        apply: leading_separator_url,
    },
    Rule {
        name: "browser-launch-divert",
        apply: browser_launch_divert,
    },
    Rule {
        name: "malformed-network-path",
        apply: malformed_network_path,
    },
];

/// 按序评估规则表；无命中则放行
pub fn normalize(command: &str, ctx: &SafetyContext) -> SafetyAction {
    for rule in RULES {
        if let Some(action) = (rule.apply)(command, ctx) {
            tracing::info!(rule = rule.name, command = %command, "safety rule matched");
            return action;
        }
    }
    SafetyAction::Allow
}

static BARE_START_RE: OnceLock<Regex> = OnceLock::new();

fn bare_start_empty_target(text: &str, _ctx: &SafetyContext) -> Option<SafetyAction> {
    let re = BARE_START_RE.get_or_init(|| {
        Regex::new(r#"(?i)^\s*start(?:\.exe)?(?:\s+(?:""|''))?\s*$"#).unwrap()
    });
    if re.is_match(text) {
        return Some(SafetyAction::Reject {
            reason: "Refusing to run 'start' with an empty target: it opens a \"path not found\" dialog on the host desktop instead of doing anything useful.".to_string(),
        });
    }
    None
}

fn leading_separator_url(text: &str, _ctx: &SafetyContext) -> Option<SafetyAction> {
    let trimmed = text.trim();
    let separators = trimmed
        .chars()
        .take_while(|c| *c == '\\' || *c == '/')
        .count();
    if !(1..=2).contains(&separators) {
        return None;
    }
    let rest = &trimmed[separators..];
    let lower = rest.to_lowercase();
    let is_url = (lower.starts_with("http://") && rest.len() > 7)
        || (lower.starts_with("https://") && rest.len() > 8);
    if is_url {
        return Some(SafetyAction::Reject {
            reason: format!(
                "'{trimmed}' looks like a web address with stray leading path separators, not a runnable path. Did you mean {rest}?"
            ),
        });
    }
    None
}

fn browser_launch_divert(text: &str, ctx: &SafetyContext) -> Option<SafetyAction> {
    let invocation = parse_browser_invocation(text)?;
    if !(invocation.has_address || invocation.has_window_flag || invocation.explicit_path.is_some())
    {
        return None;
    }
    let exe = invocation.explicit_path.clone().or_else(|| {
        crate::exec::browser::resolve_executable(
            &invocation.browser,
            ctx.browser_override.as_deref(),
        )
    });
    match exe {
        Some(exe) => Some(SafetyAction::LaunchBrowser(BrowserLaunch {
            exe,
            args: invocation.args,
        })),
        None => Some(SafetyAction::Reject {
            reason: format!(
                "Browser '{}' was not found in the standard install locations; set tools.browser_exe to its full path.",
                invocation.browser
            ),
        }),
    }
}

static NETWORK_PATH_RE: OnceLock<Regex> = OnceLock::new();

fn malformed_network_path(text: &str, _ctx: &SafetyContext) -> Option<SafetyAction> {
    let re = NETWORK_PATH_RE
        .get_or_init(|| Regex::new(r"^\\\\[^\\\s/]+\\?\s*$").unwrap());
    let trimmed = text.trim();
    if re.is_match(trimmed) {
        return Some(SafetyAction::Reject {
            reason: format!(
                "Network path '{trimmed}' is missing its share segment (expected \\\\server\\share); running it would only raise an OS dialog."
            ),
        });
    }
    None
}

/// 解析出的浏览器调用
#[derive(Clone, Debug)]
pub struct BrowserInvocation {
    /// 浏览器短名（chrome / msedge / firefox）
    pub browser: String,
    /// 命令里已经是绝对/带路径的可执行文件时，直接采用
    pub explicit_path: Option<PathBuf>,
    pub args: Vec<String>,
    pub has_address: bool,
    pub has_window_flag: bool,
}

const WINDOW_FLAGS: &[&str] = &[
    "--new-window",
    "-new-window",
    "--new-tab",
    "--incognito",
    "--inprivate",
];

/// 识别「拉起浏览器」的命令文本；非浏览器调用返回 None
pub fn parse_browser_invocation(text: &str) -> Option<BrowserInvocation> {
    let mut tokens = tokenize(text);
    if tokens.is_empty() {
        return None;
    }
    // `start [""] <target>` 前缀：剥掉启动指令与可选的空窗口标题
    if tokens[0].eq_ignore_ascii_case("start") || tokens[0].eq_ignore_ascii_case("start.exe") {
        tokens.remove(0);
        if tokens.first().map(|t| t.is_empty()).unwrap_or(false) {
            tokens.remove(0);
        }
    }
    let first = tokens.first()?.clone();
    let (browser, explicit_path) = classify_executable(&first)?;
    let args: Vec<String> = tokens[1..].to_vec();
    let has_address = args.iter().any(|a| {
        let lower = a.to_lowercase();
        lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("www.")
    });
    let has_window_flag = args
        .iter()
        .any(|a| WINDOW_FLAGS.contains(&a.to_lowercase().as_str()));
    Some(BrowserInvocation {
        browser,
        explicit_path,
        args,
        has_address,
        has_window_flag,
    })
}

/// 文本是否是一次浏览器可见启动（用于指纹分类，不做路径解析）
pub fn is_browser_launch(text: &str) -> bool {
    parse_browser_invocation(text)
        .map(|inv| inv.has_address || inv.has_window_flag || inv.explicit_path.is_some())
        .unwrap_or(false)
}

/// 首 token 是否为已知浏览器；返回（短名，可选的显式路径）
fn classify_executable(token: &str) -> Option<(String, Option<PathBuf>)> {
    let has_path = token.contains('\\') || token.contains('/');
    let basename = token
        .rsplit(['\\', '/'])
        .next()
        .unwrap_or(token)
        .to_lowercase();
    let stem = basename.strip_suffix(".exe").unwrap_or(&basename);
    let browser = match stem {
        "chrome" | "google-chrome" | "chromium" => "chrome",
        "msedge" => "msedge",
        "firefox" => "firefox",
        _ => return None,
    };
    let explicit = if has_path {
        Some(PathBuf::from(token))
    } else {
        None
    };
    Some((browser.to_string(), explicit))
}

/// 引号感知的简易分词（双引号/单引号内保留空白；`""` 产生空 token）
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut cur = String::new();
    let mut had_quote = false;
    let mut in_quote: Option<char> = None;
    for c in text.trim().chars() {
        match in_quote {
            Some(q) => {
                if c == q {
                    in_quote = None;
                } else {
                    cur.push(c);
                }
            }
            None => match c {
                '"' | '\'' => {
                    in_quote = Some(c);
                    had_quote = true;
                }
                c if c.is_whitespace() => {
                    if !cur.is_empty() || had_quote {
                        tokens.push(std::mem::take(&mut cur));
                        had_quote = false;
                    }
                }
                _ => cur.push(c),
            },
        }
    }
    if !cur.is_empty() || had_quote {
        tokens.push(cur);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> SafetyContext {
        SafetyContext::default()
    }

    #[test]
    fn test_rule_bare_start_rejected_without_spawn() {
        for input in ["start", "START", "start \"\"", "start ''", "  start  "] {
            match normalize(input, &ctx()) {
                SafetyAction::Reject { reason } => {
                    assert!(reason.contains("Refusing to run"), "input: {input}")
                }
                other => panic!("expected Reject for {input:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_rule_bare_start_with_real_target_allowed() {
        assert!(matches!(
            normalize("start notepad.exe", &ctx()),
            SafetyAction::Allow
        ));
    }

    #[test]
    fn test_rule_leading_separator_url_suggests_fix() {
        match normalize(r"\\https://example.com", &ctx()) {
            SafetyAction::Reject { reason } => {
                assert!(reason.contains("Did you mean https://example.com"));
            }
            other => panic!("expected Reject, got {other:?}"),
        }
        assert!(matches!(
            normalize("/http://a.test/x", &ctx()),
            SafetyAction::Reject { .. }
        ));
        assert!(matches!(
            normalize("//https://b.test", &ctx()),
            SafetyAction::Reject { .. }
        ));
    }

    #[test]
    fn test_rule_leading_separator_requires_url() {
        // 普通绝对路径不受影响
        assert!(matches!(
            normalize("/usr/bin/env ls", &ctx()),
            SafetyAction::Allow
        ));
    }

    #[test]
    fn test_rule_malformed_network_path_rejected() {
        for input in [r"\\fileserver", r"\\fileserver\"] {
            match normalize(input, &ctx()) {
                SafetyAction::Reject { reason } => assert!(reason.contains("share")),
                other => panic!("expected Reject for {input:?}, got {other:?}"),
            }
        }
        // 完整的 \\server\share 放行
        assert!(matches!(
            normalize(r"\\fileserver\public", &ctx()),
            SafetyAction::Allow
        ));
    }

    #[test]
    fn test_rule_browser_explicit_path_diverts() {
        let input = r#""C:\Program Files\Google\Chrome\Application\chrome.exe" --new-window https://example.com"#;
        match normalize(input, &ctx()) {
            SafetyAction::LaunchBrowser(launch) => {
                assert!(launch.exe.to_string_lossy().ends_with("chrome.exe"));
                assert!(launch.args.contains(&"--new-window".to_string()));
            }
            other => panic!("expected LaunchBrowser, got {other:?}"),
        }
    }

    #[test]
    fn test_rule_browser_bare_name_uses_override() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let ctx = SafetyContext {
            browser_override: Some(tmp.path().to_path_buf()),
        };
        match normalize("chrome https://example.com", &ctx) {
            SafetyAction::LaunchBrowser(launch) => {
                assert_eq!(launch.exe, tmp.path());
                assert_eq!(launch.args, vec!["https://example.com".to_string()]);
            }
            other => panic!("expected LaunchBrowser, got {other:?}"),
        }
    }

    #[test]
    fn test_browser_bare_name_without_intent_not_diverted() {
        // 没有地址/旗标/绝对路径：不判为可见启动
        assert!(!is_browser_launch("chrome"));
    }

    #[test]
    fn test_start_prefix_with_browser_detected() {
        let inv = parse_browser_invocation("start chrome https://example.com").unwrap();
        assert_eq!(inv.browser, "chrome");
        assert!(inv.has_address);

        let inv = parse_browser_invocation(r#"start "" msedge --new-window"#).unwrap();
        assert_eq!(inv.browser, "msedge");
        assert!(inv.has_window_flag);
    }

    #[test]
    fn test_is_browser_launch_classification() {
        assert!(is_browser_launch("firefox www.example.com"));
        assert!(is_browser_launch(r"C:\tools\firefox\firefox.exe"));
        assert!(!is_browser_launch("echo chrome is a browser"));
        assert!(!is_browser_launch("dir"));
    }

    #[test]
    fn test_plain_commands_allowed() {
        for input in ["dir", "ipconfig /all", "echo hello", "type notes.txt"] {
            assert!(
                matches!(normalize(input, &ctx()), SafetyAction::Allow),
                "input: {input}"
            );
        }
    }
}
