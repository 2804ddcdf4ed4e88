//! 浏览器可执行文件解析与可见启动
//!
//! 裸的浏览器名经常不在 PATH 里，经解释器启动还会遇到引号陷阱与挂起，
//! 所以：按固定的标准安装位置（加配置覆盖）解析出绝对路径，直接以
//! 游离进程拉起，再在固定短延迟后查进程表确认确实启动。
//! 解析结果进程内记忆化（只增不删，竞争重算无害）。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use crate::exec::safety::BrowserLaunch;
use crate::exec::ExecutionResult;

static RESOLVED: OnceLock<Mutex<HashMap<String, PathBuf>>> = OnceLock::new();

fn cache() -> &'static Mutex<HashMap<String, PathBuf>> {
    RESOLVED.get_or_init(|| Mutex::new(HashMap::new()))
}

/// 候选安装位置：Windows 标准目录在前，其它平台路径断后
fn candidate_paths(browser: &str) -> Vec<PathBuf> {
    let program_files = std::env::var("ProgramFiles").unwrap_or_else(|_| r"C:\Program Files".to_string());
    let program_files_x86 = std::env::var("ProgramFiles(x86)")
        .unwrap_or_else(|_| r"C:\Program Files (x86)".to_string());
    let local_app_data = std::env::var("LOCALAPPDATA").unwrap_or_default();

    match browser {
        "chrome" => vec![
            PathBuf::from(format!(r"{program_files}\Google\Chrome\Application\chrome.exe")),
            PathBuf::from(format!(r"{program_files_x86}\Google\Chrome\Application\chrome.exe")),
            PathBuf::from(format!(r"{local_app_data}\Google\Chrome\Application\chrome.exe")),
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/chromium"),
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
        ],
        "msedge" => vec![
            PathBuf::from(format!(r"{program_files_x86}\Microsoft\Edge\Application\msedge.exe")),
            PathBuf::from(format!(r"{program_files}\Microsoft\Edge\Application\msedge.exe")),
            PathBuf::from("/usr/bin/microsoft-edge"),
        ],
        "firefox" => vec![
            PathBuf::from(format!(r"{program_files}\Mozilla Firefox\firefox.exe")),
            PathBuf::from(format!(r"{program_files_x86}\Mozilla Firefox\firefox.exe")),
            PathBuf::from("/usr/bin/firefox"),
            PathBuf::from("/Applications/Firefox.app/Contents/MacOS/firefox"),
        ],
        _ => Vec::new(),
    }
}

/// 解析浏览器短名到绝对路径；配置覆盖优先，其后查标准位置，命中即记忆
pub fn resolve_executable(browser: &str, override_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = override_path {
        return Some(p.to_path_buf());
    }
    if let Some(hit) = cache()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .get(browser)
    {
        return Some(hit.clone());
    }
    let found = candidate_paths(browser).into_iter().find(|p| p.exists())?;
    cache()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert(browser.to_string(), found.clone());
    Some(found)
}

/// 游离进程拉起浏览器，短延迟后查进程表确认
pub async fn launch_and_verify(launch: &BrowserLaunch, verify_delay_ms: u64) -> ExecutionResult {
    let mut cmd = tokio::process::Command::new(&launch.exe);
    cmd.args(&launch.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    // 不持有句柄、不 kill_on_drop：浏览器归用户桌面所有，调度器不管它的生死
    let spawned = cmd.spawn();
    let child = match spawned {
        Ok(c) => c,
        Err(e) => {
            return ExecutionResult::failure(format!(
                "Failed to launch browser '{}': {e}",
                launch.exe.display()
            ))
        }
    };
    drop(child);

    tokio::time::sleep(Duration::from_millis(verify_delay_ms)).await;

    let stem = launch
        .exe
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if stem.is_empty() {
        return ExecutionResult::failure("Browser executable has no file name to verify against");
    }

    let mut sys = sysinfo::System::new();
    sys.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
    let running = sys
        .processes()
        .values()
        .any(|p| p.name().to_string_lossy().to_lowercase().starts_with(&stem));

    if running {
        ExecutionResult {
            success: true,
            stdout: format!("Launched {} and verified it is running.", launch.exe.display()),
            ..Default::default()
        }
    } else {
        ExecutionResult::failure(format!(
            "Browser '{}' was spawned but no matching process appeared within {verify_delay_ms}ms",
            launch.exe.display()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_wins_without_existence_check() {
        let p = Path::new("/nonexistent/browser.exe");
        assert_eq!(
            resolve_executable("chrome", Some(p)),
            Some(p.to_path_buf())
        );
    }

    #[test]
    fn test_unknown_browser_has_no_candidates() {
        assert!(resolve_executable("netscape", None).is_none());
    }

    #[tokio::test]
    async fn test_launch_missing_executable_reports_failure() {
        let launch = BrowserLaunch {
            exe: PathBuf::from("/nonexistent/chrome"),
            args: vec![],
        };
        let result = launch_and_verify(&launch, 10).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Failed to launch"));
    }
}
