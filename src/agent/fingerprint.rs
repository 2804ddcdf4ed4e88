//! 副作用动作指纹
//!
//! 对高影响调用（浏览某个 URL、shell 命令拉起可见浏览器）取其语义关键
//! 字段构造字符串键；同一次运行里指纹相同且先前已成功的调用会被去重。
//! 非副作用调用没有指纹。

use serde_json::Value;

use crate::exec::safety::is_browser_launch;

/// 计算一次工具调用的指纹；None 表示该调用不参与去重
pub fn fingerprint_for(tool_name: &str, input: &Value) -> Option<String> {
    match tool_name {
        "browse_site" => {
            let url = input.get("url")?.as_str()?.trim().to_lowercase();
            let task = input
                .get("task")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .trim()
                .to_lowercase();
            Some(format!("browse|{url}|{task}"))
        }
        "run_command" => {
            let command = input.get("command").and_then(|v| v.as_str())?;
            if !is_browser_launch(command) {
                return None;
            }
            let normalized = command
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase();
            Some(format!("launch|{normalized}"))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_browse_fingerprint_over_url_and_task() {
        let a = fingerprint_for(
            "browse_site",
            &json!({"url": "https://example.com", "task": "Find the price"}),
        );
        let b = fingerprint_for(
            "browse_site",
            &json!({"url": "https://example.com", "task": "find the price", "max_steps": 10}),
        );
        // 大小写与无关字段不影响指纹
        assert_eq!(a, b);
        assert!(a.unwrap().starts_with("browse|"));
    }

    #[test]
    fn test_different_task_different_fingerprint() {
        let a = fingerprint_for("browse_site", &json!({"url": "https://example.com", "task": "a"}));
        let b = fingerprint_for("browse_site", &json!({"url": "https://example.com", "task": "b"}));
        assert_ne!(a, b);
    }

    #[test]
    fn test_browser_launch_command_fingerprinted() {
        let fp = fingerprint_for(
            "run_command",
            &json!({"command": "start  chrome   https://example.com"}),
        );
        assert_eq!(fp.as_deref(), Some("launch|start chrome https://example.com"));
    }

    #[test]
    fn test_ordinary_command_has_no_fingerprint() {
        assert!(fingerprint_for("run_command", &json!({"command": "dir"})).is_none());
        assert!(fingerprint_for("capture_screen", &json!({})).is_none());
        assert!(fingerprint_for("repair_dependencies", &json!({})).is_none());
    }
}
