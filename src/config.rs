//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `WASP__*` 覆盖（双下划线表示嵌套，
//! 如 `WASP__AGENT__MAX_ITERATIONS=5`）。API 密钥不进配置文件，直接读环境变量
//! （ANTHROPIC_API_KEY / TELEGRAM_BOT_TOKEN / OPENAI_API_KEY）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::agent::RunPolicy;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub tools: ToolsSection,
    pub telegram: TelegramSection,
}

/// [app] 段：应用名、数据目录、历史长度上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 截图、照片、下载附件的落盘目录
    pub data_dir: PathBuf,
    /// 每会话保留的协议消息条数上限（超出丢弃最旧）
    pub max_history_messages: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            data_dir: PathBuf::from("data"),
            max_history_messages: 40,
        }
    }
}

/// [llm] 段：推理服务的模型与请求参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub model: String,
    pub base_url: Option<String>,
    pub max_tokens: u32,
    /// 扩展思考开关；服务端拒绝时该次调用自动回退标准模式
    pub extended_thinking: bool,
    pub thinking_budget_tokens: u32,
    pub request_timeout_secs: u64,
    pub transcription: TranscriptionSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            base_url: None,
            max_tokens: 8192,
            extended_thinking: false,
            thinking_budget_tokens: 4096,
            request_timeout_secs: 180,
            transcription: TranscriptionSection::default(),
        }
    }
}

/// [llm.transcription] 段：语音转写端点
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscriptionSection {
    pub base_url: String,
    pub model: String,
}

impl Default for TranscriptionSection {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "whisper-1".to_string(),
        }
    }
}

/// [agent] 段：工具循环策略与系统提示词
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_iterations: usize,
    pub step_confirm: bool,
    pub stop_after_browse: bool,
    /// 系统提示词文件；缺省用内置提示词
    pub system_prompt_path: Option<PathBuf>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            step_confirm: false,
            stop_after_browse: false,
            system_prompt_path: None,
        }
    }
}

impl AgentSection {
    pub fn policy(&self) -> RunPolicy {
        RunPolicy {
            max_iterations: self.max_iterations,
            step_confirm: self.step_confirm,
            stop_after_browse: self.stop_after_browse,
        }
    }
}

/// [tools] 段：命令调度与各工具的可执行文件覆盖
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// run_command 的默认超时（毫秒）
    pub command_timeout_ms: u64,
    /// 浏览器拉起后的进程确认延迟（毫秒）
    pub launch_verify_delay_ms: u64,
    /// 浏览器可执行文件覆盖（绝对路径）
    pub browser_exe: Option<PathBuf>,
    pub powershell_exe: Option<String>,
    pub cmd_exe: Option<String>,
    pub bash_exe: Option<String>,
    pub ffmpeg_exe: Option<String>,
    /// 默认摄像头设备名
    pub camera_device: Option<String>,
    pub browse: BrowseSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            command_timeout_ms: 30_000,
            launch_verify_delay_ms: 1_500,
            browser_exe: None,
            powershell_exe: None,
            cmd_exe: None,
            bash_exe: None,
            ffmpeg_exe: None,
            camera_device: None,
            browse: BrowseSection::default(),
        }
    }
}

/// [tools.browse] 段：浏览器自动化桥
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowseSection {
    pub python_exe: String,
    pub runner_script: PathBuf,
    /// 单次浏览任务的硬超时（秒）
    pub timeout_secs: u64,
    /// 依赖修复要升级的包
    pub repair_packages: Vec<String>,
    pub repair_timeout_secs: u64,
}

impl Default for BrowseSection {
    fn default() -> Self {
        Self {
            python_exe: if cfg!(windows) { "python" } else { "python3" }.to_string(),
            runner_script: PathBuf::from("scripts/browser_use_runner.py"),
            timeout_secs: 300,
            repair_packages: vec!["browser-use".to_string()],
            repair_timeout_secs: 600,
        }
    }
}

/// [telegram] 段：长轮询与访问控制
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramSection {
    pub poll_timeout_secs: u64,
    /// 允许的会话 id；为空表示不限制
    pub allowed_chat_ids: Vec<i64>,
}

impl Default for TelegramSection {
    fn default() -> Self {
        Self {
            poll_timeout_secs: 50,
            allowed_chat_ids: Vec::new(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 WASP__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 WASP__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{name}.toml");
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("WASP")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.tools.command_timeout_ms, 30_000);
        assert_eq!(cfg.agent.max_iterations, 10);
        assert!(!cfg.agent.step_confirm);
        assert_eq!(cfg.app.max_history_messages, 40);
        assert_eq!(cfg.tools.browse.timeout_secs, 300);
    }

    #[test]
    fn test_policy_projection() {
        let section = AgentSection {
            max_iterations: 3,
            step_confirm: true,
            stop_after_browse: true,
            system_prompt_path: None,
        };
        let policy = section.policy();
        assert_eq!(policy.max_iterations, 3);
        assert!(policy.step_confirm);
        assert!(policy.stop_after_browse);
    }
}
