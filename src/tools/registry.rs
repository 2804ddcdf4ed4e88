//! 工具注册与分发
//!
//! 工具名是封闭集合（ToolName 枚举），按名分发穷举匹配，未知名走默认分支
//! 返回结构化错误而不是 panic。注册层不含业务逻辑，只保证结果统一成
//! ToolOutcome 信封，编排器总能把它序列化进 tool_result 记录。

use serde::Serialize;
use serde_json::{Map, Value};

use crate::tools::{BrowseTool, CameraTool, CommandTool, RepairTool, ScreenTool};

/// 已知工具名（封闭集合）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolName {
    RunCommand,
    CaptureScreen,
    CaptureCameraPhoto,
    BrowseSite,
    RepairDependencies,
}

impl ToolName {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "run_command" => Some(Self::RunCommand),
            "capture_screen" => Some(Self::CaptureScreen),
            "capture_camera_photo" => Some(Self::CaptureCameraPhoto),
            "browse_site" => Some(Self::BrowseSite),
            "repair_dependencies" => Some(Self::RepairDependencies),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunCommand => "run_command",
            Self::CaptureScreen => "capture_screen",
            Self::CaptureCameraPhoto => "capture_camera_photo",
            Self::BrowseSite => "browse_site",
            Self::RepairDependencies => "repair_dependencies",
        }
    }
}

/// 统一结果信封：success + 可选 output/error + 工具自有字段
#[derive(Clone, Debug, Serialize)]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ToolOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
            extra: Map::new(),
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            extra: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    /// 序列化为 tool_result 记录的 content 文本
    pub fn to_record_content(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"success":false,"error":"unserializable tool outcome"}"#.to_string()
        })
    }
}

/// 一次工具调用的环境（目前只有会话 id，用于把照片等产物回发给操作者）
#[derive(Clone, Copy, Debug)]
pub struct InvokeContext {
    pub chat_id: i64,
}

/// 工具路由：持有全部工具实例，按封闭枚举分发
pub struct ToolRouter {
    pub command: CommandTool,
    pub screen: ScreenTool,
    pub camera: CameraTool,
    pub browse: BrowseTool,
    pub repair: RepairTool,
}

impl ToolRouter {
    /// 分发一次调用；未知工具名返回结构化错误
    pub async fn invoke(&self, name: &str, input: Value, ctx: &InvokeContext) -> ToolOutcome {
        let Some(tool) = ToolName::parse(name) else {
            return ToolOutcome::err(format!("Unknown tool: {name}"));
        };
        match tool {
            ToolName::RunCommand => self.command.run(input).await,
            ToolName::CaptureScreen => self.screen.run(input, ctx).await,
            ToolName::CaptureCameraPhoto => self.camera.run(input, ctx).await,
            ToolName::BrowseSite => self.browse.run(input, ctx).await,
            ToolName::RepairDependencies => self.repair.run(input).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_name_round_trip() {
        for name in [
            "run_command",
            "capture_screen",
            "capture_camera_photo",
            "browse_site",
            "repair_dependencies",
        ] {
            assert_eq!(ToolName::parse(name).unwrap().as_str(), name);
        }
        assert!(ToolName::parse("shutdown_machine").is_none());
    }

    #[test]
    fn test_outcome_envelope_serialization() {
        let outcome = ToolOutcome::ok("done").with("file_path", "/tmp/x.png");
        let v: Value = serde_json::from_str(&outcome.to_record_content()).unwrap();
        assert_eq!(v["success"], true);
        assert_eq!(v["output"], "done");
        assert_eq!(v["file_path"], "/tmp/x.png");
        assert!(v.get("error").is_none());
    }
}
