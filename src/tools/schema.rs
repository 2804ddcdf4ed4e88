//! 暴露给推理服务的工具 schema（schemars 从参数结构体自动生成）
//!
//! 字段上的文档注释会成为 schema 里的参数说明，推理服务靠它们理解取值。

use serde_json::Value;

use crate::llm::ToolDefinition;
use crate::tools::browse::BrowseSiteArgs;
use crate::tools::camera::CaptureCameraArgs;
use crate::tools::command::RunCommandArgs;
use crate::tools::repair::RepairArgs;
use crate::tools::screen::CaptureScreenArgs;

fn schema_value<T: schemars::JsonSchema>() -> Value {
    let schema = schemars::gen::SchemaGenerator::default().into_root_schema_for::<T>();
    serde_json::to_value(schema).unwrap_or_else(|_| serde_json::json!({"type": "object"}))
}

/// 全部工具定义，顺序即呈现给推理服务的顺序
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "run_command".to_string(),
            description: "Run a shell command or a multi-line script on the host machine. \
                          Use 'command' for one-liners and 'script' for anything with multiple lines. \
                          Output, exit code and errors are returned."
                .to_string(),
            input_schema: schema_value::<RunCommandArgs>(),
        },
        ToolDefinition {
            name: "capture_screen".to_string(),
            description: "Capture a screenshot of the whole screen and send it to the operator's chat."
                .to_string(),
            input_schema: schema_value::<CaptureScreenArgs>(),
        },
        ToolDefinition {
            name: "capture_camera_photo".to_string(),
            description: "Take a single photo with the machine's camera and send it to the operator's chat."
                .to_string(),
            input_schema: schema_value::<CaptureCameraArgs>(),
        },
        ToolDefinition {
            name: "browse_site".to_string(),
            description: "Drive an automated browser agent to visit an http/https URL and perform a task there. \
                          Returns the agent's final result; can also send a page screenshot to the chat."
                .to_string(),
            input_schema: schema_value::<BrowseSiteArgs>(),
        },
        ToolDefinition {
            name: "repair_dependencies".to_string(),
            description: "Reinstall/upgrade the local dependencies of the browsing agent. \
                          Only useful when browse_site fails with a missing-module error."
                .to_string(),
            input_schema: schema_value::<RepairArgs>(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_tools_present_with_object_schemas() {
        let defs = tool_definitions();
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "run_command",
                "capture_screen",
                "capture_camera_photo",
                "browse_site",
                "repair_dependencies"
            ]
        );
        for def in &defs {
            assert!(!def.description.is_empty());
            assert!(def.input_schema.is_object(), "{}", def.name);
        }
    }

    #[test]
    fn test_run_command_schema_has_shell_enum() {
        let defs = tool_definitions();
        let run = defs.iter().find(|d| d.name == "run_command").unwrap();
        let text = run.input_schema.to_string();
        assert!(text.contains("powershell"));
        assert!(text.contains("timeout_ms"));
    }

    #[test]
    fn test_browse_schema_requires_url() {
        let defs = tool_definitions();
        let browse = defs.iter().find(|d| d.name == "browse_site").unwrap();
        let required = browse.input_schema["required"]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_str()).collect::<Vec<_>>())
            .unwrap_or_default();
        assert!(required.contains(&"url"));
    }
}
