//! capture_screen 工具：截取整个虚拟屏幕并把图片回发给操作者
//!
//! 栅格化交给平台自带的截屏手段（Windows 用 PowerShell 的 CopyFromScreen，
//! macOS 用 screencapture，Linux 用 gnome-screenshot），经命令调度器执行。

use std::path::PathBuf;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::exec::{CommandDispatcher, ExecutionSpec, ShellPref};
use crate::tools::{InvokeContext, ToolOutcome};
use crate::transport::MessageSink;

const CAPTURE_TIMEOUT_MS: u64 = 15_000;

/// capture_screen 的参数
#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CaptureScreenArgs {
    /// Caption to attach when the screenshot is sent back to the chat.
    pub caption: Option<String>,
    /// Where to save the image (default: a timestamped file in the data directory).
    pub file_path: Option<String>,
}

pub struct ScreenTool {
    dispatcher: Arc<CommandDispatcher>,
    output_dir: PathBuf,
    transport: Arc<dyn MessageSink>,
}

impl ScreenTool {
    pub fn new(
        dispatcher: Arc<CommandDispatcher>,
        output_dir: PathBuf,
        transport: Arc<dyn MessageSink>,
    ) -> Self {
        Self {
            dispatcher,
            output_dir,
            transport,
        }
    }

    pub async fn run(&self, input: Value, ctx: &InvokeContext) -> ToolOutcome {
        let args: CaptureScreenArgs = match serde_json::from_value(input) {
            Ok(a) => a,
            Err(e) => {
                return ToolOutcome::err(format!("Invalid arguments for capture_screen: {e}"))
            }
        };

        let path = args.file_path.map(PathBuf::from).unwrap_or_else(|| {
            self.output_dir.join(format!(
                "screen-{}.png",
                chrono::Local::now().format("%Y%m%d-%H%M%S")
            ))
        });
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolOutcome::err(format!("Cannot create output directory: {e}"));
            }
        }

        let spec = capture_spec(&path);
        let result = self.dispatcher.execute(&spec).await;
        if !result.success {
            return ToolOutcome::err(format!(
                "Screen capture failed: {}",
                result
                    .error
                    .unwrap_or_else(|| result.stderr.trim().to_string())
            ));
        }
        if !path.exists() {
            return ToolOutcome::err("Screen capture ran but the image file was not created");
        }

        let delivered = self
            .transport
            .send_photo(ctx.chat_id, &path, args.caption.as_deref())
            .await;

        ToolOutcome::ok("Screenshot captured")
            .with("file_path", path.to_string_lossy().to_string())
            .with("delivered", delivered)
    }
}

/// 平台对应的截屏调用
fn capture_spec(path: &std::path::Path) -> ExecutionSpec {
    if cfg!(windows) {
        ExecutionSpec {
            script: Some(windows_capture_script(path)),
            shell: ShellPref::Powershell,
            timeout_ms: CAPTURE_TIMEOUT_MS,
            ..Default::default()
        }
    } else if cfg!(target_os = "macos") {
        ExecutionSpec {
            command: Some(format!("screencapture -x '{}'", path.display())),
            shell: ShellPref::Bash,
            timeout_ms: CAPTURE_TIMEOUT_MS,
            ..Default::default()
        }
    } else {
        ExecutionSpec {
            command: Some(format!("gnome-screenshot -f '{}'", path.display())),
            shell: ShellPref::Bash,
            timeout_ms: CAPTURE_TIMEOUT_MS,
            ..Default::default()
        }
    }
}

/// 整个虚拟屏幕（多显示器）的 CopyFromScreen 截屏脚本
fn windows_capture_script(path: &std::path::Path) -> String {
    let quoted = path.to_string_lossy().replace('\'', "''");
    format!(
        "Add-Type -AssemblyName System.Windows.Forms\n\
         Add-Type -AssemblyName System.Drawing\n\
         $bounds = [System.Windows.Forms.SystemInformation]::VirtualScreen\n\
         $bmp = New-Object System.Drawing.Bitmap $bounds.Width, $bounds.Height\n\
         $g = [System.Drawing.Graphics]::FromImage($bmp)\n\
         $g.CopyFromScreen($bounds.Location, [System.Drawing.Point]::Empty, $bounds.Size)\n\
         $bmp.Save('{quoted}', [System.Drawing.Imaging.ImageFormat]::Png)\n\
         $g.Dispose()\n\
         $bmp.Dispose()"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_script_escapes_single_quotes() {
        let script = windows_capture_script(std::path::Path::new(r"C:\it's\shot.png"));
        assert!(script.contains("it''s"));
        assert!(script.contains("CopyFromScreen"));
    }

    #[test]
    fn test_capture_spec_shell_choice() {
        let spec = capture_spec(std::path::Path::new("/tmp/x.png"));
        if cfg!(windows) {
            assert!(spec.script.is_some());
        } else {
            assert!(spec.command.is_some());
        }
    }
}
