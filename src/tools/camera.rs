//! capture_camera_photo 工具：用 ffmpeg 从摄像头抓一帧并回发
//!
//! 设备名可能含空格，不能过 shell 引号，这里直接以参数数组拉起 ffmpeg。

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::{InvokeContext, ToolOutcome};
use crate::transport::MessageSink;

const CAPTURE_TIMEOUT: Duration = Duration::from_secs(20);

/// 输出图片格式
#[derive(Clone, Copy, Debug, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Jpg,
    Png,
}

impl ImageFormat {
    fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Jpg => "jpg",
            ImageFormat::Png => "png",
        }
    }
}

/// capture_camera_photo 的参数
#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CaptureCameraArgs {
    /// Capture device name (default: the configured camera).
    pub device_name: Option<String>,
    /// Frame width in pixels.
    pub width: Option<u32>,
    /// Frame height in pixels.
    pub height: Option<u32>,
    /// Capture frame rate.
    pub fps: Option<u32>,
    /// Image format: jpg or png (default jpg).
    pub format: ImageFormat,
    /// Where to save the photo (default: a timestamped file in the data directory).
    pub file_path: Option<String>,
    /// Caption to attach when the photo is sent back to the chat.
    pub caption: Option<String>,
}

pub struct CameraTool {
    ffmpeg_exe: String,
    default_device: Option<String>,
    output_dir: PathBuf,
    transport: Arc<dyn MessageSink>,
}

impl CameraTool {
    pub fn new(
        ffmpeg_exe: Option<String>,
        default_device: Option<String>,
        output_dir: PathBuf,
        transport: Arc<dyn MessageSink>,
    ) -> Self {
        Self {
            ffmpeg_exe: ffmpeg_exe.unwrap_or_else(|| "ffmpeg".to_string()),
            default_device,
            output_dir,
            transport,
        }
    }

    pub async fn run(&self, input: Value, ctx: &InvokeContext) -> ToolOutcome {
        let args: CaptureCameraArgs = match serde_json::from_value(input) {
            Ok(a) => a,
            Err(e) => {
                return ToolOutcome::err(format!(
                    "Invalid arguments for capture_camera_photo: {e}"
                ))
            }
        };

        let path = args.file_path.clone().map(PathBuf::from).unwrap_or_else(|| {
            self.output_dir.join(format!(
                "photo-{}.{}",
                chrono::Local::now().format("%Y%m%d-%H%M%S"),
                args.format.extension()
            ))
        });
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolOutcome::err(format!("Cannot create output directory: {e}"));
            }
        }

        let ffmpeg_args = self.ffmpeg_args(&args, &path);
        let mut cmd = tokio::process::Command::new(&self.ffmpeg_exe);
        cmd.args(&ffmpeg_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(CAPTURE_TIMEOUT, cmd.output()).await {
            Ok(Ok(o)) => o,
            Ok(Err(e)) => {
                return ToolOutcome::err(format!(
                    "Failed to start '{}': {e} (is ffmpeg installed?)",
                    self.ffmpeg_exe
                ))
            }
            Err(_) => {
                return ToolOutcome::err(format!(
                    "Camera capture timed out after {}s and was terminated",
                    CAPTURE_TIMEOUT.as_secs()
                ))
            }
        };

        if !output.status.success() || !path.exists() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(5)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            return ToolOutcome::err(format!("Camera capture failed: {tail}"));
        }

        let delivered = self
            .transport
            .send_photo(ctx.chat_id, &path, args.caption.as_deref())
            .await;

        ToolOutcome::ok("Camera photo captured")
            .with("file_path", path.to_string_lossy().to_string())
            .with("delivered", delivered)
    }

    /// 按平台组装 ffmpeg 参数（Windows 走 dshow，其它走 v4l2）
    fn ffmpeg_args(&self, args: &CaptureCameraArgs, path: &std::path::Path) -> Vec<String> {
        let mut out = vec!["-y".to_string()];
        if let (Some(w), Some(h)) = (args.width, args.height) {
            out.push("-video_size".to_string());
            out.push(format!("{w}x{h}"));
        }
        if let Some(fps) = args.fps {
            out.push("-framerate".to_string());
            out.push(fps.to_string());
        }
        if cfg!(windows) {
            let device = args
                .device_name
                .clone()
                .or_else(|| self.default_device.clone())
                .unwrap_or_else(|| "Integrated Camera".to_string());
            out.push("-f".to_string());
            out.push("dshow".to_string());
            out.push("-i".to_string());
            out.push(format!("video={device}"));
        } else {
            let device = args
                .device_name
                .clone()
                .or_else(|| self.default_device.clone())
                .unwrap_or_else(|| "/dev/video0".to_string());
            out.push("-f".to_string());
            out.push("v4l2".to_string());
            out.push("-i".to_string());
            out.push(device);
        }
        out.push("-frames:v".to_string());
        out.push("1".to_string());
        out.push(path.to_string_lossy().to_string());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::NullSink;

    fn tool() -> CameraTool {
        CameraTool::new(
            None,
            Some("TestCam".to_string()),
            PathBuf::from("/tmp"),
            Arc::new(NullSink),
        )
    }

    #[test]
    fn test_ffmpeg_args_include_device_and_single_frame() {
        let args = CaptureCameraArgs {
            width: Some(1280),
            height: Some(720),
            fps: Some(30),
            ..Default::default()
        };
        let v = tool().ffmpeg_args(&args, std::path::Path::new("/tmp/p.jpg"));
        assert!(v.contains(&"-frames:v".to_string()));
        assert!(v.contains(&"1280x720".to_string()));
        if cfg!(windows) {
            assert!(v.contains(&"video=TestCam".to_string()));
        } else {
            assert!(v.contains(&"TestCam".to_string()));
        }
    }

    #[test]
    fn test_format_extension() {
        assert_eq!(ImageFormat::Jpg.extension(), "jpg");
        assert_eq!(ImageFormat::Png.extension(), "png");
    }
}
