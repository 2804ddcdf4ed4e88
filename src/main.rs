//! Wasp - 远程主机智能体入口
//!
//! 初始化日志与配置，装配推理客户端 / 命令调度器 / 工具路由 / 编排器，
//! 然后长轮询 Telegram 更新：文本走工具循环，照片走图像理解，语音先
//! 转写再走工具循环。单条消息的处理在独立任务里进行，崩溃只损失该条，
//! 不影响进程。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use wasp::agent::Orchestrator;
use wasp::config::{load_config, AppConfig};
use wasp::exec::CommandDispatcher;
use wasp::llm::{AnthropicClient, ReasoningClient, ScriptedClient};
use wasp::session::{ContentBlock, SessionStore};
use wasp::tools::{
    tool_definitions, BrowseTool, CameraTool, CommandTool, RepairGuard, RepairTool, ScreenTool,
    ToolRouter,
};
use wasp::transport::telegram::Incoming;
use wasp::transport::{MessageSink, TelegramTransport};
use wasp::vision::VisionService;

/// 内置系统提示词；config/prompts/system.txt 存在时优先
const SYSTEM_PROMPT: &str = "You are Wasp, a remote assistant running directly on the operator's machine. \
The operator talks to you over chat and you get things done with the tools: run shell commands and scripts, \
capture the screen, take camera photos, drive a browsing agent, and repair its dependencies when it breaks. \
Rules: act without asking for permission mid-task; never ask the operator whether to continue; \
prefer a single run_command call over several when one suffices; \
when a command fails, read its stderr and adapt instead of repeating it verbatim; \
answer with short, concrete reports of what happened.";

/// 根据环境变量选择推理后端（无 key 时退到 Mock，便于离线冒烟）
fn create_reasoning_client(cfg: &AppConfig) -> Arc<dyn ReasoningClient> {
    match std::env::var("ANTHROPIC_API_KEY") {
        Ok(key) => {
            tracing::info!("Using Anthropic reasoning service ({})", cfg.llm.model);
            Arc::new(AnthropicClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                &key,
                cfg.llm.max_tokens,
                cfg.llm.extended_thinking,
                cfg.llm.thinking_budget_tokens,
                cfg.llm.request_timeout_secs,
            ))
        }
        Err(_) => {
            tracing::warn!("ANTHROPIC_API_KEY not set, using scripted mock client");
            Arc::new(ScriptedClient::new(Vec::new()))
        }
    }
}

fn load_system_prompt(cfg: &AppConfig) -> String {
    cfg.agent
        .system_prompt_path
        .as_ref()
        .and_then(|p| std::fs::read_to_string(p).ok())
        .or_else(|| std::fs::read_to_string("config/prompts/system.txt").ok())
        .unwrap_or_else(|| SYSTEM_PROMPT.to_string())
}

/// 单条消息处理所需的共享组件
struct Handler {
    orchestrator: Arc<Orchestrator>,
    transport: Arc<TelegramTransport>,
    store: Arc<SessionStore>,
    vision: Arc<VisionService>,
    attachments_dir: PathBuf,
}

impl Handler {
    async fn handle(&self, message: Incoming) {
        let chat_id = message.chat.id;
        if let Some(text) = message.text.clone() {
            self.run_and_reply(chat_id, text).await;
        } else if let Some(photos) = &message.photo {
            self.handle_photo(chat_id, photos, message.caption.as_deref())
                .await;
        } else if let Some(voice) = &message.voice {
            self.handle_voice(chat_id, &voice.file_id).await;
        } else if let Some(document) = &message.document {
            self.handle_document(chat_id, &document.file_id).await;
        }
    }

    /// 文本指令：跑工具循环并回发最终文本
    async fn run_and_reply(&self, chat_id: i64, text: String) {
        let outcome = self
            .orchestrator
            .run(chat_id, vec![ContentBlock::Text { text }])
            .await;
        self.transport
            .send_text(chat_id, &outcome.final_text)
            .await;
    }

    /// 照片：取最大尺寸下载，记为会话附件，交给图像理解并回发结果
    async fn handle_photo(
        &self,
        chat_id: i64,
        photos: &[wasp::transport::telegram::PhotoSize],
        caption: Option<&str>,
    ) {
        let Some(largest) = photos.iter().max_by_key(|p| p.file_size.unwrap_or(0)) else {
            return;
        };
        let path = match self
            .transport
            .download_file(&largest.file_id, &self.attachments_dir)
            .await
        {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(chat_id, error = %e, "photo download failed");
                self.transport
                    .send_text(chat_id, &format!("Could not download the photo: {e}"))
                    .await;
                return;
            }
        };
        self.store
            .set_attachment(&chat_id.to_string(), path.clone())
            .await;

        let prompt = match caption {
            Some(c) if !c.trim().is_empty() => c.to_string(),
            _ => "Describe this image.".to_string(),
        };
        match self.vision.analyze_image(&path, &prompt).await {
            Ok(text) => {
                self.transport.send_text(chat_id, &text).await;
            }
            Err(e) => {
                self.transport
                    .send_text(chat_id, &format!("Image analysis failed: {e}"))
                    .await;
            }
        }
    }

    /// 语音：下载并转写，转写文本按普通指令走工具循环
    async fn handle_voice(&self, chat_id: i64, file_id: &str) {
        let path = match self
            .transport
            .download_file(file_id, &self.attachments_dir)
            .await
        {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(chat_id, error = %e, "voice download failed");
                return;
            }
        };
        self.store
            .set_attachment(&chat_id.to_string(), path.clone())
            .await;
        match self.vision.transcribe(&path).await {
            Ok(text) => {
                tracing::info!(chat_id, transcript = %text, "voice transcribed");
                self.run_and_reply(chat_id, text).await;
            }
            Err(e) => {
                self.transport
                    .send_text(chat_id, &format!("Transcription failed: {e}"))
                    .await;
            }
        }
    }

    /// 文档：存下来并记为会话附件
    async fn handle_document(&self, chat_id: i64, file_id: &str) {
        match self
            .transport
            .download_file(file_id, &self.attachments_dir)
            .await
        {
            Ok(path) => {
                self.store
                    .set_attachment(&chat_id.to_string(), path.clone())
                    .await;
                self.transport
                    .send_text(chat_id, &format!("Saved: {}", path.display()))
                    .await;
            }
            Err(e) => {
                self.transport
                    .send_text(chat_id, &format!("Could not download the file: {e}"))
                    .await;
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    wasp::observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({e}), using defaults");
        AppConfig::default()
    });
    let data_dir = cfg.app.data_dir.clone();
    let _ = std::fs::create_dir_all(&data_dir);

    let token =
        std::env::var("TELEGRAM_BOT_TOKEN").context("TELEGRAM_BOT_TOKEN must be set")?;
    let transport = Arc::new(TelegramTransport::new(&token));
    let sink: Arc<dyn MessageSink> = transport.clone();
    let llm = create_reasoning_client(&cfg);

    let dispatcher = Arc::new(CommandDispatcher::new(
        cfg.tools.browser_exe.clone(),
        cfg.tools.powershell_exe.clone(),
        cfg.tools.cmd_exe.clone(),
        cfg.tools.bash_exe.clone(),
        None,
        cfg.tools.launch_verify_delay_ms,
    ));
    let guard = Arc::new(RepairGuard::new());
    let captures_dir = data_dir.join("captures");

    let router = Arc::new(ToolRouter {
        command: CommandTool::new(dispatcher.clone(), cfg.tools.command_timeout_ms),
        screen: ScreenTool::new(dispatcher.clone(), captures_dir.clone(), sink.clone()),
        camera: CameraTool::new(
            cfg.tools.ffmpeg_exe.clone(),
            cfg.tools.camera_device.clone(),
            captures_dir,
            sink.clone(),
        ),
        browse: BrowseTool::new(
            cfg.tools.browse.python_exe.clone(),
            cfg.tools.browse.runner_script.clone(),
            data_dir.join("browser_use"),
            cfg.tools.browse.timeout_secs,
            cfg.tools.browse.repair_packages.clone(),
            cfg.tools.browse.repair_timeout_secs,
            guard.clone(),
            sink.clone(),
        ),
        repair: RepairTool::new(
            cfg.tools.browse.python_exe.clone(),
            cfg.tools.browse.repair_packages.clone(),
            cfg.tools.browse.repair_timeout_secs,
            guard,
        ),
    });

    let store = Arc::new(SessionStore::new(cfg.app.max_history_messages));
    let orchestrator = Arc::new(Orchestrator::new(
        llm.clone(),
        router,
        store.clone(),
        load_system_prompt(&cfg),
        tool_definitions(),
        cfg.agent.policy(),
    ));
    let vision = Arc::new(VisionService::new(
        llm,
        cfg.llm.transcription.base_url.clone(),
        cfg.llm.transcription.model.clone(),
    ));

    tracing::info!("wasp is polling for updates");
    let mut offset = 0i64;
    loop {
        let updates = match transport
            .get_updates(offset, cfg.telegram.poll_timeout_secs)
            .await
        {
            Ok(u) => u,
            Err(e) => {
                tracing::error!(error = %e, "getUpdates failed, backing off");
                tokio::time::sleep(Duration::from_secs(3)).await;
                continue;
            }
        };
        for update in updates {
            offset = offset.max(update.update_id + 1);
            let Some(message) = update.message else { continue };
            let chat_id = message.chat.id;
            if !cfg.telegram.allowed_chat_ids.is_empty()
                && !cfg.telegram.allowed_chat_ids.contains(&chat_id)
            {
                tracing::warn!(chat_id, "ignoring message from unauthorized chat");
                continue;
            }

            let handler = Handler {
                orchestrator: orchestrator.clone(),
                transport: transport.clone(),
                store: store.clone(),
                vision: vision.clone(),
                attachments_dir: data_dir.join("attachments"),
            };
            // 故障按会话隔离：处理任务崩溃只记日志，不拖垮进程
            let handle = tokio::spawn(async move { handler.handle(message).await });
            tokio::spawn(async move {
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "message handler crashed");
                }
            });
        }
    }
}
