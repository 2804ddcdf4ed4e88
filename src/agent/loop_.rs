//! 工具循环：与推理服务的多轮 tool_use 协议
//!
//! 用户输入入历史 -> 全量历史发给推理服务 -> 只要响应请求工具调用：
//! 按策略决定哪些真正执行（步进确认 / 指纹去重），经工具路由执行，
//! 结果以 tool_result 记录折回历史再重新提交；直到纯文本回复、停止
//! 条件触发或轮数到顶。历史只在回合边界整体写回；推理服务本身调用
//! 失败时不写回，原输入可原样重试。
//!
//! 协议不变量：一个 assistant 轮里的每个 tool_use，都在紧随其后的
//! user 轮里有且只有一条 call id 相同的 tool_result；凑不齐不许提交。

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde_json::Value;

use crate::agent::{fingerprint_for, RunPolicy};
use crate::llm::{ReasoningClient, StopReason, ToolDefinition};
use crate::session::{ChatMessage, ContentBlock, SessionStore};
use crate::tools::{InvokeContext, ToolOutcome, ToolRouter};

/// 轮数到顶且模型没有给出任何文本时的收尾语
const STEP_LIMIT_TEXT: &str = "Reached the step limit for this request; stopping here.";
/// 「浏览成功即停」策略触发时的固定完成语
const BROWSE_DONE_TEXT: &str = "Browser task completed.";
/// 剥掉续行追问后文本为空时的兜底回复
const FALLBACK_TEXT: &str = "Done.";

/// 一次运行的结果：最终文本 + 更新后的历史
#[derive(Debug)]
pub struct RunOutcome {
    pub final_text: String,
    pub messages: Vec<ChatMessage>,
}

/// 工具循环编排器
pub struct Orchestrator {
    llm: Arc<dyn ReasoningClient>,
    router: Arc<ToolRouter>,
    store: Arc<SessionStore>,
    system_prompt: String,
    tools: Vec<ToolDefinition>,
    policy: RunPolicy,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn ReasoningClient>,
        router: Arc<ToolRouter>,
        store: Arc<SessionStore>,
        system_prompt: String,
        tools: Vec<ToolDefinition>,
        policy: RunPolicy,
    ) -> Self {
        Self {
            llm,
            router,
            store,
            system_prompt,
            tools,
            policy,
        }
    }

    /// 驱动一次完整的请求；编排层失败以文本形式返回，不向上抛
    pub async fn run(&self, chat_id: i64, user_content: Vec<ContentBlock>) -> RunOutcome {
        let chat_key = chat_id.to_string();
        let mut history = self.store.snapshot(&chat_key).await;
        history.push(ChatMessage::user_blocks(user_content));

        let ctx = InvokeContext { chat_id };
        let mut iterations = 0usize;
        let mut done_fingerprints: HashSet<String> = HashSet::new();
        let mut last_text = String::new();

        let final_text = loop {
            let response = match self
                .llm
                .chat(&self.system_prompt, &self.tools, &history)
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    // 不写回历史：留给下一次以原输入重试
                    tracing::error!(chat_id, error = %e, "reasoning service call failed");
                    return RunOutcome {
                        final_text: e.to_string(),
                        messages: history,
                    };
                }
            };

            let text = response.text();
            if !text.is_empty() {
                last_text = text.clone();
            }

            let tool_uses: Vec<(String, String, Value)> = response
                .content
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolUse { id, name, input } => {
                        Some((id.clone(), name.clone(), input.clone()))
                    }
                    _ => None,
                })
                .collect();

            if response.stop_reason != StopReason::ToolUse || tool_uses.is_empty() {
                if !response.content.is_empty() {
                    history.push(response.to_assistant_message());
                }
                break if text.is_empty() { last_text } else { text };
            }

            // 按服务给出的顺序执行，并给每个 tool_use 配一条结果记录
            let mut records: Vec<ContentBlock> = Vec::with_capacity(tool_uses.len());
            let mut executed_this_turn = 0usize;
            let mut stop_flag = false;

            for (id, name, input) in &tool_uses {
                let fingerprint = fingerprint_for(name, input);
                let already_done = fingerprint
                    .as_deref()
                    .map(|f| done_fingerprints.contains(f))
                    .unwrap_or(false);

                let outcome = if self.policy.step_confirm && executed_this_turn >= 1 {
                    ToolOutcome::ok(
                        "Deferred by step confirmation: only the first action of a turn runs. \
                         Request it again on the next turn if it is still needed.",
                    )
                    .with("deferred", true)
                } else if already_done {
                    ToolOutcome::ok(
                        "Skipped: an identical action already completed successfully in this run.",
                    )
                    .with("deduped", true)
                } else {
                    tracing::info!(chat_id, tool = %name, "dispatching tool call");
                    let outcome = self.router.invoke(name, input.clone(), &ctx).await;
                    executed_this_turn += 1;
                    if outcome.success {
                        if let Some(f) = fingerprint {
                            done_fingerprints.insert(f);
                        }
                        if self.policy.stop_after_browse && name == "browse_site" {
                            stop_flag = true;
                        }
                    }
                    outcome
                };

                records.push(ContentBlock::ToolResult {
                    tool_use_id: id.clone(),
                    content: outcome.to_record_content(),
                });
            }

            history.push(response.to_assistant_message());
            history.push(ChatMessage::user_blocks(records));

            if stop_flag {
                break BROWSE_DONE_TEXT.to_string();
            }

            iterations += 1;
            if iterations >= self.policy.max_iterations {
                tracing::warn!(chat_id, iterations, "iteration cap reached, stopping loop");
                break if last_text.is_empty() {
                    STEP_LIMIT_TEXT.to_string()
                } else {
                    last_text
                };
            }
        };

        let mut final_text = strip_continuation_prompts(&final_text);
        if final_text.is_empty() {
            final_text = FALLBACK_TEXT.to_string();
        }

        self.store.replace(&chat_key, history.clone()).await;
        RunOutcome {
            final_text,
            messages: history,
        }
    }
}

static CONTINUE_PROMPT_RES: OnceLock<Vec<Regex>> = OnceLock::new();

fn continue_prompt_res() -> &'static [Regex] {
    CONTINUE_PROMPT_RES.get_or_init(|| {
        [
            r"(?i)do you want me to (continue|proceed|keep going)",
            r"(?i)would you like me to (continue|proceed)",
            r"(?i)\b(shall|should) i (continue|proceed)\b",
            r"(?i)\(y/n\)\s*\??\s*$",
            r"(?i)^\s*continue\?\s*$",
        ]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
    })
}

/// 剥掉「要不要继续」类追问行：继续与否由编排器内部决定，不能抛给操作者
fn strip_continuation_prompts(text: &str) -> String {
    text.lines()
        .filter(|line| !continue_prompt_res().iter().any(|re| re.is_match(line)))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_continue_prompt_lines_removed() {
        let text = "Opened the folder.\nDo you want me to continue with the cleanup?\nDone so far.";
        let stripped = strip_continuation_prompts(text);
        assert!(stripped.contains("Opened the folder."));
        assert!(stripped.contains("Done so far."));
        assert!(!stripped.to_lowercase().contains("do you want me to"));
    }

    #[test]
    fn test_y_n_tail_removed() {
        let text = "Deleted 3 files.\nProceed with the rest? (y/n)";
        let stripped = strip_continuation_prompts(text);
        assert_eq!(stripped, "Deleted 3 files.");
    }

    #[test]
    fn test_plain_text_untouched() {
        let text = "All 12 services are running.\nCPU is at 40%.";
        assert_eq!(strip_continuation_prompts(text), text);
    }

    #[test]
    fn test_all_lines_stripped_leaves_empty() {
        assert_eq!(strip_continuation_prompts("Shall I continue?"), "");
    }
}
