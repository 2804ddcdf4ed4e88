//! 编排策略：一次运行的行为开关

use serde::Deserialize;

/// 工具循环的策略（可从配置反序列化）
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RunPolicy {
    /// 工具执行轮数上限；到达后停止循环并以现有文本收尾
    pub max_iterations: usize,
    /// 步进确认：每个推理轮次只真正执行第一个工具调用，其余记为 deferred
    pub step_confirm: bool,
    /// 首次浏览成功后立即结束本次运行，返回固定完成语
    pub stop_after_browse: bool,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            step_confirm: false,
            stop_after_browse: false,
        }
    }
}
