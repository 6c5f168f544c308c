//! 生成调用器：所有后端调用的唯一出口
//!
//! 统一做三件事：调用前的预算预检（可配置关闭）、调用后的精确用量记账、
//! 后端错误到引擎错误的归类。取消令牌在调用前检查，已取消则不再发起请求。

use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::budget::{BudgetTracker, CostEstimator};
use crate::core::EngineError;
use crate::llm::{BackendReply, ChunkStream, GenerativeBackend};

/// 后端报错里指示资源耗尽的特征词
const BUDGET_ERROR_PATTERN: &str =
    r"(?i)(budget|quota|rate.?limit|insufficient|too.?many.?request|context.?length|max.?token|exceeded)";

pub struct Invoker<'a> {
    budget: &'a BudgetTracker,
    precheck: bool,
    cancel: CancellationToken,
    budget_error: Option<Regex>,
}

impl<'a> Invoker<'a> {
    pub fn new(budget: &'a BudgetTracker, precheck: bool, cancel: CancellationToken) -> Self {
        Self {
            budget,
            precheck,
            cancel,
            budget_error: Regex::new(BUDGET_ERROR_PATTERN).ok(),
        }
    }

    /// 调用前检查：取消状态与预算预检
    fn pre_call(&self, prompt: &str) -> Result<(), EngineError> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if self.precheck {
            self.budget.precheck(CostEstimator::estimate(prompt))?;
        }
        Ok(())
    }

    /// 把后端的字符串错误归类为引擎错误
    fn classify(&self, message: String) -> EngineError {
        let exhausted = match &self.budget_error {
            Some(re) => re.is_match(&message),
            None => message.to_ascii_lowercase().contains("budget"),
        };
        if exhausted {
            tracing::warn!("backend reported resource exhaustion: {}", message);
            EngineError::BudgetExceeded {
                total: self.budget.total(),
            }
        } else {
            EngineError::Backend(message)
        }
    }

    /// 一次非流式调用：预检、调用、按后端报告的精确用量记账
    pub async fn invoke(
        &self,
        backend: &dyn GenerativeBackend,
        prompt: &str,
        continuation: Option<&str>,
    ) -> Result<BackendReply, EngineError> {
        self.pre_call(prompt)?;

        let reply = backend
            .invoke(prompt, continuation)
            .await
            .map_err(|e| self.classify(e))?;

        let total = self.budget.record(&reply.usage);
        tracing::debug!(
            call_units = reply.usage.total_units,
            session_total = total,
            "backend call accounted"
        );
        Ok(reply)
    }

    /// 开启一次流式调用；用量在消费到 Final 块时由调用方记账
    pub async fn invoke_stream(
        &self,
        backend: &dyn GenerativeBackend,
        prompt: &str,
        continuation: Option<&str>,
    ) -> Result<ChunkStream, EngineError> {
        self.pre_call(prompt)?;
        backend
            .invoke_stream(prompt, continuation)
            .await
            .map_err(|e| self.classify(e))
    }

    /// 供流式路径在 Final 块到达时记账
    pub fn record_final(&self, usage: &crate::llm::UsageReport) -> u64 {
        self.budget.record(usage)
    }

    /// 流中途的错误同样走归类
    pub fn classify_stream_error(&self, message: String) -> EngineError {
        self.classify(message)
    }
}
