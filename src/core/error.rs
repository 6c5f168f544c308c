//! 引擎错误类型
//!
//! Planner 子分析失败在内部降级吞掉，不出现在此处；Gate 的暂停是正常
//! 返回路径而非错误；其余按类型向上传播。

use thiserror::Error;

/// 流水线运行过程中可能出现的错误（预算、解析、后端、持久化等）
#[derive(Error, Debug)]
pub enum EngineError {
    /// 会话预算耗尽（终态）：携带累计用量，调用方需新开会话
    #[error("Budget exceeded: {total} units consumed")]
    BudgetExceeded { total: u64 },

    /// 修复阶梯全部失败：携带原始文本用于诊断，本轮不自动重试
    #[error("Malformed backend output ({} chars)", raw.len())]
    MalformedOutput { raw: String },

    /// 其他后端失败，原样上抛（仅做分类）
    #[error("Backend error: {0}")]
    Backend(String),

    /// 批量物化中零个产物落库时的聚合失败
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// 流式调用被取消：丢弃已累积的部分文档，不做任何物化
    #[error("Cancelled by caller")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),
}

impl EngineError {
    /// 稳定的错误类别标签，随失败事件发布，供消费端区分处置方式
    /// （预算耗尽需新开会话，解析失败可重试）
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::MalformedOutput { .. } => "malformed_output",
            Self::Backend(_) => "backend",
            Self::Persistence(_) => "persistence",
            Self::Cancelled => "cancelled",
            Self::Config(_) => "config",
        }
    }
}
