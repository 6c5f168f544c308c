//! 生成会话：可恢复单元
//!
//! 显式值贯穿所有阶段（不使用进程级注册表）：Plan、预算账本、后端续写句柄、
//! 单调递增的轮次计数，以及暂停/恢复间累积的用户补充输入。

use uuid::Uuid;

use crate::budget::BudgetTracker;
use crate::pipeline::gate::SuspendPayload;
use crate::pipeline::plan::{Plan, SuppliedInputs};

/// 单个生成会话的全部可变状态。预算上限耗尽后会话即为终态，只能新建会话继续。
#[derive(Debug)]
pub struct GenerationSession {
    /// 项目标识，产物 upsert 的 key 前半部分
    pub project_id: String,
    /// 规划结果；暂停/恢复间保持不变（除 surface 覆盖这一文档化例外）
    pub plan: Option<Plan>,
    /// 会话级预算账本，仅由 Invoker 的调用后记账步骤写入
    pub budget: BudgetTracker,
    /// 后端续写句柄；单发后端可能始终为 None
    pub continuation: Option<String>,
    /// 已完成的生成轮次
    pub turn: u64,
    /// 各次恢复累积的用户输入（站点 URL / 跳过标记 / API 配置）
    pub supplied: SuppliedInputs,
}

impl GenerationSession {
    /// 创建新会话；ceiling 为本会话可消耗的资源单位上限
    pub fn new(project_id: impl Into<String>, ceiling: u64) -> Self {
        Self {
            project_id: project_id.into(),
            plan: None,
            budget: BudgetTracker::new(ceiling),
            continuation: None,
            turn: 0,
            supplied: SuppliedInputs::default(),
        }
    }

    /// 以随机项目 id 创建会话
    pub fn with_random_id(ceiling: u64) -> Self {
        Self::new(Uuid::new_v4().to_string(), ceiling)
    }

    /// 从暂停载荷恢复会话：计划与已积累的用户输入原样带回，
    /// 账本以快照用量为起点，保证跨暂停单调
    pub fn resume_from(
        project_id: impl Into<String>,
        ceiling: u64,
        payload: &SuspendPayload,
    ) -> Self {
        let mut session = Self::new(project_id, ceiling);
        session.budget.seed(payload.usage_so_far);
        session.plan = Some(payload.plan.clone());
        session.supplied = payload.supplied.clone();
        session
    }
}
