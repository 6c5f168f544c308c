//! 前置门：规划完成后、生成开始前的挂起判定
//!
//! 按固定顺序检查计划缺口，命中第一个缺口即挂起，把计划与已消耗用量
//! 打包进挂起载荷等待用户补充。判定是纯函数：同一输入反复评估结论不变。

use serde::{Deserialize, Serialize};

use crate::pipeline::plan::{Plan, RequestKind, SuppliedInputs};
use crate::pipeline::planner::SURFACE_CONFIDENCE_MIN;

/// 挂起原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendKind {
    /// 需求指向具体站点但缺少可分析的 URL
    NeedsSiteUrl,
    /// 识别出外部 API 需求但缺少接入配置
    NeedsApiConfig,
    /// 形态置信度不足，需要用户确认
    NeedsSurfaceConfirmation,
}

/// 挂起载荷：恢复会话所需的全部状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspendPayload {
    pub kind: SuspendKind,
    pub plan: Plan,
    /// 此前各次恢复已积累的用户输入，重建会话时原样带回，缺口不回退
    pub supplied: SuppliedInputs,
    /// 挂起时已消耗的用量快照，恢复时继续计入同一账本
    pub usage_so_far: u64,
    /// 缺口明细（站点列表 / API 名列表）
    pub missing: Vec<String>,
}

/// 门判定结果
#[derive(Debug, Clone)]
pub enum GateDecision {
    Proceed,
    Suspend(SuspendPayload),
}

impl GateDecision {
    pub fn is_proceed(&self) -> bool {
        matches!(self, Self::Proceed)
    }
}

/// 评估计划缺口
///
/// 全新请求按 站点 -> 外部 API -> 形态确认 的顺序检查；
/// 追加请求的形态与站点已由既有产物确定，只检查外部 API 配置。
pub fn evaluate(
    kind: RequestKind,
    plan: &Plan,
    supplied: &SuppliedInputs,
    usage_so_far: u64,
) -> GateDecision {
    if kind == RequestKind::Fresh {
        if !plan.site_targets.is_empty()
            && supplied.site_url.is_none()
            && !supplied.skip_site_analysis
        {
            return suspend(
                SuspendKind::NeedsSiteUrl,
                plan,
                supplied,
                usage_so_far,
                plan.site_targets.clone(),
            );
        }
    }

    // 显式的空配置列表是"全部跳过"，同样视为已提供
    if !plan.external_apis.is_empty() && supplied.api_configs.is_none() {
        let missing = plan.external_apis.iter().map(|a| a.name.clone()).collect();
        return suspend(SuspendKind::NeedsApiConfig, plan, supplied, usage_so_far, missing);
    }

    if kind == RequestKind::Fresh
        && plan.surface_confidence < SURFACE_CONFIDENCE_MIN
        && !supplied.surface_confirmed
    {
        return suspend(
            SuspendKind::NeedsSurfaceConfirmation,
            plan,
            supplied,
            usage_so_far,
            vec![plan.surface.as_str().to_string()],
        );
    }

    GateDecision::Proceed
}

fn suspend(
    kind: SuspendKind,
    plan: &Plan,
    supplied: &SuppliedInputs,
    usage_so_far: u64,
    missing: Vec<String>,
) -> GateDecision {
    tracing::info!(kind = ?kind, usage_so_far, "pipeline suspended for user input");
    GateDecision::Suspend(SuspendPayload {
        kind,
        plan: plan.clone(),
        supplied: supplied.clone(),
        usage_so_far,
        missing,
    })
}
