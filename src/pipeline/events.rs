//! 流水线事件：引擎运行期间对外发布的进度流
//!
//! 事件经 unbounded channel 发送，接收端缺失或落后不影响流水线本身。
//! 序列化成 tagged JSON，便于直接透传给前端或日志。

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::pipeline::gate::SuspendPayload;
use crate::pipeline::plan::Plan;

/// 流水线进度事件
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// 规划完成
    PlanReady { plan: Plan },
    /// 因缺口挂起，等待用户补充
    #[serde(rename = "suspend")]
    Suspended { payload: SuspendPayload },
    /// 一轮生成开始
    TurnStarted { turn: u64, mode: String },
    /// 后端的思考/注释分片（仅展示）
    Thinking { text: String },
    /// 文档正文分片
    PartialText { text: String },
    /// 记账更新
    UsageUpdated { call_units: u64, session_total: u64 },
    /// 产物已落盘
    ArtifactsSaved { saved: Vec<String>, skipped: Vec<String> },
    /// 流水线结束
    #[serde(rename = "complete")]
    Completed { explanation: String },
    /// 流水线出错终止；kind 为稳定类别标签（budget_exceeded / malformed_output 等）
    #[serde(rename = "error")]
    Failed { kind: String, message: String },
}

/// 发事件的便捷入口；没有接收端时静默丢弃
pub fn send_event(tx: Option<&UnboundedSender<PipelineEvent>>, event: PipelineEvent) {
    if let Some(tx) = tx {
        if tx.send(event).is_err() {
            tracing::debug!("event receiver dropped, event discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_serialize_tagged() {
        let json = serde_json::to_value(PipelineEvent::TurnStarted {
            turn: 1,
            mode: "full_generation".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "turn_started");
        assert_eq!(json["turn"], 1);
    }

    #[test]
    fn test_terminal_event_tags_and_error_kind() {
        let json = serde_json::to_value(PipelineEvent::Completed {
            explanation: "done".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "complete");

        let json = serde_json::to_value(PipelineEvent::Failed {
            kind: "budget_exceeded".to_string(),
            message: "Budget exceeded: 800 units consumed".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["kind"], "budget_exceeded");
    }

    #[test]
    fn test_send_without_receiver_is_noop() {
        send_event(
            None,
            PipelineEvent::Thinking {
                text: "考虑中".to_string(),
            },
        );
    }

    #[tokio::test]
    async fn test_send_with_receiver_delivers() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        send_event(
            Some(&tx),
            PipelineEvent::Completed {
                explanation: "done".to_string(),
            },
        );
        match rx.recv().await {
            Some(PipelineEvent::Completed { explanation }) => assert_eq!(explanation, "done"),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
