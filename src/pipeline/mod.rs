//! 生成流水线：规划、门、策略、调用、事件与引擎编排

pub mod engine;
pub mod events;
pub mod gate;
pub mod invoker;
pub mod plan;
pub mod planner;
pub mod strategy;

pub use engine::{Engine, PipelineOutcome};
pub use events::{send_event, PipelineEvent};
pub use gate::{GateDecision, SuspendKind, SuspendPayload};
pub use plan::{GenerationRequest, RequestKind, ResumeInput, SurfaceType};
pub use planner::Planner;
pub use strategy::GenerationMode;
