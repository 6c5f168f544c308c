//! Wasp - Rust 生成编排引擎
//!
//! 将一条自然语言功能请求转化为一组可构建产物（多文件软件包）的多阶段流水线：
//! Planner -> Gate -> Strategy -> Invoker -> Repair Parser -> Materializer，
//! 每次后端调用前后均经过 Budget Tracker 记账。
//!
//! 模块划分：
//! - **budget**: 会话级资源预算（累计用量 + 上限 + 估算预检）
//! - **catalog**: 参考模式与可复用模板目录（JSON 数据）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、会话（Plan + 预算 + 续写句柄）
//! - **external**: 外部协作者契约（产物存储 / 站点分析 / 资源文档）
//! - **llm**: 生成后端抽象与实现（OpenAI 兼容 / Mock）
//! - **output**: 结构化文档、输出修复解析器、产物物化
//! - **pipeline**: Planner、Gate、Strategy、Invoker、事件与端到端 Engine
//! - **prompts**: 各阶段提示词模板与占位符替换

pub mod budget;
pub mod catalog;
pub mod config;
pub mod core;
pub mod external;
pub mod llm;
pub mod output;
pub mod pipeline;
pub mod prompts;

pub use crate::core::{EngineError, GenerationSession};
pub use crate::pipeline::{Engine, PipelineEvent, PipelineOutcome};
