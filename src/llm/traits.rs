//! 生成后端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 GenerativeBackend：invoke（单发）、
//! invoke_stream（流式分片）。续写句柄 continuation 用于跨轮延续同一后端对话，
//! 单发后端可返回 None。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};

/// 单次调用的资源用量（由后端上报的精确值）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageReport {
    pub prompt_units: u64,
    pub completion_units: u64,
    pub total_units: u64,
}

impl UsageReport {
    pub fn new(prompt_units: u64, completion_units: u64) -> Self {
        Self {
            prompt_units,
            completion_units,
            total_units: prompt_units + completion_units,
        }
    }
}

/// 单发调用结果：文本 + 用量 + 更新后的续写句柄
#[derive(Debug, Clone)]
pub struct BackendReply {
    pub text: String,
    pub usage: UsageReport,
    pub continuation: Option<String>,
}

/// 流式调用的分片
///
/// Thinking 分片仅转发给调用方做可观测性展示，不计入累积的文档文本。
#[derive(Debug, Clone)]
pub enum StreamChunk {
    /// 中间思考/注释内容
    Thinking(String),
    /// 文档正文的一段
    Partial(String),
    /// 流结束：携带本轮用量与新句柄
    Final {
        usage: UsageReport,
        continuation: Option<String>,
    },
}

/// 流式分片序列
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, String>> + Send>>;

/// 生成后端 trait：单发与流式两种调用方式
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// 单发调用
    async fn invoke(
        &self,
        prompt: &str,
        continuation: Option<&str>,
    ) -> Result<BackendReply, String>;

    /// 流式调用，返回分片流
    async fn invoke_stream(
        &self,
        prompt: &str,
        continuation: Option<&str>,
    ) -> Result<ChunkStream, String>;
}
