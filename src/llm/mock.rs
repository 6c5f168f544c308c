//! Mock 后端（用于测试与离线运行，无需 API）
//!
//! 按入队顺序回放预置回复，便于脚本化驱动多次后端调用的流水线测试；
//! 队列耗尽后回退为回显一个最小 JSON 文档。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use futures_util::StreamExt;

use crate::llm::{BackendReply, ChunkStream, GenerativeBackend, StreamChunk, UsageReport};

/// 脚本化 Mock 后端：每次调用弹出一条预置回复
#[derive(Debug, Default)]
pub struct MockBackend {
    responses: Mutex<VecDeque<String>>,
    /// 每次调用上报的固定用量
    usage_per_call: u64,
    /// 流式调用在正文前插入的思考分片
    thinking: Option<String>,
    /// 流式调用在 Final 块前的人为停顿，用于驱动中途取消
    stall_before_final: Option<Duration>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置一串按序回放的回复
    pub fn scripted(responses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            usage_per_call: 10,
            thinking: None,
            stall_before_final: None,
        }
    }

    /// 设置每次调用上报的用量（默认 10）
    pub fn with_usage_per_call(mut self, units: u64) -> Self {
        self.usage_per_call = units;
        self
    }

    /// 让每次流式调用先吐一段思考分片
    pub fn with_thinking(mut self, text: impl Into<String>) -> Self {
        self.thinking = Some(text.into());
        self
    }

    /// 让每次流式调用在 Final 块前停顿指定时长
    pub fn with_stall_before_final(mut self, delay: Duration) -> Self {
        self.stall_before_final = Some(delay);
        self
    }

    fn next_response(&self) -> String {
        self.responses
            .lock()
            .expect("mock queue poisoned")
            .pop_front()
            .unwrap_or_else(|| {
                r#"{"explanation": "mock fallback: queue exhausted"}"#.to_string()
            })
    }
}

#[async_trait]
impl GenerativeBackend for MockBackend {
    async fn invoke(
        &self,
        _prompt: &str,
        _continuation: Option<&str>,
    ) -> Result<BackendReply, String> {
        let text = self.next_response();
        Ok(BackendReply {
            text,
            usage: UsageReport::new(self.usage_per_call / 2, self.usage_per_call - self.usage_per_call / 2),
            continuation: None,
        })
    }

    async fn invoke_stream(
        &self,
        prompt: &str,
        continuation: Option<&str>,
    ) -> Result<ChunkStream, String> {
        let reply = self.invoke(prompt, continuation).await?;

        let mut head = Vec::new();
        if let Some(text) = &self.thinking {
            head.push(Ok(StreamChunk::Thinking(text.clone())));
        }
        head.push(Ok(StreamChunk::Partial(reply.text)));

        let stall = self.stall_before_final;
        let tail = StreamChunk::Final {
            usage: reply.usage,
            continuation: reply.continuation,
        };
        Ok(Box::pin(stream::iter(head).chain(stream::once(async move {
            if let Some(delay) = stall {
                tokio::time::sleep(delay).await;
            }
            Ok(tail)
        }))))
    }
}
