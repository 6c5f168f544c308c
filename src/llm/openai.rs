//! OpenAI 兼容 API 后端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）。
//! 续写句柄以消息前缀方式模拟：句柄内容作为 assistant 历史注入下一轮请求。

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use futures_util::stream;

use crate::llm::{BackendReply, ChunkStream, GenerativeBackend, StreamChunk, UsageReport};

/// 单轮输出上限（与原始编码提示词保持一致的大值，避免长文档被截断）
const MAX_OUTPUT_UNITS: u32 = 32_000;

/// OpenAI 兼容后端：持有 Client 与 model 名
pub struct OpenAiBackend {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiBackend {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
        }
    }

    fn to_messages(
        &self,
        prompt: &str,
        continuation: Option<&str>,
    ) -> Result<Vec<ChatCompletionRequestMessage>, String> {
        let mut messages = Vec::new();
        if let Some(prior) = continuation {
            messages.push(ChatCompletionRequestMessage::Assistant(
                ChatCompletionRequestAssistantMessageArgs::default()
                    .content(prior.to_string())
                    .build()
                    .map_err(|e| e.to_string())?,
            ));
        }
        messages.push(ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt.to_string())
                .build()
                .map_err(|e| e.to_string())?,
        ));
        Ok(messages)
    }
}

#[async_trait]
impl GenerativeBackend for OpenAiBackend {
    async fn invoke(
        &self,
        prompt: &str,
        continuation: Option<&str>,
    ) -> Result<BackendReply, String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .max_completion_tokens(MAX_OUTPUT_UNITS)
            .messages(self.to_messages(prompt, continuation)?)
            .build()
            .map_err(|e| e.to_string())?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| e.to_string())?;

        let usage = response
            .usage
            .as_ref()
            .map(|u| UsageReport::new(u.prompt_tokens as u64, u.completion_tokens as u64))
            .unwrap_or_default();

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        // 新句柄 = 本轮完整输出，供下一轮作为 assistant 历史延续
        let continuation = if content.is_empty() {
            None
        } else {
            Some(content.clone())
        };

        Ok(BackendReply {
            text: content,
            usage,
            continuation,
        })
    }

    async fn invoke_stream(
        &self,
        prompt: &str,
        continuation: Option<&str>,
    ) -> Result<ChunkStream, String> {
        // 简化实现：单发后按整段切片回放（与 Mock 对齐，真正的 SSE 流由上层透明替换）
        let reply = self.invoke(prompt, continuation).await?;
        let mut chunks: Vec<Result<StreamChunk, String>> = Vec::new();
        if !reply.text.is_empty() {
            chunks.push(Ok(StreamChunk::Partial(reply.text)));
        }
        chunks.push(Ok(StreamChunk::Final {
            usage: reply.usage,
            continuation: reply.continuation,
        }));
        Ok(Box::pin(stream::iter(chunks)))
    }
}
