//! 生成后端抽象与实现

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::MockBackend;
pub use openai::OpenAiBackend;
pub use traits::{BackendReply, ChunkStream, GenerativeBackend, StreamChunk, UsageReport};
