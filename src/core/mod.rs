//! 核心类型：错误分类与会话

pub mod error;
pub mod session;

pub use error::EngineError;
pub use session::GenerationSession;
