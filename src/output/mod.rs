//! 后端输出处理：结构化文档、修复解析、产物物化

pub mod document;
pub mod materialize;
pub mod repair;

pub use document::{StructuredDocument, EXPLANATION_KEY};
pub use materialize::{materialize, normalize_content, MaterializeReport};
pub use repair::{recover_document, recover_json};
