//! 结构化文档：产物名 -> 内容 的映射 + 一个自由文本 explanation 字段

use std::collections::BTreeMap;

use serde_json::Value;

/// explanation 保留字段名（不作为产物物化）
pub const EXPLANATION_KEY: &str = "explanation";

/// 从后端输出恢复出的结构化文档。键在文档内唯一，顺序无意义。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuredDocument {
    /// 产物名 -> 内容（字符串或结构化值）
    pub artifacts: BTreeMap<String, Value>,
    pub explanation: String,
}

impl StructuredDocument {
    /// 从顶层 JSON 对象拆出 explanation 与产物映射；非对象返回 None
    pub fn from_value(value: Value) -> Option<Self> {
        let map = match value {
            Value::Object(map) => map,
            _ => return None,
        };

        let mut artifacts = BTreeMap::new();
        let mut explanation = String::new();
        for (key, val) in map {
            if key == EXPLANATION_KEY {
                if let Value::String(s) = val {
                    explanation = s;
                }
            } else {
                artifacts.insert(key, val);
            }
        }

        Some(Self {
            artifacts,
            explanation,
        })
    }

    pub fn artifact_names(&self) -> Vec<&str> {
        self.artifacts.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}
