//! 参考目录：规划阶段使用的参考模式与模板清单
//!
//! 目录从 JSON 加载（配置指定路径，否则用内置数据）。模式提供可注入
//! 提示词的实现片段；模板按界面形态索引，供模板匹配阶段筛选。

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::core::EngineError;
use crate::pipeline::plan::SurfaceType;

/// 内置目录数据
const BUILTIN_CATALOG: &str = include_str!("../data/catalog.json");

/// 参考模式：一类已知需求及其实现要点
#[derive(Debug, Clone, Deserialize)]
pub struct ReferencePattern {
    pub name: String,
    pub category: String,
    pub description: String,
    /// 注入生成提示词的实现片段
    #[serde(default)]
    pub snippet: String,
    /// 该模式通常需要的能力
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// 模板：一套可直接 patch 的起始产物
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateEntry {
    pub name: String,
    pub surface: String,
    pub description: String,
    /// 产物名 -> 起始内容
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

impl TemplateEntry {
    pub fn surface_type(&self) -> SurfaceType {
        SurfaceType::parse(&self.surface)
    }
}

/// 完整目录
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Catalog {
    #[serde(default)]
    pub patterns: Vec<ReferencePattern>,
    #[serde(default)]
    pub templates: Vec<TemplateEntry>,
}

impl Catalog {
    /// 加载内置目录
    pub fn builtin() -> Result<Self, EngineError> {
        serde_json::from_str(BUILTIN_CATALOG)
            .map_err(|e| EngineError::Config(format!("builtin catalog is invalid: {}", e)))
    }

    /// 从文件加载目录
    pub fn from_path(path: &Path) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("cannot read catalog {}: {}", path.display(), e)))?;
        serde_json::from_str(&text)
            .map_err(|e| EngineError::Config(format!("catalog {} is invalid: {}", path.display(), e)))
    }

    /// 按名字查参考模式
    pub fn pattern(&self, name: &str) -> Option<&ReferencePattern> {
        self.patterns.iter().find(|p| p.name == name)
    }

    /// 某界面形态下可用的模板
    pub fn templates_for(&self, surface: SurfaceType) -> Vec<&TemplateEntry> {
        self.templates
            .iter()
            .filter(|t| t.surface_type() == surface)
            .collect()
    }

    /// 按名字查模板
    pub fn template(&self, name: &str) -> Option<&TemplateEntry> {
        self.templates.iter().find(|t| t.name == name)
    }

    /// 规划提示词用的模式清单（一行一个）
    pub fn pattern_digest(&self) -> String {
        self.patterns
            .iter()
            .map(|p| format!("- {} [{}]: {}", p.name, p.category, p.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// 规划提示词用的模板清单（限定形态）
    pub fn template_digest(&self, surface: SurfaceType) -> String {
        self.templates_for(surface)
            .iter()
            .map(|t| format!("- {}: {}", t.name, t.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
