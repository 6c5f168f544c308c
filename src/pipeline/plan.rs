//! 规划数据模型：计划、请求、挂起时用户补充的输入
//!
//! 这里的类型贯穿整条流水线，全部可序列化，便于挂起载荷原样往返。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 界面形态：产物最终呈现的宿主位置（封闭枚举）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceType {
    #[default]
    Popup,
    SidePanel,
    Overlay,
    NewTab,
    /// 注入页面内的 UI（等价于内容脚本渲染的界面）
    Injected,
}

impl SurfaceType {
    /// 解析规划输出里的形态字符串；两套命名习惯都接受，未知值回落 Popup 并告警
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "popup" => Self::Popup,
            "sidepanel" | "side_panel" => Self::SidePanel,
            "overlay" => Self::Overlay,
            "newtab" | "new_tab" => Self::NewTab,
            "injected" | "content_script_ui" => Self::Injected,
            other => {
                tracing::warn!(surface = %other, "unknown surface type, falling back to popup");
                Self::Popup
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Popup => "popup",
            Self::SidePanel => "side_panel",
            Self::Overlay => "overlay",
            Self::NewTab => "new_tab",
            Self::Injected => "injected",
        }
    }
}

/// 请求类别：全新生成还是在既有产物上追加
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    #[default]
    Fresh,
    Incremental,
}

/// 需求与目录中参考模式的匹配结果
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PatternMatch {
    pub name: String,
    pub category: String,
    /// 目录中随模式附带的实现片段，注入生成提示词
    #[serde(default)]
    pub snippet: String,
}

/// 规划识别出的外部 API 需求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiNeed {
    pub name: String,
    pub purpose: String,
    #[serde(default)]
    pub endpoint_url: String,
}

/// 模板匹配结果（置信度低于阈值时不产生）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateMatch {
    pub name: String,
    pub confidence: f32,
}

/// 规划阶段产出的完整计划
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Plan {
    pub matched_pattern: Option<PatternMatch>,
    /// 归一化后的能力需求列表
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// 过滤掉平台内建接口后剩下的真实外部 API 需求
    #[serde(default)]
    pub external_apis: Vec<ApiNeed>,
    /// 需求中提到的目标站点
    #[serde(default)]
    pub site_targets: Vec<String>,
    #[serde(default)]
    pub surface: SurfaceType,
    #[serde(default)]
    pub surface_confidence: f32,
    pub template: Option<TemplateMatch>,
}

/// 用户为某个外部 API 需求提供的接入配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub name: String,
    pub endpoint: String,
    #[serde(default)]
    pub doc_link: String,
}

/// 恢复挂起会话时用户补充的输入
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResumeInput {
    pub site_url: Option<String>,
    /// 用户明确选择跳过站点分析
    #[serde(default)]
    pub skip_site_analysis: bool,
    pub api_configs: Option<Vec<ApiConfig>>,
    /// 用户确认或改选的界面形态
    pub surface_override: Option<SurfaceType>,
}

/// 会话内已积累的用户补充输入（逐次恢复时合并）
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SuppliedInputs {
    pub site_url: Option<String>,
    pub skip_site_analysis: bool,
    /// None = 从未提供；Some(vec![]) = 用户显式全部跳过
    pub api_configs: Option<Vec<ApiConfig>>,
    pub surface_confirmed: bool,
}

impl SuppliedInputs {
    /// 合并一次恢复输入；形态改选会清空模板匹配（模板按形态索引，改选后失效）
    pub fn absorb(&mut self, input: ResumeInput, plan: &mut Plan) {
        if let Some(url) = input.site_url {
            self.site_url = Some(url);
        }
        if input.skip_site_analysis {
            self.skip_site_analysis = true;
        }
        if let Some(configs) = input.api_configs {
            self.api_configs = Some(configs);
        }
        if let Some(surface) = input.surface_override {
            if surface != plan.surface {
                plan.template = None;
            }
            plan.surface = surface;
            plan.surface_confidence = 1.0;
            self.surface_confirmed = true;
        }
    }
}

/// 前置规划步骤为追加请求显式选定的修改提示词与文件子集
///
/// 由外层调用方的跟进规划产生；存在时策略选择器原样采用，不再自行选择。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUpPlan {
    /// 已选定的修改提示词（可含 {REQUEST}/{FILES}/{CONTEXT} 占位符）
    pub prompt: String,
    /// 声明的受影响文件子集；空表示不限定
    #[serde(default)]
    pub files: Vec<String>,
}

/// 生成阶段附件：站点分析文本、API 文档等
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub content: String,
}

/// 进入流水线的一次生成请求
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub feature_request: String,
    pub kind: RequestKind,
    /// 增量请求时的既有产物（产物名 -> 内容）
    pub prior_artifacts: BTreeMap<String, String>,
    pub attachments: Vec<Attachment>,
    /// 追加请求的前置规划结果（若有）
    pub followup: Option<FollowUpPlan>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_parse_both_naming_families() {
        assert_eq!(SurfaceType::parse("side_panel"), SurfaceType::SidePanel);
        assert_eq!(SurfaceType::parse("sidepanel"), SurfaceType::SidePanel);
        assert_eq!(SurfaceType::parse("content_script_ui"), SurfaceType::Injected);
        assert_eq!(SurfaceType::parse("NEW_TAB"), SurfaceType::NewTab);
    }

    #[test]
    fn test_surface_parse_unknown_falls_back_to_popup() {
        assert_eq!(SurfaceType::parse("hologram"), SurfaceType::Popup);
    }

    #[test]
    fn test_absorb_surface_override_clears_template() {
        let mut plan = Plan {
            surface: SurfaceType::Popup,
            template: Some(TemplateMatch {
                name: "notes-popup".to_string(),
                confidence: 0.9,
            }),
            ..Plan::default()
        };
        let mut supplied = SuppliedInputs::default();

        supplied.absorb(
            ResumeInput {
                surface_override: Some(SurfaceType::SidePanel),
                ..ResumeInput::default()
            },
            &mut plan,
        );

        assert_eq!(plan.surface, SurfaceType::SidePanel);
        assert!(plan.template.is_none());
        assert!(supplied.surface_confirmed);
        assert_eq!(plan.surface_confidence, 1.0);
    }

    #[test]
    fn test_absorb_same_surface_keeps_template() {
        let mut plan = Plan {
            surface: SurfaceType::Popup,
            template: Some(TemplateMatch {
                name: "notes-popup".to_string(),
                confidence: 0.9,
            }),
            ..Plan::default()
        };
        let mut supplied = SuppliedInputs::default();

        supplied.absorb(
            ResumeInput {
                surface_override: Some(SurfaceType::Popup),
                ..ResumeInput::default()
            },
            &mut plan,
        );

        assert!(plan.template.is_some());
    }
}
