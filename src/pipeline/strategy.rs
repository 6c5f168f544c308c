//! 策略选择器：由计划与既有产物决定生成方式与提示词
//!
//! 优先级固定：工具规划 > 模板 patch > （追加请求）增量 patch 或全量重发
//! > 全新生成。增量 patch 与全量重发之间按配置的产物规模边界切换，
//! 边界是可调策略而非固定规则。

use std::collections::BTreeMap;

use crate::catalog::Catalog;
use crate::config::PlanningSection;
use crate::pipeline::plan::{GenerationRequest, Plan, RequestKind, SurfaceType};
use crate::prompts;

/// 生成方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    /// 前置规划已显式选定修改提示词与文件子集，原样采用
    ToolPlanned,
    /// 高置信模板匹配，在模板产物上做 patch
    TemplatePatch,
    /// 追加请求且既有产物规模在边界内，只重发受影响文件
    IncrementalPatch,
    /// 追加请求但既有产物超界，整体重生成
    FullReplacement,
    /// 无模式无模板的全新生成
    FullGeneration,
}

/// 输出产物结构约束：按界面形态必需的产物
#[derive(Debug, Clone)]
pub struct OutputSchema {
    pub required: Vec<&'static str>,
}

impl OutputSchema {
    pub fn for_surface(surface: SurfaceType) -> Self {
        let required = match surface {
            SurfaceType::Popup => vec!["manifest.json", "popup.html", "popup.js"],
            SurfaceType::SidePanel => vec!["manifest.json", "panel.html", "panel.js"],
            SurfaceType::Overlay => vec!["manifest.json", "overlay.js"],
            SurfaceType::NewTab => vec!["manifest.json", "newtab.html", "newtab.js"],
            SurfaceType::Injected => vec!["manifest.json", "content.js"],
        };
        Self { required }
    }

    /// patch 类模式只要求改动集非空，不强求全量结构
    pub fn patch() -> Self {
        Self { required: vec![] }
    }

    /// 产物名集合中缺失的必需项
    pub fn missing_in<'s>(&self, names: &[&'s str]) -> Vec<&'static str> {
        self.required
            .iter()
            .filter(|r| !names.contains(*r))
            .copied()
            .collect()
    }
}

/// 选定的策略：生成方式、已填充的提示词、输出约束
#[derive(Debug, Clone)]
pub struct SelectedStrategy {
    pub mode: GenerationMode,
    pub prompt: String,
    pub schema: OutputSchema,
    /// TemplatePatch 时的模板起始产物
    pub template_files: BTreeMap<String, String>,
}

/// 选择生成策略并装配提示词
///
/// `context` 是生成阶段附件（站点分析、模式片段、API 文档）已拼好的文本段，可为空。
pub fn select(
    request: &GenerationRequest,
    plan: &Plan,
    context: &str,
    planning: &PlanningSection,
    catalog: &Catalog,
) -> SelectedStrategy {
    // 1. 前置规划已为追加请求选定提示词与文件子集，原样采用
    if request.kind == RequestKind::Incremental {
        if let Some(followup) = &request.followup {
            let files = subset(&request.prior_artifacts, &followup.files);
            return SelectedStrategy {
                mode: GenerationMode::ToolPlanned,
                prompt: prompts::with_rules(
                    &followup.prompt,
                    &[
                        ("REQUEST", request.feature_request.as_str()),
                        ("FILES", &digest_files(&files)),
                        ("CONTEXT", context),
                    ],
                ),
                schema: OutputSchema::patch(),
                template_files: BTreeMap::new(),
            };
        }
    }

    // 2. 高置信模板匹配
    if let Some(template) = &plan.template {
        if let Some(entry) = catalog.template(&template.name) {
            let files = entry.files.clone();
            let prompt = prompts::with_rules(
                prompts::TEMPLATE_PATCH,
                &[
                    ("REQUEST", request.feature_request.as_str()),
                    ("FILES", &digest_files(&files)),
                    ("CONTEXT", context),
                ],
            );
            return SelectedStrategy {
                mode: GenerationMode::TemplatePatch,
                prompt,
                schema: OutputSchema::patch(),
                template_files: files,
            };
        }
        tracing::warn!(template = %template.name, "template vanished from catalog, generating from scratch");
    }

    // 3. 无模板的追加请求：按产物规模选 patch 或全量重发
    if request.kind == RequestKind::Incremental {
        return select_incremental(
            &request.feature_request,
            context,
            &request.prior_artifacts,
            planning,
        );
    }

    // 4. 全新生成，提示词纯由形态决定
    SelectedStrategy {
        mode: GenerationMode::FullGeneration,
        prompt: prompts::with_rules(
            prompts::coding_prompt(plan.surface),
            &[
                ("REQUEST", request.feature_request.as_str()),
                ("CONTEXT", context),
            ],
        ),
        schema: OutputSchema::for_surface(plan.surface),
        template_files: BTreeMap::new(),
    }
}

/// 按声明的文件子集过滤既有产物；子集为空表示不限定
fn subset(
    prior: &BTreeMap<String, String>,
    files: &[String],
) -> BTreeMap<String, String> {
    if files.is_empty() {
        return prior.clone();
    }
    prior
        .iter()
        .filter(|(name, _)| files.contains(name))
        .map(|(name, content)| (name.clone(), content.clone()))
        .collect()
}

/// 追加请求：按既有产物规模在精确 patch 与全量重发之间切换
fn select_incremental(
    request: &str,
    context: &str,
    prior_artifacts: &BTreeMap<String, String>,
    planning: &PlanningSection,
) -> SelectedStrategy {
    let total_bytes: usize = prior_artifacts.values().map(String::len).sum();
    let within_bounds = prior_artifacts.len() <= planning.patch_max_files
        && total_bytes <= planning.patch_max_bytes;

    let (mode, template, schema) = if within_bounds {
        (GenerationMode::IncrementalPatch, prompts::INCREMENTAL_PATCH, OutputSchema::patch())
    } else {
        tracing::info!(
            files = prior_artifacts.len(),
            bytes = total_bytes,
            "prior artifacts exceed patch bounds, regenerating in full"
        );
        (GenerationMode::FullReplacement, prompts::FULL_REPLACEMENT, OutputSchema::patch())
    };

    SelectedStrategy {
        mode,
        prompt: prompts::with_rules(
            template,
            &[
                ("REQUEST", request),
                ("FILES", &digest_files(prior_artifacts)),
                ("CONTEXT", context),
            ],
        ),
        schema,
        template_files: BTreeMap::new(),
    }
}

/// 把产物映射拼成提示词中的文件段
fn digest_files(files: &BTreeMap<String, String>) -> String {
    files
        .iter()
        .map(|(name, content)| format!("=== {} ===\n{}", name, content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::plan::{FollowUpPlan, TemplateMatch};

    fn catalog() -> Catalog {
        Catalog::builtin().unwrap()
    }

    fn planning() -> PlanningSection {
        PlanningSection::default()
    }

    fn request(kind: RequestKind, text: &str, prior: BTreeMap<String, String>) -> GenerationRequest {
        GenerationRequest {
            feature_request: text.to_string(),
            kind,
            prior_artifacts: prior,
            ..GenerationRequest::default()
        }
    }

    #[test]
    fn test_followup_plan_taken_verbatim_with_file_subset() {
        let mut prior = BTreeMap::new();
        prior.insert("popup.js".to_string(), "old();".to_string());
        prior.insert("background.js".to_string(), "bg();".to_string());

        let mut req = request(RequestKind::Incremental, "wire the alarm", prior);
        req.followup = Some(FollowUpPlan {
            prompt: prompts::TOOL_FOLLOWUP.to_string(),
            files: vec!["background.js".to_string()],
        });

        let s = select(&req, &Plan::default(), "", &planning(), &catalog());
        assert_eq!(s.mode, GenerationMode::ToolPlanned);
        assert!(s.prompt.contains("wire the alarm"));
        assert!(s.prompt.contains("background.js"));
        // 子集之外的文件不进提示词
        assert!(!s.prompt.contains("popup.js"));
    }

    #[test]
    fn test_followup_plan_beats_patch_bounds() {
        let mut prior = BTreeMap::new();
        prior.insert("bundle.js".to_string(), "x".repeat(65 * 1024));

        let mut req = request(RequestKind::Incremental, "tweak", prior);
        req.followup = Some(FollowUpPlan {
            prompt: "planned change: {FILES} {RULES}".to_string(),
            files: vec![],
        });

        let s = select(&req, &Plan::default(), "", &planning(), &catalog());
        assert_eq!(s.mode, GenerationMode::ToolPlanned);
    }

    #[test]
    fn test_template_patch_loads_template_files() {
        let plan = Plan {
            template: Some(TemplateMatch {
                name: "notes-popup".to_string(),
                confidence: 0.9,
            }),
            ..Plan::default()
        };

        let req = request(RequestKind::Fresh, "notes", BTreeMap::new());
        let s = select(&req, &plan, "", &planning(), &catalog());
        assert_eq!(s.mode, GenerationMode::TemplatePatch);
        assert!(s.template_files.contains_key("manifest.json"));
        assert!(s.prompt.contains("popup.html"));
    }

    #[test]
    fn test_fresh_without_template_generates_in_full() {
        let plan = Plan {
            surface: SurfaceType::NewTab,
            ..Plan::default()
        };
        let req = request(RequestKind::Fresh, "focus page", BTreeMap::new());
        let s = select(&req, &plan, "", &planning(), &catalog());
        assert_eq!(s.mode, GenerationMode::FullGeneration);
        assert!(s.schema.required.contains(&"newtab.html"));
    }

    #[test]
    fn test_incremental_within_bounds_patches() {
        let mut prior = BTreeMap::new();
        prior.insert("manifest.json".to_string(), "{}".to_string());
        prior.insert("popup.js".to_string(), "let x = 1;".to_string());

        let req = request(RequestKind::Incremental, "add a clear button", prior);
        let s = select(&req, &Plan::default(), "", &planning(), &catalog());
        assert_eq!(s.mode, GenerationMode::IncrementalPatch);
        assert!(s.prompt.contains("popup.js"));
    }

    #[test]
    fn test_incremental_over_byte_bound_replaces_in_full() {
        let mut prior = BTreeMap::new();
        prior.insert("bundle.js".to_string(), "x".repeat(65 * 1024));

        let req = request(RequestKind::Incremental, "change colors", prior);
        let s = select(&req, &Plan::default(), "", &planning(), &catalog());
        assert_eq!(s.mode, GenerationMode::FullReplacement);
    }

    #[test]
    fn test_incremental_over_file_bound_replaces_in_full() {
        let mut prior = BTreeMap::new();
        for i in 0..13 {
            prior.insert(format!("f{}.js", i), "x".to_string());
        }
        let req = request(RequestKind::Incremental, "rename", prior);
        let s = select(&req, &Plan::default(), "", &planning(), &catalog());
        assert_eq!(s.mode, GenerationMode::FullReplacement);
    }

    #[test]
    fn test_schema_missing_detection() {
        let schema = OutputSchema::for_surface(SurfaceType::Popup);
        let missing = schema.missing_in(&["manifest.json", "popup.html"]);
        assert_eq!(missing, vec!["popup.js"]);
        assert!(OutputSchema::patch().missing_in(&[]).is_empty());
    }

    #[test]
    fn test_injected_schema_never_requires_popup() {
        let schema = OutputSchema::for_surface(SurfaceType::Injected);
        assert!(!schema.required.iter().any(|r| r.contains("popup")));
    }
}
