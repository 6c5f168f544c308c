//! 规划器：把自然语言需求转成结构化计划
//!
//! 四个分析步骤：模式匹配与外部资源需求并发执行，随后串行做形态选择，
//! 最后在形态确定后做模板匹配（该形态无模板则直接跳过，不发调用）。
//! 单个分析失败降级为保守默认值并继续，预算类错误原样上抛终止规划。

use std::sync::Arc;

use serde_json::Value;

use crate::catalog::Catalog;
use crate::core::EngineError;
use crate::llm::GenerativeBackend;
use crate::output::repair;
use crate::pipeline::invoker::Invoker;
use crate::pipeline::plan::{ApiNeed, PatternMatch, Plan, SurfaceType, TemplateMatch};
use crate::prompts;

/// 形态置信度低于该值时计划进入待确认状态
pub const SURFACE_CONFIDENCE_MIN: f32 = 0.7;
/// 模板匹配置信度低于该值时按无匹配处理
pub const TEMPLATE_CONFIDENCE_MIN: f32 = 0.7;

pub struct Planner {
    backend: Arc<dyn GenerativeBackend>,
    catalog: Arc<Catalog>,
}

impl Planner {
    pub fn new(backend: Arc<dyn GenerativeBackend>, catalog: Arc<Catalog>) -> Self {
        Self { backend, catalog }
    }

    /// 执行完整规划
    pub async fn plan(&self, request: &str, invoker: &Invoker<'_>) -> Result<Plan, EngineError> {
        let mut plan = Plan::default();

        // 模式匹配与外部资源需求互不依赖，并发执行
        let (pattern_result, external_result) = tokio::join!(
            self.analyze_pattern(request, invoker),
            self.analyze_external(request, invoker),
        );

        match pattern_result {
            Ok((pattern, capabilities, sites)) => {
                plan.matched_pattern = pattern;
                plan.capabilities = capabilities;
                plan.site_targets = sites;
            }
            Err(e) => return Err(e),
        }
        plan.external_apis = external_result?;

        self.enrich_from_catalog(&mut plan);
        imply_capabilities(&mut plan.capabilities);

        let (surface, confidence) = self.select_surface(request, &plan.capabilities, invoker).await?;
        plan.surface = surface;
        plan.surface_confidence = confidence;

        plan.template = self.match_template(request, plan.surface, invoker).await?;

        Ok(plan)
    }

    /// 模式匹配：识别参考模式、能力与目标站点；分析失败降级为空计划片段
    async fn analyze_pattern(
        &self,
        request: &str,
        invoker: &Invoker<'_>,
    ) -> Result<(Option<PatternMatch>, Vec<String>, Vec<String>), EngineError> {
        let prompt = prompts::render(
            prompts::PATTERN_ANALYSIS,
            &[("REQUEST", request), ("PATTERNS", &self.catalog.pattern_digest())],
        );

        let value = match self
            .planning_call(invoker, &prompt, prompts::PATTERN_ANALYSIS_PREFILL)
            .await?
        {
            Some(value) => value,
            None => return Ok((None, Vec::new(), Vec::new())),
        };

        let pattern = value.get("matched_pattern").and_then(|p| {
            let name = p.get("name")?.as_str()?.to_string();
            Some(PatternMatch {
                name,
                category: p
                    .get("category")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                snippet: String::new(),
            })
        });
        let capabilities = string_list(&value, "capabilities");
        let sites = string_list(&value, "site_targets");

        Ok((pattern, capabilities, sites))
    }

    /// 外部资源需求：过滤平台内建接口，只保留真实外部 API
    async fn analyze_external(
        &self,
        request: &str,
        invoker: &Invoker<'_>,
    ) -> Result<Vec<ApiNeed>, EngineError> {
        let prompt = prompts::render(prompts::EXTERNAL_NEEDS, &[("REQUEST", request)]);

        let value = match self
            .planning_call(invoker, &prompt, prompts::EXTERNAL_NEEDS_PREFILL)
            .await?
        {
            Some(value) => value,
            None => return Ok(Vec::new()),
        };

        let needs = value
            .get("external_apis")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let need = ApiNeed {
                            name: item.get("name")?.as_str()?.to_string(),
                            purpose: item
                                .get("purpose")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            endpoint_url: item
                                .get("endpoint_url")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                        };
                        // 平台内建接口不算外部依赖
                        if need.name.starts_with("chrome.") || need.endpoint_url.starts_with("chrome.") {
                            return None;
                        }
                        Some(need)
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(needs)
    }

    /// 形态选择：非法或未知形态回落 popup；分析失败同样回落并置零置信度
    async fn select_surface(
        &self,
        request: &str,
        capabilities: &[String],
        invoker: &Invoker<'_>,
    ) -> Result<(SurfaceType, f32), EngineError> {
        let prompt = prompts::render(
            prompts::SURFACE_SELECTION,
            &[("REQUEST", request), ("CAPABILITIES", &capabilities.join(", "))],
        );

        let value = match self
            .planning_call(invoker, &prompt, prompts::SURFACE_SELECTION_PREFILL)
            .await?
        {
            Some(value) => value,
            None => return Ok((SurfaceType::Popup, 0.0)),
        };

        let surface = value
            .get("surface")
            .and_then(Value::as_str)
            .map(SurfaceType::parse)
            .unwrap_or(SurfaceType::Popup);
        let confidence = value
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.0) as f32;

        Ok((surface, confidence))
    }

    /// 模板匹配：该形态无候选模板时不发调用直接返回 None
    async fn match_template(
        &self,
        request: &str,
        surface: SurfaceType,
        invoker: &Invoker<'_>,
    ) -> Result<Option<TemplateMatch>, EngineError> {
        let digest = self.catalog.template_digest(surface);
        if digest.is_empty() {
            tracing::debug!(surface = surface.as_str(), "no templates for surface, skipping match");
            return Ok(None);
        }

        let prompt = prompts::render(
            prompts::TEMPLATE_MATCHING,
            &[
                ("REQUEST", request),
                ("SURFACE", surface.as_str()),
                ("TEMPLATES", &digest),
            ],
        );

        let value = match self
            .planning_call(invoker, &prompt, prompts::TEMPLATE_MATCHING_PREFILL)
            .await?
        {
            Some(value) => value,
            None => return Ok(None),
        };

        let matched = value.get("matched_template").and_then(|m| {
            let name = m.get("name")?.as_str()?.to_string();
            let confidence = m.get("confidence").and_then(Value::as_f64).unwrap_or(0.0) as f32;
            Some(TemplateMatch { name, confidence })
        });

        let matched = match matched {
            Some(m) if m.confidence >= TEMPLATE_CONFIDENCE_MIN => {
                // 名字必须真实存在于目录
                if self.catalog.template(&m.name).is_some() {
                    Some(m)
                } else {
                    tracing::warn!(template = %m.name, "matched template not in catalog, ignoring");
                    None
                }
            }
            Some(m) => {
                tracing::debug!(
                    template = %m.name,
                    confidence = m.confidence,
                    "template confidence below threshold"
                );
                None
            }
            None => None,
        };

        Ok(matched)
    }

    /// 单次规划调用：发前缀约束的请求并恢复 JSON
    ///
    /// 后端失败或输出不可恢复时返回 Ok(None) 让调用方降级；
    /// 预算与取消错误原样上抛。
    async fn planning_call(
        &self,
        invoker: &Invoker<'_>,
        prompt: &str,
        prefill: &str,
    ) -> Result<Option<Value>, EngineError> {
        let reply = match invoker.invoke(self.backend.as_ref(), prompt, None).await {
            Ok(reply) => reply,
            Err(e @ EngineError::BudgetExceeded { .. }) | Err(e @ EngineError::Cancelled) => {
                return Err(e)
            }
            Err(e) => {
                tracing::warn!("planning call degraded: {}", e);
                return Ok(None);
            }
        };

        match repair::recover_json(&format!("{}{}", prefill, reply.text)) {
            Ok(value) => Ok(Some(value)),
            Err(_) => {
                tracing::warn!("planning output unrecoverable, using defaults");
                Ok(None)
            }
        }
    }

    /// 用目录数据补全匹配到的模式（片段、类别、能力以目录为准）
    fn enrich_from_catalog(&self, plan: &mut Plan) {
        let matched = match plan.matched_pattern.take() {
            Some(m) => m,
            None => return,
        };
        match self.catalog.pattern(&matched.name) {
            Some(entry) => {
                for cap in &entry.capabilities {
                    if !plan.capabilities.contains(cap) {
                        plan.capabilities.push(cap.clone());
                    }
                }
                plan.matched_pattern = Some(PatternMatch {
                    name: entry.name.clone(),
                    category: entry.category.clone(),
                    snippet: entry.snippet.clone(),
                });
            }
            None => {
                tracing::warn!(pattern = %matched.name, "matched pattern not in catalog, dropping");
            }
        }
    }
}

/// 能力蕴含规则：某些能力要求配套能力一并声明
fn imply_capabilities(capabilities: &mut Vec<String>) {
    if capabilities.iter().any(|c| c == "tabCapture")
        && !capabilities.iter().any(|c| c == "offscreen")
    {
        capabilities.push("offscreen".to_string());
    }
    capabilities.sort();
    capabilities.dedup();
}

fn string_list(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::BudgetTracker;
    use crate::llm::MockBackend;
    use tokio_util::sync::CancellationToken;

    fn make_invoker(budget: &BudgetTracker) -> Invoker<'_> {
        Invoker::new(budget, true, CancellationToken::new())
    }

    fn scripted_planner(replies: Vec<&str>) -> Planner {
        let backend: Arc<dyn GenerativeBackend> = Arc::new(MockBackend::scripted(replies));
        Planner::new(backend, Arc::new(Catalog::builtin().unwrap()))
    }

    #[tokio::test]
    async fn test_full_planning_happy_path() {
        // 调用顺序：模式匹配 / 外部资源（并发，脚本按取用顺序消费）、形态、模板
        let planner = scripted_planner(vec![
            r#"{"name": "quick-notes", "category": "productivity"}, "capabilities": ["storage"], "site_targets": []}"#,
            r#"{"name": "weather", "purpose": "forecast", "endpoint_url": "https://api.example.com"}]}"#,
            r#""popup", "confidence": 0.92}"#,
            r#"{"name": "notes-popup", "confidence": 0.88}}"#,
        ]);
        let budget = BudgetTracker::new(100_000);
        let plan = planner.plan("keep notes per site", &make_invoker(&budget)).await.unwrap();

        let pattern = plan.matched_pattern.unwrap();
        assert_eq!(pattern.name, "quick-notes");
        assert!(!pattern.snippet.is_empty());
        assert_eq!(plan.surface, SurfaceType::Popup);
        assert!(plan.surface_confidence > 0.9);
        assert_eq!(plan.template.unwrap().name, "notes-popup");
        assert_eq!(plan.external_apis.len(), 1);
        assert!(budget.total() > 0);
    }

    #[tokio::test]
    async fn test_platform_builtins_filtered_from_external_apis() {
        let planner = scripted_planner(vec![
            r#"null, "capabilities": [], "site_targets": []}"#,
            r#"{"name": "chrome.storage", "purpose": "persist", "endpoint_url": "chrome.storage"}, {"name": "geocode", "purpose": "lookup", "endpoint_url": "https://geo.example.com"}]}"#,
            r#""popup", "confidence": 0.9}"#,
            r#"null}"#,
        ]);
        let budget = BudgetTracker::new(100_000);
        let plan = planner.plan("store settings", &make_invoker(&budget)).await.unwrap();

        assert_eq!(plan.external_apis.len(), 1);
        assert_eq!(plan.external_apis[0].name, "geocode");
    }

    #[tokio::test]
    async fn test_low_template_confidence_means_no_match() {
        let planner = scripted_planner(vec![
            r#"null, "capabilities": [], "site_targets": []}"#,
            r#"]}"#,
            r#""popup", "confidence": 0.9}"#,
            r#"{"name": "notes-popup", "confidence": 0.4}}"#,
        ]);
        let budget = BudgetTracker::new(100_000);
        let plan = planner.plan("something unusual", &make_invoker(&budget)).await.unwrap();
        assert!(plan.template.is_none());
    }

    #[tokio::test]
    async fn test_unparseable_analysis_degrades_to_defaults() {
        let planner = scripted_planner(vec![
            "total nonsense without any json",
            "also nonsense",
            "still nonsense",
            "nonsense again",
        ]);
        let budget = BudgetTracker::new(100_000);
        let plan = planner.plan("anything", &make_invoker(&budget)).await.unwrap();

        assert!(plan.matched_pattern.is_none());
        assert!(plan.external_apis.is_empty());
        assert_eq!(plan.surface, SurfaceType::Popup);
        assert_eq!(plan.surface_confidence, 0.0);
        assert!(plan.template.is_none());
    }

    #[test]
    fn test_capability_implication() {
        let mut caps = vec!["tabCapture".to_string()];
        imply_capabilities(&mut caps);
        assert!(caps.iter().any(|c| c == "offscreen"));

        // 幂等
        let before = caps.clone();
        imply_capabilities(&mut caps);
        assert_eq!(caps, before);
    }
}
