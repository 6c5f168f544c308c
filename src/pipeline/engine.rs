//! 生成编排引擎：串起 规划 -> 门 -> 策略 -> 调用 -> 修复 -> 物化
//!
//! 引擎自身无全局状态，所有会话状态显式存放在 GenerationSession 里，
//! 同一个引擎实例可并发服务多个会话。进度经可选的事件通道对外发布。

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::catalog::Catalog;
use crate::config::AppConfig;
use crate::core::{EngineError, GenerationSession};
use crate::external::{ArtifactStore, ResourceDocs, SiteAnalyzer};
use crate::llm::{GenerativeBackend, StreamChunk};
use crate::output::{self, repair, MaterializeReport, StructuredDocument};
use crate::pipeline::events::{send_event, PipelineEvent};
use crate::pipeline::gate::{self, GateDecision, SuspendPayload};
use crate::pipeline::invoker::Invoker;
use crate::pipeline::plan::{Attachment, GenerationRequest, Plan, RequestKind, ResumeInput};
use crate::pipeline::planner::Planner;
use crate::pipeline::strategy::{self, GenerationMode, SelectedStrategy};

/// 一次流水线运行的结果
#[derive(Debug)]
pub enum PipelineOutcome {
    /// 生成完成且产物已落盘
    Complete {
        report: MaterializeReport,
        explanation: String,
        usage_total: u64,
    },
    /// 因计划缺口挂起，载荷可用于后续恢复
    Suspended(SuspendPayload),
}

pub struct Engine {
    backend: Arc<dyn GenerativeBackend>,
    store: Arc<dyn ArtifactStore>,
    site: Option<Arc<dyn SiteAnalyzer>>,
    docs: Option<Arc<dyn ResourceDocs>>,
    catalog: Arc<Catalog>,
    cfg: AppConfig,
}

impl Engine {
    pub fn new(
        backend: Arc<dyn GenerativeBackend>,
        store: Arc<dyn ArtifactStore>,
        catalog: Arc<Catalog>,
        cfg: AppConfig,
    ) -> Self {
        Self {
            backend,
            store,
            site: None,
            docs: None,
            catalog,
            cfg,
        }
    }

    pub fn with_site_analyzer(mut self, site: Arc<dyn SiteAnalyzer>) -> Self {
        self.site = Some(site);
        self
    }

    pub fn with_resource_docs(mut self, docs: Arc<dyn ResourceDocs>) -> Self {
        self.docs = Some(docs);
        self
    }

    /// 运行一次完整流水线；失败时会先发 Failed 事件再返回错误
    pub async fn run(
        &self,
        request: &GenerationRequest,
        session: &mut GenerationSession,
        event_tx: Option<&UnboundedSender<PipelineEvent>>,
        cancel: CancellationToken,
    ) -> Result<PipelineOutcome, EngineError> {
        match self.run_inner(request, session, event_tx, cancel).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                send_event(
                    event_tx,
                    PipelineEvent::Failed {
                        kind: e.kind().to_string(),
                        message: e.to_string(),
                    },
                );
                Err(e)
            }
        }
    }

    /// 用用户补充的输入恢复挂起的会话，不重新规划
    pub async fn resume(
        &self,
        request: &GenerationRequest,
        session: &mut GenerationSession,
        input: ResumeInput,
        event_tx: Option<&UnboundedSender<PipelineEvent>>,
        cancel: CancellationToken,
    ) -> Result<PipelineOutcome, EngineError> {
        if let Some(plan) = session.plan.as_mut() {
            session.supplied.absorb(input, plan);
        } else {
            tracing::warn!("resume called on a session without a plan, input ignored");
        }
        self.run(request, session, event_tx, cancel).await
    }

    async fn run_inner(
        &self,
        request: &GenerationRequest,
        session: &mut GenerationSession,
        event_tx: Option<&UnboundedSender<PipelineEvent>>,
        cancel: CancellationToken,
    ) -> Result<PipelineOutcome, EngineError> {
        if session.budget.exhausted() {
            return Err(EngineError::BudgetExceeded {
                total: session.budget.total(),
            });
        }

        let invoker = Invoker::new(&session.budget, self.cfg.budget.precheck, cancel.clone());

        // 规划只做一次；恢复的会话带着计划进来，不重复消耗预算。
        // 追加请求不重推形态与站点目标，缺计划时直接用最小默认计划。
        if session.plan.is_none() {
            if request.kind == RequestKind::Incremental {
                tracing::debug!("incremental request without a plan, using minimal defaults");
                session.plan = Some(Plan::default());
            } else {
                let planner = Planner::new(Arc::clone(&self.backend), Arc::clone(&self.catalog));
                let plan = planner.plan(&request.feature_request, &invoker).await?;
                send_event(event_tx, PipelineEvent::PlanReady { plan: plan.clone() });
                session.plan = Some(plan);
            }
        }
        // plan 在上方保证已填充
        let plan = match session.plan.clone() {
            Some(plan) => plan,
            None => return Err(EngineError::Config("session has no plan".to_string())),
        };

        match gate::evaluate(request.kind, &plan, &session.supplied, session.budget.total()) {
            GateDecision::Proceed => {}
            GateDecision::Suspend(payload) => {
                send_event(
                    event_tx,
                    PipelineEvent::Suspended {
                        payload: payload.clone(),
                    },
                );
                return Ok(PipelineOutcome::Suspended(payload));
            }
        }

        let context = self.assemble_context(request, session, &plan).await;
        let selected = strategy::select(request, &plan, &context, &self.cfg.planning, &self.catalog);

        session.turn += 1;
        send_event(
            event_tx,
            PipelineEvent::TurnStarted {
                turn: session.turn,
                mode: mode_name(selected.mode).to_string(),
            },
        );

        let (document, continuation) = self
            .generate(&selected, session.continuation.clone(), &invoker, event_tx, &cancel)
            .await?;
        if continuation.is_some() {
            session.continuation = continuation;
        }

        self.check_schema(&selected, &document);

        let merged = merge_with_base(&selected, document);
        let report = output::materialize(&self.store, &session.project_id, &merged.0).await?;
        send_event(
            event_tx,
            PipelineEvent::ArtifactsSaved {
                saved: report.saved.clone(),
                skipped: report.skipped.clone(),
            },
        );

        send_event(
            event_tx,
            PipelineEvent::Completed {
                explanation: merged.1.clone(),
            },
        );

        Ok(PipelineOutcome::Complete {
            report,
            explanation: merged.1,
            usage_total: session.budget.total(),
        })
    }

    /// 流式生成并累积正文；取消时丢弃已累积内容，不做任何物化
    ///
    /// 返回恢复出的文档与后端更新的续写句柄。
    async fn generate(
        &self,
        selected: &SelectedStrategy,
        continuation: Option<String>,
        invoker: &Invoker<'_>,
        event_tx: Option<&UnboundedSender<PipelineEvent>>,
        cancel: &CancellationToken,
    ) -> Result<(StructuredDocument, Option<String>), EngineError> {
        let mut stream = invoker
            .invoke_stream(
                self.backend.as_ref(),
                &selected.prompt,
                continuation.as_deref(),
            )
            .await?;

        let mut accumulated = String::new();
        let mut new_continuation = None;
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                chunk = stream.next() => chunk,
            };
            let chunk = match chunk {
                Some(Ok(chunk)) => chunk,
                Some(Err(message)) => return Err(invoker.classify_stream_error(message)),
                None => break,
            };
            match chunk {
                StreamChunk::Thinking(text) => {
                    send_event(event_tx, PipelineEvent::Thinking { text });
                }
                StreamChunk::Partial(text) => {
                    send_event(
                        event_tx,
                        PipelineEvent::PartialText { text: text.clone() },
                    );
                    accumulated.push_str(&text);
                }
                StreamChunk::Final {
                    usage,
                    continuation,
                } => {
                    let total = invoker.record_final(&usage);
                    send_event(
                        event_tx,
                        PipelineEvent::UsageUpdated {
                            call_units: usage.total_units,
                            session_total: total,
                        },
                    );
                    if continuation.is_some() {
                        new_continuation = continuation;
                    }
                }
            }
        }

        let document = repair::recover_document(&accumulated, None)?;
        Ok((document, new_continuation))
    }

    /// 装配生成阶段的上下文段：请求附件、站点分析、API 配置与文档
    async fn assemble_context(
        &self,
        request: &GenerationRequest,
        session: &GenerationSession,
        plan: &Plan,
    ) -> String {
        let mut sections: Vec<String> = Vec::new();

        // 命中的参考模式以实现片段形式进入上下文
        if let Some(pattern) = &plan.matched_pattern {
            if !pattern.snippet.is_empty() {
                sections.push(format!(
                    "--- reference pattern: {} ---\n{}",
                    pattern.name, pattern.snippet
                ));
            }
        }
        if !plan.capabilities.is_empty() {
            sections.push(format!("Required capabilities: {}", plan.capabilities.join(", ")));
        }

        for Attachment { name, content } in &request.attachments {
            sections.push(format!("--- {} ---\n{}", name, content));
        }

        if let (Some(url), Some(site)) = (&session.supplied.site_url, &self.site) {
            match site.analyze(url).await {
                Ok(analysis) => {
                    sections.push(format!(
                        "--- site analysis of {} (HTTP {}) ---\n{}",
                        url, analysis.status_code, analysis.text
                    ));
                }
                // 站点分析是增强信息，失败降级不阻塞生成
                Err(e) => tracing::warn!(url = %url, "site analysis failed, continuing without: {}", e),
            }
        }

        let api_configs = session.supplied.api_configs.as_deref().unwrap_or_default();
        for api in api_configs {
            let mut block = format!("--- API: {} ---\nendpoint: {}", api.name, api.endpoint);
            if !api.doc_link.is_empty() {
                block.push_str(&format!("\ndocs: {}", api.doc_link));
            }
            if let Some(docs) = &self.docs {
                if let Some(doc) = docs.lookup(&api.name) {
                    block.push('\n');
                    block.push_str(&doc);
                }
            }
            sections.push(block);
        }
        if api_configs.is_empty() {
            if let Some(docs) = &self.docs {
                for need in &plan.external_apis {
                    if let Some(doc) = docs.lookup(&need.name) {
                        sections.push(format!("--- API: {} ---\n{}", need.name, doc));
                    }
                }
            }
        }

        sections.join("\n\n")
    }

    /// 结构约束校验：缺必需产物只告警，不阻塞物化
    fn check_schema(&self, selected: &SelectedStrategy, document: &StructuredDocument) {
        let names = document.artifact_names();
        let missing = selected.schema.missing_in(&names);
        if !missing.is_empty() {
            tracing::warn!(missing = ?missing, "generated document is missing required artifacts");
        }
    }
}

/// 模板 patch 模式下把模板起始产物与改动集合并（改动优先）
fn merge_with_base(
    selected: &SelectedStrategy,
    document: StructuredDocument,
) -> (StructuredDocument, String) {
    let explanation = document.explanation.clone();
    if selected.template_files.is_empty() {
        return (document, explanation);
    }

    let mut artifacts: BTreeMap<String, serde_json::Value> = selected
        .template_files
        .iter()
        .map(|(name, content)| (name.clone(), serde_json::Value::String(content.clone())))
        .collect();
    for (name, value) in document.artifacts {
        artifacts.insert(name, value);
    }

    (
        StructuredDocument {
            artifacts,
            explanation: explanation.clone(),
        },
        explanation,
    )
}

fn mode_name(mode: GenerationMode) -> &'static str {
    match mode {
        GenerationMode::ToolPlanned => "tool_planned",
        GenerationMode::TemplatePatch => "template_patch",
        GenerationMode::IncrementalPatch => "incremental_patch",
        GenerationMode::FullReplacement => "full_replacement",
        GenerationMode::FullGeneration => "full_generation",
    }
}
