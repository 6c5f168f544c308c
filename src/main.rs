//! wasp 演示入口：跑一条完整流水线并打印事件
//!
//! 需求从命令行参数读取（缺省用内置示例）。有 OPENAI_API_KEY 或配置了
//! mock provider 时分别选择对应后端；密钥缺失时自动回落 mock 并告警。

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use wasp::catalog::Catalog;
use wasp::config::{load_config, AppConfig};
use wasp::external::{ArtifactStore, HttpSiteAnalyzer, InMemoryStore, SiteAnalyzer};
use wasp::llm::{GenerativeBackend, MockBackend, OpenAiBackend};
use wasp::pipeline::{GenerationRequest, RequestKind};
use wasp::{Engine, GenerationSession, PipelineOutcome};

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wasp=info")),
        )
        .init();
}

/// 按配置选择后端；openai 无密钥时回落 mock
fn create_backend(cfg: &AppConfig) -> Arc<dyn GenerativeBackend> {
    match cfg.llm.provider.as_str() {
        "openai" => {
            if std::env::var("OPENAI_API_KEY").is_ok() {
                return Arc::new(OpenAiBackend::new(
                    cfg.llm.base_url.as_deref(),
                    &cfg.llm.model,
                    None,
                ));
            }
            tracing::warn!("OPENAI_API_KEY not set, falling back to mock backend");
            Arc::new(demo_mock())
        }
        "mock" => Arc::new(demo_mock()),
        other => {
            tracing::warn!(provider = %other, "unknown provider, falling back to mock backend");
            Arc::new(demo_mock())
        }
    }
}

/// 演示用脚本回复：四步规划 + 一轮生成
fn demo_mock() -> MockBackend {
    MockBackend::scripted([
        r#"{"name": "quick-notes", "category": "productivity"}, "capabilities": ["storage"], "site_targets": []}"#,
        r#"]}"#,
        r#""popup", "confidence": 0.94}"#,
        r#"null}"#,
        r#"{"manifest.json": {"manifest_version": 3, "name": "Quick Notes", "version": "0.1.0", "action": {"default_popup": "popup.html"}, "permissions": ["storage"]}, "popup.html": "<!doctype html>\n<html><body><textarea id=\"notes\"></textarea><script src=\"popup.js\"></script></body></html>", "popup.js": "const area = document.getElementById('notes');\nchrome.storage.local.get('notes').then(({ notes }) => { area.value = notes || ''; });", "explanation": "Generated a quick-notes popup extension backed by chrome.storage."}"#,
    ])
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cfg = load_config(None).context("failed to load configuration")?;
    let catalog = match &cfg.app.catalog_path {
        Some(path) => Catalog::from_path(path).context("failed to load catalog")?,
        None => Catalog::builtin().context("builtin catalog is broken")?,
    };

    let feature_request = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "an extension to keep quick notes per site".to_string());

    let backend = create_backend(&cfg);
    let store: Arc<dyn ArtifactStore> = Arc::new(InMemoryStore::new());
    let site: Arc<dyn SiteAnalyzer> = Arc::new(
        HttpSiteAnalyzer::new(cfg.llm.request_timeout_secs)
            .map_err(anyhow::Error::msg)
            .context("failed to build site analyzer")?,
    );

    let ceiling = cfg.budget.ceiling;
    let engine = Engine::new(backend, Arc::clone(&store), Arc::new(catalog), cfg)
        .with_site_analyzer(site);

    let mut session = GenerationSession::with_random_id(ceiling);
    let request = GenerationRequest {
        feature_request,
        kind: RequestKind::Fresh,
        ..GenerationRequest::default()
    };

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!("event not serializable: {}", e),
            }
        }
    });

    let outcome = engine
        .run(&request, &mut session, Some(&tx), CancellationToken::new())
        .await;
    drop(tx);
    let _ = printer.await;

    match outcome {
        Ok(PipelineOutcome::Complete {
            report,
            explanation,
            usage_total,
        }) => {
            println!("\n{}", explanation);
            println!(
                "saved {} artifacts, {} units consumed",
                report.saved_count(),
                usage_total
            );
            for name in &report.saved {
                if let Ok(existing) = store.get_existing(&session.project_id).await {
                    if let Some(content) = existing.get(name) {
                        println!("\n===== {} =====\n{}", name, content);
                    }
                }
            }
            Ok(())
        }
        Ok(PipelineOutcome::Suspended(payload)) => {
            println!(
                "pipeline suspended ({:?}): missing {:?}",
                payload.kind, payload.missing
            );
            Ok(())
        }
        Err(e) => Err(anyhow::Error::new(e).context("pipeline failed")),
    }
}
