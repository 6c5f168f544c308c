//! 外部协作方抽象：产物存储、站点分析、资源文档
//!
//! 流水线只依赖这里的 trait；进程内实现用于测试与演示，HTTP 实现用于
//! 真实站点抓取。与后端 trait 一致，错误以 String 形式上抛，由调用方
//! 决定降级还是终止。

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

/// 产物存储：按 (project_id, 产物名) 幂等 upsert
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// 写入或覆盖一个产物
    async fn upsert(&self, project_id: &str, name: &str, content: &str) -> Result<(), String>;

    /// 取某项目当前全部产物（产物名 -> 内容）
    async fn get_existing(&self, project_id: &str) -> Result<BTreeMap<String, String>, String>;
}

/// 站点分析结果
#[derive(Debug, Clone)]
pub struct SiteAnalysis {
    pub text: String,
    pub status_code: u16,
}

/// 站点分析：抓取目标页面内容供生成阶段作为附件
#[async_trait]
pub trait SiteAnalyzer: Send + Sync {
    async fn analyze(&self, url: &str) -> Result<SiteAnalysis, String>;
}

/// 资源文档：按外部 API 名查接入说明，供生成提示词引用
pub trait ResourceDocs: Send + Sync {
    fn lookup(&self, api_name: &str) -> Option<String>;
}

/// 进程内产物存储，带写入时间戳
#[derive(Default)]
pub struct InMemoryStore {
    entries: Mutex<BTreeMap<(String, String), StoredArtifact>>,
}

#[derive(Debug, Clone)]
struct StoredArtifact {
    content: String,
    updated_at: DateTime<Utc>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 某产物的最近写入时间（测试与演示用）
    pub async fn updated_at(&self, project_id: &str, name: &str) -> Option<DateTime<Utc>> {
        let entries = self.entries.lock().await;
        entries
            .get(&(project_id.to_string(), name.to_string()))
            .map(|a| a.updated_at)
    }
}

#[async_trait]
impl ArtifactStore for InMemoryStore {
    async fn upsert(&self, project_id: &str, name: &str, content: &str) -> Result<(), String> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            (project_id.to_string(), name.to_string()),
            StoredArtifact {
                content: content.to_string(),
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get_existing(&self, project_id: &str) -> Result<BTreeMap<String, String>, String> {
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .filter(|((pid, _), _)| pid == project_id)
            .map(|((_, name), a)| (name.clone(), a.content.clone()))
            .collect())
    }
}

/// 通过 HTTP 抓取目标页面的站点分析器
pub struct HttpSiteAnalyzer {
    client: reqwest::Client,
    /// 抓取正文截断上限（字节），避免超长页面吃掉生成预算
    max_bytes: usize,
}

impl HttpSiteAnalyzer {
    pub fn new(timeout_secs: u64) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent("wasp-site-analyzer/0.1")
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {}", e))?;
        Ok(Self {
            client,
            max_bytes: 200 * 1024,
        })
    }
}

#[async_trait]
impl SiteAnalyzer for HttpSiteAnalyzer {
    async fn analyze(&self, url: &str) -> Result<SiteAnalysis, String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Request to {} failed: {}", url, e))?;

        let status_code = response.status().as_u16();
        let mut text = response
            .text()
            .await
            .map_err(|e| format!("Failed to read body from {}: {}", url, e))?;

        if text.len() > self.max_bytes {
            let mut cut = self.max_bytes;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
        }

        Ok(SiteAnalysis { text, status_code })
    }
}

/// 静态资源文档表：从 (API 名, 文档文本) 对构建
#[derive(Default)]
pub struct StaticResourceDocs {
    docs: BTreeMap<String, String>,
}

impl StaticResourceDocs {
    pub fn new(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            docs: pairs.into_iter().collect(),
        }
    }
}

impl ResourceDocs for StaticResourceDocs {
    fn lookup(&self, api_name: &str) -> Option<String> {
        self.docs.get(api_name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_store_upsert_and_list() {
        let store = InMemoryStore::new();
        store.upsert("p1", "a.js", "v1").await.unwrap();
        store.upsert("p1", "b.js", "x").await.unwrap();
        store.upsert("p2", "a.js", "other").await.unwrap();

        let existing = store.get_existing("p1").await.unwrap();
        assert_eq!(existing.len(), 2);
        assert_eq!(existing["a.js"], "v1");

        store.upsert("p1", "a.js", "v2").await.unwrap();
        let existing = store.get_existing("p1").await.unwrap();
        assert_eq!(existing["a.js"], "v2");
        assert!(store.updated_at("p1", "a.js").await.is_some());
    }

    #[test]
    fn test_static_docs_lookup() {
        let docs = StaticResourceDocs::new([(
            "weather".to_string(),
            "GET /v1/forecast?lat=..&lon=..".to_string(),
        )]);
        assert!(docs.lookup("weather").unwrap().contains("forecast"));
        assert!(docs.lookup("unknown").is_none());
    }
}
