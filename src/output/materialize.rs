//! 产物物化：规范化内容并落入产物存储
//!
//! 每个产物独立 upsert，单个失败不影响其余；全部失败才视为阶段失败。
//! manifest 类结构化产物先按规范键序格式化为文本再落盘，保证同一输入
//! 得到字节级一致的产物。

use std::sync::Arc;

use serde_json::Value;

use crate::core::EngineError;
use crate::external::ArtifactStore;
use crate::output::document::StructuredDocument;

/// manifest 规范键序：常见键按约定顺序排前，未知键按字母序排后
const MANIFEST_KEY_ORDER: &[&str] = &[
    "manifest_version",
    "name",
    "version",
    "description",
    "icons",
    "action",
    "background",
    "content_scripts",
    "side_panel",
    "chrome_url_overrides",
    "options_page",
    "permissions",
    "host_permissions",
    "web_accessible_resources",
    "commands",
];

/// 单个产物的物化结果
#[derive(Debug, Clone)]
pub struct ArtifactFailure {
    pub name: String,
    pub reason: String,
}

/// 一次物化批次的汇总
#[derive(Debug, Clone, Default)]
pub struct MaterializeReport {
    pub saved: Vec<String>,
    pub skipped: Vec<String>,
    pub failures: Vec<ArtifactFailure>,
}

impl MaterializeReport {
    pub fn saved_count(&self) -> usize {
        self.saved.len()
    }
}

/// 文本规范化：CRLF 统一为 LF，去行尾空白，连续空行压成一个，首尾修剪
pub fn normalize_content(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n");

    let mut lines: Vec<&str> = Vec::new();
    for line in unified.split('\n') {
        lines.push(line.trim_end_matches([' ', '\t']));
    }

    let mut out = String::with_capacity(unified.len());
    let mut blank_run = 0usize;
    for line in lines {
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line);
    }

    out.trim().to_string()
}

/// 按规范键序把 manifest 对象格式化为两空格缩进的 JSON 文本
///
/// 依赖 serde_json 的 preserve_order 特性：Map 按插入序序列化。
pub fn format_manifest(value: &Value) -> String {
    let map = match value {
        Value::Object(map) => map,
        other => return serde_json::to_string_pretty(other).unwrap_or_default(),
    };

    let mut ordered = serde_json::Map::new();
    for &key in MANIFEST_KEY_ORDER {
        if let Some(v) = map.get(key) {
            ordered.insert(key.to_string(), v.clone());
        }
    }
    let mut rest: Vec<&String> = map
        .keys()
        .filter(|k| !MANIFEST_KEY_ORDER.contains(&k.as_str()))
        .collect();
    rest.sort();
    for key in rest {
        if let Some(v) = map.get(key) {
            ordered.insert(key.clone(), v.clone());
        }
    }

    serde_json::to_string_pretty(&Value::Object(ordered)).unwrap_or_default()
}

/// 把产物值渲染为最终文本：字符串走规范化，对象按 manifest 规则格式化
fn render_artifact(name: &str, value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => normalize_content(s),
        Value::Null => return None,
        obj @ Value::Object(_) if name.contains("manifest") => format_manifest(obj),
        other => serde_json::to_string_pretty(other).unwrap_or_default(),
    };
    if text.is_empty() {
        return None;
    }
    Some(text)
}

/// 把一个结构化文档物化到存储；名下内容为空或 null 的产物跳过
///
/// 全部产物都失败时返回 Persistence 错误；只要有一个成功就返回汇总。
pub async fn materialize(
    store: &Arc<dyn ArtifactStore>,
    project_id: &str,
    document: &StructuredDocument,
) -> Result<MaterializeReport, EngineError> {
    let mut report = MaterializeReport::default();

    for (name, value) in &document.artifacts {
        let rendered = match render_artifact(name, value) {
            Some(text) => text,
            None => {
                tracing::debug!(artifact = %name, "skipping empty artifact");
                report.skipped.push(name.clone());
                continue;
            }
        };

        match store.upsert(project_id, name, &rendered).await {
            Ok(()) => report.saved.push(name.clone()),
            Err(e) => {
                tracing::warn!(artifact = %name, "failed to persist artifact: {}", e);
                report.failures.push(ArtifactFailure {
                    name: name.clone(),
                    reason: e,
                });
            }
        }
    }

    let attempted = report.saved.len() + report.failures.len();
    if attempted > 0 && report.saved.is_empty() {
        return Err(EngineError::Persistence(format!(
            "all {} artifacts failed to persist",
            report.failures.len()
        )));
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::InMemoryStore;
    use serde_json::json;

    #[test]
    fn test_normalize_crlf_and_trailing_whitespace() {
        let raw = "line1  \r\nline2\t\r\n";
        assert_eq!(normalize_content(raw), "line1\nline2");
    }

    #[test]
    fn test_normalize_collapses_blank_runs() {
        // 场景 D：四个连续空行压成一个
        let raw = "a\n\n\n\n\nb";
        assert_eq!(normalize_content(raw), "a\n\nb");
    }

    #[test]
    fn test_normalize_preserves_single_blank_line() {
        let raw = "a\n\nb";
        assert_eq!(normalize_content(raw), "a\n\nb");
    }

    #[test]
    fn test_format_manifest_canonical_key_order() {
        let manifest = json!({
            "permissions": ["storage"],
            "name": "demo",
            "zebra_custom": 1,
            "manifest_version": 3,
            "alpha_custom": 2
        });
        let text = format_manifest(&manifest);

        let mv = text.find("manifest_version").unwrap();
        let name = text.find("\"name\"").unwrap();
        let perms = text.find("permissions").unwrap();
        let alpha = text.find("alpha_custom").unwrap();
        let zebra = text.find("zebra_custom").unwrap();
        assert!(mv < name && name < perms);
        // 未知键排在已知键之后，按字母序
        assert!(perms < alpha && alpha < zebra);
    }

    #[tokio::test]
    async fn test_materialize_skips_null_and_empty() {
        let store: Arc<dyn ArtifactStore> = Arc::new(InMemoryStore::new());
        let doc = StructuredDocument::from_value(json!({
            "popup.html": "<html></html>",
            "empty.css": "   \n  \n",
            "nothing.js": null,
            "explanation": "done"
        }))
        .unwrap();

        let report = materialize(&store, "p1", &doc).await.unwrap();
        assert_eq!(report.saved, vec!["popup.html"]);
        assert_eq!(report.skipped.len(), 2);
        assert!(report.failures.is_empty());
    }

    #[tokio::test]
    async fn test_materialize_upsert_overwrites() {
        let store: Arc<dyn ArtifactStore> = Arc::new(InMemoryStore::new());
        let first = StructuredDocument::from_value(json!({"a.js": "v1"})).unwrap();
        let second = StructuredDocument::from_value(json!({"a.js": "v2"})).unwrap();

        materialize(&store, "p1", &first).await.unwrap();
        materialize(&store, "p1", &second).await.unwrap();

        let existing = store.get_existing("p1").await.unwrap();
        assert_eq!(existing.get("a.js").map(String::as_str), Some("v2"));
    }

    #[tokio::test]
    async fn test_materialize_manifest_object_is_formatted() {
        let store: Arc<dyn ArtifactStore> = Arc::new(InMemoryStore::new());
        let doc = StructuredDocument::from_value(json!({
            "manifest.json": {"name": "demo", "manifest_version": 3}
        }))
        .unwrap();

        materialize(&store, "p1", &doc).await.unwrap();
        let existing = store.get_existing("p1").await.unwrap();
        let text = &existing["manifest.json"];
        assert!(text.contains("\"manifest_version\": 3"));
        assert!(text.find("manifest_version").unwrap() < text.find("\"name\"").unwrap());
    }
}
