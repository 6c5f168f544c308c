//! 输出修复解析器
//!
//! 从后端原始文本中恢复恰好一个结构化文档。修复阶梯确定且保序：
//! 候选提取 -> 直接解析 -> 控制字符消毒 -> 渐进截断；后面的步骤有损程度
//! 更高，只有前面的步骤失败后才会尝试。全部失败则报 MalformedOutput，
//! 绝不猜测或部分应用内容。
//!
//! 括号/引号匹配用显式的 字符串内/转义/深度 三态状态机，不用正则，
//! 以保证嵌套下的正确性。

use serde_json::Value;

use crate::core::EngineError;
use crate::output::document::StructuredDocument;

/// 提取候选文本：优先 ```json 围栏块，其次任意围栏块，否则原文
fn extract_fenced<'a>(text: &'a str) -> &'a str {
    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        return rest.find("```").map(|end| &rest[..end]).unwrap_or(rest).trim();
    }
    if let Some(start) = text.find("```") {
        // 跳过围栏行上可能的语言标签
        let rest = &text[start + 3..];
        let rest = rest
            .find('\n')
            .map(|nl| &rest[nl + 1..])
            .unwrap_or(rest);
        return rest.find("```").map(|end| &rest[..end]).unwrap_or(rest).trim();
    }
    text.trim()
}

/// 在候选文本中定位首个 `{` 起始的平衡区间（字节下标，左闭右开）
///
/// 状态机：in_string 在未转义 `"` 处翻转；未转义 `\` 置 escape；
/// 字符串外的 `{`/`}` 增减深度，深度归零处即文档结束。
/// 括号始终未闭合时取到文本末尾，留给截断阶段处理。
fn brace_span(text: &str) -> Option<(usize, usize)> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;

    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if escape_next {
            escape_next = false;
            continue;
        }
        match b {
            b'\\' => escape_next = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some((start, i + 1));
                }
            }
            _ => {}
        }
    }

    Some((start, bytes.len()))
}

/// 消毒：用同一状态机重扫候选，把字符串字面量内的裸控制字符替换为转义形式
/// （\t / \n / \r 用专用转义，其余 < 0x20 用 \u00XX）
fn sanitize_controls(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escape_next = false;

    for c in text.chars() {
        if escape_next {
            result.push(c);
            escape_next = false;
            continue;
        }
        match c {
            '\\' => {
                escape_next = true;
                result.push(c);
            }
            '"' => {
                in_string = !in_string;
                result.push(c);
            }
            c if in_string && (c as u32) < 0x20 => match c {
                '\t' => result.push_str("\\t"),
                '\n' => result.push_str("\\n"),
                '\r' => result.push_str("\\r"),
                _ => result.push_str(&format!("\\u{:04x}", c as u32)),
            },
            _ => result.push(c),
        }
    }

    result
}

/// 渐进截断：从全长向前，逐个回退到上一个 `}` 处尝试解析，首个成功者胜出
fn parse_with_truncation(sanitized: &str) -> Option<Value> {
    let mut end = sanitized.len();
    loop {
        let pos = sanitized[..end].rfind('}')?;
        let candidate = sanitized[..=pos].trim();
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            return Some(value);
        }
        if pos == 0 {
            return None;
        }
        end = pos;
    }
}

/// 执行完整修复阶梯，恢复一个 JSON 值
pub fn recover_json(raw: &str) -> Result<Value, EngineError> {
    let fenced = extract_fenced(raw);
    let (start, end) = match brace_span(fenced) {
        Some(span) => span,
        None => {
            return Err(EngineError::MalformedOutput {
                raw: raw.to_string(),
            })
        }
    };
    let candidate = fenced[start..end].trim();

    // 1. 直接解析
    if let Ok(value) = serde_json::from_str::<Value>(candidate) {
        return Ok(value);
    }

    // 2. 控制字符消毒后重试
    let sanitized = sanitize_controls(candidate);
    match serde_json::from_str::<Value>(&sanitized) {
        Ok(value) => {
            tracing::warn!("recovered document after control-character sanitization");
            return Ok(value);
        }
        Err(e) => {
            tracing::warn!("sanitization pass did not fix the document: {}", e);
        }
    }

    // 3. 渐进截断
    if let Some(value) = parse_with_truncation(&sanitized) {
        tracing::warn!("recovered document by trimming trailing content");
        return Ok(value);
    }

    Err(EngineError::MalformedOutput {
        raw: raw.to_string(),
    })
}

/// 恢复结构化文档；若提示词强制了固定起始前缀，先拼回前缀再走阶梯
pub fn recover_document(raw: &str, forced_prefix: Option<&str>) -> Result<StructuredDocument, EngineError> {
    let combined;
    let text = match forced_prefix {
        Some(prefix) => {
            combined = format!("{}{}", prefix, raw);
            combined.as_str()
        }
        None => raw,
    };

    let value = recover_json(text)?;
    StructuredDocument::from_value(value).ok_or_else(|| EngineError::MalformedOutput {
        raw: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_direct_parse_plain_object() {
        let value = recover_json(r#"{"a": 1, "b": "x"}"#).unwrap();
        assert_eq!(value, json!({"a": 1, "b": "x"}));
    }

    #[test]
    fn test_fenced_json_block_with_trailing_garbage() {
        // 场景 C
        let raw = "```json\n{\"manifest\":\"x\",\"explanation\":\"done\"}\n``` extra trailing text";
        let doc = recover_document(raw, None).unwrap();
        assert_eq!(doc.artifacts["manifest"], json!("x"));
        assert_eq!(doc.explanation, "done");
    }

    #[test]
    fn test_embedded_object_in_surrounding_prose() {
        let raw = "Here is the result:\n{\"files\": {\"a\": \"{}\"}, \"explanation\": \"ok\"}\nHope that helps!";
        let value = recover_json(raw).unwrap();
        assert_eq!(value["files"]["a"], json!("{}"));
    }

    #[test]
    fn test_braces_inside_strings_do_not_affect_depth() {
        let raw = r#"noise {"code": "if (x) { return {}; }", "explanation": "e"} noise"#;
        let value = recover_json(raw).unwrap();
        assert_eq!(value["code"], json!("if (x) { return {}; }"));
    }

    #[test]
    fn test_escaped_quotes_inside_strings() {
        let raw = r#"{"a": "she said \"hi\" {", "b": 2}"#;
        let value = recover_json(raw).unwrap();
        assert_eq!(value["b"], json!(2));
    }

    #[test]
    fn test_sanitize_raw_control_characters() {
        // 字符串值内裸换行/制表符：直接解析失败，消毒后应恢复出原始内容
        let raw = "{\"script\": \"line1\nline2\tend\", \"explanation\": \"ok\"}";
        let doc = recover_document(raw, None).unwrap();
        assert_eq!(doc.artifacts["script"], json!("line1\nline2\tend"));
    }

    #[test]
    fn test_sanitize_other_controls_use_unicode_escape() {
        let raw = "{\"a\": \"x\u{0001}y\"}";
        let value = recover_json(raw).unwrap();
        assert_eq!(value["a"], json!("x\u{0001}y"));
    }

    #[test]
    fn test_progressive_truncation_recovers_prefix_document() {
        // 完整对象后粘连了一段截断的垃圾，直接解析与消毒都救不回来
        let raw = r#"{"a": "ok"} {"broken": "#;
        let value = recover_json(raw).unwrap();
        assert_eq!(value, json!({"a": "ok"}));
    }

    #[test]
    fn test_unrecoverable_reports_malformed_with_raw() {
        let raw = "there is no document here at all";
        match recover_document(raw, None) {
            Err(EngineError::MalformedOutput { raw: diag }) => {
                assert!(diag.contains("no document"))
            }
            other => panic!("expected MalformedOutput, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_truncated_stream_output_unclosed_braces() {
        // 括号未闭合（流中断）：区间取到末尾，截断阶段回退到上一个完整对象失败后报错
        let raw = r#"{"files": {"a": "1"#;
        assert!(recover_json(raw).is_err());
    }

    #[test]
    fn test_forced_prefix_is_recombined() {
        let prefix = "{\n  \"matched_template\": {\n    \"name\": ";
        let raw = "\"notes-panel\", \"confidence\": 0.91}}";
        let doc = recover_json(&format!("{prefix}{raw}")).unwrap();
        assert_eq!(doc["matched_template"]["confidence"], json!(0.91));

        let document = recover_document(raw, Some(prefix));
        assert!(document.is_ok());
    }

    #[test]
    fn test_generic_fence_preferred_over_raw_scan() {
        let raw = "```\n{\"a\": 1}\n```";
        assert_eq!(recover_json(raw).unwrap(), json!({"a": 1}));
    }
}
