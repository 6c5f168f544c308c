//! 提示词模板与渲染
//!
//! 所有后端调用的提示词集中在这里。规划提示词配有强制起始前缀（prefill），
//! 解析时由修复解析器拼回；生成提示词按界面形态与策略各有一份。
//! 占位符形如 `{KEY}`，用 render 逐对替换。

use crate::pipeline::plan::SurfaceType;

/// 占位符替换；模板中未出现的键不会报错，残留的占位符由调用方自查
pub fn render(template: &str, pairs: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in pairs {
        out = out.replace(&format!("{{{}}}", key), value);
    }
    out
}

// ---------- 规划阶段 ----------

/// 模式匹配 + 能力识别
pub const PATTERN_ANALYSIS: &str = r#"You are planning a browser extension from a user request.

User request:
{REQUEST}

Known reference patterns:
{PATTERNS}

Identify the closest reference pattern (or none), the capabilities the
extension will need, and any target sites mentioned in the request.
Respond with JSON only, continuing from the given prefix."#;

pub const PATTERN_ANALYSIS_PREFILL: &str = "{\n  \"matched_pattern\": ";

/// 外部资源需求识别
pub const EXTERNAL_NEEDS: &str = r#"You are planning a browser extension from a user request.

User request:
{REQUEST}

List the external web APIs this extension would have to call. Platform
builtin interfaces are not external APIs. For each, give a short name,
its purpose, and an endpoint URL if one is well known.
Respond with JSON only, continuing from the given prefix."#;

pub const EXTERNAL_NEEDS_PREFILL: &str = "{\n  \"external_apis\": [";

/// 界面形态选择
pub const SURFACE_SELECTION: &str = r#"Choose the user interface surface for this browser extension.

User request:
{REQUEST}

Identified capabilities:
{CAPABILITIES}

Valid surfaces: popup, side_panel, overlay, new_tab, injected.
Give the surface and a confidence between 0 and 1.
Respond with JSON only, continuing from the given prefix."#;

pub const SURFACE_SELECTION_PREFILL: &str = "{\n  \"surface\": ";

/// 模板匹配（形态已定，候选已按形态过滤）
pub const TEMPLATE_MATCHING: &str = r#"Pick the closest starting template for this extension, if any fits.

User request:
{REQUEST}

Surface: {SURFACE}

Candidate templates:
{TEMPLATES}

Give the template name and a confidence between 0 and 1, or null if
none fits. Respond with JSON only, continuing from the given prefix."#;

pub const TEMPLATE_MATCHING_PREFILL: &str = "{\n  \"matched_template\": ";

// ---------- 生成阶段 ----------

const CODING_RULES: &str = r#"Rules:
- Respond with a single JSON object and nothing else.
- Keys are file paths, values are complete file contents.
- Include an "explanation" key with a short user-facing summary.
- The manifest must be valid Manifest V3."#;

pub const CODE_POPUP: &str = r#"Generate a complete Manifest V3 browser extension with a popup UI.

Feature request:
{REQUEST}

{CONTEXT}

Required files: manifest.json, popup.html, popup.js. Add background or
content scripts only when the feature needs them.

{RULES}"#;

pub const CODE_SIDE_PANEL: &str = r#"Generate a complete Manifest V3 browser extension using the side panel.

Feature request:
{REQUEST}

{CONTEXT}

Required files: manifest.json, a side panel page and its script. The
manifest must declare the side_panel entry and the sidePanel permission.

{RULES}"#;

pub const CODE_OVERLAY: &str = r#"Generate a complete Manifest V3 browser extension that renders an
overlay inside the visited page via a content script.

Feature request:
{REQUEST}

{CONTEXT}

Required files: manifest.json, the content script and its stylesheet.
No popup page unless the feature needs one.

{RULES}"#;

pub const CODE_NEW_TAB: &str = r#"Generate a complete Manifest V3 browser extension that replaces the
new-tab page.

Feature request:
{REQUEST}

{CONTEXT}

Required files: manifest.json with chrome_url_overrides.newtab, the
new-tab page and its script.

{RULES}"#;

pub const CODE_INJECTED: &str = r#"Generate a complete Manifest V3 browser extension whose UI is injected
into the visited page by a content script.

Feature request:
{REQUEST}

{CONTEXT}

Required files: manifest.json, the content script that builds the UI,
and its stylesheet.

{RULES}"#;

/// 模板 patch：在模板起始产物上做定向修改
pub const TEMPLATE_PATCH: &str = r#"Start from the template files below and modify them to satisfy the
feature request. Return every file that differs from the template, with
its complete new content. Unchanged files may be omitted.

Feature request:
{REQUEST}

Template files:
{FILES}

{CONTEXT}

{RULES}"#;

/// 增量 patch：只改既有产物中受影响的文件
pub const INCREMENTAL_PATCH: &str = r#"The user wants a change to an existing extension. Modify only the
files that the change affects and return each with its complete new
content. Unchanged files must be omitted.

Change request:
{REQUEST}

Current files:
{FILES}

{CONTEXT}

{RULES}"#;

/// 全量重发：既有产物过大时整体重生成
pub const FULL_REPLACEMENT: &str = r#"The user wants a change to an existing extension. Regenerate the full
set of files with the change applied, keeping everything that still
works unchanged in behavior.

Change request:
{REQUEST}

Current files:
{FILES}

{CONTEXT}

{RULES}"#;

/// 工具强化的跟进修改：前置规划选定该提示词时由策略原样采用
pub const TOOL_FOLLOWUP: &str = r#"The user wants a change to an existing extension. A planning step has
already worked out which files are affected and how. Apply the change
to the files below, using any listed platform interfaces directly, and
return each modified file with its complete new content.

Change request:
{REQUEST}

Affected files:
{FILES}

{CONTEXT}

{RULES}"#;

/// 按形态取全新生成提示词
pub fn coding_prompt(surface: SurfaceType) -> &'static str {
    match surface {
        SurfaceType::Popup => CODE_POPUP,
        SurfaceType::SidePanel => CODE_SIDE_PANEL,
        SurfaceType::Overlay => CODE_OVERLAY,
        SurfaceType::NewTab => CODE_NEW_TAB,
        SurfaceType::Injected => CODE_INJECTED,
    }
}

/// 统一追加生成规则段
pub fn with_rules(template: &str, pairs: &[(&str, &str)]) -> String {
    let mut all: Vec<(&str, &str)> = pairs.to_vec();
    all.push(("RULES", CODING_RULES));
    render(template, &all)
}
