//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `WASP__*` 覆盖（双下划线表示嵌套，
//! 如 `WASP__LLM__PROVIDER=openai`、`WASP__BUDGET__CEILING=200000`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub budget: BudgetSection,
    #[serde(default)]
    pub planning: PlanningSection,
}

/// [app] 段：应用名与目录数据文件位置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 目录 JSON（参考模式 + 模板）路径；未设置时使用内置目录
    pub catalog_path: Option<PathBuf>,
}

/// [llm] 段：后端选择
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / mock；无可用 API Key 时自动回落 mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_request_timeout() -> u64 {
    120
}

/// [budget] 段：会话资源上限与预检开关
#[derive(Debug, Clone, Deserialize)]
pub struct BudgetSection {
    /// 单会话可消耗的资源单位上限
    #[serde(default = "default_ceiling")]
    pub ceiling: u64,
    /// 是否在每次后端调用前做估算预检
    #[serde(default = "default_precheck")]
    pub precheck: bool,
}

impl Default for BudgetSection {
    fn default() -> Self {
        Self {
            ceiling: default_ceiling(),
            precheck: default_precheck(),
        }
    }
}

fn default_ceiling() -> u64 {
    100_000
}

fn default_precheck() -> bool {
    true
}

/// [planning] 段：增量请求 patch / 全量重发 的策略边界（可配置策略，非固定规则）
#[derive(Debug, Clone, Deserialize)]
pub struct PlanningSection {
    /// 既有产物文件数不超过该值时倾向精确 patch
    #[serde(default = "default_patch_max_files")]
    pub patch_max_files: usize,
    /// 既有产物总字节数不超过该值时倾向精确 patch
    #[serde(default = "default_patch_max_bytes")]
    pub patch_max_bytes: usize,
}

impl Default for PlanningSection {
    fn default() -> Self {
        Self {
            patch_max_files: default_patch_max_files(),
            patch_max_bytes: default_patch_max_bytes(),
        }
    }
}

fn default_patch_max_files() -> usize {
    12
}

fn default_patch_max_bytes() -> usize {
    64 * 1024
}

/// 从 config 目录加载配置，环境变量 WASP__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 WASP__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("WASP")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
