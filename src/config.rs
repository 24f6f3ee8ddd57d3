use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ConfigError;

/// 程序配置
///
/// 显式传入编排器，不依赖进程级全局状态。
/// 加载顺序：默认值 → TOML 配置文件（可选）→ 环境变量 → 命令行参数。
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 模型名称
    pub model_id: String,
    /// 每个请求附带的市镇文本片段数量
    pub context_length: usize,
    /// 调度系统的任务 ID（如 SLURM array task id）
    pub task_id: Option<String>,
    /// 只处理前 N 个市镇；`None` 表示全部
    #[serde(deserialize_with = "deserialize_sample_size")]
    pub sample_size: Option<usize>,
    /// 检查点根目录
    pub processed_data_dir: PathBuf,
    /// 市镇列表文件
    pub municipalities_file: PathBuf,
    /// 问题列表文件
    pub questions_file: PathBuf,
    /// 不参与处理的问题 ID
    pub excluded_questions: Vec<String>,
    /// 模拟批处理（不发起任何网络请求）
    pub fake_batch: bool,
    /// 单个批次的最大请求数
    pub max_batch_size: usize,
    /// 批次完成时限
    pub completion_window: String,
    pub max_tokens: u32,
    pub temperature: f32,
    // --- LLM 服务配置 ---
    pub api_key: String,
    pub api_base_url: String,
    /// 批次提交超过该小时数仍未完成时输出警告
    pub stall_warn_hours: u64,
    /// 模拟模式下批次"运行"的秒数
    pub sim_latency_secs: u64,
    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_id: "gpt-4-turbo-2024-04-09".to_string(),
            context_length: 4,
            task_id: None,
            sample_size: None,
            processed_data_dir: PathBuf::from("processed_data"),
            municipalities_file: PathBuf::from("data/municipalities.toml"),
            questions_file: PathBuf::from("data/questions.toml"),
            excluded_questions: vec!["11".to_string(), "12".to_string(), "15".to_string()],
            fake_batch: false,
            max_batch_size: 50_000,
            completion_window: "24h".to_string(),
            max_tokens: 1024,
            temperature: 0.0,
            api_key: String::new(),
            api_base_url: "https://api.openai.com/v1".to_string(),
            stall_warn_hours: 24,
            sim_latency_secs: 0,
            verbose_logging: false,
        }
    }
}

impl Config {
    /// 默认值 + 环境变量
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    /// 加载配置文件（若提供）并叠加环境变量
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_toml_file(path)?.with_env_overrides(),
            None => Self::from_env(),
        }
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadFailed {
                path: path.display().to_string(),
                source,
            })?;
        toml::from_str(&content).map_err(|source| ConfigError::TomlParseFailed {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(v) = env_string("QA_MODEL_ID") {
            self.model_id = v;
        }
        if let Some(v) = env_parse("QA_CONTEXT_LENGTH", "usize")? {
            self.context_length = v;
        }
        if let Some(v) = env_string("QA_TASK_ID") {
            self.task_id = Some(v);
        }
        if let Some(v) = env_string("QA_SAMPLE_SIZE") {
            self.sample_size = parse_sample_size(&v).ok_or_else(|| {
                ConfigError::EnvVarParseFailed {
                    var_name: "QA_SAMPLE_SIZE".to_string(),
                    value: v.clone(),
                    expected_type: "\"all\" 或正整数".to_string(),
                }
            })?;
        }
        if let Some(v) = env_string("QA_PROCESSED_DATA") {
            self.processed_data_dir = PathBuf::from(v);
        }
        if let Some(v) = env_string("QA_MUNICIPALITIES_FILE") {
            self.municipalities_file = PathBuf::from(v);
        }
        if let Some(v) = env_string("QA_QUESTIONS_FILE") {
            self.questions_file = PathBuf::from(v);
        }
        if let Some(v) = env_string("QA_EXCLUDED_QUESTIONS") {
            self.excluded_questions = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = env_parse("QA_FAKE_BATCH", "bool")? {
            self.fake_batch = v;
        }
        if let Some(v) = env_parse("QA_MAX_BATCH_SIZE", "usize")? {
            self.max_batch_size = v;
        }
        if let Some(v) = env_string("QA_COMPLETION_WINDOW") {
            self.completion_window = v;
        }
        if let Some(v) = env_parse("QA_MAX_TOKENS", "u32")? {
            self.max_tokens = v;
        }
        if let Some(v) = env_parse("QA_TEMPERATURE", "f32")? {
            self.temperature = v;
        }
        if let Some(v) = env_string("OPENAI_API_KEY") {
            self.api_key = v;
        }
        if let Some(v) = env_string("OPENAI_API_BASE") {
            self.api_base_url = v;
        }
        if let Some(v) = env_parse("QA_STALL_WARN_HOURS", "u64")? {
            self.stall_warn_hours = v;
        }
        if let Some(v) = env_parse("QA_SIM_LATENCY_SECS", "u64")? {
            self.sim_latency_secs = v;
        }
        if let Some(v) = env_parse("VERBOSE_LOGGING", "bool")? {
            self.verbose_logging = v;
        }
        Ok(self)
    }

    /// 校验配置组合是否可用
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.fake_batch && self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        if i64::try_from(self.sim_latency_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .is_none()
        {
            return Err(ConfigError::Invalid {
                field: "sim_latency_secs".to_string(),
                message: format!("{} 超出可表示的时长范围", self.sim_latency_secs),
            });
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "max_batch_size".to_string(),
                message: "必须大于 0".to_string(),
            });
        }
        Ok(())
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(name: &str, expected_type: &str) -> Result<Option<T>, ConfigError> {
    match env_string(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::EnvVarParseFailed {
                var_name: name.to_string(),
                value,
                expected_type: expected_type.to_string(),
            }),
    }
}

/// 解析抽样大小："all" → 全部，正整数 → 前 N 个
pub fn parse_sample_size(value: &str) -> Option<Option<usize>> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("all") {
        return Some(None);
    }
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Some(Some(n)),
        _ => None,
    }
}

// sample_size 在 TOML 中既可以写 "all" 也可以写整数
fn deserialize_sample_size<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{self, Visitor};
    use std::fmt;

    struct SampleSizeVisitor;

    impl<'de> Visitor<'de> for SampleSizeVisitor {
        type Value = Option<usize>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("\"all\" or a positive integer")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            parse_sample_size(value).ok_or_else(|| E::custom(format!("invalid sample size: {value}")))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if value > 0 {
                Ok(Some(value as usize))
            } else {
                Err(E::custom(format!("invalid sample size: {value}")))
            }
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            self.visit_i64(value as i64)
        }
    }

    deserializer.deserialize_any(SampleSizeVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sample_size() {
        assert_eq!(parse_sample_size("all"), Some(None));
        assert_eq!(parse_sample_size(" ALL "), Some(None));
        assert_eq!(parse_sample_size("25"), Some(Some(25)));
        assert_eq!(parse_sample_size("0"), None);
        assert_eq!(parse_sample_size("many"), None);
    }

    #[test]
    fn test_toml_overlay_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
model_id = "gpt-4o"
sample_size = "all"
context_length = 2
excluded_questions = []
"#,
        )
        .unwrap();

        assert_eq!(config.model_id, "gpt-4o");
        assert_eq!(config.context_length, 2);
        assert_eq!(config.sample_size, None);
        assert!(config.excluded_questions.is_empty());
        assert_eq!(config.max_batch_size, Config::default().max_batch_size);

        let config: Config = toml::from_str("sample_size = 10").unwrap();
        assert_eq!(config.sample_size, Some(10));
        assert_eq!(config.excluded_questions, vec!["11", "12", "15"]);
    }

    #[test]
    fn test_validate_requires_api_key_in_live_mode() {
        let config = Config::default();
        assert!(matches!(config.validate(), Err(ConfigError::MissingApiKey)));

        let config = Config {
            fake_batch: true,
            ..Config::default()
        };
        assert!(config.validate().is_ok());

        let config = Config {
            fake_batch: true,
            max_batch_size: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_validate_rejects_unrepresentable_latency() {
        for secs in [u64::MAX, i64::MAX as u64] {
            let config = Config {
                fake_batch: true,
                sim_latency_secs: secs,
                ..Config::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::Invalid { ref field, .. }) if field == "sim_latency_secs"
            ));
        }

        let config = Config {
            fake_batch: true,
            sim_latency_secs: 3600,
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }
}
