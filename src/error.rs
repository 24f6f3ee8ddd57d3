use thiserror::Error;

use crate::models::work_item::{WorkItemKey, WorkStatus};

/// 应用程序错误类型
///
/// 每层只描述自己，底层原因通过 `source()` 链传递，
/// 打印完整原因请用 `anyhow` 的 `{:#}`。
#[derive(Debug, Error)]
pub enum AppError {
    /// 状态转换错误（不变量被破坏，必须中止）
    #[error("状态转换错误")]
    Transition(#[from] TransitionError),
    /// 批处理适配器错误
    #[error("批处理适配器错误")]
    Adapter(#[from] AdapterError),
    /// 检查点读写错误
    #[error("检查点错误")]
    Checkpoint(#[from] CheckpointError),
    /// 配置错误
    #[error("配置错误")]
    Config(#[from] ConfigError),
    /// 数据源（市镇 / 问题列表）错误
    #[error("数据源错误")]
    Source(#[from] SourceError),
}

impl AppError {
    /// 是否为不变量级别的错误（状态转换 / 检查点损坏）
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, AppError::Transition(_) | AppError::Checkpoint(_))
    }

    /// 是否为暂时性错误：检查点未被改动，下次调用会原样重试
    ///
    /// 只有网络 / 协议层的适配器错误属于此类；批次整体失败需要人工处理。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Adapter(AdapterError::Transport { .. } | AdapterError::BadResponse { .. })
        )
    }
}

/// 工作项状态转换错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// 当前状态不允许该转换
    #[error("{key} 无法从 {from} 转换到 {to}")]
    InvalidTransition {
        key: WorkItemKey,
        from: WorkStatus,
        to: WorkStatus,
    },
    /// 队列中不存在该工作项
    #[error("队列中不存在工作项 {key}")]
    UnknownKey { key: WorkItemKey },
}

/// 批处理适配器错误
#[derive(Debug, Error)]
pub enum AdapterError {
    /// 网络请求失败
    #[error("请求失败 ({endpoint})")]
    Transport {
        endpoint: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 服务返回无法识别的响应
    #[error("响应异常 ({endpoint}): {message}")]
    BadResponse { endpoint: String, message: String },
    /// 整个批次在服务端失败
    #[error("批次 {batch_id} 失败: {reason}")]
    BatchFailed { batch_id: String, reason: String },
    /// 提交的请求集合为空
    #[error("不能提交空批次")]
    EmptyBatch,
    /// 构建单个请求失败
    #[error("构建请求失败 ({key}): {message}")]
    RequestBuild { key: WorkItemKey, message: String },
}

/// 检查点错误
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// 已存在的非空文件无法解析
    #[error("检查点文件已损坏 ({path}): {message}")]
    Corrupt { path: String, message: String },
    /// 文件读写失败
    #[error("检查点文件读写失败 ({path})")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// 序列化失败
    #[error("检查点序列化失败 ({path})")]
    Serialize {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    /// 队列中存在已提交但没有批次句柄的工作项
    #[error("{count} 个已提交的工作项没有对应的批次句柄")]
    OrphanedSubmissions { count: usize },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
    /// 在线模式缺少 API Key
    #[error("在线批处理模式需要设置 OPENAI_API_KEY")]
    MissingApiKey,
    /// 配置值不合法
    #[error("配置项 {field} 不合法: {message}")]
    Invalid { field: String, message: String },
    /// 读取配置文件失败
    #[error("读取配置文件失败 ({path})")]
    FileReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path})")]
    TomlParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// 数据源错误
#[derive(Debug, Error)]
pub enum SourceError {
    /// 读取文件失败
    #[error("读取文件失败 ({path})")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("无法解析TOML文件 ({path})")]
    ParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    /// 队列引用了数据源中不存在的市镇
    #[error("数据源中不存在市镇 {entity_id}")]
    UnknownEntity { entity_id: String },
    /// 队列引用了数据源中不存在的问题
    #[error("数据源中不存在问题 {question_id}")]
    UnknownQuestion { question_id: String },
    /// 数据源为空
    #[error("{what} 列表为空")]
    Empty { what: String },
}

// ========== 便捷构造函数 ==========

impl AdapterError {
    /// 创建网络请求失败错误
    pub fn transport(
        endpoint: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AdapterError::Transport {
            endpoint: endpoint.into(),
            source: Box::new(source),
        }
    }

    /// 创建响应异常错误
    pub fn bad_response(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        AdapterError::BadResponse {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }
}

impl CheckpointError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        CheckpointError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn corrupt(path: impl Into<String>, message: impl ToString) -> Self {
        CheckpointError::Corrupt {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
