use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("插件未找到: {kind} {name}")]
    PluginNotFound { kind: String, name: String },

    #[error("任务未找到: {name}")]
    TaskNotFound { name: String },

    #[error("任务已存在: {name}")]
    TaskAlreadyExists { name: String },

    #[error("任务正在运行: {name}")]
    TaskRunning { name: String },

    #[error("临时性拉取错误: {0}")]
    TransientFetch(String),

    #[error("永久性拉取错误: {0}")]
    PermanentFetch(String),

    #[error("数据校验失败: {0}")]
    Validation(String),

    #[error("存储错误: {0}")]
    Storage(String),

    #[error("无效状态: {0}")]
    InvalidState(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn plugin_not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::PluginNotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// 只有临时性拉取错误（含超时）允许重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientFetch(_))
    }

    /// 配置期错误，由 add_task 同步返回给调用方
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::PluginNotFound { .. }
        )
    }
}

impl From<anyhow::Error> for SchedulerError {
    fn from(err: anyhow::Error) -> Self {
        Self::Configuration(format!("{err:#}"))
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_errors_are_retryable() {
        assert!(SchedulerError::TransientFetch("rate limited".into()).is_retryable());
        assert!(!SchedulerError::PermanentFetch("bad symbol".into()).is_retryable());
        assert!(!SchedulerError::Validation("unsorted".into()).is_retryable());
        assert!(!SchedulerError::Storage("disk full".into()).is_retryable());
    }

    #[test]
    fn test_configuration_errors() {
        assert!(SchedulerError::config("x").is_configuration_error());
        assert!(SchedulerError::plugin_not_found("data_source", "yahoo").is_configuration_error());
        assert!(!SchedulerError::Internal("x".into()).is_configuration_error());

        let err = SchedulerError::plugin_not_found("storage", "duckdb");
        assert_eq!(err.to_string(), "插件未找到: storage duckdb");
    }
}
