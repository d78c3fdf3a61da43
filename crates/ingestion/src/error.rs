//! Ingestion 错误类型

use thiserror::Error;

/// Ingestion 错误
#[derive(Debug, Error)]
pub enum IngestionError {
    /// 轮询任务异常退出
    #[error("poll task for {source_name} ended abnormally: {message}")]
    TaskFailed {
        /// 数据源名称
        source_name: String,
        /// 错误消息
        message: String,
    },
}

/// Ingestion Result 类型别名
pub type Result<T> = std::result::Result<T, IngestionError>;
