//! 上传流水线错误
//!
//! 统一的错误分类：哪些错误需要重试、哪些只需记录、哪些必须终止进程

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 流水线错误
#[derive(Debug, Error)]
pub enum PipelineError {
    /// 单批上传不足额（确认完成数少于本批文件数）
    #[error("第 {batch}/{total_batches} 批上传不足额: {confirmed}/{expected}")]
    PartialBatch {
        batch: usize,
        total_batches: usize,
        confirmed: usize,
        expected: usize,
    },

    /// 浏览器交互失败（元素未出现、超时、会话异常等）
    #[error("浏览器交互失败: {0}")]
    AutomationTransient(String),

    /// 断点记录与当前文件分批不一致
    #[error("记录 {record_id} 的断点批次数不一致: 记录 {recorded} 批，当前 {expected} 批")]
    ConfigMismatch {
        record_id: String,
        recorded: usize,
        expected: usize,
    },

    /// 飞书状态更新失败
    #[error("更新记录 {record_id} 状态失败: {message}")]
    RemoteUpdate { record_id: String, message: String },

    /// 飞书记录拉取失败
    #[error("拉取待上传记录失败: {0}")]
    Fetch(String),

    /// 初始化失败（配置、浏览器会话）
    #[error("初始化失败: {0}")]
    Initialization(String),
}

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// 同一批次内重试
    Retryable,
    /// 记录后继续，等待下一轮
    Recoverable,
    /// 进程无法继续
    Fatal,
}

impl PipelineError {
    /// 获取错误分类
    pub fn category(&self) -> ErrorCategory {
        match self {
            PipelineError::PartialBatch { .. } | PipelineError::AutomationTransient(_) => {
                ErrorCategory::Retryable
            }
            PipelineError::ConfigMismatch { .. }
            | PipelineError::RemoteUpdate { .. }
            | PipelineError::Fetch(_) => ErrorCategory::Recoverable,
            PipelineError::Initialization(_) => ErrorCategory::Fatal,
        }
    }

    /// 是否可在批次内重试
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Retryable
    }

    /// 浏览器交互错误的便捷构造
    pub fn automation(err: impl std::fmt::Display) -> Self {
        PipelineError::AutomationTransient(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let partial = PipelineError::PartialBatch {
            batch: 2,
            total_batches: 3,
            confirmed: 49,
            expected: 50,
        };
        assert_eq!(partial.category(), ErrorCategory::Retryable);
        assert!(partial.is_retryable());
        assert!(PipelineError::automation("element not found").is_retryable());

        let mismatch = PipelineError::ConfigMismatch {
            record_id: "rec1".to_string(),
            recorded: 5,
            expected: 3,
        };
        assert_eq!(mismatch.category(), ErrorCategory::Recoverable);
        assert!(!PipelineError::Fetch("timeout".to_string()).is_retryable());

        assert_eq!(
            PipelineError::Initialization("chromedriver".to_string()).category(),
            ErrorCategory::Fatal
        );
    }

    #[test]
    fn test_error_messages() {
        let partial = PipelineError::PartialBatch {
            batch: 2,
            total_batches: 3,
            confirmed: 49,
            expected: 50,
        };
        assert_eq!(partial.to_string(), "第 2/3 批上传不足额: 49/50");
    }
}
