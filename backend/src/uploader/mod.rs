// 批量上传模块
//
// 一个剧的素材按固定批大小切分，逐批通过浏览器会话上传，
// 每批成功后落盘进度，失败时可从最后确认的批次继续。

pub mod batch;
pub mod executor;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use batch::partition;
pub use executor::{BatchUploadPolicy, BatchUploader};

/// 上传请求
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// 任务ID（日志关联）
    pub task_id: String,
    /// 飞书记录 ID（进度键）
    pub record_id: String,
    pub drama: String,
    pub date: String,
    pub account: String,
    /// 上传页地址
    pub url: String,
    /// 已排序的素材文件
    pub files: Vec<PathBuf>,
}

/// 上传结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub success: bool,
    pub total_files: usize,
    /// 已完成的批次数（含断点续传之前完成的批次）
    pub uploaded_batches: usize,
    /// 失败批次最后一次尝试确认的文件数
    pub failed_batch_confirmed: Option<usize>,
    pub error: Option<String>,
}

impl UploadResult {
    pub fn succeeded(total_files: usize, uploaded_batches: usize) -> Self {
        Self {
            success: true,
            total_files,
            uploaded_batches,
            ..Default::default()
        }
    }

    pub fn failed(total_files: usize, uploaded_batches: usize, error: impl Into<String>) -> Self {
        Self {
            success: false,
            total_files,
            uploaded_batches,
            failed_batch_confirmed: None,
            error: Some(error.into()),
        }
    }
}

/// 上传执行器
#[async_trait]
pub trait UploadExecutor: Send + Sync {
    /// 上传一个剧的全部素材，失败信息包含在结果中
    async fn upload(&self, request: UploadRequest) -> UploadResult;
}
