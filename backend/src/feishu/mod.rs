// 飞书多维表格模块

pub mod client;
pub mod types;

use anyhow::Result;
use async_trait::async_trait;

pub use client::FeishuClient;
pub use types::{PendingRecord, RecordStatus};

/// 待上传记录来源
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// 拉取所有待上传记录
    async fn fetch_pending(&self) -> Result<Vec<PendingRecord>>;

    /// 更新记录状态
    async fn update_status(&self, record_id: &str, status: RecordStatus) -> Result<()>;
}
