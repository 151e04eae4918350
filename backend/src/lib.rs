// Material Uploader Rust Library
// 飞书多维表格 → 巨量素材中心 批量上传核心库

// 配置管理模块
pub mod config;

// 错误分类
pub mod error;

// 飞书多维表格模块
pub mod feishu;

// 本地素材目录模块
pub mod local;

// 巨量上传地址模块
pub mod douyin;

// 浏览器自动化模块
pub mod browser;

// 断点续传进度模块
pub mod progress;

// 批量上传模块
pub mod uploader;

// 任务队列模块
pub mod queue;

// 拉取调度模块
pub mod scheduler;

// 应用装配
pub mod app;

#[cfg(test)]
mod test_support;

// 导出常用类型
pub use app::Application;
pub use config::AppConfig;
pub use error::{ErrorCategory, PipelineError};
pub use feishu::{FeishuClient, PendingRecord, RecordSource, RecordStatus};
pub use local::{FileProvider, LocalFileManager};
pub use progress::{ProgressCheckpoint, ProgressStore};
pub use queue::{Task, TaskQueue, TaskStatus};
pub use scheduler::{FetchMode, FetchTrigger, Scheduler};
pub use uploader::{BatchUploader, UploadExecutor, UploadResult};
