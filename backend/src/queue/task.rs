// 上传任务定义

use crate::feishu::PendingRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// 任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// 等待中
    Pending,
    /// 处理中
    Running,
    /// 已完成
    Completed,
    /// 已跳过（目录缺失、上传失败等，等待下次拉取）
    Skipped,
}

impl TaskStatus {
    /// 是否为终态（可被清理）
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Skipped)
    }
}

/// 上传任务（一个剧）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// 任务ID
    pub id: String,
    /// 飞书记录 ID
    pub record_id: String,
    /// 剧名
    pub drama: String,
    pub date: String,
    /// 巨量账户 ID
    pub account: String,
    /// 任务状态
    pub status: TaskStatus,
    /// 剧目录
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    /// 素材文件
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<PathBuf>>,
    /// 错误信息
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// 由待上传记录创建任务
    pub fn from_record(record: &PendingRecord) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            record_id: record.record_id.clone(),
            drama: record.drama.clone(),
            date: record.date.clone(),
            account: record.account.clone(),
            status: TaskStatus::Pending,
            local_path: None,
            files: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 更新状态，错误信息仅在提供时覆盖
    pub fn set_status(&mut self, status: TaskStatus, error: Option<String>) {
        self.status = status;
        self.updated_at = Utc::now();
        if error.is_some() {
            self.error = error;
        }
    }

    /// 标记为处理中
    pub fn mark_running(&mut self) {
        self.set_status(TaskStatus::Running, None);
    }

    /// 标记为已完成
    pub fn mark_completed(&mut self) {
        self.set_status(TaskStatus::Completed, None);
    }

    /// 标记为已跳过
    pub fn mark_skipped(&mut self, reason: impl Into<String>) {
        self.set_status(TaskStatus::Skipped, Some(reason.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::pending_record;

    #[test]
    fn test_task_from_record() {
        let task = Task::from_record(&pending_record("rec1", "测试剧"));

        assert_eq!(task.record_id, "rec1");
        assert_eq!(task.drama, "测试剧");
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(Uuid::parse_str(&task.id).is_ok());
        assert_eq!(task.created_at, task.updated_at);

        let other = Task::from_record(&pending_record("rec1", "测试剧"));
        assert_ne!(task.id, other.id);
    }

    #[test]
    fn test_task_transitions() {
        let mut task = Task::from_record(&pending_record("rec1", "测试剧"));

        task.mark_running();
        assert_eq!(task.status, TaskStatus::Running);
        assert!(!task.status.is_finished());

        task.mark_skipped("剧目录不存在");
        assert_eq!(task.status, TaskStatus::Skipped);
        assert_eq!(task.error.as_deref(), Some("剧目录不存在"));
        assert!(task.status.is_finished());

        // 未提供错误时保留原有错误
        task.set_status(TaskStatus::Completed, None);
        assert_eq!(task.error.as_deref(), Some("剧目录不存在"));
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Skipped).unwrap(),
            "\"skipped\""
        );
    }
}
