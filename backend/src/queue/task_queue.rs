// 任务队列
//
// 单 worker 串行消费：同一时刻只处理一个剧，浏览器会话不能并发使用。

use crate::douyin::UploadUrlBuilder;
use crate::error::PipelineError;
use crate::feishu::{RecordSource, RecordStatus};
use crate::local::FileProvider;
use crate::queue::task::{Task, TaskStatus};
use crate::uploader::{UploadExecutor, UploadRequest};
use anyhow::Result;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// 没有待处理任务时的等待间隔
const IDLE_INTERVAL: Duration = Duration::from_secs(5);

/// 任务之间的间隔
const TASK_INTERVAL: Duration = Duration::from_secs(2);

/// 任务处理依赖的协作者
#[derive(Clone)]
pub struct TaskContext {
    pub files: Arc<dyn FileProvider>,
    pub records: Arc<dyn RecordSource>,
    pub uploader: Arc<dyn UploadExecutor>,
    pub urls: UploadUrlBuilder,
    /// 上传成功后删除本地素材目录
    pub auto_delete_source: bool,
}

/// 队列事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    /// 任务处理结束（完成或跳过）
    Finished { record_id: String, status: TaskStatus },
}

/// 队列统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub skipped: usize,
}

#[derive(Debug, Default)]
struct QueueState {
    /// 按入队顺序排列
    tasks: VecDeque<Task>,
    /// 已入队的记录 ID
    record_ids: HashSet<String>,
}

/// 任务队列
pub struct TaskQueue {
    state: Mutex<QueueState>,
    /// 是否正在处理任务（仅供调度器参考）
    busy: AtomicBool,
    running: AtomicBool,
    /// 队列生命周期内唯一，stop 之后不可重新启动
    cancel_token: CancellationToken,
    event_tx: RwLock<Option<mpsc::UnboundedSender<TaskEvent>>>,
    idle_interval: Duration,
    task_interval: Duration,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::with_intervals(IDLE_INTERVAL, TASK_INTERVAL)
    }

    /// 自定义空闲等待与任务间隔
    pub fn with_intervals(idle_interval: Duration, task_interval: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            busy: AtomicBool::new(false),
            running: AtomicBool::new(false),
            cancel_token: CancellationToken::new(),
            event_tx: RwLock::new(None),
            idle_interval,
            task_interval,
        }
    }

    /// 设置任务事件发送器
    pub fn set_event_sender(&self, tx: mpsc::UnboundedSender<TaskEvent>) {
        *self.event_tx.write() = Some(tx);
        info!("任务完成通知 channel 已设置");
    }

    /// 添加任务，记录已在队列中时返回 false
    pub fn add_task(&self, task: Task) -> bool {
        let mut state = self.state.lock();
        if !state.record_ids.insert(task.record_id.clone()) {
            debug!("任务 {} 已在队列中，跳过", task.record_id);
            return false;
        }

        info!("任务已入队: {} ({})", task.drama, task.date);
        state.tasks.push_back(task);
        true
    }

    /// 批量添加任务，返回实际入队数量
    pub fn add_tasks(&self, tasks: Vec<Task>) -> usize {
        tasks
            .into_iter()
            .map(|task| self.add_task(task))
            .filter(|added| *added)
            .count()
    }

    /// 第一个待处理任务
    pub fn get_next_task(&self) -> Option<Task> {
        self.state
            .lock()
            .tasks
            .iter()
            .find(|t| t.status == TaskStatus::Pending)
            .cloned()
    }

    /// 获取记录对应的任务
    pub fn get_task(&self, record_id: &str) -> Option<Task> {
        self.state
            .lock()
            .tasks
            .iter()
            .find(|t| t.record_id == record_id)
            .cloned()
    }

    /// 更新任务状态，返回任务是否存在
    pub fn update_status(&self, record_id: &str, status: TaskStatus, error: Option<String>) -> bool {
        self.with_task_mut(record_id, |task| task.set_status(status, error))
    }

    fn with_task_mut(&self, record_id: &str, f: impl FnOnce(&mut Task)) -> bool {
        let mut state = self.state.lock();
        match state.tasks.iter_mut().find(|t| t.record_id == record_id) {
            Some(task) => {
                f(task);
                true
            }
            None => false,
        }
    }

    /// 清理已完成和已跳过的任务，返回清理数量
    pub fn cleanup(&self) -> usize {
        self.remove_where(|status| status.is_finished())
    }

    /// 只清理已完成的任务
    ///
    /// 已跳过的任务继续占住去重索引，飞书上仍为「待上传」的同一条记录
    /// 不会被立刻重新入队。
    pub fn cleanup_completed(&self) -> usize {
        self.remove_where(|status| status == TaskStatus::Completed)
    }

    fn remove_where(&self, finished: impl Fn(TaskStatus) -> bool) -> usize {
        let mut state = self.state.lock();
        let QueueState { tasks, record_ids } = &mut *state;

        let before = tasks.len();
        tasks.retain(|task| {
            if finished(task.status) {
                record_ids.remove(&task.record_id);
                false
            } else {
                true
            }
        });

        let removed = before - tasks.len();
        if removed > 0 {
            info!("清理了 {} 个已完成的任务", removed);
        }
        removed
    }

    /// 队列统计
    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        let mut stats = QueueStats {
            total: state.tasks.len(),
            ..Default::default()
        };
        for task in &state.tasks {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Skipped => stats.skipped += 1,
            }
        }
        stats
    }

    /// 是否正在处理任务
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Relaxed)
    }

    /// 处理循环是否在运行
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 启动队列处理（阻塞直到 stop）
    pub async fn start_processing(&self, ctx: &TaskContext) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("任务队列已在运行中");
            return;
        }

        let token = self.cancel_token.clone();
        if token.is_cancelled() {
            warn!("任务队列已停止，不再启动处理循环");
            self.running.store(false, Ordering::SeqCst);
            return;
        }
        info!("任务队列开始处理");

        while !token.is_cancelled() {
            let wait = match self.process_next(ctx).await {
                Some(_) => self.task_interval,
                None => self.idle_interval,
            };

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("任务队列处理循环已退出");
    }

    /// 停止处理（正在处理的任务会完整执行完）
    pub fn stop(&self) {
        self.cancel_token.cancel();
        info!("任务队列已停止");
    }

    /// 处理下一个待处理任务，返回最终状态；没有任务时返回 None
    pub async fn process_next(&self, ctx: &TaskContext) -> Option<TaskStatus> {
        let task = self.get_next_task()?;
        Some(self.process_task(task, ctx).await)
    }

    async fn process_task(&self, task: Task, ctx: &TaskContext) -> TaskStatus {
        self.busy.store(true, Ordering::Relaxed);
        self.with_task_mut(&task.record_id, Task::mark_running);

        let span = info_span!("task", task_id = %task.id, drama = %task.drama);
        let status = match self.run_task(&task, ctx).instrument(span.clone()).await {
            Ok(status) => status,
            Err(e) => {
                let message = format!("{:#}", e);
                span.in_scope(|| error!("任务处理失败: {}", message));
                self.with_task_mut(&task.record_id, |t| t.mark_skipped(message));
                TaskStatus::Skipped
            }
        };

        self.busy.store(false, Ordering::Relaxed);

        if let Some(tx) = self.event_tx.read().as_ref() {
            let event = TaskEvent::Finished {
                record_id: task.record_id.clone(),
                status,
            };
            if tx.send(event).is_err() {
                debug!("任务事件接收端已关闭");
            }
        }

        status
    }

    fn skip(&self, task: &Task, reason: impl Into<String>) -> TaskStatus {
        let reason = reason.into();
        warn!("任务跳过: {}", reason);
        self.with_task_mut(&task.record_id, |t| t.mark_skipped(reason));
        TaskStatus::Skipped
    }

    async fn run_task(&self, task: &Task, ctx: &TaskContext) -> Result<TaskStatus> {
        info!("开始处理任务: {} ({})，账户 {}", task.drama, task.date, task.account);

        // 1. 扫描本地目录
        let scan = ctx.files.scan(&task.date, &task.drama).await;
        if !scan.exists || scan.files.is_empty() {
            let reason = scan.error.unwrap_or_else(|| "目录或文件不存在".to_string());
            return Ok(self.skip(task, reason));
        }

        info!(
            "找到 {} 个素材文件（{:.2} MB）: {:?}",
            scan.files.len(),
            scan.total_bytes as f64 / (1024.0 * 1024.0),
            scan.path
        );
        let local_path = scan.path.clone();
        let found: Vec<PathBuf> = scan.files.clone();
        self.with_task_mut(&task.record_id, |t| {
            t.local_path = Some(local_path.clone());
            t.files = Some(found);
        });

        // 2. 校验文件可读性
        let validation = ctx.files.validate(&scan.files).await;
        if !validation.invalid.is_empty() {
            warn!("{} 个文件不可读", validation.invalid.len());
        }
        if validation.valid.is_empty() {
            return Ok(self.skip(task, "没有可读的素材文件"));
        }

        // 3. 构造上传地址
        let url = ctx.urls.build(&task.account)?;
        debug!("上传 URL: {}", url);

        // 4. 标记为上传中（失败不影响上传）
        if let Err(e) = ctx
            .records
            .update_status(&task.record_id, RecordStatus::Uploading)
            .await
        {
            warn!("更新飞书状态为「上传中」失败，但继续上传: {:#}", e);
        }

        // 5. 执行上传
        let result = ctx
            .uploader
            .upload(UploadRequest {
                task_id: task.id.clone(),
                record_id: task.record_id.clone(),
                drama: task.drama.clone(),
                date: task.date.clone(),
                account: task.account.clone(),
                url,
                files: validation.valid,
            })
            .await;

        if !result.success {
            let reason = result.error.unwrap_or_else(|| "上传失败".to_string());
            error!("任务上传失败: {}", reason);
            self.with_task_mut(&task.record_id, |t| t.mark_skipped(reason));

            // 恢复为待上传，下次拉取时重试
            match ctx
                .records
                .update_status(&task.record_id, RecordStatus::Pending)
                .await
            {
                Ok(()) => info!("已将飞书状态恢复为「待上传」，等待下次重试"),
                Err(e) => warn!("恢复飞书状态为「待上传」失败: {:#}", e),
            }
            return Ok(TaskStatus::Skipped);
        }

        info!(
            "任务上传完成: {} 个文件，{} 批",
            result.total_files, result.uploaded_batches
        );

        // 6. 标记为待资产化
        if let Err(e) = ctx
            .records
            .update_status(&task.record_id, RecordStatus::ReadyForAssetization)
            .await
        {
            let failure = PipelineError::RemoteUpdate {
                record_id: task.record_id.clone(),
                message: format!("{:#}", e),
            };
            return Ok(self.skip(task, failure.to_string()));
        }

        self.with_task_mut(&task.record_id, Task::mark_completed);
        info!("飞书状态已更新为「待资产化」");

        // 7. 清理本地素材
        if ctx.auto_delete_source {
            match ctx.files.delete_dir(&scan.path).await {
                Ok(()) => info!("本地素材目录已清理: {:?}", scan.path),
                Err(e) => warn!("清理本地素材目录失败: {:#}", e),
            }
        }

        Ok(TaskStatus::Completed)
    }
}
