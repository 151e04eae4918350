//! 拉取调度器
//!
//! 自适应拉取策略：
//! - 启动时立即拉取一次
//! - 有新任务入队时进入事件驱动模式：不开定时器，每个任务处理结束后立即再拉取
//! - 拉取不到新任务时回到定时模式，按配置间隔轮询，直到再次拉取到新任务
//!
//! 定时拉取在队列处理任务期间跳过，避免与正在进行的上传争抢飞书接口。
//!
//! 任务结束触发的拉取只清理已完成的任务：被跳过的记录在飞书上仍是「待上传」，
//! 它们留在去重索引里，直到下一次定时拉取才重新入队。

use crate::error::PipelineError;
use crate::feishu::RecordSource;
use crate::queue::{Task, TaskContext, TaskEvent, TaskQueue};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 拉取模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    /// 尚未拉取或已停止
    Idle,
    /// 定时轮询
    Timer,
    /// 由任务完成事件触发
    EventDriven,
}

/// 拉取触发来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchTrigger {
    /// 启动时的首次拉取
    Startup,
    /// 定时轮询
    Timer,
    /// 任务处理结束
    TaskFinished,
}

/// 拉取调度器
pub struct Scheduler {
    source: Arc<dyn RecordSource>,
    queue: Arc<TaskQueue>,
    fetch_interval: Duration,
    mode: RwLock<FetchMode>,
    /// 定时器取消令牌，None 表示定时器未运行
    timer: Mutex<Option<CancellationToken>>,
    running: AtomicBool,
    shutdown_token: CancellationToken,
    /// 串行化拉取（定时器与任务完成事件可能同时触发）
    fetch_lock: tokio::sync::Mutex<()>,
}

impl Scheduler {
    pub fn new(
        source: Arc<dyn RecordSource>,
        queue: Arc<TaskQueue>,
        fetch_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            source,
            queue,
            fetch_interval,
            mode: RwLock::new(FetchMode::Idle),
            timer: Mutex::new(None),
            running: AtomicBool::new(false),
            shutdown_token: CancellationToken::new(),
            fetch_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// 当前拉取模式
    pub fn mode(&self) -> FetchMode {
        *self.mode.read()
    }

    /// 定时器是否在运行
    pub fn timer_active(&self) -> bool {
        self.timer.lock().is_some()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn is_stopped(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// 启动调度器（阻塞直到队列停止）
    pub async fn start(self: &Arc<Self>, ctx: TaskContext) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("调度器已在运行中");
            return;
        }
        info!(
            "调度器启动，空闲拉取间隔: {} 分钟",
            self.fetch_interval.as_secs() / 60
        );

        let (tx, rx) = mpsc::unbounded_channel();
        self.queue.set_event_sender(tx);
        self.spawn_event_listener(rx);

        // 启动时立即拉取一次
        self.run_fetch(FetchTrigger::Startup).await;

        if !self.is_stopped() {
            self.queue.start_processing(&ctx).await;
        }
        self.running.store(false, Ordering::SeqCst);
    }

    fn spawn_event_listener(self: &Arc<Self>, mut rx: mpsc::UnboundedReceiver<TaskEvent>) {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = scheduler.shutdown_token.cancelled() => break,
                    event = rx.recv() => event,
                };
                let Some(TaskEvent::Finished { record_id, status }) = event else {
                    break;
                };
                debug!("任务 {} 处理结束: {:?}", record_id, status);
                scheduler.on_task_complete().await;
            }
            debug!("任务事件监听已退出");
        });
    }

    /// 任务处理结束后立即拉取
    pub async fn on_task_complete(self: &Arc<Self>) {
        if self.is_stopped() {
            return;
        }
        debug!("任务处理结束，立即拉取新任务");
        self.run_fetch(FetchTrigger::TaskFinished).await;
    }

    /// 拉取一次并根据结果切换模式
    pub async fn run_fetch(self: &Arc<Self>, trigger: FetchTrigger) {
        match self.fetch_once(trigger).await {
            Ok(added) => self.handle_fetch_result(added),
            Err(e) => {
                error!("{}", e);
                // 拉取失败时保证定时轮询在运行，等待下个周期
                if !self.is_stopped() && !self.timer_active() {
                    self.start_timer();
                }
            }
        }
    }

    /// 清理已结束任务、拉取待上传记录并入队，返回实际新增数量
    pub async fn fetch_once(&self, trigger: FetchTrigger) -> Result<usize, PipelineError> {
        let _guard = self.fetch_lock.lock().await;
        if self.is_stopped() {
            return Ok(0);
        }

        info!("开始从飞书拉取待上传任务（{:?}）", trigger);
        match trigger {
            FetchTrigger::TaskFinished => self.queue.cleanup_completed(),
            FetchTrigger::Startup | FetchTrigger::Timer => self.queue.cleanup(),
        };

        let records = self
            .source
            .fetch_pending()
            .await
            .map_err(|e| PipelineError::Fetch(format!("{:#}", e)))?;

        if self.is_stopped() {
            info!("调度器已停止，忽略本次拉取结果");
            return Ok(0);
        }

        let tasks: Vec<Task> = records.iter().map(Task::from_record).collect();
        let added = self.queue.add_tasks(tasks);

        if records.is_empty() {
            info!("没有待上传的任务");
        } else {
            info!("拉取到 {} 条记录，成功入队 {} 个新任务", records.len(), added);
        }

        let stats = self.queue.stats();
        info!(
            "队列状态: 总计={}, 待处理={}, 运行中={}, 已完成={}, 已跳过={}",
            stats.total, stats.pending, stats.running, stats.completed, stats.skipped
        );

        Ok(added)
    }

    fn handle_fetch_result(self: &Arc<Self>, added: usize) {
        if self.is_stopped() {
            return;
        }

        if added == 0 {
            if !self.timer_active() {
                self.start_timer();
            }
        } else {
            self.stop_timer();
            if self.mode() != FetchMode::EventDriven {
                info!("有新任务入队，切换为事件驱动模式");
            }
            *self.mode.write() = FetchMode::EventDriven;
        }
    }

    fn start_timer(self: &Arc<Self>) {
        let token = self.shutdown_token.child_token();
        {
            let mut timer = self.timer.lock();
            if let Some(old) = timer.replace(token.clone()) {
                old.cancel();
            }
        }
        *self.mode.write() = FetchMode::Timer;
        info!(
            "切换为定时拉取模式，间隔: {} 秒",
            self.fetch_interval.as_secs()
        );

        let scheduler = Arc::clone(self);
        let interval = self.fetch_interval;
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if scheduler.queue.is_busy() {
                    debug!("队列正在处理任务，跳过本次定时拉取");
                    continue;
                }
                scheduler.run_fetch(FetchTrigger::Timer).await;
            }
            debug!("定时拉取已停止");
        });
    }

    fn stop_timer(&self) {
        if let Some(token) = self.timer.lock().take() {
            token.cancel();
            info!("定时拉取已停止");
        }
    }

    /// 停止调度器：取消定时器并停止队列，进行中的拉取结果会被忽略
    pub fn stop(&self) {
        if self.is_stopped() {
            return;
        }
        info!("正在停止调度器");
        self.shutdown_token.cancel();
        self.stop_timer();
        self.queue.stop();
        *self.mode.write() = FetchMode::Idle;
        info!("调度器已停止");
    }
}
