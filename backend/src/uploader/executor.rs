// 批量上传执行器
//
// 成功判定严格：本批进度条全部显示成功，且数量恰好等于本批文件数，
// 才点击确定。其余情况一律视为不足额，刷新页面后重试同一批。

use crate::browser::AutomationSurface;
use crate::config::UploaderConfig;
use crate::error::PipelineError;
use crate::progress::{CheckpointUpdate, ProgressStore};
use crate::uploader::{partition, UploadExecutor, UploadRequest, UploadResult};
use async_trait::async_trait;
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// 批量上传策略
#[derive(Debug, Clone)]
pub struct BatchUploadPolicy {
    /// 每批文件数
    pub batch_size: usize,
    /// 单批最大尝试次数
    pub max_retries: u32,
    /// 选择文件后等待进度条出现
    pub settle_delay: Duration,
    /// 进度条轮询间隔
    pub poll_interval: Duration,
    /// 进度条尚未出现或读取失败时的轮询间隔
    pub idle_poll_interval: Duration,
    /// 单次尝试上限
    pub attempt_timeout: Duration,
    /// 进度条数量不足的容忍时间
    pub shortfall_grace: Duration,
    /// 刷新页面后的等待
    pub retry_backoff: Duration,
    pub batch_delay_min: Duration,
    pub batch_delay_max: Duration,
}

impl BatchUploadPolicy {
    pub fn from_config(config: &UploaderConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            settle_delay: Duration::from_secs(5),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            idle_poll_interval: Duration::from_secs(5),
            attempt_timeout: Duration::from_secs(config.attempt_timeout_secs),
            shortfall_grace: Duration::from_secs(config.shortfall_grace_secs),
            retry_backoff: Duration::from_secs(config.retry_backoff_secs),
            batch_delay_min: Duration::from_millis(config.batch_delay_min_ms),
            batch_delay_max: Duration::from_millis(config.batch_delay_max_ms),
        }
    }

    /// 批次间随机等待时长
    fn batch_delay(&self) -> Duration {
        if self.batch_delay_max <= self.batch_delay_min {
            return self.batch_delay_min;
        }
        let min = self.batch_delay_min.as_millis() as u64;
        let max = self.batch_delay_max.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

/// 单次尝试结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptOutcome {
    /// 全部确认并已点击确定
    Complete,
    /// 不足额（已取消传输）
    Partial { confirmed: usize },
    /// 达到单次尝试上限，附带最后一次读到的完成数
    TimedOut { last_completed: Option<usize> },
}

/// 单批重试耗尽
#[derive(Debug)]
struct BatchFailure {
    /// 最后一次不足额时确认的数量
    confirmed: Option<usize>,
    message: String,
}

/// 批次在整个剧中的位置
#[derive(Debug, Clone, Copy)]
struct BatchPosition {
    /// 从 0 开始
    index: usize,
    total: usize,
}

impl BatchPosition {
    fn number(&self) -> usize {
        self.index + 1
    }
}

/// 批量上传器
///
/// 独占浏览器会话，整个进程生命周期内只有一个实例。
pub struct BatchUploader<A: AutomationSurface> {
    surface: Mutex<A>,
    progress: Arc<ProgressStore>,
    policy: BatchUploadPolicy,
}

impl<A: AutomationSurface> BatchUploader<A> {
    pub fn new(surface: A, progress: Arc<ProgressStore>, policy: BatchUploadPolicy) -> Self {
        Self {
            surface: Mutex::new(surface),
            progress,
            policy,
        }
    }

    pub fn policy(&self) -> &BatchUploadPolicy {
        &self.policy
    }

    /// 检查上传页登录状态
    pub async fn check_login(&self, url: &str) -> bool {
        match self.surface.lock().await.is_logged_in(url).await {
            Ok(logged_in) => logged_in,
            Err(e) => {
                warn!("检查登录状态失败: {:#}", e);
                false
            }
        }
    }

    /// 释放浏览器会话
    pub async fn shutdown(&self) {
        if let Err(e) = self.surface.lock().await.close().await {
            error!("关闭浏览器失败: {:#}", e);
        }
    }

    /// 计算续传起点，断点批次数不一致时丢弃断点
    fn resume_point(&self, request: &UploadRequest, total_batches: usize) -> usize {
        let Some(checkpoint) = self.progress.get(&request.record_id) else {
            info!("文件分为 {} 批上传", total_batches);
            return 0;
        };

        if checkpoint.total_batches != total_batches {
            let mismatch = PipelineError::ConfigMismatch {
                record_id: request.record_id.clone(),
                recorded: checkpoint.total_batches,
                expected: total_batches,
            };
            warn!("{}，从第 1 批重新上传", mismatch);
            if let Err(e) = self.progress.clear(&request.record_id) {
                error!("清除过期进度失败: {:#}", e);
            }
            return 0;
        }

        let start = checkpoint.completed_batches.min(total_batches);
        if start > 0 {
            info!(
                "检测到上传进度，从第 {}/{} 批开始继续上传",
                start + 1,
                total_batches
            );
        }
        start
    }

    fn save_checkpoint(&self, request: &UploadRequest, total_batches: usize, completed: usize) {
        let update = CheckpointUpdate {
            record_id: &request.record_id,
            drama: &request.drama,
            date: &request.date,
            account: &request.account,
            total_batches,
            completed_batches: completed,
        };
        if let Err(e) = self.progress.update(update) {
            error!("保存上传进度失败: {:#}", e);
        }
    }

    /// 上传一批，不足额或交互失败时刷新页面重试
    async fn upload_batch(
        &self,
        surface: &mut A,
        files: &[PathBuf],
        position: BatchPosition,
    ) -> Result<(), BatchFailure> {
        let max_retries = self.policy.max_retries.max(1);
        let mut last_confirmed = None;
        let mut last_error = String::new();

        for attempt in 1..=max_retries {
            if attempt > 1 {
                info!(
                    "第 {}/{} 批重试第 {} 次",
                    position.number(),
                    position.total,
                    attempt - 1
                );
                if let Err(e) = surface.reload().await {
                    warn!("刷新页面失败: {:#}", e);
                }
                tokio::time::sleep(self.policy.retry_backoff).await;
            }

            info!(
                "上传第 {}/{} 批，共 {} 个文件",
                position.number(),
                position.total,
                files.len()
            );

            match self.attempt_batch(surface, files, position).await {
                Ok(AttemptOutcome::Complete) => return Ok(()),
                Ok(AttemptOutcome::TimedOut { last_completed }) => {
                    let timeout = PipelineError::AutomationTransient(format!(
                        "等待文件上传超时（{} 秒），已完成 {}/{}",
                        self.policy.attempt_timeout.as_secs(),
                        last_completed.unwrap_or(0),
                        files.len()
                    ));
                    warn!(
                        "第 {}/{} 批{}（第 {} 次尝试）",
                        position.number(),
                        position.total,
                        timeout,
                        attempt
                    );
                    if last_completed.is_some() {
                        last_confirmed = last_completed;
                    }
                    last_error = timeout.to_string();
                }
                Ok(AttemptOutcome::Partial { confirmed }) => {
                    let partial = PipelineError::PartialBatch {
                        batch: position.number(),
                        total_batches: position.total,
                        confirmed,
                        expected: files.len(),
                    };
                    warn!("{}（第 {} 次尝试）", partial, attempt);
                    last_confirmed = Some(confirmed);
                    last_error = partial.to_string();
                }
                Err(e) => {
                    error!(
                        "上传第 {}/{} 批失败（第 {} 次尝试）: {}",
                        position.number(),
                        position.total,
                        attempt,
                        e
                    );
                    last_error = e.to_string();
                    if !e.is_retryable() {
                        break;
                    }
                }
            }
        }

        error!(
            "第 {}/{} 批重试 {} 次后仍失败",
            position.number(),
            position.total,
            max_retries
        );
        Err(BatchFailure {
            confirmed: last_confirmed,
            message: format!(
                "第 {} 批上传失败（{} 次尝试）: {}",
                position.number(),
                max_retries,
                last_error
            ),
        })
    }

    /// 单次尝试：选择文件并轮询进度条直到得出结论或超时
    async fn attempt_batch(
        &self,
        surface: &mut A,
        files: &[PathBuf],
        position: BatchPosition,
    ) -> Result<AttemptOutcome, PipelineError> {
        let expected = files.len();
        surface
            .select_files(files)
            .await
            .map_err(PipelineError::automation)?;

        tokio::time::sleep(self.policy.settle_delay).await;

        let start = Instant::now();
        let mut last_completed = None;
        loop {
            if start.elapsed() >= self.policy.attempt_timeout {
                return Ok(AttemptOutcome::TimedOut { last_completed });
            }

            let status = match surface.transfer_status().await {
                Ok(status) => status,
                Err(e) => {
                    debug!("检查上传状态时出错: {:#}", e);
                    tokio::time::sleep(self.policy.idle_poll_interval).await;
                    continue;
                }
            };

            if status.in_progress > 0 {
                last_completed = Some(status.completed);
            }

            if status.in_progress == 0 {
                debug!("进度条未找到，继续等待...");
                tokio::time::sleep(self.policy.idle_poll_interval).await;
                continue;
            }

            // 宽限期后进度条仍不足，说明有文件未被页面接收
            if status.in_progress < expected && start.elapsed() >= self.policy.shortfall_grace {
                warn!(
                    "检测到进度条数量不足：{}/{}，取消并准备重试",
                    status.in_progress, expected
                );
                self.cancel_quietly(surface).await;
                return Ok(AttemptOutcome::Partial {
                    confirmed: status.in_progress,
                });
            }

            debug!(
                "第 {}/{} 批上传进度: {}/{} 个素材已完成",
                position.number(),
                position.total,
                status.completed,
                status.in_progress
            );

            if status.completed == status.in_progress {
                if status.completed == expected {
                    debug!("所有素材上传完成，点击确定");
                    surface
                        .confirm()
                        .await
                        .map_err(PipelineError::automation)?;
                    return Ok(AttemptOutcome::Complete);
                }

                // 全部完成但数量与本批不符（少于或多于）
                warn!(
                    "上传完成但数量不符：{}/{}",
                    status.completed, expected
                );
                self.cancel_quietly(surface).await;
                return Ok(AttemptOutcome::Partial {
                    confirmed: status.completed,
                });
            }

            tokio::time::sleep(self.policy.poll_interval).await;
        }
    }

    async fn cancel_quietly(&self, surface: &mut A) {
        if let Err(e) = surface.cancel().await {
            error!("点击取消按钮失败: {:#}", e);
        }
    }
}

#[async_trait]
impl<A: AutomationSurface + 'static> UploadExecutor for BatchUploader<A> {
    async fn upload(&self, request: UploadRequest) -> UploadResult {
        let total_files = request.files.len();
        if total_files == 0 {
            return UploadResult::failed(0, 0, "没有可上传的文件");
        }

        info!("开始上传任务，共 {} 个文件", total_files);

        let batches = partition(&request.files, self.policy.batch_size);
        let total_batches = batches.len();
        let start_index = self.resume_point(&request, total_batches);

        let mut surface = self.surface.lock().await;

        // 每个剧只导航一次，批次之间复用同一页面
        if let Err(e) = surface.navigate(&request.url).await {
            error!("导航到上传页面失败: {:#}", e);
            return UploadResult::failed(
                total_files,
                start_index,
                format!("导航到上传页面失败: {:#}", e),
            );
        }

        for (index, files) in batches.iter().enumerate().skip(start_index) {
            let position = BatchPosition {
                index,
                total: total_batches,
            };

            if let Err(failure) = self.upload_batch(&mut surface, files, position).await {
                // 停在最后一次成功的批次边界
                self.save_checkpoint(&request, total_batches, index);
                return UploadResult {
                    success: false,
                    total_files,
                    uploaded_batches: index,
                    failed_batch_confirmed: failure.confirmed,
                    error: Some(failure.message),
                };
            }

            self.save_checkpoint(&request, total_batches, index + 1);
            tokio::time::sleep(self.policy.batch_delay()).await;
        }

        info!("所有文件上传成功，共 {} 批", total_batches);
        if let Err(e) = self.progress.clear(&request.record_id) {
            error!("清除上传进度失败: {:#}", e);
        }

        UploadResult::succeeded(total_files, total_batches)
    }
}
