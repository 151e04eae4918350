// 测试替身：记录来源、本地文件、上传执行器、浏览器会话

use crate::browser::{AutomationSurface, TransferStatus};
use crate::feishu::{PendingRecord, RecordSource, RecordStatus};
use crate::local::{FileProvider, FileScanResult, FileValidation};
use crate::uploader::{BatchUploadPolicy, UploadExecutor, UploadRequest, UploadResult};
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 生成 1.mp4 ~ n.mp4
pub fn media_files(count: usize) -> Vec<PathBuf> {
    (1..=count)
        .map(|i| PathBuf::from(format!("/materials/12.24导出/测试剧/{}.mp4", i)))
        .collect()
}

/// 毫秒级策略，最多 3 次尝试
pub fn fast_policy(batch_size: usize) -> BatchUploadPolicy {
    BatchUploadPolicy {
        batch_size,
        max_retries: 3,
        settle_delay: Duration::ZERO,
        poll_interval: Duration::from_millis(1),
        idle_poll_interval: Duration::from_millis(1),
        attempt_timeout: Duration::from_millis(50),
        shortfall_grace: Duration::ZERO,
        retry_backoff: Duration::ZERO,
        batch_delay_min: Duration::ZERO,
        batch_delay_max: Duration::ZERO,
    }
}

pub fn pending_record(record_id: &str, drama: &str) -> PendingRecord {
    PendingRecord {
        record_id: record_id.to_string(),
        drama: drama.to_string(),
        date: "2025-12-24".to_string(),
        account: "1234567890".to_string(),
        status: "待上传".to_string(),
    }
}

/// 记录来源替身：每次拉取都返回当前记录列表
#[derive(Default)]
pub struct MockRecordSource {
    pub records: Mutex<Vec<PendingRecord>>,
    pub updates: Mutex<Vec<(String, RecordStatus)>>,
    pub fetch_count: AtomicUsize,
    pub fail_fetch: AtomicBool,
    /// 只让指定状态的更新失败
    pub fail_status: Mutex<Option<RecordStatus>>,
}

impl MockRecordSource {
    pub fn with_records(records: Vec<PendingRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Default::default()
        }
    }

    pub fn set_records(&self, records: Vec<PendingRecord>) {
        *self.records.lock() = records;
    }

    pub fn updates_for(&self, record_id: &str) -> Vec<RecordStatus> {
        self.updates
            .lock()
            .iter()
            .filter(|(id, _)| id == record_id)
            .map(|(_, status)| *status)
            .collect()
    }
}

#[async_trait]
impl RecordSource for MockRecordSource {
    async fn fetch_pending(&self) -> Result<Vec<PendingRecord>> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            anyhow::bail!("模拟拉取失败");
        }
        Ok(self.records.lock().clone())
    }

    async fn update_status(&self, record_id: &str, status: RecordStatus) -> Result<()> {
        self.updates.lock().push((record_id.to_string(), status));
        if *self.fail_status.lock() == Some(status) {
            anyhow::bail!("模拟状态更新失败");
        }
        // 离开「待上传」后不再被拉取
        if status != RecordStatus::Pending {
            self.records.lock().retain(|r| r.record_id != record_id);
        }
        Ok(())
    }
}

/// 本地文件替身：按剧名登记文件，未登记的剧视为目录不存在
#[derive(Default)]
pub struct MockFileProvider {
    pub dramas: Mutex<HashMap<String, Vec<PathBuf>>>,
    pub unreadable: Mutex<HashSet<PathBuf>>,
    pub deleted: Mutex<Vec<PathBuf>>,
    pub fail_delete: AtomicBool,
}

impl MockFileProvider {
    pub fn add_drama(&self, drama: &str, files: Vec<PathBuf>) {
        self.dramas.lock().insert(drama.to_string(), files);
    }
}

#[async_trait]
impl FileProvider for MockFileProvider {
    async fn scan(&self, _date: &str, drama: &str) -> FileScanResult {
        let path = PathBuf::from("/materials/12.24导出").join(drama);
        match self.dramas.lock().get(drama) {
            Some(files) => FileScanResult {
                exists: true,
                path,
                files: files.clone(),
                total_bytes: files.len() as u64 * 1024 * 1024,
                error: files
                    .is_empty()
                    .then(|| "目录下没有 MP4 文件".to_string()),
            },
            None => FileScanResult {
                exists: false,
                error: Some(format!("剧目录不存在: {}", path.display())),
                path,
                ..Default::default()
            },
        }
    }

    async fn validate(&self, files: &[PathBuf]) -> FileValidation {
        let unreadable = self.unreadable.lock();
        let (invalid, valid): (Vec<PathBuf>, Vec<PathBuf>) =
            files.iter().cloned().partition(|f| unreadable.contains(f));
        FileValidation { valid, invalid }
    }

    async fn delete_dir(&self, path: &Path) -> Result<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            anyhow::bail!("模拟删除失败");
        }
        self.deleted.lock().push(path.to_path_buf());
        Ok(())
    }
}

/// 上传执行器替身
pub struct MockExecutor {
    pub succeed: AtomicBool,
    pub requests: Mutex<Vec<UploadRequest>>,
}

impl MockExecutor {
    pub fn new(succeed: bool) -> Self {
        Self {
            succeed: AtomicBool::new(succeed),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl UploadExecutor for MockExecutor {
    async fn upload(&self, request: UploadRequest) -> UploadResult {
        let total_files = request.files.len();
        self.requests.lock().push(request);
        if self.succeed.load(Ordering::SeqCst) {
            UploadResult::succeeded(total_files, 1)
        } else {
            UploadResult::failed(total_files, 0, "模拟上传失败")
        }
    }
}

/// 浏览器会话调用记录
#[derive(Debug, Default)]
pub struct SurfaceLog {
    pub navigations: Vec<String>,
    pub selections: Vec<Vec<PathBuf>>,
    pub confirms: usize,
    pub cancels: usize,
    pub reloads: usize,
    pub login_checks: Vec<String>,
    pub closed: bool,
}

/// 根据当前批次与累计选择次数（从 1 开始）给出进度条状态
type TransferScript = Box<dyn Fn(&[PathBuf], usize) -> TransferStatus + Send + Sync>;

/// 浏览器会话替身
pub struct MockSurface {
    script: TransferScript,
    current: Vec<PathBuf>,
    log: Arc<Mutex<SurfaceLog>>,
    fail_navigate: bool,
    logged_in: bool,
}

impl MockSurface {
    pub fn scripted(
        script: impl Fn(&[PathBuf], usize) -> TransferStatus + Send + Sync + 'static,
    ) -> (Self, Arc<Mutex<SurfaceLog>>) {
        let log = Arc::new(Mutex::new(SurfaceLog::default()));
        let surface = Self {
            script: Box::new(script),
            current: Vec::new(),
            log: log.clone(),
            fail_navigate: false,
            logged_in: true,
        };
        (surface, log)
    }

    /// 每批都完整上传
    pub fn always_complete() -> (Self, Arc<Mutex<SurfaceLog>>) {
        Self::scripted(|batch, _| TransferStatus {
            in_progress: batch.len(),
            completed: batch.len(),
        })
    }

    pub fn failing_navigation(mut self) -> Self {
        self.fail_navigate = true;
        self
    }

    pub fn logged_out(mut self) -> Self {
        self.logged_in = false;
        self
    }
}

#[async_trait]
impl AutomationSurface for MockSurface {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        if self.fail_navigate {
            anyhow::bail!("模拟导航失败");
        }
        self.log.lock().navigations.push(url.to_string());
        Ok(())
    }

    async fn reload(&mut self) -> Result<()> {
        self.log.lock().reloads += 1;
        self.current.clear();
        Ok(())
    }

    async fn select_files(&mut self, files: &[PathBuf]) -> Result<()> {
        self.current = files.to_vec();
        self.log.lock().selections.push(files.to_vec());
        Ok(())
    }

    async fn transfer_status(&mut self) -> Result<TransferStatus> {
        let selections = self.log.lock().selections.len();
        Ok((self.script)(&self.current, selections))
    }

    async fn confirm(&mut self) -> Result<()> {
        self.log.lock().confirms += 1;
        Ok(())
    }

    async fn cancel(&mut self) -> Result<()> {
        self.log.lock().cancels += 1;
        Ok(())
    }

    async fn is_logged_in(&mut self, url: &str) -> Result<bool> {
        self.log.lock().login_checks.push(url.to_string());
        Ok(self.logged_in)
    }

    async fn close(&mut self) -> Result<()> {
        self.log.lock().closed = true;
        Ok(())
    }
}
