//! 上传进度存储（断点续传）
//!
//! - 以飞书记录 ID 为键保存每个剧已完成的批次数
//! - 每次变更都同步写入 `progress.json`（先写临时文件再 rename）
//! - 构造时立即加载，进程重启后可直接从上次确认的批次继续
//!
//! 进程崩溃最多丢失正在进行的那一批，已确认的批次不会重传。

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

const PROGRESS_FILE: &str = "progress.json";

/// 单个剧的上传进度
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressCheckpoint {
    /// 飞书记录 ID
    pub record_id: String,
    /// 剧名
    pub drama: String,
    pub date: String,
    pub account: String,
    /// 总批次数
    pub total_batches: usize,
    /// 已完成的批次数
    pub completed_batches: usize,
    pub last_updated: DateTime<Utc>,
}

/// 进度更新参数
#[derive(Debug, Clone)]
pub struct CheckpointUpdate<'a> {
    pub record_id: &'a str,
    pub drama: &'a str,
    pub date: &'a str,
    pub account: &'a str,
    pub total_batches: usize,
    pub completed_batches: usize,
}

/// 进度存储
#[derive(Debug)]
pub struct ProgressStore {
    progress_file: PathBuf,
    entries: Mutex<HashMap<String, ProgressCheckpoint>>,
}

impl ProgressStore {
    /// 打开进度目录并加载已有进度
    pub fn open(progress_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(progress_dir)
            .map_err(|e| anyhow!("创建进度目录失败 {:?}: {}", progress_dir, e))?;

        let progress_file = progress_dir.join(PROGRESS_FILE);
        let entries = Self::load_entries(&progress_file);

        Ok(Self {
            progress_file,
            entries: Mutex::new(entries),
        })
    }

    /// 文件损坏时记录错误并视为空，避免因进度文件阻塞整个上传流程
    fn load_entries(progress_file: &Path) -> HashMap<String, ProgressCheckpoint> {
        if !progress_file.exists() {
            return HashMap::new();
        }

        let parsed = std::fs::read_to_string(progress_file)
            .map_err(|e| anyhow!("读取进度文件失败: {}", e))
            .and_then(|content| {
                serde_json::from_str::<Vec<ProgressCheckpoint>>(&content)
                    .map_err(|e| anyhow!("解析进度文件失败: {}", e))
            });

        match parsed {
            Ok(list) => {
                let entries: HashMap<_, _> = list
                    .into_iter()
                    .map(|p| (p.record_id.clone(), p))
                    .collect();
                debug!("已加载 {} 条上传进度记录", entries.len());
                entries
            }
            Err(e) => {
                error!("加载进度文件失败 {:?}: {}", progress_file, e);
                HashMap::new()
            }
        }
    }

    /// 持久化（调用方需持有锁）
    fn persist(&self, entries: &HashMap<String, ProgressCheckpoint>) -> Result<()> {
        let mut list: Vec<&ProgressCheckpoint> = entries.values().collect();
        list.sort_by(|a, b| a.record_id.cmp(&b.record_id));

        let content = serde_json::to_string_pretty(&list)
            .map_err(|e| anyhow!("序列化进度失败: {}", e))?;

        let tmp_path = self.progress_file.with_extension("json.tmp");
        std::fs::write(&tmp_path, content).map_err(|e| anyhow!("写入进度文件失败: {}", e))?;
        std::fs::rename(&tmp_path, &self.progress_file)
            .map_err(|e| anyhow!("替换进度文件失败: {}", e))?;

        Ok(())
    }

    /// 获取记录的上传进度
    pub fn get(&self, record_id: &str) -> Option<ProgressCheckpoint> {
        self.entries.lock().get(record_id).cloned()
    }

    /// 更新记录进度
    pub fn update(&self, update: CheckpointUpdate<'_>) -> Result<()> {
        if update.completed_batches > update.total_batches {
            anyhow::bail!(
                "已完成批次数 {} 超过总批次数 {}",
                update.completed_batches,
                update.total_batches
            );
        }

        let checkpoint = ProgressCheckpoint {
            record_id: update.record_id.to_string(),
            drama: update.drama.to_string(),
            date: update.date.to_string(),
            account: update.account.to_string(),
            total_batches: update.total_batches,
            completed_batches: update.completed_batches,
            last_updated: Utc::now(),
        };

        let mut entries = self.entries.lock();
        entries.insert(checkpoint.record_id.clone(), checkpoint);
        self.persist(&entries)?;

        debug!(
            "已更新进度: {} - 完成 {}/{} 批",
            update.drama, update.completed_batches, update.total_batches
        );
        Ok(())
    }

    /// 清除记录进度，返回是否存在过
    pub fn clear(&self, record_id: &str) -> Result<bool> {
        let mut entries = self.entries.lock();
        match entries.remove(record_id) {
            Some(removed) => {
                self.persist(&entries)?;
                info!("已清除上传进度: {}", removed.drama);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// 清除所有进度
    pub fn clear_all(&self) -> Result<()> {
        let mut entries = self.entries.lock();
        entries.clear();
        self.persist(&entries)?;
        info!("已清除所有上传进度");
        Ok(())
    }

    /// 获取所有进度记录
    pub fn get_all(&self) -> Vec<ProgressCheckpoint> {
        let mut list: Vec<_> = self.entries.lock().values().cloned().collect();
        list.sort_by(|a, b| a.record_id.cmp(&b.record_id));
        list
    }

    pub fn progress_file(&self) -> &Path {
        &self.progress_file
    }
}
