//! 本地素材目录管理
//!
//! 目录结构：`{root_dir}/{M.D}导出/{剧名}/*.mp4`，日期文件夹不带前导零，
//! 例如 2025-12-24 → `12.24导出`，2025-01-07 → `1.7导出`。

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use std::cmp::Ordering;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{error, info, warn};

/// 支持的日期格式
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d"];

/// 剧目录扫描结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileScanResult {
    /// 剧目录是否存在
    pub exists: bool,
    /// 剧目录路径
    pub path: PathBuf,
    /// 排序后的素材文件
    pub files: Vec<PathBuf>,
    /// 素材总大小（字节）
    pub total_bytes: u64,
    /// 无法上传的原因
    pub error: Option<String>,
}

/// 文件可读性校验结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileValidation {
    pub valid: Vec<PathBuf>,
    pub invalid: Vec<PathBuf>,
}

/// 本地素材来源
#[async_trait]
pub trait FileProvider: Send + Sync {
    /// 扫描剧目录下的素材文件
    async fn scan(&self, date: &str, drama: &str) -> FileScanResult;

    /// 校验文件是否可读
    async fn validate(&self, files: &[PathBuf]) -> FileValidation;

    /// 递归删除目录（目录不存在视为成功）
    async fn delete_dir(&self, path: &Path) -> Result<()>;
}

/// 本地文件管理器
#[derive(Debug, Clone)]
pub struct LocalFileManager {
    root_dir: PathBuf,
    /// 小写扩展名
    extension: String,
}

impl LocalFileManager {
    pub fn new(root_dir: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            root_dir: root_dir.into(),
            extension: extension.trim_start_matches('.').to_lowercase(),
        }
    }

    /// 日期转换为导出文件夹名
    pub fn date_to_folder(date: &str) -> Result<String> {
        let date = parse_date(date).with_context(|| format!("无效的日期格式: {}", date))?;
        Ok(format!("{}.{}导出", date.month(), date.day()))
    }

    /// 构造剧目录路径
    ///
    /// 剧名来自飞书记录，必须是单级目录名，不允许绝对路径、分隔符或 `..`。
    pub fn build_drama_path(&self, date: &str, drama: &str) -> Result<PathBuf> {
        let folder = Self::date_to_folder(date)?;
        if !is_plain_name(drama) {
            bail!("无效的剧名: {:?}", drama);
        }
        Ok(self.root_dir.join(folder).join(drama))
    }

    /// 路径是否位于素材根目录之下（不含根目录本身）
    fn is_under_root(&self, path: &Path) -> bool {
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return false;
        }
        path.strip_prefix(&self.root_dir)
            .map(|rest| rest.components().next().is_some())
            .unwrap_or(false)
    }

    /// 扫描目录下的素材文件（自然排序）
    pub async fn scan_media_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = fs::read_dir(dir)
            .await
            .with_context(|| format!("读取目录失败: {:?}", dir))?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let matched = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case(&self.extension))
                .unwrap_or(false);
            if matched {
                files.push(path);
            }
        }

        files.sort_by(|a, b| natural_cmp(a, b));
        Ok(files)
    }

    /// 文件总大小（字节），读取不到元数据的文件不计入
    pub async fn total_size(files: &[PathBuf]) -> u64 {
        let mut total = 0;
        for file in files {
            if let Ok(meta) = fs::metadata(file).await {
                total += meta.len();
            }
        }
        total
    }
}

fn is_plain_name(name: &str) -> bool {
    if name.trim().is_empty() || name.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn parse_date(date: &str) -> Option<NaiveDate> {
    // 兼容 "2025-12-24 00:00:00" 这类带时间的写法
    let day = date.split_whitespace().next()?;
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(day, fmt).ok())
}

/// 自然排序：文件名以数字开头时按数值比较（2.mp4 排在 10.mp4 之前）
fn natural_cmp(a: &Path, b: &Path) -> Ordering {
    let a_stem = a.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    let b_stem = b.file_stem().and_then(|s| s.to_str()).unwrap_or_default();

    match (leading_number(a_stem), leading_number(b_stem)) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a_stem.cmp(b_stem)),
        _ => a_stem.cmp(b_stem),
    }
}

fn leading_number(s: &str) -> Option<u64> {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}

#[async_trait]
impl FileProvider for LocalFileManager {
    async fn scan(&self, date: &str, drama: &str) -> FileScanResult {
        let drama_path = match self.build_drama_path(date, drama) {
            Ok(path) => path,
            Err(e) => {
                error!("扫描剧目录失败: {:#}", e);
                return FileScanResult {
                    error: Some(format!("{:#}", e)),
                    ..Default::default()
                };
            }
        };

        let date_path = drama_path.parent().map(Path::to_path_buf).unwrap_or_default();
        if !is_dir(&date_path).await {
            return FileScanResult {
                exists: false,
                error: Some(format!("日期目录不存在: {}", date_path.display())),
                path: drama_path,
                ..Default::default()
            };
        }

        if !is_dir(&drama_path).await {
            return FileScanResult {
                exists: false,
                error: Some(format!("剧目录不存在: {}", drama_path.display())),
                path: drama_path,
                ..Default::default()
            };
        }

        let files = match self.scan_media_files(&drama_path).await {
            Ok(files) => files,
            Err(e) => {
                error!("扫描素材文件失败: {:#}", e);
                Vec::new()
            }
        };

        let error = files.is_empty().then(|| {
            format!(
                "目录下没有 {} 文件: {}",
                self.extension.to_uppercase(),
                drama_path.display()
            )
        });

        let total_bytes = Self::total_size(&files).await;
        FileScanResult {
            exists: true,
            path: drama_path,
            files,
            total_bytes,
            error,
        }
    }

    async fn validate(&self, files: &[PathBuf]) -> FileValidation {
        let mut result = FileValidation::default();
        for file in files {
            match fs::File::open(file).await {
                Ok(_) => result.valid.push(file.clone()),
                Err(e) => {
                    warn!("文件不可读: {:?}: {}", file, e);
                    result.invalid.push(file.clone());
                }
            }
        }
        result
    }

    async fn delete_dir(&self, path: &Path) -> Result<()> {
        if !self.is_under_root(path) {
            bail!("拒绝删除素材根目录之外的路径: {:?}", path);
        }
        if !is_dir(path).await {
            warn!("目录不存在，无需删除: {:?}", path);
            return Ok(());
        }

        fs::remove_dir_all(path)
            .await
            .with_context(|| format!("删除目录失败: {:?}", path))?;
        info!("素材目录已删除: {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_date_to_folder() {
        assert_eq!(
            LocalFileManager::date_to_folder("2025-12-24").unwrap(),
            "12.24导出"
        );
        assert_eq!(
            LocalFileManager::date_to_folder("2025-01-07").unwrap(),
            "1.7导出"
        );
        assert_eq!(
            LocalFileManager::date_to_folder("2025/3/5").unwrap(),
            "3.5导出"
        );
        assert_eq!(
            LocalFileManager::date_to_folder("2025-12-24 08:00:00").unwrap(),
            "12.24导出"
        );
        assert!(LocalFileManager::date_to_folder("昨天").is_err());
    }

    #[test]
    fn test_natural_sort() {
        let mut files: Vec<PathBuf> = ["10.mp4", "2.mp4", "1.mp4", "b.mp4", "a.mp4"]
            .iter()
            .map(PathBuf::from)
            .collect();
        files.sort_by(|a, b| natural_cmp(a, b));

        let names: Vec<_> = files.iter().map(|p| p.to_str().unwrap()).collect();
        assert_eq!(names, vec!["1.mp4", "2.mp4", "10.mp4", "a.mp4", "b.mp4"]);
    }

    #[tokio::test]
    async fn test_scan_distinguishes_missing_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let manager = LocalFileManager::new(temp_dir.path(), "mp4");

        let result = manager.scan("2025-12-24", "测试剧").await;
        assert!(!result.exists);
        assert!(result.error.unwrap().contains("日期目录不存在"));

        std::fs::create_dir(temp_dir.path().join("12.24导出")).unwrap();
        let result = manager.scan("2025-12-24", "测试剧").await;
        assert!(!result.exists);
        assert!(result.error.unwrap().contains("剧目录不存在"));
        assert_eq!(
            result.path,
            temp_dir.path().join("12.24导出").join("测试剧")
        );
    }

    #[tokio::test]
    async fn test_scan_filters_and_sorts() {
        let temp_dir = TempDir::new().unwrap();
        let drama_dir = temp_dir.path().join("1.7导出").join("测试剧");
        std::fs::create_dir_all(&drama_dir).unwrap();
        for name in ["10.mp4", "2.MP4", "1.mp4", "cover.jpg"] {
            std::fs::write(drama_dir.join(name), b"data").unwrap();
        }
        std::fs::create_dir(drama_dir.join("3.mp4")).unwrap();

        let manager = LocalFileManager::new(temp_dir.path(), "mp4");
        let result = manager.scan("2025-01-07", "测试剧").await;

        assert!(result.exists);
        assert!(result.error.is_none());
        let names: Vec<_> = result
            .files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["1.mp4", "2.MP4", "10.mp4"]);

        assert_eq!(result.total_bytes, 12);
    }

    #[tokio::test]
    async fn test_scan_empty_dir() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("12.24导出").join("空剧")).unwrap();

        let manager = LocalFileManager::new(temp_dir.path(), "mp4");
        let result = manager.scan("2025-12-24", "空剧").await;

        assert!(result.exists);
        assert!(result.files.is_empty());
        assert!(result.error.unwrap().contains("没有 MP4 文件"));
    }

    #[tokio::test]
    async fn test_validate_and_delete() {
        let temp_dir = TempDir::new().unwrap();
        let drama_dir = temp_dir.path().join("剧");
        std::fs::create_dir_all(&drama_dir).unwrap();
        let present = drama_dir.join("1.mp4");
        std::fs::write(&present, b"data").unwrap();
        let missing = drama_dir.join("2.mp4");

        let manager = LocalFileManager::new(temp_dir.path(), "mp4");
        let validation = manager
            .validate(&[present.clone(), missing.clone()])
            .await;
        assert_eq!(validation.valid, vec![present]);
        assert_eq!(validation.invalid, vec![missing]);

        manager.delete_dir(&drama_dir).await.unwrap();
        assert!(!drama_dir.exists());

        // 再次删除不存在的目录视为成功
        manager.delete_dir(&drama_dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_drama_name_cannot_escape_root() {
        let root = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("1.mp4"), b"data").unwrap();
        std::fs::create_dir(root.path().join("12.24导出")).unwrap();

        let manager = LocalFileManager::new(root.path(), "mp4");
        let absolute = outside.path().to_str().unwrap().to_string();
        for drama in [absolute.as_str(), "..", "../..", "a/b", "a\\b", " "] {
            let result = manager.scan("2025-12-24", drama).await;
            assert!(!result.exists, "{}", drama);
            assert!(result.files.is_empty());
            assert!(result.error.unwrap().contains("无效的剧名"));
        }
        assert!(manager.build_drama_path("2025-12-24", "正常剧").is_ok());
    }

    #[tokio::test]
    async fn test_delete_outside_root_rejected() {
        let root = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let manager = LocalFileManager::new(root.path(), "mp4");

        assert!(manager.delete_dir(outside.path()).await.is_err());
        assert!(outside.path().exists());

        assert!(manager.delete_dir(root.path()).await.is_err());
        assert!(root.path().exists());

        let sneaky = root.path().join("12.24导出").join("..").join("..");
        assert!(manager.delete_dir(&sneaky).await.is_err());
        assert!(root.path().exists());
    }
}
