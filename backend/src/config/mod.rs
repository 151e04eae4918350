// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 飞书多维表格配置
    pub feishu: FeishuConfig,
    /// 本地素材配置
    pub local: LocalConfig,
    /// 巨量配置
    pub douyin: DouyinConfig,
    /// 上传器配置
    pub uploader: UploaderConfig,
    /// 调度器配置
    pub scheduler: SchedulerConfig,
    /// 浏览器配置
    #[serde(default)]
    pub browser: BrowserConfig,
    /// 断点续传配置
    #[serde(default)]
    pub progress: ProgressConfig,
}

/// 飞书配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeishuConfig {
    pub app_id: String,
    pub app_secret: String,
    /// 多维表格 app_token
    pub app_token: String,
    pub table_id: String,
    /// 多维表格 API 基础地址，如 https://open.feishu.cn/open-apis/bitable/v1
    pub base_url: String,
    /// tenant_access_token 获取地址
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    /// 字段名映射
    pub fields: FeishuFields,
    /// 状态字段取值
    #[serde(default)]
    pub status_values: StatusValues,
    /// 日期字段为时间戳时使用的时区偏移（小时）
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
}

/// 飞书字段名
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeishuFields {
    pub status: String,
    pub account: String,
    pub drama: String,
    pub date: String,
}

/// 状态字段的三个取值
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusValues {
    /// 待上传
    pub pending: String,
    /// 上传中
    pub uploading: String,
    /// 上传完成，等待资产化
    pub done: String,
}

impl Default for StatusValues {
    fn default() -> Self {
        Self {
            pending: "待上传".to_string(),
            uploading: "上传中".to_string(),
            done: "待资产化".to_string(),
        }
    }
}

/// 本地素材配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// 素材根目录，结构为 {root_dir}/{M.D}导出/{剧名}/
    pub root_dir: PathBuf,
    /// 素材扩展名（不含点，大小写不敏感）
    #[serde(default = "default_media_extension")]
    pub media_extension: String,
    /// 上传成功后是否删除本地素材目录
    #[serde(default = "default_true")]
    pub auto_delete_source: bool,
}

/// 巨量配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DouyinConfig {
    /// 上传页地址模板，aadvid 参数取 {accountId} 占位符
    pub base_upload_url: String,
}

/// 上传器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploaderConfig {
    /// 每批文件数
    pub batch_size: usize,
    /// 批次间随机等待下限（毫秒）
    #[serde(default = "default_batch_delay_min")]
    pub batch_delay_min_ms: u64,
    /// 批次间随机等待上限（毫秒）
    #[serde(default = "default_batch_delay_max")]
    pub batch_delay_max_ms: u64,
    /// 单批最大尝试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 进度条轮询间隔（秒）
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// 单次尝试等待上传完成的上限（秒）
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,
    /// 进度条数量不足的容忍时间（秒），超过即判定为部分失败
    #[serde(default = "default_shortfall_grace")]
    pub shortfall_grace_secs: u64,
    /// 重试前刷新页面后的等待（秒）
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: u64,
    /// 页面元素选择器
    #[serde(default)]
    pub selectors: UploaderSelectors,
}

/// 上传页面选择器
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploaderSelectors {
    pub upload_button: String,
    pub upload_panel: String,
    pub file_input: String,
    pub progress_item: String,
    pub progress_success: String,
    pub confirm_button: String,
    pub cancel_button: String,
}

impl Default for UploaderSelectors {
    fn default() -> Self {
        Self {
            upload_button: "button:has(span)".to_string(),
            upload_panel: ".material-center-v2-oc-upload-drag".to_string(),
            file_input: "input[type=file]".to_string(),
            progress_item: ".material-center-v2-oc-upload-table-name-progress".to_string(),
            progress_success: ".material-center-v2-oc-upload-table-name-progress-success"
                .to_string(),
            confirm_button: ".material-center-v2-oc-upload-footer button.primary".to_string(),
            cancel_button: ".material-center-v2-oc-upload-footer button.cancel".to_string(),
        }
    }
}

/// 调度器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// 空闲时定时拉取间隔（分钟）
    pub fetch_interval_minutes: u64,
}

/// 浏览器（WebDriver）配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// WebDriver 服务地址（chromedriver）
    pub webdriver_url: String,
    pub headless: bool,
    /// 持久化用户数据目录（保存登录态）
    pub user_data_dir: PathBuf,
    /// 页面加载超时（秒）
    pub page_load_timeout_secs: u64,
    /// 元素等待超时（秒）
    pub element_timeout_secs: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: "http://127.0.0.1:9515".to_string(),
            headless: false,
            user_data_dir: PathBuf::from("./browser-data"),
            page_load_timeout_secs: 30,
            element_timeout_secs: 15,
        }
    }
}

/// 断点续传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// 进度文件目录
    pub dir: PathBuf,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./upload-progress"),
        }
    }
}

fn default_auth_url() -> String {
    "https://open.feishu.cn/open-apis/auth/v3/tenant_access_token/internal".to_string()
}

fn default_utc_offset_hours() -> i32 {
    8
}

fn default_media_extension() -> String {
    "mp4".to_string()
}

fn default_true() -> bool {
    true
}

fn default_batch_delay_min() -> u64 {
    3000
}

fn default_batch_delay_max() -> u64 {
    5000
}

fn default_max_retries() -> u32 {
    10
}

fn default_poll_interval() -> u64 {
    30
}

fn default_attempt_timeout() -> u64 {
    600
}

fn default_shortfall_grace() -> u64 {
    20
}

fn default_retry_backoff() -> u64 {
    5
}

impl SchedulerConfig {
    pub fn fetch_interval(&self) -> Duration {
        Duration::from_secs(self.fetch_interval_minutes * 60)
    }
}

impl AppConfig {
    /// 从文件加载配置并校验
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("配置文件不存在或无法读取: {}", path))?;

        let config: AppConfig = toml::from_str(&content).context("解析配置文件失败")?;
        config.validate()?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self).context("序列化配置失败")?;

        if let Some(parent) = std::path::Path::new(path).parent() {
            fs::create_dir_all(parent)
                .await
                .context("创建配置目录失败")?;
        }

        fs::write(path, content).await.context("写入配置文件失败")?;

        Ok(())
    }

    /// 校验配置，一次性汇总所有问题
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        let feishu = &self.feishu;
        for (name, value) in [
            ("feishu.app_id", &feishu.app_id),
            ("feishu.app_secret", &feishu.app_secret),
            ("feishu.app_token", &feishu.app_token),
            ("feishu.table_id", &feishu.table_id),
            ("feishu.base_url", &feishu.base_url),
            ("feishu.fields.status", &feishu.fields.status),
            ("feishu.fields.account", &feishu.fields.account),
            ("feishu.fields.drama", &feishu.fields.drama),
            ("feishu.fields.date", &feishu.fields.date),
        ] {
            if value.trim().is_empty() {
                errors.push(format!("{} 不能为空", name));
            }
        }

        if self.local.root_dir.as_os_str().is_empty() {
            errors.push("local.root_dir 不能为空".to_string());
        }

        if self.douyin.base_upload_url.is_empty() {
            errors.push("douyin.base_upload_url 不能为空".to_string());
        } else if !self.douyin.base_upload_url.contains("{accountId}") {
            errors.push("douyin.base_upload_url 必须包含 {accountId} 占位符".to_string());
        }

        let uploader = &self.uploader;
        if uploader.batch_size == 0 {
            errors.push("uploader.batch_size 必须大于 0".to_string());
        }
        if uploader.max_retries == 0 {
            errors.push("uploader.max_retries 必须大于 0".to_string());
        }
        if uploader.batch_delay_min_ms > uploader.batch_delay_max_ms {
            errors.push("uploader.batch_delay_min_ms 不能大于 batch_delay_max_ms".to_string());
        }
        if uploader.poll_interval_secs == 0 {
            errors.push("uploader.poll_interval_secs 必须大于 0".to_string());
        }

        if self.scheduler.fetch_interval_minutes == 0 {
            errors.push("scheduler.fetch_interval_minutes 必须大于 0".to_string());
        }

        if !errors.is_empty() {
            anyhow::bail!("配置验证失败:\n{}", errors.join("\n"));
        }

        Ok(())
    }
}
