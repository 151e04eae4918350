// 应用装配与生命周期
//
// 初始化顺序：配置 → 飞书客户端 → 进度存储 → 浏览器会话 → 上传器 → 任务队列 → 调度器

use crate::browser::WebDriverSession;
use crate::config::AppConfig;
use crate::douyin::UploadUrlBuilder;
use crate::error::PipelineError;
use crate::feishu::FeishuClient;
use crate::local::LocalFileManager;
use crate::progress::ProgressStore;
use crate::queue::{TaskContext, TaskQueue};
use crate::scheduler::Scheduler;
use crate::uploader::{BatchUploadPolicy, BatchUploader};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};

/// 主应用
pub struct Application {
    scheduler: Arc<Scheduler>,
    uploader: Arc<BatchUploader<WebDriverSession>>,
    ctx: TaskContext,
}

impl Application {
    /// 初始化所有模块
    pub async fn initialize(config_path: &str) -> Result<Self> {
        info!("========================================");
        info!("巨量素材自动上传系统启动");
        info!("========================================");

        // 1. 加载配置
        info!("正在加载配置文件: {}", config_path);
        let config = AppConfig::load_from_file(config_path).await?;
        info!("配置文件加载成功");

        // 2. 飞书客户端
        let feishu = Arc::new(FeishuClient::new(config.feishu.clone())?);
        info!("飞书客户端初始化成功");

        // 3. 断点续传进度
        let progress = Arc::new(
            ProgressStore::open(&config.progress.dir).context("初始化进度存储失败")?,
        );
        let saved = progress.get_all();
        if !saved.is_empty() {
            info!("发现 {} 个未完成的上传进度", saved.len());
        }

        // 4. 浏览器会话
        info!("正在初始化浏览器会话");
        let session =
            WebDriverSession::connect(&config.browser, config.uploader.selectors.clone())
                .await
                .map_err(|e| PipelineError::Initialization(format!("浏览器会话: {:#}", e)))?;

        // 5. 上传器（独占浏览器会话）
        let uploader = Arc::new(BatchUploader::new(
            session,
            progress,
            BatchUploadPolicy::from_config(&config.uploader),
        ));
        info!(
            "上传器初始化成功，每批 {} 个文件，单批最多尝试 {} 次",
            config.uploader.batch_size, config.uploader.max_retries
        );

        // 登录状态只做提示，未登录时需在浏览器中手动登录
        let urls = UploadUrlBuilder::new(config.douyin.base_upload_url.clone());
        match urls.landing_url() {
            Ok(url) => {
                if uploader.check_login(&url).await {
                    info!("巨量素材中心已登录");
                } else {
                    warn!("巨量素材中心未登录，请在浏览器中完成登录，登录状态会保存在用户数据目录");
                }
            }
            Err(e) => warn!("无法检查登录状态: {:#}", e),
        }

        // 6. 任务队列
        let queue = Arc::new(TaskQueue::new());
        let ctx = TaskContext {
            files: Arc::new(LocalFileManager::new(
                &config.local.root_dir,
                &config.local.media_extension,
            )),
            records: feishu.clone(),
            uploader: uploader.clone(),
            urls,
            auto_delete_source: config.local.auto_delete_source,
        };

        // 7. 调度器
        let scheduler = Scheduler::new(feishu, queue, config.scheduler.fetch_interval());

        info!("========================================");
        info!("所有模块初始化完成");
        info!("========================================");

        Ok(Self {
            scheduler,
            uploader,
            ctx,
        })
    }

    /// 运行直到收到退出信号
    pub async fn run(self) -> Result<()> {
        info!("正在启动调度器");
        let mut worker = {
            let scheduler = self.scheduler.clone();
            let ctx = self.ctx.clone();
            tokio::spawn(async move { scheduler.start(ctx).await })
        };

        let worker_finished = tokio::select! {
            _ = shutdown_signal() => {
                info!("收到退出信号，正在优雅关闭...");
                false
            }
            result = &mut worker => {
                if let Err(e) = result {
                    error!("调度器任务异常退出: {}", e);
                } else {
                    warn!("调度器已退出");
                }
                true
            }
        };

        self.scheduler.stop();
        if !worker_finished {
            info!("等待当前任务处理完成...");
            if let Err(e) = worker.await {
                error!("调度器任务异常退出: {}", e);
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// 释放资源
    pub async fn shutdown(&self) {
        info!("正在关闭应用...");
        self.scheduler.stop();
        self.uploader.shutdown().await;
        info!("应用已关闭");
    }
}

/// 等待 Ctrl-C 或 SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("监听 Ctrl-C 失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("监听 SIGTERM 失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
