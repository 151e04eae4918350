// WebDriver 会话实现
//
// 通过 W3C WebDriver 协议（chromedriver）驱动一个持久化用户目录的 Chrome，
// 所有上传任务复用同一个会话和同一个标签页。

use crate::browser::{AutomationSurface, TransferStatus};
use crate::config::{BrowserConfig, UploaderSelectors};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// W3C 规范中的元素引用键
const ELEMENT_KEY: &str = "element-6066-11e4-a52f-4a8f6f1b7b8a";

/// 元素轮询间隔
const ELEMENT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// 统计带成功标识的进度条数量（成功标识是进度条的同级元素）
const COUNT_SUCCESS_SCRIPT: &str = r#"
const bars = Array.from(document.querySelectorAll(arguments[0]));
const done = bars.filter(bar => bar.parentElement && bar.parentElement.querySelector(arguments[1]));
return [bars.length, done.length];
"#;

const READY_STATE_SCRIPT: &str = "return document.readyState;";

/// WebDriver 会话
#[derive(Debug)]
pub struct WebDriverSession {
    /// HTTP客户端
    client: Client,
    /// WebDriver 服务地址
    base_url: String,
    /// 会话ID
    session_id: String,
    selectors: UploaderSelectors,
    page_load_timeout: Duration,
    element_timeout: Duration,
}

impl WebDriverSession {
    /// 创建会话（持久化模式，保存 cookies 与登录态）
    pub async fn connect(config: &BrowserConfig, selectors: UploaderSelectors) -> Result<Self> {
        info!("正在初始化浏览器会话（持久化模式）: {}", config.webdriver_url);

        let client = Client::builder()
            .timeout(Duration::from_secs(config.page_load_timeout_secs + 30))
            .build()
            .context("创建 WebDriver HTTP 客户端失败")?;

        let mut args = vec![
            format!("--user-data-dir={}", config.user_data_dir.display()),
            "--start-maximized".to_string(),
        ];
        if config.headless {
            args.push("--headless=new".to_string());
        }

        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": args },
                    "timeouts": { "pageLoad": config.page_load_timeout_secs * 1000 }
                }
            }
        });

        let base_url = config.webdriver_url.trim_end_matches('/').to_string();
        let response = client
            .post(format!("{}/session", base_url))
            .json(&capabilities)
            .send()
            .await
            .context("连接 WebDriver 服务失败")?;

        let body: Value = response.json().await.context("解析创建会话响应失败")?;
        let session_id = body["value"]["sessionId"]
            .as_str()
            .map(|s| s.to_string())
            .with_context(|| format!("创建浏览器会话失败: {}", body["value"]))?;

        info!(
            "浏览器会话初始化成功，数据目录: {:?}，会话: {}",
            config.user_data_dir, session_id
        );

        Ok(Self {
            client,
            base_url,
            session_id,
            selectors,
            page_load_timeout: Duration::from_secs(config.page_load_timeout_secs),
            element_timeout: Duration::from_secs(config.element_timeout_secs),
        })
    }

    /// 发送会话级命令，返回 value 字段
    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{}/session/{}{}", self.base_url, self.session_id, path);
        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("WebDriver 请求失败: {}", path))?;
        let status = response.status();
        let json: Value = response
            .json()
            .await
            .with_context(|| format!("解析 WebDriver 响应失败: {}", path))?;

        if !status.is_success() {
            let error = json["value"]["error"].as_str().unwrap_or("unknown error");
            let message = json["value"]["message"].as_str().unwrap_or_default();
            anyhow::bail!("WebDriver {} 失败 [{}]: {} {}", path, status, error, message);
        }

        Ok(json["value"].clone())
    }

    async fn execute(&self, script: &str, args: Value) -> Result<Value> {
        self.command(
            Method::POST,
            "/execute/sync",
            Some(json!({ "script": script, "args": args })),
        )
        .await
    }

    async fn find_elements(&self, selector: &str) -> Result<Vec<String>> {
        let value = self
            .command(
                Method::POST,
                "/elements",
                Some(json!({ "using": "css selector", "value": selector })),
            )
            .await?;

        Ok(value
            .as_array()
            .map(|list| {
                list.iter()
                    .filter_map(|e| e[ELEMENT_KEY].as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// 等待元素出现，返回第一个匹配元素
    async fn wait_for_element(&self, selector: &str, timeout: Duration) -> Result<String> {
        let start = Instant::now();
        loop {
            if let Some(id) = self.find_elements(selector).await?.into_iter().next() {
                return Ok(id);
            }
            if start.elapsed() >= timeout {
                anyhow::bail!("等待元素超时（{:?}）: {}", timeout, selector);
            }
            tokio::time::sleep(ELEMENT_POLL_INTERVAL).await;
        }
    }

    async fn click(&self, element_id: &str) -> Result<()> {
        self.command(
            Method::POST,
            &format!("/element/{}/click", element_id),
            Some(json!({})),
        )
        .await?;
        Ok(())
    }

    async fn click_selector(&self, selector: &str) -> Result<()> {
        let element = self.wait_for_element(selector, self.element_timeout).await?;
        human_pause(500, 1000).await;
        self.click(&element).await
    }

    /// 等待页面加载完成；超时只告警，继续执行
    async fn wait_for_page_ready(&self) {
        let start = Instant::now();
        loop {
            match self.execute(READY_STATE_SCRIPT, json!([])).await {
                Ok(state) if state.as_str() == Some("complete") => break,
                Ok(_) => {}
                Err(e) => debug!("读取页面状态失败: {}", e),
            }
            if start.elapsed() >= self.page_load_timeout {
                warn!("等待页面加载超时，继续执行");
                return;
            }
            tokio::time::sleep(ELEMENT_POLL_INTERVAL).await;
        }
        human_pause(1000, 2000).await;
    }
}

/// 随机延迟，模拟人工操作节奏
async fn human_pause(min_ms: u64, max_ms: u64) {
    let delay = rand::thread_rng().gen_range(min_ms..=max_ms);
    tokio::time::sleep(Duration::from_millis(delay)).await;
}

#[async_trait]
impl AutomationSurface for WebDriverSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        debug!("正在导航到上传页面: {}", url);
        self.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await
            .context("导航到上传页面失败")?;
        self.wait_for_page_ready().await;
        Ok(())
    }

    async fn reload(&mut self) -> Result<()> {
        debug!("刷新页面以清理状态...");
        self.command(Method::POST, "/refresh", Some(json!({})))
            .await
            .context("刷新页面失败")?;
        self.wait_for_page_ready().await;
        Ok(())
    }

    async fn select_files(&mut self, files: &[PathBuf]) -> Result<()> {
        // 非首批时上传按钮可能需要更长时间才能恢复可点击
        let button = self
            .wait_for_element(&self.selectors.upload_button, self.element_timeout * 2)
            .await?;
        human_pause(500, 1000).await;
        self.click(&button).await?;
        debug!("上传按钮点击成功，等待侧边上传面板打开");

        self.wait_for_element(&self.selectors.upload_panel, self.element_timeout)
            .await?;
        // 等待面板动画完成
        human_pause(3000, 4000).await;

        let input = self
            .wait_for_element(&self.selectors.file_input, self.element_timeout)
            .await?;

        // 文件输入框支持以换行分隔一次选择多个文件
        let paths = files
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("\n");
        self.command(
            Method::POST,
            &format!("/element/{}/value", input),
            Some(json!({ "text": paths })),
        )
        .await
        .context("设置上传文件失败")?;

        debug!("已设置 {} 个文件，开始上传", files.len());
        human_pause(2000, 3000).await;
        Ok(())
    }

    async fn transfer_status(&mut self) -> Result<TransferStatus> {
        let value = self
            .execute(
                COUNT_SUCCESS_SCRIPT,
                json!([self.selectors.progress_item, self.selectors.progress_success]),
            )
            .await?;

        let in_progress = value[0].as_u64().unwrap_or(0) as usize;
        let completed = value[1].as_u64().unwrap_or(0) as usize;
        Ok(TransferStatus {
            in_progress,
            completed,
        })
    }

    async fn confirm(&mut self) -> Result<()> {
        self.click_selector(&self.selectors.confirm_button)
            .await
            .context("点击确定按钮失败")?;
        debug!("确定按钮点击成功");
        Ok(())
    }

    async fn cancel(&mut self) -> Result<()> {
        self.click_selector(&self.selectors.cancel_button)
            .await
            .context("点击取消按钮失败")?;
        debug!("取消按钮点击成功");
        human_pause(2000, 3000).await;
        Ok(())
    }

    async fn is_logged_in(&mut self, url: &str) -> Result<bool> {
        self.navigate(url).await?;
        let value = self
            .execute(
                "return document.body ? document.body.innerText.includes('登录') : false;",
                json!([]),
            )
            .await?;
        Ok(!value.as_bool().unwrap_or(false))
    }

    async fn close(&mut self) -> Result<()> {
        let url = format!("{}/session/{}", self.base_url, self.session_id);
        self.client
            .delete(&url)
            .send()
            .await
            .context("关闭浏览器会话失败")?;
        info!("浏览器已关闭（登录状态已保存）");
        Ok(())
    }
}
