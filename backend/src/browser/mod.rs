// 浏览器自动化模块
//
// 上传目标没有开放 API，唯一的自动化入口是一个复用的浏览器会话。
// 上层只依赖 AutomationSurface 能力契约，不关心具体页面结构。

pub mod webdriver;

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;

pub use webdriver::WebDriverSession;

/// 上传面板中的传输状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStatus {
    /// 已出现进度条的文件数（已被页面接收）
    pub in_progress: usize,
    /// 进度条显示成功的文件数
    pub completed: usize,
}

/// 浏览器自动化能力
///
/// 实现方持有唯一的、有状态的会话，同一时刻只能被一个上传流程驱动，
/// 因此所有操作都要求 `&mut self`。
#[async_trait]
pub trait AutomationSurface: Send {
    /// 导航到上传页并等待页面就绪
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// 刷新页面，清理残留状态
    async fn reload(&mut self) -> Result<()>;

    /// 打开上传面板并选择一批文件，开始传输
    async fn select_files(&mut self, files: &[PathBuf]) -> Result<()>;

    /// 读取当前传输状态
    async fn transfer_status(&mut self) -> Result<TransferStatus>;

    /// 确认本批上传
    async fn confirm(&mut self) -> Result<()>;

    /// 取消进行中的传输
    async fn cancel(&mut self) -> Result<()>;

    /// 检查登录状态
    async fn is_logged_in(&mut self, url: &str) -> Result<bool>;

    /// 关闭会话（登录态保存在用户数据目录中）
    async fn close(&mut self) -> Result<()>;
}
