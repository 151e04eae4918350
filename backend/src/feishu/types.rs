// 飞书多维表格数据结构

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// 飞书 API 通用响应
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    pub data: Option<T>,
}

/// tenant_access_token 响应（token 不在 data 中）
#[derive(Debug, Deserialize)]
pub struct TenantTokenResponse {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub tenant_access_token: String,
}

/// 记录查询分页
#[derive(Debug, Deserialize)]
pub struct RecordPage {
    #[serde(default)]
    pub items: Vec<RawRecord>,
    #[serde(default)]
    pub has_more: bool,
    pub page_token: Option<String>,
}

/// 原始记录
#[derive(Debug, Clone, Deserialize)]
pub struct RawRecord {
    pub record_id: String,
    #[serde(default)]
    pub fields: HashMap<String, Value>,
}

/// 待上传记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRecord {
    pub record_id: String,
    /// 剧名
    pub drama: String,
    /// 日期 YYYY-MM-DD
    pub date: String,
    /// 巨量账户 ID
    pub account: String,
    /// 状态原文
    pub status: String,
}

/// 记录状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// 待上传
    Pending,
    /// 上传中
    Uploading,
    /// 待资产化
    ReadyForAssetization,
}
