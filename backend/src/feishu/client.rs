// 飞书客户端实现

use crate::config::{FeishuConfig, FeishuFields};
use crate::feishu::types::{
    ApiResponse, PendingRecord, RawRecord, RecordPage, RecordStatus, TenantTokenResponse,
};
use crate::feishu::RecordSource;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// 单页记录数（接口上限）
const PAGE_SIZE: u32 = 100;

/// 飞书多维表格客户端
#[derive(Debug, Clone)]
pub struct FeishuClient {
    /// HTTP客户端
    client: Client,
    config: FeishuConfig,
    /// 日期时间戳换算时区
    offset: FixedOffset,
}

impl FeishuClient {
    /// 创建新的飞书客户端
    pub fn new(config: FeishuConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("创建飞书 HTTP 客户端失败")?;

        let offset = FixedOffset::east_opt(config.utc_offset_hours * 3600)
            .with_context(|| format!("无效的时区偏移: {}", config.utc_offset_hours))?;

        Ok(Self {
            client,
            config,
            offset,
        })
    }

    /// 获取 tenant_access_token
    ///
    /// 每次请求都重新获取，不做缓存
    async fn tenant_access_token(&self) -> Result<String> {
        debug!("正在获取飞书 tenant_access_token");

        let response: TenantTokenResponse = self
            .client
            .post(&self.config.auth_url)
            .json(&json!({
                "app_id": self.config.app_id,
                "app_secret": self.config.app_secret,
            }))
            .send()
            .await
            .context("请求飞书 token 失败")?
            .json()
            .await
            .context("解析飞书 token 响应失败")?;

        if response.code != 0 {
            anyhow::bail!("获取 token 失败 [code: {}]: {}", response.code, response.msg);
        }
        if response.tenant_access_token.is_empty() {
            anyhow::bail!("获取 token 失败: tenant_access_token 为空");
        }

        debug!("飞书 tenant_access_token 获取成功");
        Ok(response.tenant_access_token)
    }

    /// 执行 API 请求，返回 data 字段
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Value,
    ) -> Result<Option<T>> {
        let token = self.tenant_access_token().await?;
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);

        let response: ApiResponse<T> = self
            .client
            .request(method, &url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("飞书请求失败: {}", path))?
            .json()
            .await
            .with_context(|| format!("解析飞书响应失败: {}", path))?;

        if response.code != 0 {
            anyhow::bail!("API 调用失败 [code: {}]: {}", response.code, response.msg);
        }

        Ok(response.data)
    }

    fn table_path(&self) -> String {
        format!(
            "/apps/{}/tables/{}/records",
            urlencoding::encode(&self.config.app_token),
            urlencoding::encode(&self.config.table_id)
        )
    }

    /// 获取所有待上传记录（自动翻页）
    pub async fn get_pending_records(&self) -> Result<Vec<PendingRecord>> {
        info!("正在从飞书获取待上传记录");

        let fields = &self.config.fields;
        let path = format!("{}/search", self.table_path());
        let mut raw_records: Vec<RawRecord> = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut body = json!({
                "field_names": [fields.drama, fields.date, fields.account, fields.status],
                "page_size": PAGE_SIZE,
                "filter": {
                    "conjunction": "and",
                    "conditions": [{
                        "field_name": fields.status,
                        "operator": "is",
                        "value": [self.config.status_values.pending],
                    }]
                }
            });
            if let Some(token) = &page_token {
                body["page_token"] = json!(token);
            }

            let page: RecordPage = self
                .request(Method::POST, &path, body)
                .await?
                .context("飞书返回的记录分页为空")?;

            raw_records.extend(page.items);
            match page.page_token {
                Some(token) if page.has_more => page_token = Some(token),
                _ => break,
            }
        }

        let records: Vec<PendingRecord> = raw_records
            .iter()
            .filter_map(|raw| parse_record(raw, fields, self.offset))
            .collect();

        info!("从飞书获取到 {} 条待上传记录", records.len());
        Ok(records)
    }

    /// 更新记录状态
    pub async fn update_record_status(&self, record_id: &str, status: &str) -> Result<()> {
        debug!("正在更新记录 {} 的状态为「{}」", record_id, status);

        let path = format!("{}/{}", self.table_path(), urlencoding::encode(record_id));
        let mut fields = serde_json::Map::new();
        fields.insert(self.config.fields.status.clone(), json!(status));

        self.request::<Value>(Method::PATCH, &path, json!({ "fields": fields }))
            .await
            .with_context(|| format!("更新记录 {} 状态失败", record_id))?;

        info!("记录 {} 状态更新成功: {}", record_id, status);
        Ok(())
    }

    /// 状态对应的表格取值
    pub fn status_label(&self, status: RecordStatus) -> &str {
        let values = &self.config.status_values;
        match status {
            RecordStatus::Pending => &values.pending,
            RecordStatus::Uploading => &values.uploading,
            RecordStatus::ReadyForAssetization => &values.done,
        }
    }
}

#[async_trait]
impl RecordSource for FeishuClient {
    async fn fetch_pending(&self) -> Result<Vec<PendingRecord>> {
        self.get_pending_records().await
    }

    async fn update_status(&self, record_id: &str, status: RecordStatus) -> Result<()> {
        let label = self.status_label(status).to_string();
        self.update_record_status(record_id, &label).await
    }
}

/// 解析单条记录，缺少必填字段时返回 None
pub fn parse_record(
    raw: &RawRecord,
    fields: &FeishuFields,
    offset: FixedOffset,
) -> Option<PendingRecord> {
    let drama = raw.fields.get(&fields.drama).and_then(field_text);
    let date = raw
        .fields
        .get(&fields.date)
        .and_then(|value| field_date(value, offset));
    let account = raw.fields.get(&fields.account).and_then(field_text);
    let status = raw.fields.get(&fields.status).and_then(field_text);

    match (drama, date, account, status) {
        (Some(drama), Some(date), Some(account), Some(status)) => Some(PendingRecord {
            record_id: raw.record_id.clone(),
            drama,
            date,
            account,
            status,
        }),
        _ => {
            warn!("记录 {} 缺少必填字段，跳过", raw.record_id);
            None
        }
    }
}

/// 展开单元格取值：数组取第一个元素，对象取 text
fn unwrap_cell(value: &Value) -> Option<&Value> {
    let value = match value {
        Value::Array(items) => items.first()?,
        other => other,
    };
    match value {
        Value::Object(map) => map.get("text"),
        other => Some(other),
    }
}

fn field_text(value: &Value) -> Option<String> {
    let text = match unwrap_cell(value)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// 日期字段可能是文本，也可能是毫秒时间戳
fn field_date(value: &Value, offset: FixedOffset) -> Option<String> {
    match unwrap_cell(value)? {
        Value::Number(n) => {
            let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            let date = DateTime::from_timestamp_millis(millis)?.with_timezone(&offset);
            Some(date.format("%Y-%m-%d").to_string())
        }
        other => field_text(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StatusValues;

    fn fields() -> FeishuFields {
        FeishuFields {
            status: "状态".to_string(),
            account: "账户".to_string(),
            drama: "剧名".to_string(),
            date: "日期".to_string(),
        }
    }

    fn raw(fields: Value) -> RawRecord {
        serde_json::from_value(json!({ "record_id": "recA", "fields": fields })).unwrap()
    }

    fn beijing() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    #[test]
    fn test_parse_plain_record() {
        let record = raw(json!({
            "剧名": "测试剧",
            "日期": "2025-12-24",
            "账户": "1234567890",
            "状态": "待上传",
        }));

        let parsed = parse_record(&record, &fields(), beijing()).unwrap();
        assert_eq!(parsed.record_id, "recA");
        assert_eq!(parsed.drama, "测试剧");
        assert_eq!(parsed.date, "2025-12-24");
        assert_eq!(parsed.account, "1234567890");
        assert_eq!(parsed.status, "待上传");
    }

    #[test]
    fn test_parse_rich_cells_and_timestamp() {
        // 2025-12-23T16:30:00Z，东八区为 12 月 24 日
        let record = raw(json!({
            "剧名": [{ "type": "text", "text": "测试剧" }],
            "日期": 1766507400000i64,
            "账户": 1234567890,
            "状态": { "text": "待上传" },
        }));

        let parsed = parse_record(&record, &fields(), beijing()).unwrap();
        assert_eq!(parsed.drama, "测试剧");
        assert_eq!(parsed.date, "2025-12-24");
        assert_eq!(parsed.account, "1234567890");
        assert_eq!(parsed.status, "待上传");

        let utc = FixedOffset::east_opt(0).unwrap();
        assert_eq!(parse_record(&record, &fields(), utc).unwrap().date, "2025-12-23");
    }

    #[test]
    fn test_parse_missing_field_skipped() {
        let record = raw(json!({
            "剧名": "测试剧",
            "日期": "2025-12-24",
            "状态": "待上传",
        }));
        assert!(parse_record(&record, &fields(), beijing()).is_none());

        let blank = raw(json!({
            "剧名": "  ",
            "日期": "2025-12-24",
            "账户": "1",
            "状态": "待上传",
        }));
        assert!(parse_record(&blank, &fields(), beijing()).is_none());
    }

    #[test]
    fn test_status_labels() {
        let config = FeishuConfig {
            app_id: "cli".to_string(),
            app_secret: "secret".to_string(),
            app_token: "app".to_string(),
            table_id: "tbl".to_string(),
            base_url: "https://open.feishu.cn/open-apis/bitable/v1".to_string(),
            auth_url: "https://open.feishu.cn/open-apis/auth/v3/tenant_access_token/internal"
                .to_string(),
            fields: fields(),
            status_values: StatusValues::default(),
            utc_offset_hours: 8,
        };
        let client = FeishuClient::new(config).unwrap();

        assert_eq!(client.status_label(RecordStatus::Pending), "待上传");
        assert_eq!(client.status_label(RecordStatus::Uploading), "上传中");
        assert_eq!(
            client.status_label(RecordStatus::ReadyForAssetization),
            "待资产化"
        );
        assert_eq!(
            client.table_path(),
            "/apps/app/tables/tbl/records".to_string()
        );
    }

    #[test]
    fn test_record_page_deserialize() {
        let page: ApiResponse<RecordPage> = serde_json::from_value(json!({
            "code": 0,
            "msg": "success",
            "data": {
                "has_more": false,
                "items": [{ "record_id": "rec1", "fields": { "剧名": "A" } }],
                "total": 1
            }
        }))
        .unwrap();

        let data = page.data.unwrap();
        assert_eq!(data.items.len(), 1);
        assert!(!data.has_more);
        assert!(data.page_token.is_none());
    }
}
