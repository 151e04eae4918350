// 巨量上传地址

use anyhow::{bail, Context, Result};
use reqwest::Url;

/// 账户 ID 占位符
const ACCOUNT_PLACEHOLDER: &str = "{accountId}";

/// 上传页地址构造器
#[derive(Debug, Clone)]
pub struct UploadUrlBuilder {
    template: String,
}

impl UploadUrlBuilder {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// 将模板中的 {accountId} 替换为实际账户 ID
    ///
    /// 生成的地址必须通过 aadvid 指向该账户，否则素材会传到别的账户下。
    pub fn build(&self, account_id: &str) -> Result<String> {
        let account_id = account_id.trim();
        let url = self
            .template
            .replace(ACCOUNT_PLACEHOLDER, &urlencoding::encode(account_id));
        Self::validate_url(&url).with_context(|| format!("账户 {} 的上传地址无效", account_id))?;

        if Self::extract_account_id(&url).as_deref() != Some(account_id) {
            bail!("上传地址未指向账户 {}: {}", account_id, url);
        }
        Ok(url)
    }

    /// 素材中心落地页（去掉查询参数），用于启动时检查登录状态
    pub fn landing_url(&self) -> Result<String> {
        let raw = self.template.replace(ACCOUNT_PLACEHOLDER, "");
        let mut url = Url::parse(&raw).with_context(|| format!("无效的 URL: {}", raw))?;
        url.set_query(None);
        url.set_fragment(None);
        Ok(url.to_string())
    }

    /// 校验 URL 格式
    pub fn validate_url(url: &str) -> Result<()> {
        Url::parse(url).with_context(|| format!("无效的 URL: {}", url))?;
        Ok(())
    }

    /// 从 URL 中提取账户 ID（aadvid 参数）
    pub fn extract_account_id(url: &str) -> Option<String> {
        let url = Url::parse(url).ok()?;
        url.query_pairs()
            .find(|(key, _)| key == "aadvid")
            .map(|(_, value)| value.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str =
        "https://ad.oceanengine.com/material_center/management/video?aadvid={accountId}";

    #[test]
    fn test_build_and_extract() {
        let builder = UploadUrlBuilder::new(TEMPLATE);
        let url = builder.build("1234567890").unwrap();

        assert_eq!(
            url,
            "https://ad.oceanengine.com/material_center/management/video?aadvid=1234567890"
        );
        assert_eq!(
            UploadUrlBuilder::extract_account_id(&url).as_deref(),
            Some("1234567890")
        );
    }

    #[test]
    fn test_invalid_url() {
        let builder = UploadUrlBuilder::new("not a url {accountId}");
        assert!(builder.build("1").is_err());
        assert!(UploadUrlBuilder::validate_url("https://example.com").is_ok());
        assert!(UploadUrlBuilder::extract_account_id("https://example.com/?x=1").is_none());
        assert!(UploadUrlBuilder::extract_account_id("::").is_none());
    }

    #[test]
    fn test_template_must_target_account() {
        let builder = UploadUrlBuilder::new("https://ad.oceanengine.com/material_center/upload");
        let err = builder.build("1234567890").unwrap_err();
        assert!(err.to_string().contains("未指向账户"));

        let fixed = UploadUrlBuilder::new("https://example.com/upload?aadvid=42");
        assert!(fixed.build("1234567890").is_err());
    }

    #[test]
    fn test_landing_url() {
        let builder = UploadUrlBuilder::new(TEMPLATE);
        assert_eq!(
            builder.landing_url().unwrap(),
            "https://ad.oceanengine.com/material_center/management/video"
        );
        assert!(UploadUrlBuilder::new("not a url").landing_url().is_err());
    }
}
