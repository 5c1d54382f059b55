//! Tushare Pro API adapter.
//!
//! # API Documentation
//! https://tushare.pro/document/2
//!
//! # Rate Limits
//! - Basic: 200 requests/minute
//! - Pro (积分2000+): 500 requests/minute
//!
//! # Data Types Supported
//! - Index daily bars: `index_daily`
//! - Financial indicators: `fina_indicator` (melted to one row per metric)
//! - Announcements: `anns_d`
//!
//! Tushare returns rows newest first; the adapter reverses them so every
//! table leaves here in chronological order.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use ashare_common::config::TushareConfig;

use super::provider::{DataCapabilities, EndpointAdapter, FetchError};
use super::rate_limiter::RateLimiter;
use super::raw::{RawRow, RawTable};
use super::venue::{self, Instrument};
use super::{DataKind, DataRequest, RequestRange};

const PROVIDER: &str = "tushare";

/// Tushare error code for quota exhaustion
const RATE_LIMIT_CODE: i64 = 40203;

const INDEX_DAILY_FIELDS: [&str; 8] = [
    "ts_code",
    "trade_date",
    "open",
    "high",
    "low",
    "close",
    "vol",
    "amount",
];

const FINA_FIELDS: [&str; 16] = [
    "ts_code",
    "ann_date",
    "end_date",
    "eps",
    "dt_eps",
    "bps",
    "roe",
    "roe_dt",
    "roa",
    "grossprofit_margin",
    "netprofit_margin",
    "debt_to_assets",
    "current_ratio",
    "quick_ratio",
    "netprofit_yoy",
    "or_yoy",
];

/// `fina_indicator` columns that identify a row rather than measure it
const FINA_ID_COLUMNS: [&str; 4] = ["ts_code", "ann_date", "end_date", "update_flag"];

const ANNS_FIELDS: [&str; 5] = ["ts_code", "ann_date", "name", "title", "url"];

/// Melted financial indicator columns
const MELTED_COLUMNS: [&str; 3] = ["end_date", "indicator", "value"];

/// Longest range one `index_daily` call covers without hitting the row cap
const INDEX_SPAN_DAYS: u32 = 3650;

/// Tushare Pro adapter.
pub struct TushareAdapter {
    token: String,
    client: reqwest::Client,
    base_url: String,
    priority: u8,
    rate_limit_rpm: u32,
    limiter: RateLimiter,
}

impl TushareAdapter {
    /// Create a new Tushare adapter
    pub fn new(token: impl Into<String>) -> Self {
        let defaults = TushareConfig::default();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            token: token.into(),
            client,
            base_url: defaults.base_url,
            priority: defaults.priority,
            rate_limit_rpm: defaults.requests_per_minute,
            limiter: RateLimiter::new(PROVIDER, defaults.requests_per_minute),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_rate_limit(mut self, requests_per_minute: u32) -> Self {
        self.rate_limit_rpm = requests_per_minute;
        self.limiter = RateLimiter::new(PROVIDER, requests_per_minute);
        self
    }

    /// Create from config; `None` when disabled or no token is set.
    pub fn from_config(config: &TushareConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let token = config.token.as_deref().filter(|t| !t.trim().is_empty())?;

        Some(
            Self::new(token)
                .with_base_url(config.base_url.clone())
                .with_priority(config.priority)
                .with_rate_limit(config.requests_per_minute),
        )
    }

    /// Call the Tushare API and return `(fields, items)` of the data block.
    async fn call_api(
        &self,
        kind: DataKind,
        api_name: &str,
        params: HashMap<&str, String>,
        fields: &[&str],
    ) -> Result<(Vec<String>, Vec<Vec<Value>>), FetchError> {
        self.limiter.acquire().await;

        let request = TushareRequest {
            api_name: api_name.to_string(),
            token: self.token.clone(),
            params: params
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            fields: fields.join(","),
        };

        debug!(api = api_name, "Calling tushare");

        let response = self.client.post(&self.base_url).json(&request).send().await?;
        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::UpstreamUnavailable(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(FetchError::UpstreamUnavailable(format!(
                "tushare HTTP {status}"
            )));
        }

        let body = response.text().await?;
        let envelope: Value = serde_json::from_str(&body).map_err(|e| {
            FetchError::UpstreamUnavailable(format!("non-JSON response from tushare: {e}"))
        })?;

        let code = envelope
            .get("code")
            .and_then(Value::as_i64)
            .ok_or_else(|| FetchError::schema_changed(PROVIDER, kind, &["code"]))?;
        let msg = envelope
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or_default();

        if code == RATE_LIMIT_CODE || msg.contains("每分钟") {
            return Err(FetchError::UpstreamUnavailable(format!(
                "tushare rate limit: {msg}"
            )));
        }
        if code != 0 {
            return Err(FetchError::InvalidRequest(format!(
                "tushare rejected {api_name}: {code} {msg}"
            )));
        }

        let data = match envelope.get("data") {
            None => return Err(FetchError::schema_changed(PROVIDER, kind, &["data"])),
            Some(Value::Null) => return Ok((Vec::new(), Vec::new())),
            Some(data) => data,
        };

        let columns: Vec<String> = data
            .get("fields")
            .and_then(Value::as_array)
            .ok_or_else(|| FetchError::schema_changed(PROVIDER, kind, &["fields"]))?
            .iter()
            .map(|f| f.as_str().unwrap_or_default().to_string())
            .collect();
        let items: Vec<Vec<Value>> = data
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| FetchError::schema_changed(PROVIDER, kind, &["items"]))?
            .iter()
            .map(|item| item.as_array().cloned().unwrap_or_default())
            .collect();

        Ok((columns, items))
    }

    fn range_params(request: &DataRequest, instrument: &Instrument) -> HashMap<&'static str, String> {
        let mut params = HashMap::new();
        params.insert("ts_code", instrument.ts_code());
        match request.range() {
            RequestRange::Between(range) => {
                params.insert("start_date", range.start().format("%Y%m%d").to_string());
                params.insert("end_date", range.end().format("%Y%m%d").to_string());
            }
            RequestRange::Latest(n) => {
                params.insert("limit", n.to_string());
            }
        }
        params
    }

    /// Fetch a plain table (rows reversed to chronological order).
    async fn fetch_table(
        &self,
        request: &DataRequest,
        instrument: &Instrument,
        api_name: &str,
        fields: &[&str],
    ) -> Result<RawTable, FetchError> {
        let kind = request.kind();
        let params = Self::range_params(request, instrument);
        let (columns, items) = self.call_api(kind, api_name, params, fields).await?;

        let columns = if columns.is_empty() {
            fields.iter().map(|f| f.to_string()).collect()
        } else {
            columns
        };

        let mut table = RawTable::new(PROVIDER, kind, request.identifier(), columns.clone());
        for item in items.into_iter().rev() {
            table.push_row(zip_row(&columns, item));
        }
        Ok(table)
    }

    /// Fetch `fina_indicator` and melt it from wide to long rows.
    async fn fetch_indicators(
        &self,
        request: &DataRequest,
        instrument: &Instrument,
    ) -> Result<RawTable, FetchError> {
        let params = Self::range_params(request, instrument);
        let (columns, items) = self
            .call_api(DataKind::FinancialIndicator, "fina_indicator", params, &FINA_FIELDS)
            .await?;

        let mut table = RawTable::new(
            PROVIDER,
            DataKind::FinancialIndicator,
            request.identifier(),
            MELTED_COLUMNS.iter().map(|c| c.to_string()).collect(),
        );
        if items.is_empty() {
            return Ok(table);
        }
        if !columns.iter().any(|c| c == "end_date") {
            return Err(FetchError::schema_changed(
                PROVIDER,
                DataKind::FinancialIndicator,
                &["end_date"],
            ));
        }

        for item in items.into_iter().rev() {
            let wide = zip_row(&columns, item);
            let period = wide.get("end_date").cloned().unwrap_or(Value::Null);
            for (metric, value) in &wide {
                if FINA_ID_COLUMNS.contains(&metric.as_str()) || value.is_null() {
                    continue;
                }
                let mut row = RawRow::new();
                row.insert("end_date".to_string(), period.clone());
                row.insert("indicator".to_string(), Value::String(metric.clone()));
                row.insert("value".to_string(), value.clone());
                table.push_row(row);
            }
        }
        Ok(table)
    }
}

fn zip_row(columns: &[String], item: Vec<Value>) -> RawRow {
    columns.iter().cloned().zip(item).collect()
}

#[async_trait]
impl EndpointAdapter for TushareAdapter {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn capabilities(&self) -> DataCapabilities {
        DataCapabilities {
            kinds: vec![
                DataKind::IndexBar,
                DataKind::FinancialIndicator,
                DataKind::Announcement,
            ],
            max_span_days: vec![(DataKind::IndexBar, INDEX_SPAN_DAYS)],
            rate_limit_rpm: Some(self.rate_limit_rpm),
        }
    }

    async fn fetch(&self, request: &DataRequest) -> Result<RawTable, FetchError> {
        let instrument = venue::resolve(request.identifier(), request.kind())?;

        match request.kind() {
            DataKind::IndexBar => {
                self.fetch_table(request, &instrument, "index_daily", &INDEX_DAILY_FIELDS)
                    .await
            }
            DataKind::FinancialIndicator => self.fetch_indicators(request, &instrument).await,
            DataKind::Announcement => {
                self.fetch_table(request, &instrument, "anns_d", &ANNS_FIELDS)
                    .await
            }
            DataKind::Tick => Err(FetchError::Unsupported(DataKind::Tick)),
        }
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct TushareRequest {
    api_name: String,
    token: String,
    params: HashMap<String, String>,
    fields: String,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter_for(server: &MockServer) -> TushareAdapter {
        TushareAdapter::new("test_token")
            .with_base_url(server.uri())
            .with_rate_limit(6000)
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_tushare_adapter_creation() {
        let adapter = TushareAdapter::new("test_token");
        assert_eq!(adapter.token, "test_token");
        assert_eq!(adapter.base_url, "http://api.tushare.pro");
        assert!(!adapter.supports(DataKind::Tick));
    }

    #[test]
    fn test_from_config_requires_token() {
        let mut config = TushareConfig {
            enabled: true,
            ..Default::default()
        };
        assert!(TushareAdapter::from_config(&config).is_none());

        config.token = Some("abc".into());
        config.priority = 5;
        let adapter = TushareAdapter::from_config(&config).unwrap();
        assert_eq!(adapter.priority(), 5);
    }

    #[tokio::test]
    async fn test_index_daily_is_reversed_to_chronological() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "api_name": "index_daily",
                "token": "test_token",
                "params": {"ts_code": "000001.SH", "start_date": "20240102", "end_date": "20240103"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "msg": "",
                "data": {
                    "fields": INDEX_DAILY_FIELDS,
                    "items": [
                        ["000001.SH", "20240103", 2960.0, 2970.0, 2950.1, 2967.2, 2.9e8, 3.3e11],
                        ["000001.SH", "20240102", 2962.3, 2976.3, 2944.3, 2962.3, 3.1e8, 3.5e11]
                    ],
                    "has_more": false
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let request =
            DataRequest::between(DataKind::IndexBar, "000001", d(2024, 1, 2), d(2024, 1, 3))
                .unwrap();
        let table = adapter.fetch(&request).await.unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[0]["trade_date"], json!("20240102"));
        assert_eq!(table.rows[1]["trade_date"], json!("20240103"));
    }

    #[tokio::test]
    async fn test_fina_indicator_is_melted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"api_name": "fina_indicator"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "msg": "",
                "data": {
                    "fields": ["ts_code", "ann_date", "end_date", "eps", "roe"],
                    "items": [
                        ["600519.SH", "20240403", "20231231", 59.49, 34.19],
                        ["600519.SH", "20231021", "20230930", 41.68, null]
                    ]
                }
            })))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let request = DataRequest::latest(DataKind::FinancialIndicator, "600519", 2).unwrap();
        let table = adapter.fetch(&request).await.unwrap();

        // 2023-09-30 contributes only eps (roe is null); 2023-12-31 contributes both.
        assert_eq!(table.len(), 3);
        assert_eq!(table.columns, vec!["end_date", "indicator", "value"]);
        assert_eq!(table.rows[0]["end_date"], json!("20230930"));
        assert_eq!(table.rows[0]["indicator"], json!("eps"));
        assert!(table
            .rows
            .iter()
            .any(|r| r["indicator"] == json!("roe") && r["value"] == json!(34.19)));
    }

    #[tokio::test]
    async fn test_rate_limit_code_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 40203,
                "msg": "抱歉，您每分钟最多访问该接口200次",
                "data": null
            })))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let request = DataRequest::latest(DataKind::Announcement, "600519", 5).unwrap();
        assert!(adapter.fetch(&request).await.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn test_bad_token_is_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 40101,
                "msg": "抱歉，您的token不对，请确认。",
                "data": null
            })))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let request = DataRequest::latest(DataKind::IndexBar, "000300", 5).unwrap();
        assert!(matches!(
            adapter.fetch(&request).await,
            Err(FetchError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_items_is_schema_change() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "msg": "",
                "data": {"fields": ["ts_code"]}
            })))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let request = DataRequest::latest(DataKind::IndexBar, "000300", 5).unwrap();
        assert!(adapter.fetch(&request).await.unwrap_err().is_schema_change());
    }
}
