//! Eastmoney adapter for A-share market data.
//!
//! Uses the public eastmoney web endpoints (no key required).
//!
//! # Data Sources
//! - Index daily K-line: push2his.eastmoney.com (`klt=101`, unadjusted)
//! - Intraday trade details: push2.eastmoney.com (current session only)
//! - Announcements: np-anotice-stock.eastmoney.com
//!
//! Rows are returned exactly as eastmoney names them (`f51`..`f57` for
//! K-lines, `f51`..`f55` for trade details); renaming happens in the
//! normalizer.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use ashare_common::config::EastmoneyConfig;

use super::provider::{DataCapabilities, EndpointAdapter, FetchError};
use super::rate_limiter::RateLimiter;
use super::raw::{RawRow, RawTable};
use super::venue::{self, Instrument};
use super::{market_today, DataKind, DataRequest, RequestRange};

// ============================================================================
// Constants
// ============================================================================

const PROVIDER: &str = "eastmoney";

/// K-line fields: date, open, close, high, low, volume, amount
const KLINE_FIELDS: [&str; 7] = ["f51", "f52", "f53", "f54", "f55", "f56", "f57"];

/// Trade detail fields: time, price, volume, trade count, side
const TICK_FIELDS: [&str; 5] = ["f51", "f52", "f53", "f54", "f55"];

/// Announcement columns kept from the notice list
const NOTICE_COLUMNS: [&str; 3] = ["notice_date", "title", "column_name"];

/// Trade details requested when the caller asks for the whole session
const SESSION_TICKS: usize = 20_000;

/// Announcements per page; the notice endpoint caps pages at 100
const NOTICE_PAGE_SIZE: usize = 100;

/// Span per announcement leg
const NOTICE_SPAN_DAYS: u32 = 90;

/// Pages followed per announcement call before giving up on the rest
const MAX_NOTICE_PAGES: usize = 20;

/// Endpoint URLs, overridable for testing.
#[derive(Debug, Clone, PartialEq)]
pub struct EastmoneyEndpoints {
    pub kline_url: String,
    pub tick_url: String,
    pub notice_url: String,
}

impl Default for EastmoneyEndpoints {
    fn default() -> Self {
        Self::from(&EastmoneyConfig::default())
    }
}

impl From<&EastmoneyConfig> for EastmoneyEndpoints {
    fn from(config: &EastmoneyConfig) -> Self {
        Self {
            kline_url: config.kline_url.clone(),
            tick_url: config.tick_url.clone(),
            notice_url: config.notice_url.clone(),
        }
    }
}

impl EastmoneyEndpoints {
    /// All three endpoints under one base URL (`/kline`, `/details`, `/notices`).
    pub fn under(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            kline_url: format!("{base}/kline"),
            tick_url: format!("{base}/details"),
            notice_url: format!("{base}/notices"),
        }
    }
}

// ============================================================================
// Eastmoney Adapter
// ============================================================================

/// Eastmoney endpoint adapter.
pub struct EastmoneyAdapter {
    client: reqwest::Client,
    endpoints: EastmoneyEndpoints,
    priority: u8,
    rate_limit_rpm: u32,
    limiter: RateLimiter,
}

impl EastmoneyAdapter {
    /// Create with the public endpoints.
    pub fn new() -> Self {
        Self::with_endpoints(EastmoneyEndpoints::default())
    }

    /// Create against custom endpoints.
    pub fn with_endpoints(endpoints: EastmoneyEndpoints) -> Self {
        let defaults = EastmoneyConfig::default();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7)")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            endpoints,
            priority: defaults.priority,
            rate_limit_rpm: defaults.requests_per_minute,
            limiter: RateLimiter::new(PROVIDER, defaults.requests_per_minute),
        }
    }

    /// Set the router priority.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Replace the rate limit.
    pub fn with_rate_limit(mut self, requests_per_minute: u32) -> Self {
        self.rate_limit_rpm = requests_per_minute;
        self.limiter = RateLimiter::new(PROVIDER, requests_per_minute);
        self
    }

    /// Create from config; `None` when disabled.
    pub fn from_config(config: &EastmoneyConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }

        Some(
            Self::with_endpoints(EastmoneyEndpoints::from(config))
                .with_priority(config.priority)
                .with_rate_limit(config.requests_per_minute),
        )
    }

    /// GET a JSON document, classifying transport and status failures.
    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value, FetchError> {
        self.limiter.acquire().await;

        debug!(url = %url, "Calling eastmoney");

        let response = self.client.get(url).query(query).send().await?;
        let status = response.status();

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::UpstreamUnavailable(format!("HTTP {status}")));
        }
        if status == StatusCode::BAD_REQUEST {
            return Err(FetchError::InvalidRequest(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(FetchError::UpstreamUnavailable(format!("HTTP {status}")));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            FetchError::UpstreamUnavailable(format!("non-JSON response from eastmoney: {e}"))
        })
    }

    /// Check the `rc` envelope and return the `data` member (null allowed).
    fn unwrap_push_envelope(kind: DataKind, body: &Value) -> Result<Option<&Value>, FetchError> {
        let rc = body
            .get("rc")
            .and_then(Value::as_i64)
            .ok_or_else(|| FetchError::schema_changed(PROVIDER, kind, &["rc"]))?;

        if rc != 0 {
            return Err(FetchError::UpstreamUnavailable(format!(
                "eastmoney returned rc={rc}"
            )));
        }

        match body.get("data") {
            None => Err(FetchError::schema_changed(PROVIDER, kind, &["data"])),
            Some(Value::Null) => Ok(None),
            Some(data) => Ok(Some(data)),
        }
    }

    async fn fetch_index_bars(
        &self,
        request: &DataRequest,
        instrument: &Instrument,
    ) -> Result<RawTable, FetchError> {
        let (beg, end, limit) = match request.range() {
            RequestRange::Between(range) => (
                range.start().format("%Y%m%d").to_string(),
                range.end().format("%Y%m%d").to_string(),
                1_000_000,
            ),
            RequestRange::Latest(n) => ("0".to_string(), "20500101".to_string(), n),
        };

        let query = [
            ("secid", instrument.secid()),
            ("klt", "101".to_string()),
            ("fqt", "0".to_string()),
            ("beg", beg),
            ("end", end),
            ("lmt", limit.to_string()),
            ("fields1", "f1,f2,f3,f4,f5,f6".to_string()),
            ("fields2", KLINE_FIELDS.join(",")),
        ];

        let body = self.get_json(&self.endpoints.kline_url, &query).await?;
        let mut table = RawTable::new(
            PROVIDER,
            DataKind::IndexBar,
            request.identifier(),
            columns(&KLINE_FIELDS),
        );

        let Some(data) = Self::unwrap_push_envelope(DataKind::IndexBar, &body)? else {
            return Ok(table);
        };
        let lines = data
            .get("klines")
            .and_then(Value::as_array)
            .ok_or_else(|| FetchError::schema_changed(PROVIDER, DataKind::IndexBar, &["klines"]))?;

        for line in lines {
            table.push_row(split_line(&KLINE_FIELDS, line));
        }

        Ok(table)
    }

    async fn fetch_ticks(
        &self,
        request: &DataRequest,
        instrument: &Instrument,
    ) -> Result<RawTable, FetchError> {
        let today = market_today();
        let count = match request.range() {
            RequestRange::Latest(n) => n,
            RequestRange::Between(range) if range.contains(today) => SESSION_TICKS,
            RequestRange::Between(range) => {
                return Err(FetchError::InvalidRequest(format!(
                    "eastmoney serves trade details for the current session only ({today}), not {range}"
                )));
            }
        };

        let query = [
            ("secid", instrument.secid()),
            ("fields1", "f1,f2,f3,f4".to_string()),
            ("fields2", TICK_FIELDS.join(",")),
            ("pos", format!("-{count}")),
        ];

        let body = self.get_json(&self.endpoints.tick_url, &query).await?;
        let mut cols = columns(&TICK_FIELDS);
        cols.push("date".to_string());
        let mut table = RawTable::new(PROVIDER, DataKind::Tick, request.identifier(), cols);

        let Some(data) = Self::unwrap_push_envelope(DataKind::Tick, &body)? else {
            return Ok(table);
        };
        let details = data
            .get("details")
            .and_then(Value::as_array)
            .ok_or_else(|| FetchError::schema_changed(PROVIDER, DataKind::Tick, &["details"]))?;

        let session = Value::String(today.format("%Y-%m-%d").to_string());
        for line in details {
            let mut row = split_line(&TICK_FIELDS, line);
            row.insert("date".to_string(), session.clone());
            table.push_row(row);
        }

        Ok(table)
    }

    /// Announcements page by page until a short page, the requested count
    /// or the page cap.
    async fn fetch_announcements(
        &self,
        request: &DataRequest,
        instrument: &Instrument,
    ) -> Result<RawTable, FetchError> {
        let mut base = vec![
            ("sr", "-1".to_string()),
            ("ann_type", "A".to_string()),
            ("client_source", "web".to_string()),
            ("f_node", "0".to_string()),
            ("s_node", "0".to_string()),
            ("stock_list", instrument.code.clone()),
        ];
        let (page_size, limit) = match request.range() {
            RequestRange::Between(range) => {
                base.push(("begin_time", range.start().format("%Y-%m-%d").to_string()));
                base.push(("end_time", range.end().format("%Y-%m-%d").to_string()));
                (NOTICE_PAGE_SIZE, None)
            }
            RequestRange::Latest(n) => (n.clamp(1, NOTICE_PAGE_SIZE), Some(n)),
        };
        base.push(("page_size", page_size.to_string()));

        let mut table = RawTable::new(
            PROVIDER,
            DataKind::Announcement,
            request.identifier(),
            columns(&NOTICE_COLUMNS),
        );

        for page in 1..=MAX_NOTICE_PAGES {
            let mut query = base.clone();
            query.push(("page_index", page.to_string()));

            let body = self.get_json(&self.endpoints.notice_url, &query).await?;
            let Some(list) = notice_list(&body)? else {
                break;
            };
            for item in list {
                table.push_row(notice_row(item));
            }

            let reached_limit = limit.is_some_and(|n| table.len() >= n);
            if list.len() < page_size || reached_limit {
                break;
            }
            if page == MAX_NOTICE_PAGES {
                warn!(
                    request = %request,
                    pages = MAX_NOTICE_PAGES,
                    rows = table.len(),
                    "Announcement listing truncated at page cap"
                );
            } else {
                debug!(request = %request, page, "Following announcement page");
            }
        }

        if let Some(n) = limit {
            table.rows.truncate(n);
        }
        Ok(table)
    }
}

/// The `data.list` array of a notice response; `None` when `data` is null.
fn notice_list(body: &Value) -> Result<Option<&Vec<Value>>, FetchError> {
    let data = match body.get("data") {
        None => {
            return Err(FetchError::schema_changed(
                PROVIDER,
                DataKind::Announcement,
                &["data"],
            ))
        }
        Some(Value::Null) => return Ok(None),
        Some(data) => data,
    };
    data.get("list")
        .and_then(Value::as_array)
        .map(Some)
        .ok_or_else(|| FetchError::schema_changed(PROVIDER, DataKind::Announcement, &["list"]))
}

fn notice_row(item: &Value) -> RawRow {
    let mut row = RawRow::new();
    for key in ["notice_date", "title"] {
        if let Some(value) = item.get(key) {
            row.insert(key.to_string(), value.clone());
        }
    }
    let category = item
        .get("columns")
        .and_then(Value::as_array)
        .and_then(|cols| cols.first())
        .and_then(|c| c.get("column_name"))
        .cloned()
        .unwrap_or(Value::Null);
    row.insert("column_name".to_string(), category);
    row
}

impl Default for EastmoneyAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn columns(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|f| f.to_string()).collect()
}

/// Split one comma-joined eastmoney line into named cells.
///
/// Short lines produce rows with missing cells; the normalizer flags them.
fn split_line(fields: &[&str], line: &Value) -> RawRow {
    let mut row = RawRow::new();
    let text = line.as_str().unwrap_or_default();
    for (field, cell) in fields.iter().zip(text.split(',')) {
        row.insert(field.to_string(), Value::String(cell.trim().to_string()));
    }
    row
}

// ============================================================================
// EndpointAdapter Implementation
// ============================================================================

#[async_trait]
impl EndpointAdapter for EastmoneyAdapter {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn capabilities(&self) -> DataCapabilities {
        DataCapabilities {
            kinds: vec![DataKind::IndexBar, DataKind::Tick, DataKind::Announcement],
            max_span_days: vec![(DataKind::Announcement, NOTICE_SPAN_DAYS)],
            rate_limit_rpm: Some(self.rate_limit_rpm),
        }
    }

    async fn fetch(&self, request: &DataRequest) -> Result<RawTable, FetchError> {
        let instrument = venue::resolve(request.identifier(), request.kind())?;

        match request.kind() {
            DataKind::IndexBar => self.fetch_index_bars(request, &instrument).await,
            DataKind::Tick => self.fetch_ticks(request, &instrument).await,
            DataKind::Announcement => self.fetch_announcements(request, &instrument).await,
            DataKind::FinancialIndicator => Err(FetchError::Unsupported(request.kind())),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
