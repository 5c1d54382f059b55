//! Market data acquisition for A-shares.
//!
//! Requests flow through a fixed pipeline:
//!
//! ```text
//! caller → FetchOrchestrator → EndpointAdapter → SchemaRegistry → validator → ResultCache → caller
//! ```
//!
//! # Data Sources
//! - **Eastmoney** (Primary): public endpoints, no key, index bars, ticks and announcements
//! - **Tushare** (Backup): token-based Pro API, index bars, financial indicators, announcements

mod cache;
mod client;
mod eastmoney;
mod normalizer;
mod orchestrator;
mod provider;
mod rate_limiter;
mod raw;
mod router;
mod tushare;
mod validator;
pub mod venue;

pub use cache::{CacheStats, ResultCache};
pub use client::MarketDataClient;
pub use eastmoney::{EastmoneyAdapter, EastmoneyEndpoints};
pub use normalizer::{Candidate, CoercionFailure, ColumnMap, FieldSpec, SchemaRegistry};
pub use orchestrator::{
    FetchOptions, FetchOrchestrator, FetchOutcome, Leg, PartialFailure, RetryBackoff,
};
pub use provider::{DataCapabilities, EndpointAdapter, FetchError};
pub use rate_limiter::RateLimiter;
pub use raw::{RawRow, RawTable};
pub use router::{AdapterInfo, AdapterRouter};
pub use tushare::TushareAdapter;
pub use validator::{validate, RejectReason, Rejection, ValidationReport};
pub use venue::{Board, Instrument, Venue};

pub use ashare_common::PartialFailurePolicy;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Exchange Clock
// ============================================================================

/// UTC offset of the Shanghai, Shenzhen and Beijing exchanges (+08:00).
pub fn exchange_offset() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).unwrap_or_else(|| Utc.fix())
}

/// Current calendar date at the exchanges.
pub fn market_today() -> NaiveDate {
    Utc::now().with_timezone(&exchange_offset()).date_naive()
}

// ============================================================================
// Core Request Types
// ============================================================================

/// Category of market data, determining schema and validation rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    /// Daily index bars (OHLCV)
    IndexBar,
    /// Individual trades of the current session
    Tick,
    /// One financial metric for one reporting period
    FinancialIndicator,
    /// Company announcements
    Announcement,
}

impl DataKind {
    pub const ALL: [DataKind; 4] = [
        Self::IndexBar,
        Self::Tick,
        Self::FinancialIndicator,
        Self::Announcement,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IndexBar => "index_bar",
            Self::Tick => "tick",
            Self::FinancialIndicator => "financial_indicator",
            Self::Announcement => "announcement",
        }
    }

    /// Kinds whose records form a time series per symbol.
    pub fn is_sequenced(&self) -> bool {
        matches!(self, Self::IndexBar | Self::Tick)
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DataKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "index_bar" | "index" | "bar" => Ok(Self::IndexBar),
            "tick" | "ticks" => Ok(Self::Tick),
            "financial_indicator" | "financial" | "fina" => Ok(Self::FinancialIndicator),
            "announcement" | "announcements" | "notice" => Ok(Self::Announcement),
            other => Err(format!("unknown data kind '{other}'")),
        }
    }
}

/// Inclusive calendar date range with `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, FetchError> {
        if start > end {
            return Err(FetchError::InvalidRequest(format!(
                "range start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// A range covering a single day.
    pub fn single(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of calendar days covered, both ends included.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Cut the range into consecutive, non-overlapping pieces of at most
    /// `span_days` days. A span of 0 leaves the range whole.
    pub fn split(&self, span_days: u32) -> Vec<DateRange> {
        if span_days == 0 || self.days() <= i64::from(span_days) {
            return vec![*self];
        }

        let mut pieces = Vec::new();
        let mut cursor = self.start;
        while cursor <= self.end {
            let piece_end = (cursor + Duration::days(i64::from(span_days) - 1)).min(self.end);
            pieces.push(DateRange {
                start: cursor,
                end: piece_end,
            });
            match piece_end.succ_opt() {
                Some(next) => cursor = next,
                None => break,
            }
        }
        pieces
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Which slice of history a request covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestRange {
    /// A closed calendar range
    Between(DateRange),
    /// The most recent N rows the provider offers
    Latest(usize),
}

impl fmt::Display for RequestRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Between(range) => write!(f, "{range}"),
            Self::Latest(n) => write!(f, "latest {n}"),
        }
    }
}

/// A logical data request. Immutable once constructed; doubles as the
/// exact cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DataRequest {
    kind: DataKind,
    identifier: String,
    range: RequestRange,
}

impl DataRequest {
    pub fn new(
        kind: DataKind,
        identifier: impl Into<String>,
        range: RequestRange,
    ) -> Result<Self, FetchError> {
        let identifier = identifier.into().trim().to_string();
        if identifier.is_empty() {
            return Err(FetchError::InvalidRequest("identifier is empty".into()));
        }
        if range == RequestRange::Latest(0) {
            return Err(FetchError::InvalidRequest(
                "latest-N requests need N > 0".into(),
            ));
        }

        Ok(Self {
            kind,
            identifier,
            range,
        })
    }

    /// Request a closed date range.
    pub fn between(
        kind: DataKind,
        identifier: impl Into<String>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Self, FetchError> {
        Self::new(kind, identifier, RequestRange::Between(DateRange::new(start, end)?))
    }

    /// Request the latest `n` rows.
    pub fn latest(
        kind: DataKind,
        identifier: impl Into<String>,
        n: usize,
    ) -> Result<Self, FetchError> {
        Self::new(kind, identifier, RequestRange::Latest(n))
    }

    pub fn kind(&self) -> DataKind {
        self.kind
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn range(&self) -> RequestRange {
        self.range
    }

    /// The same request narrowed to a sub-range.
    pub(crate) fn with_range(&self, range: DateRange) -> Self {
        Self {
            kind: self.kind,
            identifier: self.identifier.clone(),
            range: RequestRange::Between(range),
        }
    }
}

impl fmt::Display for DataRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} [{}]", self.kind, self.identifier, self.range)
    }
}

// ============================================================================
// Normalized Records
// ============================================================================

/// Aggressor side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
    Neutral,
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
            Self::Neutral => write!(f, "neutral"),
        }
    }
}

/// Daily index bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexBar {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Turnover; some index feeds omit it
    pub amount: Option<f64>,
}

/// Single trade, stamped in exchange-local time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub timestamp: DateTime<FixedOffset>,
    pub price: f64,
    pub volume: f64,
    pub side: TradeSide,
}

/// One metric of one reporting period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialIndicator {
    pub symbol: String,
    pub period_end_date: NaiveDate,
    pub metric_name: String,
    pub value: f64,
}

/// Company announcement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub symbol: String,
    pub publish_date: NaiveDate,
    pub title: String,
    pub category: String,
}

/// Category used when the provider supplies none.
pub const UNCATEGORIZED: &str = "uncategorized";

/// Canonical record of any kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizedRecord {
    IndexBar(IndexBar),
    Tick(Tick),
    FinancialIndicator(FinancialIndicator),
    Announcement(Announcement),
}

impl NormalizedRecord {
    pub fn kind(&self) -> DataKind {
        match self {
            Self::IndexBar(_) => DataKind::IndexBar,
            Self::Tick(_) => DataKind::Tick,
            Self::FinancialIndicator(_) => DataKind::FinancialIndicator,
            Self::Announcement(_) => DataKind::Announcement,
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            Self::IndexBar(r) => &r.symbol,
            Self::Tick(r) => &r.symbol,
            Self::FinancialIndicator(r) => &r.symbol,
            Self::Announcement(r) => &r.symbol,
        }
    }

    pub fn as_index_bar(&self) -> Option<&IndexBar> {
        match self {
            Self::IndexBar(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_tick(&self) -> Option<&Tick> {
        match self {
            Self::Tick(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_financial_indicator(&self) -> Option<&FinancialIndicator> {
        match self {
            Self::FinancialIndicator(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_announcement(&self) -> Option<&Announcement> {
        match self {
            Self::Announcement(r) => Some(r),
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
