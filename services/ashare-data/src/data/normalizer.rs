//! Schema normalization from provider tables to canonical records.
//!
//! One column map per (provider, kind) renames provider columns to the
//! canonical field names; unknown providers fall back to a canonical map
//! that also understands the Chinese column names common in A-share feeds.
//!
//! Normalization is total: every row becomes a [`Candidate`], either a
//! parsed record or a [`CoercionFailure`] for the validator to dispose of.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

use super::provider::FetchError;
use super::raw::{RawRow, RawTable};
use super::{
    exchange_offset, Announcement, DataKind, FinancialIndicator, IndexBar, NormalizedRecord, Tick,
    TradeSide, UNCATEGORIZED,
};

// ============================================================================
// Canonical Fields
// ============================================================================

/// A canonical field of a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    /// Absent column = schema change
    pub required: bool,
}

const fn req(name: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        required: true,
    }
}

const fn opt(name: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        required: false,
    }
}

const INDEX_BAR_FIELDS: &[FieldSpec] = &[
    req("date"),
    req("open"),
    req("high"),
    req("low"),
    req("close"),
    req("volume"),
    opt("amount"),
];

const TICK_FIELDS: &[FieldSpec] = &[
    req("timestamp"),
    req("price"),
    req("volume"),
    opt("side"),
    opt("date"),
];

const FINANCIAL_INDICATOR_FIELDS: &[FieldSpec] =
    &[req("period_end_date"), req("metric_name"), req("value")];

const ANNOUNCEMENT_FIELDS: &[FieldSpec] = &[req("publish_date"), req("title"), opt("category")];

impl FieldSpec {
    /// Canonical fields of a kind.
    pub fn for_kind(kind: DataKind) -> &'static [FieldSpec] {
        match kind {
            DataKind::IndexBar => INDEX_BAR_FIELDS,
            DataKind::Tick => TICK_FIELDS,
            DataKind::FinancialIndicator => FINANCIAL_INDICATOR_FIELDS,
            DataKind::Announcement => ANNOUNCEMENT_FIELDS,
        }
    }
}

// ============================================================================
// Column Maps
// ============================================================================

/// Canonical field → accepted provider column names, in preference order.
#[derive(Debug, Clone, Default)]
pub struct ColumnMap {
    aliases: Vec<(&'static str, Vec<String>)>,
}

impl ColumnMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `columns` for `field`.
    pub fn alias(mut self, field: &'static str, columns: &[&str]) -> Self {
        let columns = columns.iter().map(|c| c.to_string()).collect();
        match self.aliases.iter_mut().find(|(f, _)| *f == field) {
            Some((_, existing)) => existing.extend(columns),
            None => self.aliases.push((field, columns)),
        }
        self
    }

    /// The table column that carries `field`, if any.
    pub fn column_for<'t>(&self, field: &str, table: &'t RawTable) -> Option<&'t str> {
        let (_, candidates) = self.aliases.iter().find(|(f, _)| *f == field)?;
        candidates.iter().find_map(|candidate| {
            table
                .columns
                .iter()
                .find(|c| c.as_str() == candidate)
                .map(String::as_str)
        })
    }

    /// Resolve every field of `kind` against a table.
    fn resolve(&self, kind: DataKind, table: &RawTable) -> HashMap<&'static str, String> {
        FieldSpec::for_kind(kind)
            .iter()
            .filter_map(|spec| {
                self.column_for(spec.name, table)
                    .map(|col| (spec.name, col.to_string()))
            })
            .collect()
    }
}

/// Column maps for every known (provider, kind) pair.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    maps: HashMap<(String, DataKind), ColumnMap>,
    fallback: HashMap<DataKind, ColumnMap>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SchemaRegistry {
    /// A registry with only the canonical fallback maps.
    pub fn canonical_only() -> Self {
        let fallback = DataKind::ALL
            .into_iter()
            .map(|kind| (kind, canonical_map(kind)))
            .collect();

        Self {
            maps: HashMap::new(),
            fallback,
        }
    }

    /// Canonical maps plus the eastmoney and tushare tables.
    pub fn builtin() -> Self {
        let mut registry = Self::canonical_only();

        registry.register(
            "eastmoney",
            DataKind::IndexBar,
            ColumnMap::new()
                .alias("date", &["f51"])
                .alias("open", &["f52"])
                .alias("close", &["f53"])
                .alias("high", &["f54"])
                .alias("low", &["f55"])
                .alias("volume", &["f56"])
                .alias("amount", &["f57"]),
        );
        registry.register(
            "eastmoney",
            DataKind::Tick,
            ColumnMap::new()
                .alias("timestamp", &["f51"])
                .alias("price", &["f52"])
                .alias("volume", &["f53"])
                .alias("side", &["f55"])
                .alias("date", &["date"]),
        );
        registry.register(
            "eastmoney",
            DataKind::Announcement,
            ColumnMap::new()
                .alias("publish_date", &["notice_date"])
                .alias("title", &["title"])
                .alias("category", &["column_name"]),
        );

        registry.register(
            "tushare",
            DataKind::IndexBar,
            ColumnMap::new()
                .alias("date", &["trade_date"])
                .alias("open", &["open"])
                .alias("high", &["high"])
                .alias("low", &["low"])
                .alias("close", &["close"])
                .alias("volume", &["vol"])
                .alias("amount", &["amount"]),
        );
        registry.register(
            "tushare",
            DataKind::FinancialIndicator,
            ColumnMap::new()
                .alias("period_end_date", &["end_date"])
                .alias("metric_name", &["indicator"])
                .alias("value", &["value"]),
        );
        registry.register(
            "tushare",
            DataKind::Announcement,
            ColumnMap::new()
                .alias("publish_date", &["ann_date"])
                .alias("title", &["title"]),
        );

        registry
    }

    /// Register or replace the map for a (provider, kind) pair.
    pub fn register(&mut self, provider: impl Into<String>, kind: DataKind, map: ColumnMap) {
        self.maps.insert((provider.into(), kind), map);
    }

    /// Map used for a provider's tables of `kind`.
    pub fn map_for(&self, provider: &str, kind: DataKind) -> &ColumnMap {
        static EMPTY: std::sync::OnceLock<ColumnMap> = std::sync::OnceLock::new();

        self.maps
            .get(&(provider.to_string(), kind))
            .or_else(|| self.fallback.get(&kind))
            .unwrap_or_else(|| EMPTY.get_or_init(ColumnMap::new))
    }

    /// Required canonical fields with no matching column.
    ///
    /// A table with no columns at all is an empty result, not a schema break.
    pub fn missing_columns(&self, kind: DataKind, table: &RawTable) -> Vec<&'static str> {
        if table.columns.is_empty() {
            return Vec::new();
        }

        let map = self.map_for(&table.provider, kind);
        FieldSpec::for_kind(kind)
            .iter()
            .filter(|spec| spec.required && map.column_for(spec.name, table).is_none())
            .map(|spec| spec.name)
            .collect()
    }

    /// Fail with `UpstreamSchemaChanged` when required columns are missing.
    pub fn check(&self, kind: DataKind, table: &RawTable) -> Result<(), FetchError> {
        let missing = self.missing_columns(kind, table);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(FetchError::schema_changed(&table.provider, kind, &missing))
        }
    }

    /// Turn every row of `raw` into a candidate record of `kind`.
    pub fn normalize(&self, kind: DataKind, raw: &RawTable) -> Vec<Candidate> {
        let columns = self.map_for(&raw.provider, kind).resolve(kind, raw);

        raw.rows
            .iter()
            .enumerate()
            .map(|(row_index, row)| {
                let reader = RowReader {
                    row,
                    columns: &columns,
                };
                Candidate {
                    row_index,
                    raw: row.clone(),
                    parsed: reader.record(kind, &raw.identifier),
                }
            })
            .collect()
    }
}

fn canonical_map(kind: DataKind) -> ColumnMap {
    match kind {
        DataKind::IndexBar => ColumnMap::new()
            .alias("date", &["date", "trade_date", "日期"])
            .alias("open", &["open", "开盘", "开盘价"])
            .alias("high", &["high", "最高", "最高价"])
            .alias("low", &["low", "最低", "最低价"])
            .alias("close", &["close", "收盘", "收盘价"])
            .alias("volume", &["volume", "vol", "成交量"])
            .alias("amount", &["amount", "成交额"]),
        DataKind::Tick => ColumnMap::new()
            .alias("timestamp", &["timestamp", "time", "成交时间", "时间"])
            .alias("price", &["price", "成交价格", "成交价", "价格"])
            .alias("volume", &["volume", "成交量", "手数"])
            .alias("side", &["side", "性质", "买卖盘性质"])
            .alias("date", &["date", "日期"]),
        DataKind::FinancialIndicator => ColumnMap::new()
            .alias("period_end_date", &["period_end_date", "end_date", "报告期", "日期"])
            .alias("metric_name", &["metric_name", "indicator", "指标", "选项"])
            .alias("value", &["value", "数值", "值"]),
        DataKind::Announcement => ColumnMap::new()
            .alias("publish_date", &["publish_date", "notice_date", "ann_date", "公告日期"])
            .alias("title", &["title", "公告标题", "名称"])
            .alias("category", &["category", "column_name", "公告类型"]),
    }
}

// ============================================================================
// Candidates
// ============================================================================

/// A field value that could not be read as the expected type.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error("cannot read {field} = {value} as {expected}")]
pub struct CoercionFailure {
    pub field: String,
    pub value: Value,
    pub expected: &'static str,
}

/// One normalized but unvalidated row.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Position in the concatenated input
    pub row_index: usize,
    pub raw: RawRow,
    pub parsed: Result<NormalizedRecord, CoercionFailure>,
}

impl Candidate {
    pub fn coercion_failed(&self) -> bool {
        self.parsed.is_err()
    }
}

struct RowReader<'a> {
    row: &'a RawRow,
    columns: &'a HashMap<&'static str, String>,
}

impl RowReader<'_> {
    fn cell(&self, field: &str) -> Option<&Value> {
        self.columns.get(field).and_then(|col| self.row.get(col))
    }

    fn fail(&self, field: &str, expected: &'static str) -> CoercionFailure {
        CoercionFailure {
            field: field.to_string(),
            value: self.cell(field).cloned().unwrap_or(Value::Null),
            expected,
        }
    }

    fn number(&self, field: &str) -> Result<f64, CoercionFailure> {
        self.cell(field)
            .and_then(coerce_f64)
            .ok_or_else(|| self.fail(field, "number"))
    }

    fn optional_number(&self, field: &str) -> Result<Option<f64>, CoercionFailure> {
        match self.cell(field) {
            None => Ok(None),
            Some(v) if is_blank(v) => Ok(None),
            Some(v) => coerce_f64(v)
                .map(Some)
                .ok_or_else(|| self.fail(field, "number")),
        }
    }

    fn date(&self, field: &str) -> Result<NaiveDate, CoercionFailure> {
        self.cell(field)
            .and_then(coerce_date)
            .ok_or_else(|| self.fail(field, "date"))
    }

    fn text(&self, field: &str) -> String {
        self.cell(field).map(coerce_text).unwrap_or_default()
    }

    fn record(&self, kind: DataKind, symbol: &str) -> Result<NormalizedRecord, CoercionFailure> {
        let symbol = symbol.to_string();

        Ok(match kind {
            DataKind::IndexBar => NormalizedRecord::IndexBar(IndexBar {
                symbol,
                date: self.date("date")?,
                open: self.number("open")?,
                high: self.number("high")?,
                low: self.number("low")?,
                close: self.number("close")?,
                volume: self.number("volume")?,
                amount: self.optional_number("amount")?,
            }),
            DataKind::Tick => {
                let session = self.cell("date").and_then(coerce_date);
                let timestamp = self
                    .cell("timestamp")
                    .and_then(|v| coerce_timestamp(v, session))
                    .ok_or_else(|| self.fail("timestamp", "timestamp"))?;
                let side = match self.cell("side") {
                    None => TradeSide::Neutral,
                    Some(v) if is_blank(v) => TradeSide::Neutral,
                    Some(v) => coerce_side(v).ok_or_else(|| self.fail("side", "trade side"))?,
                };

                NormalizedRecord::Tick(Tick {
                    symbol,
                    timestamp,
                    price: self.number("price")?,
                    volume: self.number("volume")?,
                    side,
                })
            }
            DataKind::FinancialIndicator => {
                NormalizedRecord::FinancialIndicator(FinancialIndicator {
                    symbol,
                    period_end_date: self.date("period_end_date")?,
                    metric_name: self.text("metric_name"),
                    value: self.number("value")?,
                })
            }
            DataKind::Announcement => {
                let category = self.text("category");
                NormalizedRecord::Announcement(Announcement {
                    symbol,
                    publish_date: self.date("publish_date")?,
                    title: self.text("title"),
                    category: if category.is_empty() {
                        UNCATEGORIZED.to_string()
                    } else {
                        category
                    },
                })
            }
        })
    }
}

// ============================================================================
// Coercion
// ============================================================================

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => matches!(s.trim(), "" | "-" | "--" | "None" | "nan" | "NaN"),
        _ => false,
    }
}

/// Read a number from a JSON number or a formatted string.
///
/// Strings may carry thousands separators, a trailing `%` (kept in percent
/// units) and a `万` or `亿` multiplier.
pub(crate) fn coerce_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let mut text = s.trim().replace(',', "");
            text = text.trim_end_matches('%').to_string();

            let mut multiplier = 1.0;
            if let Some(stripped) = text.strip_suffix('亿') {
                multiplier = 1e8;
                text = stripped.to_string();
            } else if let Some(stripped) = text.strip_suffix('万') {
                multiplier = 1e4;
                text = stripped.to_string();
            }

            text.trim().parse::<f64>().ok().map(|n| n * multiplier)
        }
        _ => None,
    };

    parsed.filter(|n| n.is_finite())
}

fn date_from_yyyymmdd(n: i64) -> Option<NaiveDate> {
    if !(1900_01_01..=2100_12_31).contains(&n) {
        return None;
    }
    NaiveDate::from_ymd_opt((n / 10_000) as i32, ((n / 100) % 100) as u32, (n % 100) as u32)
}

fn datetime_from_millis(ms: i64) -> Option<DateTime<FixedOffset>> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.with_timezone(&exchange_offset()))
}

/// Read a calendar date.
pub(crate) fn coerce_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::Number(n) => {
            let n = n.as_i64()?;
            date_from_yyyymmdd(n).or_else(|| {
                (n > 100_000_000_000)
                    .then(|| datetime_from_millis(n).map(|dt| dt.date_naive()))
                    .flatten()
            })
        }
        Value::String(s) => {
            let token = s.trim().split(|c: char| c == ' ' || c == 'T').next()?;
            ["%Y-%m-%d", "%Y%m%d", "%Y/%m/%d"]
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(token, fmt).ok())
        }
        _ => None,
    }
}

/// Read a trade timestamp in exchange-local time.
///
/// A bare time of day is combined with `session`, the row's trading date.
pub(crate) fn coerce_timestamp(
    value: &Value,
    session: Option<NaiveDate>,
) -> Option<DateTime<FixedOffset>> {
    let offset = exchange_offset();

    match value {
        Value::Number(n) => n.as_i64().and_then(datetime_from_millis),
        Value::String(s) => {
            let text = s.trim();

            if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
                return Some(dt.with_timezone(&offset));
            }

            let local = [
                "%Y-%m-%d %H:%M:%S",
                "%Y-%m-%d %H:%M:%S%.f",
                "%Y-%m-%dT%H:%M:%S",
                "%Y-%m-%d %H:%M",
                "%Y%m%d %H:%M:%S",
            ]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
            .or_else(|| {
                let time = ["%H:%M:%S", "%H:%M"]
                    .iter()
                    .find_map(|fmt| NaiveTime::parse_from_str(text, fmt).ok())?;
                session.map(|date| date.and_time(time))
            })?;

            offset.from_local_datetime(&local).single()
        }
        _ => None,
    }
}

/// Read a trade side.
///
/// Eastmoney encodes sides as 2 (buy), 1 (sell) and 4 (neutral).
pub(crate) fn coerce_side(value: &Value) -> Option<TradeSide> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_lowercase(),
        _ => return None,
    };

    match text.as_str() {
        "2" | "b" | "buy" | "买盘" | "买入" => Some(TradeSide::Buy),
        "1" | "s" | "sell" | "卖盘" | "卖出" => Some(TradeSide::Sell),
        "4" | "n" | "neutral" | "中性盘" => Some(TradeSide::Neutral),
        _ => None,
    }
}

fn coerce_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================
