//! Per-kind validation of normalized candidates.
//!
//! Validation never fails: every candidate ends up either accepted or
//! rejected with a reason, and rejected rows are reported in input order.
//!
//! # Ordering rules (index bars and ticks, per symbol)
//! - A key equal to the last accepted key replaces it; the earlier row is
//!   rejected as `duplicate_key`.
//! - A key earlier than the last accepted key is rejected as `out_of_order`.
//!   Rows are never re-sorted.
//!
//! Financial indicators and announcements have no ordering rule; the last
//! row seen for a key wins.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use super::normalizer::Candidate;
use super::raw::RawRow;
use super::{DataKind, NormalizedRecord};

/// Why a row was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    CoercionFailed,
    DuplicateKey,
    OutOfOrder,
    NegativeVolume,
    NegativeAmount,
    NonPositivePrice,
    PriceRangeViolation,
    EmptyField,
    KindMismatch,
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::CoercionFailed => "coercion_failed",
            Self::DuplicateKey => "duplicate_key",
            Self::OutOfOrder => "out_of_order",
            Self::NegativeVolume => "negative_volume",
            Self::NegativeAmount => "negative_amount",
            Self::NonPositivePrice => "non_positive_price",
            Self::PriceRangeViolation => "price_range_violation",
            Self::EmptyField => "empty_field",
            Self::KindMismatch => "kind_mismatch",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A rejected input row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub row_index: usize,
    pub raw: RawRow,
    pub reason: RejectReason,
    pub detail: String,
}

/// Outcome of validating one candidate sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub accepted: Vec<NormalizedRecord>,
    /// Ordered by input row
    pub rejected: Vec<Rejection>,
}

impl ValidationReport {
    /// Number of input rows covered.
    pub fn total(&self) -> usize {
        self.accepted.len() + self.rejected.len()
    }

    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }

    /// Rejections grouped by reason.
    pub fn rejection_counts(&self) -> BTreeMap<RejectReason, usize> {
        let mut counts = BTreeMap::new();
        for rejection in &self.rejected {
            *counts.entry(rejection.reason).or_insert(0) += 1;
        }
        counts
    }
}

/// Identity of a record for duplicate detection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum RecordKey {
    /// Position in a per-symbol time series
    Sequence(i64),
    Period(chrono::NaiveDate, String),
    Notice(chrono::NaiveDate, String),
}

fn record_key(record: &NormalizedRecord) -> RecordKey {
    match record {
        NormalizedRecord::IndexBar(bar) => {
            RecordKey::Sequence(i64::from(chrono::Datelike::num_days_from_ce(&bar.date)))
        }
        NormalizedRecord::Tick(tick) => RecordKey::Sequence(tick.timestamp.timestamp_micros()),
        NormalizedRecord::FinancialIndicator(fi) => {
            RecordKey::Period(fi.period_end_date, fi.metric_name.clone())
        }
        NormalizedRecord::Announcement(ann) => {
            RecordKey::Notice(ann.publish_date, ann.title.clone())
        }
    }
}

fn is_price(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// Kind-specific field rules.
fn check_rules(record: &NormalizedRecord) -> Result<(), (RejectReason, String)> {
    match record {
        NormalizedRecord::IndexBar(bar) => {
            for (name, price) in [
                ("open", bar.open),
                ("high", bar.high),
                ("low", bar.low),
                ("close", bar.close),
            ] {
                if !is_price(price) {
                    return Err((RejectReason::NonPositivePrice, format!("{name} = {price}")));
                }
            }
            if bar.volume < 0.0 {
                return Err((RejectReason::NegativeVolume, format!("volume = {}", bar.volume)));
            }
            if let Some(amount) = bar.amount.filter(|a| *a < 0.0) {
                return Err((RejectReason::NegativeAmount, format!("amount = {amount}")));
            }
            let body_top = bar.open.max(bar.close);
            let body_bottom = bar.open.min(bar.close);
            if bar.high < body_top || body_bottom < bar.low {
                return Err((
                    RejectReason::PriceRangeViolation,
                    format!(
                        "open {} high {} low {} close {}",
                        bar.open, bar.high, bar.low, bar.close
                    ),
                ));
            }
            Ok(())
        }
        NormalizedRecord::Tick(tick) => {
            if !is_price(tick.price) {
                return Err((RejectReason::NonPositivePrice, format!("price = {}", tick.price)));
            }
            if tick.volume < 0.0 {
                return Err((RejectReason::NegativeVolume, format!("volume = {}", tick.volume)));
            }
            Ok(())
        }
        NormalizedRecord::FinancialIndicator(fi) => {
            if fi.metric_name.trim().is_empty() {
                return Err((RejectReason::EmptyField, "metric_name is empty".into()));
            }
            Ok(())
        }
        NormalizedRecord::Announcement(ann) => {
            if ann.title.trim().is_empty() {
                return Err((RejectReason::EmptyField, "title is empty".into()));
            }
            Ok(())
        }
    }
}

/// An accepted record that a later duplicate may still evict.
struct Slot {
    row_index: usize,
    raw: RawRow,
    record: NormalizedRecord,
}

/// Validate candidates of one kind.
pub fn validate(kind: DataKind, candidates: Vec<Candidate>) -> ValidationReport {
    let mut slots: Vec<Option<Slot>> = Vec::with_capacity(candidates.len());
    let mut rejected = Vec::new();

    // Sequenced kinds: symbol -> (last key, slot). Others: (symbol, key) -> slot.
    let mut last_by_symbol: HashMap<String, (RecordKey, usize)> = HashMap::new();
    let mut seen: HashMap<(String, RecordKey), usize> = HashMap::new();

    for candidate in candidates {
        let Candidate {
            row_index,
            raw,
            parsed,
        } = candidate;

        let record = match parsed {
            Ok(record) => record,
            Err(failure) => {
                rejected.push(Rejection {
                    row_index,
                    raw,
                    reason: RejectReason::CoercionFailed,
                    detail: failure.to_string(),
                });
                continue;
            }
        };

        if record.kind() != kind {
            rejected.push(Rejection {
                row_index,
                raw,
                reason: RejectReason::KindMismatch,
                detail: format!("expected {kind}, got {}", record.kind()),
            });
            continue;
        }

        if let Err((reason, detail)) = check_rules(&record) {
            rejected.push(Rejection {
                row_index,
                raw,
                reason,
                detail,
            });
            continue;
        }

        let symbol = record.symbol().to_string();
        let key = record_key(&record);
        let evicted = if kind.is_sequenced() {
            match last_by_symbol.get(&symbol) {
                Some((last, _)) if key < *last => {
                    rejected.push(Rejection {
                        row_index,
                        raw,
                        reason: RejectReason::OutOfOrder,
                        detail: format!("{symbol}: key precedes the previous accepted row"),
                    });
                    continue;
                }
                Some((last, slot)) if key == *last => Some(*slot),
                _ => None,
            }
        } else {
            seen.get(&(symbol.clone(), key.clone())).copied()
        };

        if let Some(Some(previous)) = evicted.map(|slot| slots[slot].take()) {
            rejected.push(Rejection {
                row_index: previous.row_index,
                raw: previous.raw,
                reason: RejectReason::DuplicateKey,
                detail: format!("superseded by row {row_index}"),
            });
        }

        let slot = slots.len();
        slots.push(Some(Slot {
            row_index,
            raw,
            record,
        }));
        if kind.is_sequenced() {
            last_by_symbol.insert(symbol, (key, slot));
        } else {
            seen.insert((symbol, key), slot);
        }
    }

    rejected.sort_by_key(|r| r.row_index);

    ValidationReport {
        accepted: slots.into_iter().flatten().map(|s| s.record).collect(),
        rejected,
    }
}
