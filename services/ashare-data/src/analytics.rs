//! Descriptive statistics over accepted records.
//!
//! Returns are expressed in percent. Volatility is annualized over 252
//! trading days.

use chrono::NaiveDate;
use serde::Serialize;
use statrs::statistics::Statistics;
use std::collections::{BTreeMap, HashMap};

use crate::data::venue::resolve;
use crate::data::{Announcement, Board, DataKind, IndexBar, NormalizedRecord};

/// Trading days per year used for annualization.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Day-over-day close change in percent. One element shorter than `bars`.
pub fn daily_returns(bars: &[IndexBar]) -> Vec<f64> {
    bars.windows(2)
        .map(|w| (w[1].close / w[0].close - 1.0) * 100.0)
        .collect()
}

/// Sample standard deviation of `returns` scaled by √252.
///
/// `None` with fewer than two returns.
pub fn annualized_volatility(returns: &[f64]) -> Option<f64> {
    if returns.len() < 2 {
        return None;
    }
    let std_dev = returns.std_dev();
    std_dev
        .is_finite()
        .then(|| std_dev * TRADING_DAYS_PER_YEAR.sqrt())
}

/// Percent change from the first to the last close.
pub fn cumulative_return(bars: &[IndexBar]) -> Option<f64> {
    let first = bars.first()?;
    let last = bars.last()?;
    Some((last.close / first.close - 1.0) * 100.0)
}

/// Closes rebased so the first bar equals 100.
pub fn normalized_closes(bars: &[IndexBar]) -> Vec<(NaiveDate, f64)> {
    let Some(base) = bars.first().map(|b| b.close) else {
        return Vec::new();
    };
    bars.iter()
        .map(|b| (b.date, b.close / base * 100.0))
        .collect()
}

/// Per-symbol summary of a bar series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BarSummary {
    pub symbol: String,
    pub bars: usize,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub last_close: f64,
    pub high: f64,
    pub low: f64,
    pub mean_volume: f64,
    pub cumulative_return_pct: f64,
    pub annualized_volatility_pct: Option<f64>,
}

impl BarSummary {
    fn from_bars(symbol: &str, bars: &[IndexBar]) -> Option<Self> {
        let first = bars.first()?;
        let last = bars.last()?;
        let returns = daily_returns(bars);

        Some(Self {
            symbol: symbol.to_string(),
            bars: bars.len(),
            first_date: first.date,
            last_date: last.date,
            last_close: last.close,
            high: bars.iter().map(|b| b.high).fold(f64::MIN, f64::max),
            low: bars.iter().map(|b| b.low).fold(f64::MAX, f64::min),
            mean_volume: bars.iter().map(|b| b.volume).mean(),
            cumulative_return_pct: cumulative_return(bars)?,
            annualized_volatility_pct: annualized_volatility(&returns),
        })
    }
}

/// Bar series grouped by symbol, in first-seen symbol order. Records of
/// other kinds are ignored.
pub fn bar_series(records: &[NormalizedRecord]) -> Vec<(String, Vec<IndexBar>)> {
    let mut series: Vec<(String, Vec<IndexBar>)> = Vec::new();
    let mut position: HashMap<&str, usize> = HashMap::new();

    for bar in records.iter().filter_map(NormalizedRecord::as_index_bar) {
        let index = *position.entry(bar.symbol.as_str()).or_insert_with(|| {
            series.push((bar.symbol.clone(), Vec::new()));
            series.len() - 1
        });
        series[index].1.push(bar.clone());
    }

    series
}

/// Summaries of every bar series in `records`, in first-seen symbol order.
pub fn summarize(records: &[NormalizedRecord]) -> Vec<BarSummary> {
    bar_series(records)
        .iter()
        .filter_map(|(symbol, bars)| BarSummary::from_bars(symbol, bars))
        .collect()
}

/// Listed codes per board.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BoardDistribution {
    pub counts: BTreeMap<Board, usize>,
    /// Codes no prefix rule matched
    pub unclassified: usize,
}

impl BoardDistribution {
    pub fn total(&self) -> usize {
        self.counts.values().sum::<usize>() + self.unclassified
    }

    /// Share of `board` in percent of all codes.
    pub fn share(&self, board: Board) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.counts.get(&board).copied().unwrap_or(0) as f64 / total as f64 * 100.0
    }
}

/// Count stock codes by listing board. Accepts any identifier form the
/// venue router understands.
pub fn board_distribution<'a>(codes: impl IntoIterator<Item = &'a str>) -> BoardDistribution {
    let mut distribution = BoardDistribution::default();

    for code in codes {
        let board = resolve(code, DataKind::Tick)
            .ok()
            .and_then(|instrument| Board::classify(&instrument.code));
        match board {
            Some(board) => *distribution.counts.entry(board).or_insert(0) += 1,
            None => distribution.unclassified += 1,
        }
    }

    distribution
}

/// Announcement counts per category, most frequent first; ties by name.
pub fn category_counts(announcements: &[Announcement]) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for ann in announcements {
        *counts.entry(ann.category.as_str()).or_insert(0) += 1;
    }

    let mut sorted: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(category, count)| (category.to_string(), count))
        .collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    sorted
}
