//! Venue routing for A-share identifiers.
//!
//! Bare six-digit codes are routed by fixed prefix tables. Identifiers that
//! carry an explicit exchange (`000001.SH`, `sh000001`) keep it.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::provider::FetchError;
use super::DataKind;

/// Trading venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Venue {
    Shanghai,
    Shenzhen,
    Beijing,
}

impl Venue {
    /// Exchange suffix (`SH`, `SZ`, `BJ`).
    pub fn code(&self) -> &'static str {
        match self {
            Self::Shanghai => "SH",
            Self::Shenzhen => "SZ",
            Self::Beijing => "BJ",
        }
    }

    /// Eastmoney market id used in `secid`.
    pub fn eastmoney_market(&self) -> &'static str {
        match self {
            Self::Shanghai => "1",
            // Beijing shares the Shenzhen market id
            Self::Shenzhen | Self::Beijing => "0",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code.to_ascii_uppercase().as_str() {
            "SH" | "SS" => Some(Self::Shanghai),
            "SZ" => Some(Self::Shenzhen),
            "BJ" => Some(Self::Beijing),
            _ => None,
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Listing board of a stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Board {
    ShanghaiMain,
    Star,
    ShenzhenMain,
    ChiNext,
    Beijing,
}

/// Stock prefixes, longest first.
const STOCK_PREFIXES: &[(&str, Board)] = &[
    ("688", Board::Star),
    ("689", Board::Star),
    ("300", Board::ChiNext),
    ("301", Board::ChiNext),
    ("60", Board::ShanghaiMain),
    ("00", Board::ShenzhenMain),
    ("92", Board::Beijing),
    ("8", Board::Beijing),
    ("4", Board::Beijing),
];

/// Index prefixes, longest first.
const INDEX_PREFIXES: &[(&str, Venue)] = &[("399", Venue::Shenzhen), ("0", Venue::Shanghai)];

impl Board {
    /// Classify a six-digit stock code by prefix.
    pub fn classify(code: &str) -> Option<Self> {
        STOCK_PREFIXES
            .iter()
            .find(|(prefix, _)| code.starts_with(prefix))
            .map(|(_, board)| *board)
    }

    pub fn venue(&self) -> Venue {
        match self {
            Self::ShanghaiMain | Self::Star => Venue::Shanghai,
            Self::ShenzhenMain | Self::ChiNext => Venue::Shenzhen,
            Self::Beijing => Venue::Beijing,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::ShanghaiMain => "沪市主板",
            Self::Star => "科创板",
            Self::ShenzhenMain => "深市主板",
            Self::ChiNext => "创业板",
            Self::Beijing => "北交所",
        }
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A resolved exchange-qualified instrument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instrument {
    pub code: String,
    pub venue: Venue,
}

impl Instrument {
    /// Tushare style: `000001.SH`.
    pub fn ts_code(&self) -> String {
        format!("{}.{}", self.code, self.venue.code())
    }

    /// Eastmoney style: `1.000001`.
    pub fn secid(&self) -> String {
        format!("{}.{}", self.venue.eastmoney_market(), self.code)
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ts_code())
    }
}

fn is_code(s: &str) -> bool {
    s.len() == 6 && s.bytes().all(|b| b.is_ascii_digit())
}

/// Resolve an identifier to an instrument for a given kind.
///
/// Index bars consult the index table first so that `000001` means the
/// Shanghai Composite rather than Ping An Bank.
pub fn resolve(identifier: &str, kind: DataKind) -> Result<Instrument, FetchError> {
    let id = identifier.trim();
    let invalid = || FetchError::InvalidRequest(format!("unroutable identifier '{identifier}'"));

    if let Some((code, suffix)) = id.split_once('.') {
        let venue = Venue::from_code(suffix).ok_or_else(invalid)?;
        if !is_code(code) {
            return Err(invalid());
        }
        return Ok(Instrument {
            code: code.to_string(),
            venue,
        });
    }

    if id.len() == 8 && id.is_char_boundary(2) {
        let (prefix, code) = id.split_at(2);
        if let Some(venue) = Venue::from_code(prefix) {
            if !is_code(code) {
                return Err(invalid());
            }
            return Ok(Instrument {
                code: code.to_string(),
                venue,
            });
        }
    }

    if !is_code(id) {
        return Err(invalid());
    }

    let from_index = (kind == DataKind::IndexBar)
        .then(|| {
            INDEX_PREFIXES
                .iter()
                .find(|(prefix, _)| id.starts_with(prefix))
                .map(|(_, venue)| *venue)
        })
        .flatten();

    let venue = from_index
        .or_else(|| Board::classify(id).map(|b| b.venue()))
        .ok_or_else(invalid)?;

    Ok(Instrument {
        code: id.to_string(),
        venue,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_board_classify() {
        assert_eq!(Board::classify("688981"), Some(Board::Star));
        assert_eq!(Board::classify("600519"), Some(Board::ShanghaiMain));
        assert_eq!(Board::classify("300750"), Some(Board::ChiNext));
        assert_eq!(Board::classify("000001"), Some(Board::ShenzhenMain));
        assert_eq!(Board::classify("830799"), Some(Board::Beijing));
        assert_eq!(Board::classify("920001"), Some(Board::Beijing));
        assert_eq!(Board::classify("200011"), None);
    }

    #[test]
    fn test_index_routing() {
        let sh = resolve("000001", DataKind::IndexBar).unwrap();
        assert_eq!(sh.venue, Venue::Shanghai);
        assert_eq!(sh.secid(), "1.000001");

        let sz = resolve("399001", DataKind::IndexBar).unwrap();
        assert_eq!(sz.venue, Venue::Shenzhen);
        assert_eq!(sz.ts_code(), "399001.SZ");
    }

    #[test]
    fn test_stock_routing_for_other_kinds() {
        let bank = resolve("000001", DataKind::Tick).unwrap();
        assert_eq!(bank.venue, Venue::Shenzhen);

        let moutai = resolve("600519", DataKind::Announcement).unwrap();
        assert_eq!(moutai.ts_code(), "600519.SH");

        let bj = resolve("830799", DataKind::Tick).unwrap();
        assert_eq!(bj.secid(), "0.830799");
    }

    #[test]
    fn test_explicit_qualification_wins() {
        let suffixed = resolve("000001.SZ", DataKind::IndexBar).unwrap();
        assert_eq!(suffixed.venue, Venue::Shenzhen);

        let prefixed = resolve("sh000300", DataKind::IndexBar).unwrap();
        assert_eq!(prefixed.ts_code(), "000300.SH");
    }

    #[test]
    fn test_unroutable_identifiers() {
        for id in ["", "AAPL", "12345", "000001.HK", "sh00001", "200011"] {
            assert!(
                matches!(resolve(id, DataKind::Tick), Err(FetchError::InvalidRequest(_))),
                "{id} should be rejected"
            );
        }
    }
}
