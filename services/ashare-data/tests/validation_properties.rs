//! Property tests for normalization and validation.
//!
//! Arbitrary rows, including junk columns and unparseable cells, must come
//! out of normalize + validate as an exact partition: every row is either
//! accepted or rejected once, never dropped and never duplicated.

use proptest::prelude::*;
use serde_json::{json, Value};

use ashare_data::data::{validate, DataKind, RawRow, RawTable, SchemaRegistry};

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_column() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec![
        "date",
        "open",
        "high",
        "low",
        "close",
        "volume",
        "amount",
        "timestamp",
        "price",
        "side",
        "period_end_date",
        "metric_name",
        "value",
        "publish_date",
        "title",
        "category",
        "junk",
    ])
}

fn arb_cell() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        (-50.0..500.0_f64).prop_map(|n| json!(n)),
        (20_240_101_i64..20_240_131).prop_map(|n| json!(n)),
        (1u32..=31).prop_map(|day| json!(format!("2024-01-{day:02}"))),
        (9u32..15, 0u32..60).prop_map(|(h, m)| json!(format!("{h:02}:{m:02}:00"))),
        prop::sample::select(vec!["buy", "卖盘", "1.5万", "12%", "", "n/a"])
            .prop_map(|s| json!(s)),
        "\\PC{0,8}".prop_map(Value::String),
    ]
}

fn arb_row() -> impl Strategy<Value = RawRow> {
    prop::collection::btree_map(arb_column(), arb_cell(), 0..10).prop_map(|cells| {
        cells
            .into_iter()
            .map(|(column, value)| (column.to_string(), value))
            .collect()
    })
}

fn arb_kind() -> impl Strategy<Value = DataKind> {
    prop::sample::select(DataKind::ALL.to_vec())
}

// ── Partition ────────────────────────────────────────────────────────

proptest! {
    /// Every input row lands in exactly one of accepted or rejected, and
    /// rejections come back in input order.
    #[test]
    fn rows_are_partitioned(kind in arb_kind(), rows in prop::collection::vec(arb_row(), 0..40)) {
        let total = rows.len();
        let table = RawTable::from_rows("generated", kind, "000001", rows);

        let candidates = SchemaRegistry::canonical_only().normalize(kind, &table);
        prop_assert_eq!(candidates.len(), total);

        let report = validate(kind, candidates);
        prop_assert_eq!(report.accepted.len() + report.rejected.len(), total);
        prop_assert_eq!(report.total(), total);

        let indices: Vec<usize> = report.rejected.iter().map(|r| r.row_index).collect();
        prop_assert!(indices.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(indices.iter().all(|i| *i < total));
        prop_assert!(report.accepted.iter().all(|r| r.kind() == kind));
    }

    /// Accepted bars of one symbol are strictly ascending by date.
    #[test]
    fn accepted_bars_are_strictly_ascending(rows in prop::collection::vec(arb_row(), 0..40)) {
        let table = RawTable::from_rows("generated", DataKind::IndexBar, "000001", rows);
        let candidates = SchemaRegistry::canonical_only().normalize(DataKind::IndexBar, &table);
        let report = validate(DataKind::IndexBar, candidates);

        let dates: Vec<_> = report
            .accepted
            .iter()
            .filter_map(|r| r.as_index_bar())
            .map(|bar| bar.date)
            .collect();
        prop_assert_eq!(dates.len(), report.accepted.len());
        prop_assert!(dates.windows(2).all(|w| w[0] < w[1]));
    }
}
