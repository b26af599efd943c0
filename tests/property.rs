//! Property-based exercise of §8's "Universal invariants" Robin claim, using `quickcheck`
//! the way the retrieved corpus reaches for it for invariant-shaped properties rather than
//! single-example tests. The COUNTER-wrap closed-form property (§8 Boundaries) is checked
//! directly against `compute_rate` in `src/datasource.rs`'s own unit tests, where that
//! private helper is reachable.

use quickcheck::{quickcheck, TestResult};
use rrd_engine::{ArchiveDef, ConsolidationFunction, Database, DsDef, DsType, FetchRequest, RrdDef};

/// §8: "For all Robins of size R, after any number of `store` operations the logical
/// sequence `get_values(0, R)` contains exactly the R most recently stored values, in
/// insertion order, padded with NaN on the oldest end if fewer than R have been stored."
///
/// Driven through the public database surface (a single-row-per-step LAST archive makes
/// each stored PDP land in the Robin unchanged), rather than against `Robin` directly,
/// since `Robin` itself is a private storage type.
fn robin_matches_last_n_stored(rows: u8, pushes: Vec<u16>) -> TestResult {
    let rows = (rows % 8) as usize + 2; // keep within ArchiveDef's `rows >= 2` floor
    if pushes.is_empty() || pushes.len() > 64 {
        return TestResult::discard();
    }

    let def = RrdDef::from_path("mem://quickcheck-robin", 0, 10)
        .data_source(DsDef::new("x", DsType::Gauge, 1_000_000, f64::NAN, f64::NAN).unwrap())
        .archive(ArchiveDef::new(ConsolidationFunction::Last, 0.0, 1, rows as i32).unwrap())
        .build()
        .unwrap();
    let db = Database::create_in_memory(def).unwrap();

    let values: Vec<f64> = pushes.iter().map(|&v| v as f64).collect();
    for (i, &v) in values.iter().enumerate() {
        db.create_sample((i as i64 + 1) * 10).set("x", v).unwrap().update().unwrap();
    }

    let last_update = db.last_update_time().unwrap();
    let req = FetchRequest::new(ConsolidationFunction::Last, last_update - 10 * (rows as i64 - 1), last_update).unwrap();
    let data = db.fetch(&req).unwrap();
    let col = data.column("x").unwrap();

    let want_known = rows.min(values.len());
    let want_pad = rows - want_known;
    let got_pad = col.iter().take_while(|v| v.is_nan()).count();

    if want_pad == 0 {
        // Once the Robin has wrapped, every slot is known and holds the newest `rows`
        // pushes in order.
        let expected_tail = &values[values.len() - want_known..];
        TestResult::from_bool(got_pad == 0 && col == expected_tail)
    } else {
        let tail = &col[want_pad..];
        let expected_tail = &values[values.len() - want_known..];
        TestResult::from_bool(got_pad == want_pad && tail == expected_tail)
    }
}

quickcheck! {
    fn prop_robin_matches_last_n_stored(rows: u8, pushes: Vec<u16>) -> TestResult {
        robin_matches_last_n_stored(rows, pushes)
    }
}
