//! Direct exercises of the circular array contract (§4.6) through the database surface,
//! beyond the storage-level unit tests in `src/robin.rs`.

use rrd_engine::{ArchiveDef, ConsolidationFunction, Database, DsDef, DsType, FetchRequest, RrdDef};

#[test]
fn a_fresh_archive_reports_unknown_everywhere() {
    let def = RrdDef::from_path("mem://robin-fresh", 1_000_000, 60)
        .data_source(DsDef::new("x", DsType::Gauge, 600, f64::NAN, f64::NAN).unwrap())
        .archive(ArchiveDef::new(ConsolidationFunction::Average, 0.5, 1, 10).unwrap())
        .build()
        .unwrap();
    let db = Database::create_in_memory(def).unwrap();
    db.create_sample(1_000_060).set("x", 1.0).unwrap().update().unwrap();

    let req = FetchRequest::new(ConsolidationFunction::Average, 999_000, 1_000_060).unwrap();
    let data = db.fetch(&req).unwrap();
    let col = data.column("x").unwrap();
    assert!(col[..col.len() - 1].iter().all(|v| v.is_nan()));
}

#[test]
fn values_outside_the_archives_covered_window_are_unknown() {
    let def = RrdDef::from_path("mem://robin-window", 0, 10)
        .data_source(DsDef::new("x", DsType::Gauge, 600, f64::NAN, f64::NAN).unwrap())
        .archive(ArchiveDef::new(ConsolidationFunction::Average, 0.5, 1, 3).unwrap())
        .build()
        .unwrap();
    let db = Database::create_in_memory(def).unwrap();
    for t in [10, 20, 30, 40, 50] {
        db.create_sample(t).set("x", t as f64).unwrap().update().unwrap();
    }

    // Only the newest 3 rows (20, 30, 40 -> 50) survive; a request reaching further back
    // than the archive's window must come back NaN rather than stale data.
    let req = FetchRequest::new(ConsolidationFunction::Average, 0, 50).unwrap();
    let data = db.fetch(&req).unwrap();
    let col = data.column("x").unwrap();
    assert!(col[0].is_nan());
    assert_eq!(*col.last().unwrap(), 50.0);
}
