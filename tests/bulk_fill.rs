//! Scenario 6 from spec §8: bulk-store wraps the circular array at most once, even when the
//! fill count exceeds the number of slots remaining before the physical end of the array.

use rrd_engine::{ArchiveDef, ConsolidationFunction, Database, DsDef, DsType, FetchRequest, RrdDef};

#[test]
fn a_gap_long_enough_to_bulk_fill_wraps_the_robin_once() {
    // step=10, 5-row archive: three samples prime the robin pointer to 3, then a gap of
    // four whole steps (40s) forces a uniform bulk fill across the wrap boundary.
    let def = RrdDef::from_path("mem://bulk-fill", 0, 10)
        .data_source(DsDef::new("x", DsType::Gauge, 1000, f64::NAN, f64::NAN).unwrap())
        .archive(ArchiveDef::new(ConsolidationFunction::Average, 0.5, 1, 5).unwrap())
        .build()
        .unwrap();
    let db = Database::create_in_memory(def).unwrap();

    for t in [10, 20, 30] {
        db.create_sample(t).set("x", 1.0).unwrap().update().unwrap();
    }
    db.create_sample(70).set("x", 9.0).unwrap().update().unwrap();

    let req = FetchRequest::new(ConsolidationFunction::Average, 20, 70).unwrap();
    let data = db.fetch(&req).unwrap();
    let col = data.column("x").unwrap();

    // Rows: [20 -> evicted/NaN, 30 -> 1.0 (oldest surviving), 40, 50, 60, 70 -> all 9.0].
    assert!(col[0].is_nan());
    assert_eq!(col[1], 1.0);
    assert!(col[2..].iter().all(|&v| v == 9.0));
}
