//! Scenario 2 from spec §8: a GAUGE source fanned out across four consolidation functions at
//! the same archive step, checked for agreement on the first completed row.

use rrd_engine::{ArchiveDef, ConsolidationFunction, Database, DsDef, DsType, FetchRequest, RrdDef};

fn build(start: i64) -> Database {
    let def = RrdDef::from_path("mem://gauge-alignment", start, 10)
        .data_source(DsDef::new("input", DsType::Gauge, 600, 0.0, f64::NAN).unwrap())
        .archive(ArchiveDef::new(ConsolidationFunction::Average, 0.5, 2, 1000).unwrap())
        .archive(ArchiveDef::new(ConsolidationFunction::Max, 0.5, 2, 1000).unwrap())
        .archive(ArchiveDef::new(ConsolidationFunction::Min, 0.5, 2, 1000).unwrap())
        .archive(ArchiveDef::new(ConsolidationFunction::Last, 0.5, 2, 1000).unwrap())
        .build()
        .unwrap();
    Database::create_in_memory(def).unwrap()
}

#[test]
fn four_consolidation_functions_agree_on_the_first_row() {
    let start = 0;
    let db = build(start);

    db.create_sample(start + 10).set("input", 10.0).unwrap().update().unwrap();
    db.create_sample(start + 20).set("input", 20.0).unwrap().update().unwrap();

    let window = |cf| FetchRequest::new(cf, start, start + 20).unwrap();

    let avg = db.fetch(&window(ConsolidationFunction::Average)).unwrap();
    let max = db.fetch(&window(ConsolidationFunction::Max)).unwrap();
    let min = db.fetch(&window(ConsolidationFunction::Min)).unwrap();
    let last = db.fetch(&window(ConsolidationFunction::Last)).unwrap();

    assert_eq!(*avg.column("input").unwrap().last().unwrap(), 15.0);
    assert_eq!(*max.column("input").unwrap().last().unwrap(), 20.0);
    assert_eq!(*min.column("input").unwrap().last().unwrap(), 10.0);
    assert_eq!(*last.column("input").unwrap().last().unwrap(), 20.0);
}
