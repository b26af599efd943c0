//! `Database::copy_state_to` (§4.8): running state follows data sources by name and archives
//! by `(cf, steps)`, independent of declaration order or archive shape on either side.

use rrd_engine::{ArchiveDef, ConsolidationFunction, Database, DsDef, DsType, FetchRequest, RrdDef};

#[test]
fn copy_state_to_carries_values_into_a_same_shaped_database() {
    let src_def = RrdDef::from_path("mem://copy-src", 0, 10)
        .data_source(DsDef::new("a", DsType::Gauge, 600, f64::NAN, f64::NAN).unwrap())
        .archive(ArchiveDef::new(ConsolidationFunction::Average, 0.5, 1, 5).unwrap())
        .build()
        .unwrap();
    let src = Database::create_in_memory(src_def).unwrap();
    for t in [10, 20, 30] {
        src.create_sample(t).set("a", t as f64).unwrap().update().unwrap();
    }

    let dst_def = RrdDef::from_path("mem://copy-dst", 0, 10)
        .data_source(DsDef::new("a", DsType::Gauge, 600, f64::NAN, f64::NAN).unwrap())
        .archive(ArchiveDef::new(ConsolidationFunction::Average, 0.5, 1, 5).unwrap())
        .build()
        .unwrap();
    let dst = Database::create_in_memory(dst_def).unwrap();

    src.copy_state_to(&dst).unwrap();

    assert_eq!(dst.last_update_time().unwrap(), 30);
    let req = FetchRequest::new(ConsolidationFunction::Average, 0, 30).unwrap();
    let data = dst.fetch(&req).unwrap();
    assert_eq!(*data.column("a").unwrap().last().unwrap(), 30.0);
}

#[test]
fn copy_state_to_only_touches_sources_present_on_both_sides() {
    let src_def = RrdDef::from_path("mem://copy-src-extra", 0, 10)
        .data_source(DsDef::new("a", DsType::Gauge, 600, f64::NAN, f64::NAN).unwrap())
        .data_source(DsDef::new("b", DsType::Gauge, 600, f64::NAN, f64::NAN).unwrap())
        .archive(ArchiveDef::new(ConsolidationFunction::Average, 0.5, 1, 5).unwrap())
        .build()
        .unwrap();
    let src = Database::create_in_memory(src_def).unwrap();
    src.create_sample(10).set("a", 1.0).unwrap().set("b", 2.0).unwrap().update().unwrap();

    let dst_def = RrdDef::from_path("mem://copy-dst-subset", 0, 10)
        .data_source(DsDef::new("a", DsType::Gauge, 600, f64::NAN, f64::NAN).unwrap())
        .archive(ArchiveDef::new(ConsolidationFunction::Average, 0.5, 1, 5).unwrap())
        .build()
        .unwrap();
    let dst = Database::create_in_memory(dst_def).unwrap();

    src.copy_state_to(&dst).unwrap();
    assert_eq!(dst.data_source_names().unwrap(), vec!["a".to_string()]);
}
