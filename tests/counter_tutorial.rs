//! Scenario 1 from spec §8: the canonical COUNTER tutorial walkthrough.

use pretty_assertions::assert_eq;
use rrd_engine::{ArchiveDef, ConsolidationFunction, Database, DsDef, DsType, FetchRequest, RrdDef};

#[test]
fn counter_tutorial_average_archive() {
    let def = RrdDef::from_path("mem://counter-tutorial", 920804400, 300)
        .data_source(DsDef::new("speed", DsType::Counter, 600, f64::NAN, f64::NAN).unwrap())
        .archive(ArchiveDef::new(ConsolidationFunction::Average, 0.5, 1, 24).unwrap())
        .build()
        .unwrap();
    let db = Database::create_in_memory(def).unwrap();

    let samples = [
        (920804700, 12345.0),
        (920805000, 12357.0),
        (920805300, 12363.0),
        (920805600, 12363.0),
        (920805900, 12363.0),
        (920806200, 12373.0),
        (920806500, 12383.0),
        (920806800, 12393.0),
        (920807100, 12399.0),
        (920807400, 12405.0),
        (920807700, 12411.0),
        (920808000, 12415.0),
        (920808300, 12420.0),
        (920808600, 12422.0),
        (920808900, 12423.0),
    ];
    for (t, v) in samples {
        db.create_sample(t).set("speed", v).unwrap().update().unwrap();
    }

    let req = FetchRequest::new(ConsolidationFunction::Average, 920804400, 920809200).unwrap();
    let data = db.fetch(&req).unwrap();

    let expected_timestamps: Vec<i64> = (0..17).map(|i| 920804400 + i * 300).collect();
    assert_eq!(data.timestamps(), expected_timestamps);

    let expected = [
        f64::NAN,
        f64::NAN,
        0.04,
        0.02,
        0.00,
        0.00,
        1.0 / 30.0,
        1.0 / 30.0,
        1.0 / 30.0,
        0.02,
        0.02,
        0.02,
        0.013333333333333,
        0.016666666666667,
        0.006666666666667,
        0.003333333333333,
        f64::NAN,
    ];

    let col = data.column("speed").unwrap();
    assert_eq!(col.len(), expected.len());
    for (got, want) in col.iter().zip(expected.iter()) {
        if want.is_nan() {
            assert!(got.is_nan());
        } else {
            assert!((got - want).abs() < 1e-9, "got {got}, want {want}");
        }
    }
}

#[test]
fn last_update_time_tracks_the_most_recent_timestamp() {
    let def = RrdDef::from_path("mem://counter-monotonic", 0, 10)
        .data_source(DsDef::new("x", DsType::Gauge, 100, f64::NAN, f64::NAN).unwrap())
        .archive(ArchiveDef::new(ConsolidationFunction::Average, 0.5, 1, 10).unwrap())
        .build()
        .unwrap();
    let db = Database::create_in_memory(def).unwrap();

    for t in [10, 20, 35, 100] {
        db.create_sample(t).set("x", 1.0).unwrap().update().unwrap();
        assert_eq!(db.last_update_time().unwrap(), t);
    }

    let err = db.create_sample(50).set("x", 1.0).unwrap().update();
    assert!(err.is_err(), "a non-increasing timestamp must be rejected");
}
