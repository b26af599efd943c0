//! The bounded, path-keyed database pool (§4.12) exercised against real file-backed
//! databases, beyond the in-module unit tests in `src/pool.rs`.

use rrd_engine::{ArchiveDef, ConsolidationFunction, DsDef, DsType, Pool, PoolConfig, RrdDef};
use temp_dir::TempDir;

fn def(dir: &TempDir, name: &str) -> RrdDef {
    RrdDef::from_path(dir.path().join(name), 0, 10)
        .data_source(DsDef::new("x", DsType::Gauge, 600, f64::NAN, f64::NAN).unwrap())
        .archive(ArchiveDef::new(ConsolidationFunction::Average, 0.5, 1, 10).unwrap())
        .build()
        .unwrap()
}

#[test]
fn a_pool_at_capacity_one_is_freed_by_release_before_a_second_database_opens() {
    let dir = TempDir::new().unwrap();
    let pool = Pool::new(PoolConfig::new().capacity(1));

    let a = pool.acquire_new(def(&dir, "a.rrd")).unwrap();
    assert_eq!(pool.len(), 1);
    pool.release(&a).unwrap();
    assert!(pool.is_empty());

    let b = pool.acquire_new(def(&dir, "b.rrd")).unwrap();
    assert_eq!(pool.len(), 1);
    pool.release(&b).unwrap();
    assert!(pool.is_empty());
}

#[test]
fn acquiring_an_unopened_path_opens_it_from_disk() {
    let dir = TempDir::new().unwrap();
    let pool = Pool::new(PoolConfig::new());
    let created = pool.acquire_new(def(&dir, "reopen.rrd")).unwrap();
    created.create_sample(10).set("x", 1.0).unwrap().update().unwrap();
    let path = created.path().to_path_buf();
    pool.release(&created).unwrap();

    let reopened = pool.acquire(&path).unwrap();
    assert_eq!(reopened.last_update_time().unwrap(), 10);
    pool.release(&reopened).unwrap();
}
