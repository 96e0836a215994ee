mod common;

use cairn_datatype::Value;
use cairn_storage::prelude::*;
use common::*;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

#[test]
fn test_readers_race_commits() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(Engine::open(EngineConfig::new(dir.path())).unwrap());
    create_base_price(&engine, true);
    let stop = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut reader = engine.reader("base_price").unwrap();
                let mut last_txn = 0;
                while !stop.load(Ordering::Acquire) {
                    reader.reload().unwrap();
                    // a purged partition makes the scan reload, so read txn after
                    let rows = reader.records().unwrap();
                    let txn = reader.txn();
                    assert!(txn >= last_txn);
                    last_txn = txn;
                    // each commit adds ten rows
                    assert_eq!(rows.len() as u64, txn * 10);
                    assert_eq!(rows.len() as u64, reader.row_count());
                    let ts: Vec<i64> = rows.iter().filter_map(|r| r.get(2).as_timestamp()).collect();
                    assert!(ts.windows(2).all(|w| w[0] <= w[1]));
                    assert!(rows.iter().all(|r| matches!(r.get(0), Value::Str(_))));
                }
                last_txn
            })
        })
        .collect();

    let mut rng = rand::thread_rng();
    let mut w = engine.writer("base_price").unwrap();
    let base = cairn_datatype::timestamp::parse_timestamp("2024-09-10T00:00").unwrap();
    for _ in 0..50 {
        for _ in 0..10 {
            // out of order timestamps force partition rewrites
            let ts = base + rng.gen_range(0..3 * 86_400_000_000i64);
            let mut row = w.new_row(ts).unwrap();
            row.put(0, Value::Str(format!("s{}", rng.gen_range(0..5)))).unwrap();
            row.put(1, Value::Double(rng.gen())).unwrap();
            row.append().unwrap();
        }
        w.commit().unwrap();
    }
    stop.store(true, Ordering::Release);
    for r in readers {
        assert!(r.join().unwrap() <= 50);
    }
    assert_eq!(engine.reader("base_price").unwrap().row_count(), 500);
    assert_eq!(engine.txn_tracker("base_price").unwrap().writer_txn(), 50);
}

#[test]
fn test_table_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let engine = Engine::open(EngineConfig::new(dir.path())).unwrap();
        create_base_price(&engine, true);
        insert_prices(
            &engine,
            &[
                ("gbpusd", 1.320, "2024-09-10T12:01"),
                ("jpyusd", 103.21, "2024-09-11T12:02"),
            ],
        );
    }
    let engine = Engine::open(EngineConfig::new(dir.path())).unwrap();
    assert_eq!(
        dump_table(&engine, "base_price"),
        "sym\tprice\tts\n\
         gbpusd\t1.32\t2024-09-10T12:01:00.000000Z\n\
         jpyusd\t103.21\t2024-09-11T12:02:00.000000Z\n"
    );
    insert_prices(&engine, &[("eurusd", 1.1, "2024-09-11T13:00")]);
    let reader = engine.reader("base_price").unwrap();
    assert_eq!(reader.row_count(), 3);
    assert_eq!(reader.seq_txn(), 2);
    assert_eq!(reader.snapshot().partitions.len(), 2);
}
