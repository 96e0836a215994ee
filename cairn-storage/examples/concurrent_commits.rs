//! Concurrent commits and snapshot reads.
//! One writer commits batches to a WAL table while reader threads keep
//! reloading the transaction file. Measures commit throughput and how
//! many distinct snapshots readers observed.
use cairn_datatype::timestamp::MICROS_PER_SECOND;
use cairn_datatype::{ColumnType, Value};
use cairn_storage::prelude::*;
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

fn main() {
    let args = Args::parse();
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(Engine::open(EngineConfig::new(dir.path())).unwrap());
    engine
        .create_table(
            &TableStructure::new("ticks", PartitionBy::Hour)
                .symbol("sym", SymbolOptions::default())
                .column("price", ColumnType::Double)
                .timestamp("ts")
                .wal(true),
        )
        .unwrap();
    let stop = Arc::new(AtomicBool::new(false));
    let mut handles = vec![];
    for _ in 0..args.readers {
        let engine = Arc::clone(&engine);
        let stop = Arc::clone(&stop);
        handles.push(std::thread::spawn(move || reader(&engine, &stop)));
    }

    let start = Instant::now();
    let mut w = engine.writer("ticks").unwrap();
    let mut ts = 0;
    for _ in 0..args.count {
        for i in 0..args.rows {
            let mut row = w.new_row(ts).unwrap();
            row.put(0, Value::Str(format!("s{}", i % 16))).unwrap();
            row.put(1, Value::Double(i as f64)).unwrap();
            row.append().unwrap();
            ts += MICROS_PER_SECOND;
        }
        w.commit().unwrap();
    }
    let dur = start.elapsed();
    stop.store(true, Ordering::SeqCst);
    let snapshots: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    println!(
        "{} commits of {} rows cost {} microseconds, avg {:.0} commits/s, readers observed {} snapshots",
        args.count,
        args.rows,
        dur.as_micros(),
        args.count as f64 * 1_000_000_000f64 / dur.as_nanos() as f64,
        snapshots
    );
}

#[inline]
fn reader(engine: &Engine, stop: &AtomicBool) -> u64 {
    let mut reader = engine.reader("ticks").unwrap();
    let mut count = 0;
    while !stop.load(Ordering::Relaxed) {
        if reader.reload().unwrap() {
            count += 1;
        }
    }
    count
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// number of reader threads
    #[arg(short, long, default_value = "2")]
    readers: usize,

    /// number of commits
    #[arg(short, long, default_value = "1000")]
    count: usize,

    /// rows per commit
    #[arg(long, default_value = "100")]
    rows: usize,
}
