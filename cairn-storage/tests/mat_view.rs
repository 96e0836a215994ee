mod common;

use cairn_datatype::timestamp::MICROS_PER_HOUR;
use cairn_datatype::ColumnType;
use cairn_storage::files::TXN_LOG_FILE_NAME;
use cairn_storage::prelude::*;
use common::*;
use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn setup(dir: &std::path::Path) -> (Arc<Engine>, Arc<SampleByLastCompiler>, MatViewRefreshJob) {
    let engine = Arc::new(Engine::open(EngineConfig::new(dir)).unwrap());
    let compiler = Arc::new(SampleByLastCompiler::new("base_price", MICROS_PER_HOUR));
    let job = MatViewRefreshJob::new(Arc::clone(&engine), compiler.clone());
    (engine, compiler, job)
}

const FIRST_BATCH: &[(&str, f64, &str)] = &[
    ("gbpusd", 1.320, "2024-09-10T12:01"),
    ("gbpusd", 1.323, "2024-09-10T12:02"),
    ("jpyusd", 103.21, "2024-09-10T12:02"),
    ("gbpusd", 1.321, "2024-09-10T13:02"),
];

const SECOND_BATCH: &[(&str, f64, &str)] = &[
    ("gbpusd", 1.319, "2024-09-10T12:05"),
    ("gbpusd", 1.325, "2024-09-10T13:03"),
];

#[test]
fn test_incremental_refresh() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, compiler, job) = setup(dir.path());
    create_base_price(&engine, true);
    create_price_1h(&engine);
    insert_prices(&engine, FIRST_BATCH);

    assert!(job.run_one_pass().unwrap());
    assert_eq!(
        dump_table(&engine, "price_1h"),
        "sym\tprice\tts\n\
         gbpusd\t1.323\t2024-09-10T12:00:00.000000Z\n\
         jpyusd\t103.21\t2024-09-10T12:00:00.000000Z\n\
         gbpusd\t1.321\t2024-09-10T13:00:00.000000Z\n"
    );
    assert_eq!(engine.last_refresh_base_txn("price_1h").unwrap(), 1);
    // caught up
    assert!(!job.run_one_pass().unwrap());

    insert_prices(&engine, SECOND_BATCH);
    assert!(job.run_one_pass().unwrap());
    assert_eq!(
        dump_table(&engine, "price_1h"),
        "sym\tprice\tts\n\
         gbpusd\t1.319\t2024-09-10T12:00:00.000000Z\n\
         jpyusd\t103.21\t2024-09-10T12:00:00.000000Z\n\
         gbpusd\t1.325\t2024-09-10T13:00:00.000000Z\n"
    );
    assert_eq!(engine.last_refresh_base_txn("price_1h").unwrap(), 2);
    // plan is compiled once and reused
    assert_eq!(compiler.flags.compiles.load(Ordering::SeqCst), 1);
    let state = engine.mat_view_graph().view_state("price_1h").unwrap();
    assert_eq!(state.last_error(), None);
}

#[test]
fn test_refresh_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let (engine, _, job) = setup(dir.path());
        create_base_price(&engine, true);
        create_price_1h(&engine);
        insert_prices(&engine, FIRST_BATCH);
        assert!(job.run_one_pass().unwrap());
    }
    let (engine, compiler, job) = setup(dir.path());
    assert!(!job.run_one_pass().unwrap());
    assert_eq!(compiler.flags.compiles.load(Ordering::SeqCst), 0);

    insert_prices(&engine, SECOND_BATCH);
    assert!(job.run_one_pass().unwrap());
    assert!(dump_table(&engine, "price_1h").contains("gbpusd\t1.325\t2024-09-10T13:00:00.000000Z\n"));
}

#[test]
fn test_dropped_base_table() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _, job) = setup(dir.path());
    let base = create_base_price(&engine, true);
    create_price_1h(&engine);
    insert_prices(&engine, FIRST_BATCH);
    engine.drop_table("base_price").unwrap();

    assert!(!job.run_one_pass().unwrap());
    let state = engine.mat_view_graph().view_state("price_1h").unwrap();
    // dropped between discovery and refresh
    assert!(!job.refresh_view(&base, &state).unwrap());
    assert_eq!(dump_table(&engine, "price_1h"), "sym\tprice\tts\n");
    assert_eq!(engine.last_refresh_base_txn("price_1h").unwrap(), 0);
}

#[test]
fn test_non_wal_base_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, compiler, job) = setup(dir.path());
    create_base_price(&engine, false);
    create_price_1h(&engine);
    insert_prices(&engine, FIRST_BATCH);

    assert!(!job.run_one_pass().unwrap());
    assert_eq!(compiler.flags.compiles.load(Ordering::SeqCst), 0);
    assert_eq!(dump_table(&engine, "price_1h"), "sym\tprice\tts\n");
}

#[test]
fn test_compile_failure_is_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, compiler, job) = setup(dir.path());
    create_base_price(&engine, true);
    create_price_1h(&engine);
    insert_prices(&engine, FIRST_BATCH);

    compiler.flags.fail_compile.store(true, Ordering::SeqCst);
    assert!(!job.run_one_pass().unwrap());
    let state = engine.mat_view_graph().view_state("price_1h").unwrap();
    let err = state.last_error().unwrap();
    assert!(err.contains("could not compile materialized view query"), "{}", err);
    assert!(err.contains("unexpected token"), "{}", err);
    assert_eq!(engine.last_refresh_base_txn("price_1h").unwrap(), 0);

    compiler.flags.fail_compile.store(false, Ordering::SeqCst);
    assert!(job.run_one_pass().unwrap());
    assert_eq!(state.last_error(), None);
    assert_eq!(engine.last_refresh_base_txn("price_1h").unwrap(), 1);
}

#[test]
fn test_memory_pressure_backoff() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::new(dir.path());
    config.mat_view_memory_backoff_ms = 60_000;
    let engine = Arc::new(Engine::open(config).unwrap());
    let compiler = Arc::new(SampleByLastCompiler::new("base_price", MICROS_PER_HOUR));
    let job = MatViewRefreshJob::new(Arc::clone(&engine), compiler.clone());
    let base = create_base_price(&engine, true);
    create_price_1h(&engine);
    insert_prices(&engine, FIRST_BATCH);

    compiler.flags.fail_memory.store(true, Ordering::SeqCst);
    assert!(!job.run_one_pass().unwrap());
    assert!(engine.txn_tracker("price_1h").unwrap().is_memory_pressure());

    // deferred while backing off, even though the query would now succeed
    compiler.flags.fail_memory.store(false, Ordering::SeqCst);
    let state = engine.mat_view_graph().view_state("price_1h").unwrap();
    assert!(!job.refresh_view(&base, &state).unwrap());
    assert_eq!(dump_table(&engine, "price_1h"), "sym\tprice\tts\n");

    engine.txn_tracker("price_1h").unwrap().reset_memory_pressure();
    assert!(job.refresh_view(&base, &state).unwrap());
    assert_eq!(engine.last_refresh_base_txn("price_1h").unwrap(), 1);
}

#[test]
fn test_refresh_stops_at_last_logged_txn() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _, job) = setup(dir.path());
    let base = create_base_price(&engine, true);
    create_price_1h(&engine);
    insert_prices(&engine, FIRST_BATCH);
    assert!(job.run_one_pass().unwrap());
    insert_prices(&engine, &[("gbpusd", 1.5, "2024-09-10T12:59")]);
    insert_prices(&engine, &[("gbpusd", 1.7, "2024-09-10T15:01")]);

    let log_path = engine.table_dir(&base).join(TXN_LOG_FILE_NAME);
    let set_max_seq_txn = |seq_txn: u64| {
        let file = OpenOptions::new().write(true).open(&log_path).unwrap();
        file.write_all_at(&seq_txn.to_le_bytes(), 0).unwrap();
    };
    // txn 3 is in _txn but its log entry is not announced yet
    set_max_seq_txn(2);
    assert!(job.run_one_pass().unwrap());
    assert_eq!(engine.last_refresh_base_txn("price_1h").unwrap(), 2);
    assert_eq!(
        dump_table(&engine, "price_1h"),
        "sym\tprice\tts\n\
         gbpusd\t1.5\t2024-09-10T12:00:00.000000Z\n\
         jpyusd\t103.21\t2024-09-10T12:00:00.000000Z\n\
         gbpusd\t1.321\t2024-09-10T13:00:00.000000Z\n"
    );

    set_max_seq_txn(3);
    assert!(job.run_one_pass().unwrap());
    assert_eq!(engine.last_refresh_base_txn("price_1h").unwrap(), 3);
    assert!(dump_table(&engine, "price_1h").ends_with("gbpusd\t1.7\t2024-09-10T15:00:00.000000Z\n"));
}

#[test]
fn test_failed_refresh_commits_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, compiler, job) = setup(dir.path());
    create_base_price(&engine, true);
    // small threshold, a partial result set would commit on its own
    create_price_1h_from(&engine, price_1h_structure().max_uncommitted_rows(2));
    insert_prices(&engine, FIRST_BATCH);

    compiler.flags.fail_after_rows.store(3, Ordering::SeqCst);
    assert!(!job.run_one_pass().unwrap());
    assert_eq!(dump_table(&engine, "price_1h"), "sym\tprice\tts\n");
    assert_eq!(engine.last_refresh_base_txn("price_1h").unwrap(), 0);
    let state = engine.mat_view_graph().view_state("price_1h").unwrap();
    let err = state.last_error().unwrap();
    assert!(err.contains("insufficient memory"), "{}", err);

    compiler.flags.fail_after_rows.store(0, Ordering::SeqCst);
    engine.txn_tracker("price_1h").unwrap().reset_memory_pressure();
    assert!(job.run_one_pass().unwrap());
    assert_eq!(engine.last_refresh_base_txn("price_1h").unwrap(), 1);
    assert_eq!(engine.reader("price_1h").unwrap().row_count(), 3);
}

#[test]
fn test_txn_without_rows_advances_refresh() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, compiler, job) = setup(dir.path());
    create_base_price(&engine, true);
    create_price_1h(&engine);
    insert_prices(&engine, FIRST_BATCH);
    assert!(job.run_one_pass().unwrap());
    let before = dump_table(&engine, "price_1h");

    // schema change commits a txn carrying no rows
    {
        let mut w = engine.writer("base_price").unwrap();
        w.add_column("venue", ColumnType::Varchar, None).unwrap();
    }
    compiler.flags.fail_compile.store(true, Ordering::SeqCst);
    assert!(job.run_one_pass().unwrap());
    assert_eq!(engine.last_refresh_base_txn("price_1h").unwrap(), 2);
    assert_eq!(dump_table(&engine, "price_1h"), before);
}

#[test]
fn test_cancelled_refresh_leaves_view_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _, job) = setup(dir.path());
    let base = create_base_price(&engine, true);
    create_price_1h(&engine);
    insert_prices(&engine, FIRST_BATCH);

    job.cancellation().cancel();
    assert!(matches!(job.run_one_pass(), Err(Error::Cancelled)));
    let state = engine.mat_view_graph().view_state("price_1h").unwrap();
    assert!(matches!(
        job.refresh_view(&base, &state),
        Err(Error::Cancelled)
    ));
    assert_eq!(dump_table(&engine, "price_1h"), "sym\tprice\tts\n");
    assert_eq!(engine.last_refresh_base_txn("price_1h").unwrap(), 0);
}

#[test]
fn test_worker_refreshes_on_commit() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _, job) = setup(dir.path());
    create_base_price(&engine, true);
    create_price_1h(&engine);
    // long interval, only the commit notification can trigger the pass
    let worker = MatViewRefreshWorker::start(job, Duration::from_secs(3600)).unwrap();
    insert_prices(&engine, FIRST_BATCH);

    let deadline = Instant::now() + Duration::from_secs(10);
    while engine.last_refresh_base_txn("price_1h").unwrap() < 1 {
        assert!(Instant::now() < deadline, "view was not refreshed");
        std::thread::sleep(Duration::from_millis(10));
    }
    worker.stop();
    assert!(dump_table(&engine, "price_1h").contains("jpyusd\t103.21\t2024-09-10T12:00:00.000000Z\n"));
}
