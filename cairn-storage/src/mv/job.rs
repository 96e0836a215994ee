use super::copier::RecordToRowCopier;
use super::query::{ExecutionContext, RecordCursorFactory, SqlCompiler};
use super::range::align_to_buckets;
use super::state::MatViewRefreshState;
use crate::cancel::Cancellation;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::files::TXN_LOG_FILE_NAME;
use crate::seq::TxnLog;
use crate::table::{TableToken, TableWriter};
use cairn_datatype::timestamp::{MAX_TIMESTAMP, MIN_TIMESTAMP};
use cairn_datatype::Value;
use flume::{RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Incrementally refreshes materialized views from the sequencer log of
/// their base tables.
pub struct MatViewRefreshJob {
    engine: Arc<Engine>,
    compiler: Arc<dyn SqlCompiler>,
    cancellation: Cancellation,
}

impl MatViewRefreshJob {
    #[inline]
    pub fn new(engine: Arc<Engine>, compiler: Arc<dyn SqlCompiler>) -> Self {
        MatViewRefreshJob {
            engine,
            compiler,
            cancellation: Cancellation::new(),
        }
    }

    #[inline]
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    #[inline]
    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    /// Refreshes every view behind its base table. Returns whether any
    /// view changed. Failure of one view is logged and recorded on its
    /// state, the pass goes on with the others.
    pub fn run_one_pass(&self) -> Result<bool> {
        let graph = self.engine.mat_view_graph();
        let mut refreshed = false;
        for base_name in graph.base_tables() {
            self.cancellation.check()?;
            let views = graph.dependent_views(&base_name);
            let base = match self.engine.verify_table_name(&base_name) {
                Ok(token) => token,
                Err(e) => {
                    error!(base = %base_name, views = views.len(), error = %e, "base table not found, skipping materialized views");
                    continue;
                }
            };
            if !base.is_wal() {
                error!(base = %base, views = views.len(), "base table is not WAL enabled, skipping materialized views");
                continue;
            }
            let writer_txn = match self.engine.txn_tracker(&base_name) {
                Ok(tracker) => tracker.writer_txn(),
                Err(e) => {
                    error!(base = %base, error = %e, "base table dropped, skipping materialized views");
                    continue;
                }
            };
            for state in views {
                let view_txn = match self.engine.txn_tracker(state.view_name()) {
                    Ok(tracker) => tracker.last_refresh_base_txn(),
                    Err(e) => {
                        error!(view = %state.view_name(), error = %e, "materialized view table not found");
                        continue;
                    }
                };
                if view_txn >= 0 && view_txn as u64 >= writer_txn {
                    continue;
                }
                match self.refresh_view(&base, &state) {
                    Ok(changed) => refreshed |= changed,
                    Err(Error::Cancelled) => return Err(Error::Cancelled),
                    Err(e) => {
                        error!(view = %state.view_name(), base = %base, error = %e, "materialized view refresh failed");
                        state.set_error(e.to_string());
                    }
                }
            }
        }
        Ok(refreshed)
    }

    /// Brings one view up to the committed state of its base table. The
    /// view is committed once, after the whole result set is copied.
    pub fn refresh_view(&self, base: &TableToken, state: &MatViewRefreshState) -> Result<bool> {
        let view_name = state.view_name();
        let mut guard = match state.try_begin_refresh() {
            Some(guard) => guard,
            None => {
                debug!(view = %view_name, "refresh already running, skipping");
                return Ok(false);
            }
        };
        let last = self.engine.last_refresh_base_txn(view_name)?;
        let view_tracker = self.engine.txn_tracker(view_name)?;
        if view_tracker.is_memory_pressure() {
            debug!(view = %view_name, "refresh deferred by memory pressure");
            return Ok(false);
        }
        let reader = match self.engine.reader(&base.table_name) {
            Ok(reader) => reader,
            Err(e) if matches!(e, Error::TableNotFound(_)) || e.is_file_not_found() => {
                info!(view = %view_name, base = %base, "base table dropped, skipping refresh");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        // _txn is published before its log entry, stop at the last logged txn
        let mut log = match TxnLog::open_ro(&self.engine.table_dir(base).join(TXN_LOG_FILE_NAME)) {
            Ok(log) => log,
            Err(e) if e.is_file_not_found() => {
                info!(view = %view_name, base = %base, "base table dropped, skipping refresh");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        let to_txn = reader.seq_txn().min(log.max_seq_txn());
        drop(reader);
        if last >= 0 && last as u64 >= to_txn {
            debug!(view = %view_name, base_txn = to_txn, "materialized view is up to date");
            return Ok(false);
        }

        let def = state.definition();
        let range = if last <= 0 {
            Some((MIN_TIMESTAMP, MAX_TIMESTAMP))
        } else {
            log.timestamp_range(last as u64, to_txn)?.and_then(|(min, max)| {
                align_to_buckets(min, max, def.sample_by_period, def.sample_by_origin)
            })
        };
        let (from_ts, to_ts) = match range {
            Some(range) => range,
            None => {
                debug!(view = %view_name, from_txn = last, to_txn, "no rows in txn range");
                self.engine.set_last_refresh_base_txn(view_name, to_txn as i64)?;
                return Ok(true);
            }
        };

        let mut ctx = ExecutionContext::new(&self.engine, self.cancellation.clone());
        if guard.factory().is_none() {
            match self.compiler.compile(&def.view_sql, &ctx) {
                Ok(query) => guard.set_factory(query.into_factory()),
                Err(Error::Sql { position, msg }) => {
                    return Err(Error::sql(
                        position,
                        format!("could not compile materialized view query: {}", msg),
                    ));
                }
                Err(e) => return Err(e),
            }
        }
        let mut writer = self.engine.writer(view_name)?;
        let structure_version = writer.metadata().structure_version;
        if guard
            .copier()
            .map_or(true, |c| c.structure_version() != structure_version)
        {
            let factory = guard
                .factory()
                .ok_or_else(|| Error::InvalidArgument("refresh plan is missing".into()))?;
            let copier = RecordToRowCopier::new(factory.metadata(), writer.metadata())?;
            guard.set_copier(copier);
        }
        let (factory, copier) = match (guard.factory(), guard.copier()) {
            (Some(factory), Some(copier)) => (factory, copier),
            _ => return Err(Error::InvalidArgument("refresh plan is missing".into())),
        };
        ctx.bind_variables_mut().set(0, Value::Timestamp(from_ts));
        ctx.bind_variables_mut().set(1, Value::Timestamp(to_ts));
        let rows = match copy_rows(factory, copier, &ctx, &mut writer) {
            Ok(rows) => rows,
            Err(e) => {
                writer.rollback();
                if matches!(e, Error::InsufficientMemory(_)) {
                    let config = self.engine.config();
                    view_tracker.on_memory_pressure(
                        Duration::from_millis(config.mat_view_memory_backoff_ms),
                        Duration::from_millis(config.mat_view_max_memory_backoff_ms),
                    );
                    warn!(view = %view_name, error = %e, "memory pressure, backing off refresh");
                }
                return Err(e);
            }
        };
        writer.commit()?;
        drop(writer);
        self.engine.set_last_refresh_base_txn(view_name, to_txn as i64)?;
        view_tracker.reset_memory_pressure();
        state.clear_error();
        info!(
            view = %view_name,
            base = %base,
            from_txn = last,
            to_txn,
            from_ts,
            to_ts,
            rows,
            "materialized view refreshed"
        );
        Ok(true)
    }
}

fn copy_rows(
    factory: &dyn RecordCursorFactory,
    copier: &RecordToRowCopier,
    ctx: &ExecutionContext<'_>,
    writer: &mut TableWriter,
) -> Result<usize> {
    let mut cursor = factory.cursor(ctx)?;
    let mut rows = 0;
    while let Some(record) = cursor.next()? {
        ctx.cancellation().check()?;
        copier.copy(&record, writer)?;
        rows += 1;
    }
    Ok(rows)
}

/// Background thread running refresh passes one at a time, on a fixed
/// interval or when a WAL table commits.
pub struct MatViewRefreshWorker {
    cancellation: Cancellation,
    wakeup: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl MatViewRefreshWorker {
    pub fn start(job: MatViewRefreshJob, interval: Duration) -> Result<Self> {
        // commits coalesce into one pending wakeup
        let (tx, rx) = flume::bounded(1);
        job.engine.set_refresh_notifier(tx.clone());
        let cancellation = job.cancellation.clone();
        let handle = thread::Builder::new()
            .name("mat-view-refresh".into())
            .spawn(move || {
                debug!("materialized view refresh worker started");
                loop {
                    match rx.recv_timeout(interval) {
                        Ok(()) | Err(RecvTimeoutError::Timeout) => (),
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                    if job.cancellation.is_cancelled() {
                        break;
                    }
                    match job.run_one_pass() {
                        Ok(_) => (),
                        Err(Error::Cancelled) => break,
                        Err(e) => error!(error = %e, "materialized view refresh pass failed"),
                    }
                }
                debug!("materialized view refresh worker stopped");
            })?;
        Ok(MatViewRefreshWorker {
            cancellation,
            wakeup: tx,
            handle: Some(handle),
        })
    }

    /// Requests a pass without waiting for the interval.
    #[inline]
    pub fn wake(&self) {
        let _ = self.wakeup.try_send(());
    }

    /// Stops the worker, aborting a running refresh before its commit.
    #[inline]
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.cancellation.cancel();
            let _ = self.wakeup.try_send(());
            if handle.join().is_err() {
                error!("materialized view refresh worker panicked");
            }
        }
    }
}

impl Drop for MatViewRefreshWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
