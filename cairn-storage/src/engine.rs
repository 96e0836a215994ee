use crate::conf::EngineConfig;
use crate::error::{Error, Result};
use crate::files::{
    is_valid_table_name, read_table_name_file, table_dir_name, TableLock, MAT_VIEW_FILE_NAME,
    META_FILE_NAME, TXN_FILE_NAME,
};
use crate::meta::{load_meta_file, TableStructure};
use crate::mv::{MatViewDefinition, MatViewGraph};
use crate::seq::{MatViewDurableState, SeqTxnTracker};
use crate::table::{create_table_dir, TableReader, TableToken, TableWriter};
use crate::txn::TxReader;
use flume::Sender;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

#[derive(Clone)]
struct TableEntry {
    token: TableToken,
    tracker: Arc<SeqTxnTracker>,
}

/// Engine owns the table registry of one root directory and the
/// materialized view graph.
pub struct Engine {
    config: EngineConfig,
    /// Tables by lowercase name.
    tables: RwLock<HashMap<String, TableEntry>>,
    next_table_id: AtomicI32,
    graph: MatViewGraph,
    notifier: RwLock<Option<Sender<()>>>,
}

impl Engine {
    /// Opens engine on `config.root`, registering every table directory
    /// found there and reloading view definitions.
    pub fn open(config: EngineConfig) -> Result<Self> {
        fs::create_dir_all(&config.root)?;
        let mut tables = HashMap::new();
        let mut views = vec![];
        let mut max_table_id = 0;
        for entry in fs::read_dir(&config.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let dir = entry.path();
            if !dir.join(META_FILE_NAME).exists() {
                debug!(dir = %dir.display(), "skip directory without metadata");
                continue;
            }
            let table_name = match read_table_name_file(&dir) {
                Ok(name) => name,
                Err(e) if e.is_file_not_found() => {
                    debug!(dir = %dir.display(), "skip directory without table name");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let meta = load_meta_file(&dir, config.spin_lock_timeout())?;
            let mut tx = TxReader::open(&dir.join(TXN_FILE_NAME))?;
            let rec = tx.read_snapshot(config.spin_lock_timeout())?;
            let writer_txn = if meta.wal_enabled { rec.seq_txn } else { rec.txn };
            if dir.join(MAT_VIEW_FILE_NAME).exists() {
                views.push(MatViewDefinition::load(&dir)?);
            }
            max_table_id = max_table_id.max(meta.table_id);
            let token = TableToken {
                table_name: table_name.clone(),
                dir_name: entry.file_name().to_string_lossy().into_owned(),
                table_id: meta.table_id,
                wal: meta.wal_enabled,
            };
            debug!(table = %token, writer_txn, "table registered");
            tables.insert(
                table_name.to_lowercase(),
                TableEntry {
                    token,
                    tracker: Arc::new(SeqTxnTracker::new(writer_txn)),
                },
            );
        }
        let graph = MatViewGraph::default();
        for def in views {
            if !tables.contains_key(&def.base_table_name.to_lowercase()) {
                warn!(
                    view = %def.view_name,
                    base = %def.base_table_name,
                    "base table of materialized view does not exist"
                );
            }
            graph.add_view(def)?;
        }
        info!(
            root = %config.root.display(),
            tables = tables.len(),
            views = graph.len(),
            "engine opened"
        );
        Ok(Engine {
            config,
            tables: RwLock::new(tables),
            next_table_id: AtomicI32::new(max_table_id + 1),
            graph,
            notifier: RwLock::new(None),
        })
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    pub fn mat_view_graph(&self) -> &MatViewGraph {
        &self.graph
    }

    #[inline]
    pub fn table_dir(&self, token: &TableToken) -> PathBuf {
        self.config.root.join(&token.dir_name)
    }

    pub fn create_table(&self, structure: &TableStructure) -> Result<TableToken> {
        let name = &structure.name;
        if !is_valid_table_name(name, self.config.file_name_limit) {
            return Err(Error::sql(0, format!("invalid table name [name={}]", name)));
        }
        let mut tables = self.tables.write();
        if tables.contains_key(&name.to_lowercase()) {
            return Err(Error::TableAlreadyExists(name.clone()));
        }
        let table_id = self.next_table_id.fetch_add(1, Ordering::AcqRel);
        let meta = structure.to_metadata(
            table_id,
            self.config.file_name_limit,
            self.config.default_max_uncommitted_rows,
            self.config.default_o3_max_lag,
        )?;
        let token = TableToken {
            table_name: name.clone(),
            dir_name: table_dir_name(name, table_id, structure.wal),
            table_id,
            wal: structure.wal,
        };
        let dir = self.table_dir(&token);
        if dir.exists() {
            return Err(Error::TableAlreadyExists(name.clone()));
        }
        if let Err(e) = create_table_dir(&dir, name, &meta) {
            if let Err(cleanup) = fs::remove_dir_all(&dir) {
                warn!(dir = %dir.display(), error = %cleanup, "failed to clean up table directory");
            }
            return Err(e);
        }
        info!(table = %token, wal = token.wal, "table created");
        tables.insert(
            name.to_lowercase(),
            TableEntry {
                token: token.clone(),
                tracker: Arc::new(SeqTxnTracker::default()),
            },
        );
        Ok(token)
    }

    /// Drops table and its files. Fails with `TableLocked` while a writer
    /// is open. Dropping a view also removes it from the view graph.
    pub fn drop_table(&self, name: &str) -> Result<()> {
        let entry = self.entry(name)?;
        let dir = self.table_dir(&entry.token);
        let lock = TableLock::acquire(&dir)?;
        self.tables.write().remove(&name.to_lowercase());
        if self.graph.remove_view(name).is_some() {
            debug!(view = %entry.token, "materialized view unregistered");
        }
        fs::remove_dir_all(&dir)?;
        drop(lock);
        info!(table = %entry.token, "table dropped");
        Ok(())
    }

    #[inline]
    fn entry(&self, name: &str) -> Result<TableEntry> {
        self.tables
            .read()
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    #[inline]
    pub fn table_token(&self, name: &str) -> Result<TableToken> {
        self.entry(name).map(|e| e.token)
    }

    /// Resolves name to token, checking that the table directory is
    /// still present.
    pub fn verify_table_name(&self, name: &str) -> Result<TableToken> {
        if !is_valid_table_name(name, self.config.file_name_limit) {
            return Err(Error::sql(0, format!("invalid table name [name={}]", name)));
        }
        let token = self.table_token(name)?;
        if !self.table_dir(&token).join(META_FILE_NAME).exists() {
            return Err(Error::TableNotFound(name.to_string()));
        }
        Ok(token)
    }

    pub fn table_tokens(&self) -> Vec<TableToken> {
        let mut res: Vec<TableToken> = self
            .tables
            .read()
            .values()
            .map(|e| e.token.clone())
            .collect();
        res.sort_by_key(|t| t.table_id);
        res
    }

    pub fn reader(&self, name: &str) -> Result<TableReader> {
        let token = self.table_token(name)?;
        let dir = self.table_dir(&token);
        TableReader::open(&dir, token, self.config.spin_lock_timeout())
    }

    pub fn writer(&self, name: &str) -> Result<TableWriter> {
        let entry = self.entry(name)?;
        let dir = self.table_dir(&entry.token);
        let notifier = self.notifier.read().clone();
        TableWriter::open(&dir, entry.token, &self.config, entry.tracker, notifier)
    }

    #[inline]
    pub fn txn_tracker(&self, name: &str) -> Result<Arc<SeqTxnTracker>> {
        self.entry(name).map(|e| e.tracker)
    }

    /// Last base table txn reflected in the view. Loaded from the view
    /// directory on first access, 0 if the view was never refreshed.
    pub fn last_refresh_base_txn(&self, view_name: &str) -> Result<i64> {
        let entry = self.entry(view_name)?;
        let txn = entry.tracker.last_refresh_base_txn();
        if txn >= 0 {
            return Ok(txn);
        }
        let state = MatViewDurableState::load(&self.table_dir(&entry.token))?;
        Ok(entry
            .tracker
            .init_last_refresh_base_txn(state.last_refresh_base_txn.max(0)))
    }

    /// Persists the view high-water mark, then publishes it in memory.
    pub fn set_last_refresh_base_txn(&self, view_name: &str, txn: i64) -> Result<()> {
        let entry = self.entry(view_name)?;
        let state = MatViewDurableState {
            last_refresh_base_txn: txn,
            last_refresh_micros: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_micros() as i64),
            ..Default::default()
        };
        state.store(&self.table_dir(&entry.token))?;
        entry.tracker.set_last_refresh_base_txn(txn);
        Ok(())
    }

    /// Registers a view over an existing table. The view table must be
    /// created beforehand.
    pub fn create_mat_view(&self, definition: MatViewDefinition) -> Result<()> {
        definition.validate()?;
        let view = self.verify_table_name(&definition.view_name)?;
        let base = self.verify_table_name(&definition.base_table_name)?;
        if self.graph.view_state(&definition.view_name).is_some() {
            return Err(Error::TableAlreadyExists(definition.view_name));
        }
        if !base.is_wal() {
            warn!(
                view = %view,
                base = %base,
                "base table is not WAL enabled, view will not be refreshed"
            );
        }
        definition.store(&self.table_dir(&view))?;
        self.graph.add_view(definition)?;
        info!(view = %view, base = %base, "materialized view created");
        Ok(())
    }

    /// Sets channel woken by commits of WAL tables. Applies to writers
    /// opened afterwards.
    #[inline]
    pub fn set_refresh_notifier(&self, notifier: Sender<()>) {
        *self.notifier.write() = Some(notifier);
    }
}
