#![allow(dead_code)]

use cairn_datatype::timestamp::{parse_timestamp, MICROS_PER_HOUR};
use cairn_datatype::{ColumnType, Value};
use cairn_storage::prelude::*;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Flags steering behavior of the test compiler.
#[derive(Default)]
pub struct CompilerFlags {
    pub compiles: AtomicUsize,
    pub fail_compile: AtomicBool,
    pub fail_memory: AtomicBool,
    /// When non-zero, cursors fail with insufficient memory after
    /// yielding this many rows.
    pub fail_after_rows: AtomicUsize,
}

/// Compiles any query into `select sym, last(price) price, ts from
/// {base} sample by {period}` over columns sym, price and ts of the
/// base table.
pub struct SampleByLastCompiler {
    base: String,
    period: i64,
    pub flags: Arc<CompilerFlags>,
}

impl SampleByLastCompiler {
    pub fn new(base: &str, period: i64) -> Self {
        SampleByLastCompiler {
            base: base.to_string(),
            period,
            flags: Arc::new(CompilerFlags::default()),
        }
    }
}

impl SqlCompiler for SampleByLastCompiler {
    fn compile(&self, sql: &str, _ctx: &ExecutionContext<'_>) -> Result<CompiledQuery> {
        if self.flags.fail_compile.load(Ordering::SeqCst) {
            return Err(Error::sql(7, format!("unexpected token [sql={}]", sql)));
        }
        self.flags.compiles.fetch_add(1, Ordering::SeqCst);
        let metadata = RecordMetadata::new(
            vec![
                ("sym".into(), ColumnType::Symbol),
                ("price".into(), ColumnType::Double),
                ("ts".into(), ColumnType::Timestamp),
            ],
            Some(2),
        );
        Ok(CompiledQuery::new(Box::new(SampleByLastFactory {
            base: self.base.clone(),
            period: self.period,
            metadata,
            flags: Arc::clone(&self.flags),
        })))
    }
}

struct SampleByLastFactory {
    base: String,
    period: i64,
    metadata: RecordMetadata,
    flags: Arc<CompilerFlags>,
}

impl RecordCursorFactory for SampleByLastFactory {
    fn metadata(&self) -> &RecordMetadata {
        &self.metadata
    }

    fn cursor<'a>(&'a self, ctx: &'a ExecutionContext<'_>) -> Result<Box<dyn RecordCursor + 'a>> {
        if self.flags.fail_memory.load(Ordering::SeqCst) {
            return Err(Error::InsufficientMemory(1 << 30));
        }
        let bind = ctx.bind_variables();
        let lo = bind.get(0).as_timestamp().unwrap_or(i64::MIN);
        let hi = bind.get(1).as_timestamp().unwrap_or(i64::MAX);
        let mut reader = ctx.engine().reader(&self.base)?;
        let rows = reader.records_between(lo, hi, ctx.cancellation())?;
        // (bucket, sym) -> last price, rows arrive in timestamp order
        let mut buckets: BTreeMap<(i64, String), Value> = BTreeMap::new();
        for r in rows {
            let ts = match r.get(2).as_timestamp() {
                Some(ts) => ts,
                None => continue,
            };
            let bucket = ts.div_euclid(self.period) * self.period;
            buckets.insert((bucket, r.get(0).to_string()), r.get(1).clone());
        }
        let rows: Vec<Record> = buckets
            .into_iter()
            .map(|((bucket, sym), price)| {
                Record::new(vec![Value::Str(sym), price, Value::Timestamp(bucket)])
            })
            .collect();
        Ok(Box::new(VecCursor {
            rows: rows.into_iter(),
            fail_after: self.flags.fail_after_rows.load(Ordering::SeqCst),
            yielded: 0,
        }))
    }
}

struct VecCursor {
    rows: std::vec::IntoIter<Record>,
    fail_after: usize,
    yielded: usize,
}

impl RecordCursor for VecCursor {
    fn next(&mut self) -> Result<Option<Record>> {
        if self.fail_after > 0 && self.yielded == self.fail_after {
            return Err(Error::InsufficientMemory(1 << 30));
        }
        self.yielded += 1;
        Ok(self.rows.next())
    }
}

pub const PRICE_1H_SQL: &str =
    "select sym, last(price) as price, ts from base_price sample by 1h";

pub fn create_base_price(engine: &Engine, wal: bool) -> TableToken {
    engine
        .create_table(
            &TableStructure::new("base_price", PartitionBy::Day)
                .symbol("sym", SymbolOptions::default())
                .column("price", ColumnType::Double)
                .timestamp("ts")
                .wal(wal),
        )
        .unwrap()
}

pub fn price_1h_structure() -> TableStructure {
    TableStructure::new("price_1h", PartitionBy::Week)
        .symbol("sym", SymbolOptions::default())
        .column("price", ColumnType::Double)
        .timestamp("ts")
        .wal(true)
        .dedup_keys(&["sym", "ts"])
}

pub fn create_price_1h(engine: &Engine) -> TableToken {
    create_price_1h_from(engine, price_1h_structure())
}

pub fn create_price_1h_from(engine: &Engine, structure: TableStructure) -> TableToken {
    let token = engine.create_table(&structure).unwrap();
    engine
        .create_mat_view(MatViewDefinition::new(
            "price_1h",
            "base_price",
            PRICE_1H_SQL,
            MICROS_PER_HOUR,
            0,
        ))
        .unwrap();
    token
}

pub fn insert_prices(engine: &Engine, rows: &[(&str, f64, &str)]) {
    let mut w = engine.writer("base_price").unwrap();
    for (sym, price, ts) in rows {
        let mut row = w.new_row(parse_timestamp(ts).unwrap()).unwrap();
        row.put(0, Value::Str(sym.to_string())).unwrap();
        row.put(1, Value::Double(*price)).unwrap();
        row.append().unwrap();
    }
    w.commit().unwrap();
}

/// Renders a table as tab separated text with a header line.
pub fn dump_table(engine: &Engine, name: &str) -> String {
    let mut reader = engine.reader(name).unwrap();
    let mut res: String = reader
        .metadata()
        .live_columns()
        .map(|(_, c)| c.name.clone())
        .collect::<Vec<_>>()
        .join("\t");
    res.push('\n');
    for r in reader.records().unwrap() {
        let line: Vec<String> = r.values().iter().map(|v| v.to_string()).collect();
        res.push_str(&line.join("\t"));
        res.push('\n');
    }
    res
}
