//! Seam between refresh and the SQL layer.
//!
//! The storage core does not parse SQL. Hosts plug in a `SqlCompiler`
//! that turns view queries into cursor factories.
use crate::cancel::Cancellation;
use crate::engine::Engine;
use crate::error::Result;
use crate::meta::column_name_eq;
use crate::table::Record;
use cairn_datatype::{ColumnType, Value};

/// Column layout of a query result.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecordMetadata {
    columns: Vec<(String, ColumnType)>,
    timestamp_index: Option<usize>,
}

impl RecordMetadata {
    #[inline]
    pub fn new(columns: Vec<(String, ColumnType)>, timestamp_index: Option<usize>) -> Self {
        RecordMetadata {
            columns,
            timestamp_index,
        }
    }

    #[inline]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    #[inline]
    pub fn column_name(&self, idx: usize) -> &str {
        &self.columns[idx].0
    }

    #[inline]
    pub fn column_type(&self, idx: usize) -> ColumnType {
        self.columns[idx].1
    }

    /// Case-insensitive lookup.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|(n, _)| column_name_eq(n, name))
    }

    #[inline]
    pub fn timestamp_index(&self) -> Option<usize> {
        self.timestamp_index
    }
}

/// Positional bind variables, unset positions read as null.
#[derive(Debug, Clone, Default)]
pub struct BindVariables {
    values: Vec<Value>,
}

static NULL_VALUE: Value = Value::Null;

impl BindVariables {
    pub fn set(&mut self, idx: usize, value: Value) {
        if self.values.len() <= idx {
            self.values.resize(idx + 1, Value::Null);
        }
        self.values[idx] = value;
    }

    #[inline]
    pub fn get(&self, idx: usize) -> &Value {
        self.values.get(idx).unwrap_or(&NULL_VALUE)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Everything a query needs while compiling and running.
pub struct ExecutionContext<'a> {
    engine: &'a Engine,
    bind: BindVariables,
    cancellation: Cancellation,
}

impl<'a> ExecutionContext<'a> {
    #[inline]
    pub fn new(engine: &'a Engine, cancellation: Cancellation) -> Self {
        ExecutionContext {
            engine,
            bind: BindVariables::default(),
            cancellation,
        }
    }

    #[inline]
    pub fn engine(&self) -> &'a Engine {
        self.engine
    }

    #[inline]
    pub fn bind_variables(&self) -> &BindVariables {
        &self.bind
    }

    #[inline]
    pub fn bind_variables_mut(&mut self) -> &mut BindVariables {
        &mut self.bind
    }

    #[inline]
    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }
}

pub trait RecordCursor {
    /// Returns the next row, `None` once exhausted.
    fn next(&mut self) -> Result<Option<Record>>;
}

/// Compiled query, reusable across executions with different bind
/// variables.
pub trait RecordCursorFactory: Send {
    fn metadata(&self) -> &RecordMetadata;

    fn cursor<'a>(&'a self, ctx: &'a ExecutionContext<'_>) -> Result<Box<dyn RecordCursor + 'a>>;
}

pub struct CompiledQuery {
    factory: Box<dyn RecordCursorFactory>,
}

impl CompiledQuery {
    #[inline]
    pub fn new(factory: Box<dyn RecordCursorFactory>) -> Self {
        CompiledQuery { factory }
    }

    #[inline]
    pub fn metadata(&self) -> &RecordMetadata {
        self.factory.metadata()
    }

    #[inline]
    pub fn into_factory(self) -> Box<dyn RecordCursorFactory> {
        self.factory
    }
}

pub trait SqlCompiler: Send + Sync {
    fn compile(&self, sql: &str, ctx: &ExecutionContext<'_>) -> Result<CompiledQuery>;
}
