//! Materialized views and their incremental refresh.
pub mod copier;
pub mod definition;
pub mod graph;
pub mod job;
pub mod query;
pub mod range;
pub mod state;

pub use copier::RecordToRowCopier;
pub use definition::MatViewDefinition;
pub use graph::MatViewGraph;
pub use job::{MatViewRefreshJob, MatViewRefreshWorker};
pub use query::{
    BindVariables, CompiledQuery, ExecutionContext, RecordCursor, RecordCursorFactory,
    RecordMetadata, SqlCompiler,
};
pub use range::align_to_buckets;
pub use state::{MatViewRefreshState, RefreshGuard};
