pub mod cancel;
pub mod conf;
pub mod engine;
pub mod error;
pub mod files;
pub mod mem;
pub mod meta;
pub mod mv;
pub mod partition;
pub mod seq;
pub mod table;
pub mod txn;

pub mod prelude {
    pub use crate::cancel::Cancellation;
    pub use crate::conf::EngineConfig;
    pub use crate::engine::Engine;
    pub use crate::error::*;
    pub use crate::meta::{SymbolOptions, TableMetadata, TableStructure};
    pub use crate::mv::*;
    pub use crate::partition::PartitionBy;
    pub use crate::table::*;
}
