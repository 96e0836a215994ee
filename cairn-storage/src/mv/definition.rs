use crate::error::{Error, Result};
use crate::files::{read_file, write_file_atomically, MAT_VIEW_FILE_NAME};
use cairn_datatype::timestamp::parse_period;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Definition of a materialized view, persisted as `_mv` in the view
/// table directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatViewDefinition {
    pub view_name: String,
    pub base_table_name: String,
    /// Query producing view rows. Receives the refreshed timestamp range
    /// as bind variables 0 (inclusive) and 1 (exclusive).
    pub view_sql: String,
    /// Length of one sample-by bucket in microseconds.
    pub sample_by_period: i64,
    /// Epoch micros the buckets are aligned to.
    pub sample_by_origin: i64,
}

impl MatViewDefinition {
    #[inline]
    pub fn new(
        view_name: impl Into<String>,
        base_table_name: impl Into<String>,
        view_sql: impl Into<String>,
        sample_by_period: i64,
        sample_by_origin: i64,
    ) -> Self {
        MatViewDefinition {
            view_name: view_name.into(),
            base_table_name: base_table_name.into(),
            view_sql: view_sql.into(),
            sample_by_period,
            sample_by_origin,
        }
    }

    /// Builds a definition from a sample-by interval such as `1h`,
    /// aligned to the epoch.
    pub fn with_interval(
        view_name: impl Into<String>,
        base_table_name: impl Into<String>,
        view_sql: impl Into<String>,
        interval: &str,
    ) -> Result<Self> {
        let period = parse_period(interval)
            .map_err(|_| Error::sql(0, format!("invalid sample by interval [value={}]", interval)))?;
        Ok(Self::new(view_name, base_table_name, view_sql, period, 0))
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_by_period <= 0 {
            return Err(Error::sql(
                0,
                format!("sample by period must be positive [value={}]", self.sample_by_period),
            ));
        }
        if self.view_sql.trim().is_empty() {
            return Err(Error::sql(0, "materialized view query is empty"));
        }
        if self.view_name.to_lowercase() == self.base_table_name.to_lowercase() {
            return Err(Error::sql(0, "materialized view cannot select from itself"));
        }
        Ok(())
    }

    pub fn load(view_dir: &Path) -> Result<Self> {
        let bytes = read_file(&view_dir.join(MAT_VIEW_FILE_NAME))?;
        let (def, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
        Ok(def)
    }

    pub fn store(&self, view_dir: &Path) -> Result<()> {
        let bytes = bincode::serde::encode_to_vec(self, bincode::config::standard())?;
        write_file_atomically(view_dir, MAT_VIEW_FILE_NAME, &bytes)
    }
}
