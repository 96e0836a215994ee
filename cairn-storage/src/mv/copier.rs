use super::query::RecordMetadata;
use crate::error::{Error, Result};
use crate::meta::TableMetadata;
use crate::table::{Record, TableWriter};
use cairn_datatype::ColumnType;

/// Copies query result rows into a table, matching columns by name.
///
/// Table columns absent from the result stay null. The designated
/// timestamp of the table must be produced by the query, it routes each
/// row to its partition.
#[derive(Debug, Clone)]
pub struct RecordToRowCopier {
    /// Pairs of (result index, table position).
    columns: Vec<(usize, usize)>,
    timestamp_src: usize,
    structure_version: i64,
}

impl RecordToRowCopier {
    pub fn new(src: &RecordMetadata, dst: &TableMetadata) -> Result<Self> {
        let ts_dst = dst
            .timestamp_index()
            .ok_or_else(|| Error::sql(0, "target table has no designated timestamp"))?;
        let mut columns = Vec::with_capacity(src.column_count());
        let mut timestamp_src = None;
        for idx in 0..src.column_count() {
            let name = src.column_name(idx);
            let pos = dst.column_index(name).ok_or_else(|| {
                Error::sql(0, format!("column does not exist in target table [name={}]", name))
            })?;
            let (from, to) = (src.column_type(idx), dst.columns[pos].ty);
            if !is_assignable(from, to) {
                return Err(Error::sql(
                    0,
                    format!(
                        "inconvertible types [column={}, from={}, to={}]",
                        name,
                        from.name(),
                        to.name()
                    ),
                ));
            }
            if pos == ts_dst {
                timestamp_src = Some(idx);
            } else {
                columns.push((idx, pos));
            }
        }
        let timestamp_src = timestamp_src.ok_or_else(|| {
            Error::sql(
                0,
                format!(
                    "query does not produce designated timestamp [column={}]",
                    dst.columns[ts_dst].name
                ),
            )
        })?;
        Ok(RecordToRowCopier {
            columns,
            timestamp_src,
            structure_version: dst.structure_version,
        })
    }

    /// Structure version of the table the copier was built for.
    #[inline]
    pub fn structure_version(&self) -> i64 {
        self.structure_version
    }

    pub fn copy(&self, record: &Record, writer: &mut TableWriter) -> Result<()> {
        let ts = record
            .get(self.timestamp_src)
            .as_timestamp()
            .ok_or_else(|| Error::InvalidArgument("designated timestamp is null".into()))?;
        let mut row = writer.new_row(ts)?;
        for (src, dst) in &self.columns {
            row.put(*dst, record.get(*src).clone())?;
        }
        row.append_buffered();
        Ok(())
    }
}

#[inline]
fn is_string_like(ty: ColumnType) -> bool {
    matches!(
        ty,
        ColumnType::String | ColumnType::Symbol | ColumnType::Varchar | ColumnType::Char
    )
}

#[inline]
fn is_numeric(ty: ColumnType) -> bool {
    matches!(
        ty,
        ColumnType::Byte
            | ColumnType::Short
            | ColumnType::Int
            | ColumnType::Long
            | ColumnType::Float
            | ColumnType::Double
            | ColumnType::Date
            | ColumnType::Timestamp
    )
}

fn is_assignable(from: ColumnType, to: ColumnType) -> bool {
    from == to
        || (is_string_like(from) && is_string_like(to) && to != ColumnType::Char)
        || (is_numeric(from) && is_numeric(to))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{SymbolOptions, TableStructure};
    use crate::partition::PartitionBy;

    fn view_meta() -> TableMetadata {
        TableStructure::new("price_1h", PartitionBy::Week)
            .symbol("sym", SymbolOptions::default())
            .column("price", ColumnType::Double)
            .timestamp("ts")
            .to_metadata(2, 127, 1000, 0)
            .unwrap()
    }

    #[test]
    fn test_copier_maps_by_name() {
        let src = RecordMetadata::new(
            vec![
                ("ts".into(), ColumnType::Timestamp),
                ("SYM".into(), ColumnType::Symbol),
                ("price".into(), ColumnType::Float),
            ],
            Some(0),
        );
        let copier = RecordToRowCopier::new(&src, &view_meta()).unwrap();
        assert_eq!(copier.timestamp_src, 0);
        assert_eq!(copier.columns, vec![(1, 0), (2, 1)]);
        assert_eq!(copier.structure_version(), 0);
    }

    #[test]
    fn test_copier_rejects_bad_mapping() {
        let missing_ts = RecordMetadata::new(
            vec![("sym".into(), ColumnType::String)],
            None,
        );
        assert!(matches!(
            RecordToRowCopier::new(&missing_ts, &view_meta()),
            Err(Error::Sql { .. })
        ));
        let unknown = RecordMetadata::new(
            vec![
                ("qty".into(), ColumnType::Long),
                ("ts".into(), ColumnType::Timestamp),
            ],
            Some(1),
        );
        assert!(RecordToRowCopier::new(&unknown, &view_meta()).is_err());
        let bad_type = RecordMetadata::new(
            vec![
                ("price".into(), ColumnType::Binary),
                ("ts".into(), ColumnType::Timestamp),
            ],
            Some(1),
        );
        assert!(RecordToRowCopier::new(&bad_type, &view_meta()).is_err());
    }
}
