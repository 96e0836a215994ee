pub mod error;
pub mod timestamp;
pub mod value;

pub use time::PrimitiveDateTime as Datetime;
pub use time::{Date, Time, Weekday};
pub use value::Value;

/// Column type of a table column.
///
/// The discriminant is the type tag persisted in the metadata file.
/// A soft-deleted column is stored with the negated tag.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ColumnType {
    Boolean = 1,
    Byte = 2,
    Short = 3,
    Char = 4,
    Int = 5,
    Long = 6,
    Date = 7,
    Timestamp = 8,
    Float = 9,
    Double = 10,
    String = 11,
    Symbol = 12,
    Long256 = 13,
    Binary = 18,
    Uuid = 19,
    Varchar = 26,
}

impl ColumnType {
    /// Resolve a persisted type tag.
    /// Returns None if the tag is unknown.
    #[inline]
    pub fn from_tag(tag: i32) -> Option<Self> {
        let ty = match tag {
            1 => ColumnType::Boolean,
            2 => ColumnType::Byte,
            3 => ColumnType::Short,
            4 => ColumnType::Char,
            5 => ColumnType::Int,
            6 => ColumnType::Long,
            7 => ColumnType::Date,
            8 => ColumnType::Timestamp,
            9 => ColumnType::Float,
            10 => ColumnType::Double,
            11 => ColumnType::String,
            12 => ColumnType::Symbol,
            13 => ColumnType::Long256,
            18 => ColumnType::Binary,
            19 => ColumnType::Uuid,
            26 => ColumnType::Varchar,
            _ => return None,
        };
        Some(ty)
    }

    #[inline]
    pub fn tag(self) -> i32 {
        self as i32
    }

    /// Returns byte size of one value in the column data file,
    /// or None for variable-size types.
    #[inline]
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            ColumnType::Boolean | ColumnType::Byte => Some(1),
            ColumnType::Short | ColumnType::Char => Some(2),
            ColumnType::Int | ColumnType::Float | ColumnType::Symbol => Some(4),
            ColumnType::Long | ColumnType::Date | ColumnType::Timestamp | ColumnType::Double => {
                Some(8)
            }
            ColumnType::Uuid => Some(16),
            ColumnType::Long256 => Some(32),
            ColumnType::String | ColumnType::Binary | ColumnType::Varchar => None,
        }
    }

    #[inline]
    pub fn is_var_size(self) -> bool {
        self.fixed_size().is_none()
    }

    #[inline]
    pub fn is_symbol(self) -> bool {
        self == ColumnType::Symbol
    }

    #[inline]
    pub fn is_timestamp(self) -> bool {
        self == ColumnType::Timestamp
    }

    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Byte => "BYTE",
            ColumnType::Short => "SHORT",
            ColumnType::Char => "CHAR",
            ColumnType::Int => "INT",
            ColumnType::Long => "LONG",
            ColumnType::Date => "DATE",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::Float => "FLOAT",
            ColumnType::Double => "DOUBLE",
            ColumnType::String => "STRING",
            ColumnType::Symbol => "SYMBOL",
            ColumnType::Long256 => "LONG256",
            ColumnType::Binary => "BINARY",
            ColumnType::Uuid => "UUID",
            ColumnType::Varchar => "VARCHAR",
        }
    }
}

/// Returns the display name of a raw type tag, including
/// soft-deleted and unknown tags.
#[inline]
pub fn name_of_tag(tag: i32) -> String {
    match ColumnType::from_tag(tag.abs()) {
        Some(ty) if tag > 0 => ty.name().to_string(),
        Some(ty) => format!("{}(deleted)", ty.name()),
        None => format!("unknown({})", tag),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_type_tags() {
        for tag in -5..40 {
            if let Some(ty) = ColumnType::from_tag(tag) {
                assert_eq!(ty.tag(), tag);
                assert!(tag > 0);
            }
        }
        assert_eq!(ColumnType::from_tag(0), None);
        assert_eq!(ColumnType::from_tag(-8), None);
        assert_eq!(name_of_tag(-8), "TIMESTAMP(deleted)");
        assert_eq!(name_of_tag(99), "unknown(99)");
    }

    #[test]
    fn test_column_type_sizes() {
        assert_eq!(ColumnType::Timestamp.fixed_size(), Some(8));
        assert_eq!(ColumnType::Symbol.fixed_size(), Some(4));
        assert!(ColumnType::Varchar.is_var_size());
        assert!(ColumnType::Binary.is_var_size());
        assert!(!ColumnType::Long256.is_var_size());
    }
}
