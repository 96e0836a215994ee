use cairn_datatype::error::Error as DataTypeError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    /// I/O failure, disk full or corrupt file. Carries OS errno when known.
    #[error("critical error[errno={errno}]: {msg}")]
    Critical { errno: i32, msg: String },
    #[error("table is locked by another writer({0})")]
    TableLocked(PathBuf),
    #[error("metadata validation failed: {0}")]
    MetadataValidation(#[from] MetaError),
    #[error("timeout reading metadata({0})")]
    MetadataReadTimeout(String),
    #[error("timeout reading transaction file")]
    TxnReadTimeout,
    /// Schema or DDL error at given position of the statement.
    #[error("[{position}] {msg}")]
    Sql { position: i32, msg: String },
    #[error("table does not exist[name={0}]")]
    TableNotFound(String),
    #[error("table already exists[name={0}]")]
    TableAlreadyExists(String),
    #[error("insufficient memory({0})")]
    InsufficientMemory(usize),
    #[error("operation cancelled")]
    Cancelled,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("data type error: {0}")]
    DataType(#[from] DataTypeError),
}

/// Structural defect found while validating a metadata file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetaError {
    #[error("file is too small[size={size}, required={required}]")]
    FileTooSmall { size: usize, required: usize },
    #[error("metadata version does not match runtime version[expected={expected}, actual={actual}]")]
    VersionMismatch { expected: i32, actual: i32 },
    #[error("invalid column count({0})")]
    InvalidColumnCount(i32),
    #[error("invalid partition by({0})")]
    InvalidPartitionBy(i32),
    #[error("timestamp index is outside of range[index={index}, count={count}]")]
    TimestampIndexOutOfRange { index: i32, count: i32 },
    #[error("timestamp column must be TIMESTAMP[type={0}]")]
    TimestampNotTimestamp(String),
    #[error("invalid column type[index={index}, tag={tag}]")]
    InvalidColumnType { index: usize, tag: i32 },
    #[error("index flag is only supported for SYMBOL[index={0}]")]
    IndexOnNonSymbol(usize),
    #[error("invalid index value block capacity[index={index}, capacity={capacity}]")]
    InvalidIndexBlockCapacity { index: usize, capacity: i32 },
    #[error("invalid column name[index={0}]")]
    InvalidColumnName(usize),
    #[error("duplicate column[index={index}, name={name}]")]
    DuplicateColumn { index: usize, name: String },
}

impl Error {
    #[inline]
    pub fn critical(errno: i32, msg: impl Into<String>) -> Self {
        Error::Critical {
            errno,
            msg: msg.into(),
        }
    }

    #[inline]
    pub fn sql(position: i32, msg: impl Into<String>) -> Self {
        Error::Sql {
            position,
            msg: msg.into(),
        }
    }

    #[inline]
    pub fn errno(&self) -> Option<i32> {
        match self {
            Error::Critical { errno, .. } => Some(*errno),
            _ => None,
        }
    }

    #[inline]
    pub fn is_file_not_found(&self) -> bool {
        self.errno() == Some(libc::ENOENT)
    }

    /// Whether the error leaves on-disk state suspect and must not be retried.
    #[inline]
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Error::Critical { .. }
                | Error::TableLocked(_)
                | Error::MetadataValidation(_)
                | Error::MetadataReadTimeout(_)
                | Error::TxnReadTimeout
        )
    }
}

impl From<std::io::Error> for Error {
    #[inline]
    fn from(src: std::io::Error) -> Self {
        Error::Critical {
            errno: src.raw_os_error().unwrap_or(-1),
            msg: src.to_string(),
        }
    }
}

impl From<bincode::error::EncodeError> for Error {
    #[inline]
    fn from(src: bincode::error::EncodeError) -> Self {
        Error::critical(-1, src.to_string())
    }
}

impl From<bincode::error::DecodeError> for Error {
    #[inline]
    fn from(src: bincode::error::DecodeError) -> Self {
        Error::critical(-1, src.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_io_error_errno() {
        let err: Error = io::Error::from_raw_os_error(libc::ENOENT).into();
        assert!(err.is_file_not_found());
        assert!(err.is_critical());
        let err: Error = io::Error::new(io::ErrorKind::Other, "boom").into();
        assert_eq!(err.errno(), Some(-1));
        assert!(!err.is_file_not_found());
    }

    #[test]
    fn test_meta_error_wraps() {
        let err: Error = MetaError::InvalidColumnCount(0).into();
        assert!(matches!(
            err,
            Error::MetadataValidation(MetaError::InvalidColumnCount(0))
        ));
        assert!(!Error::sql(3, "bad").is_critical());
    }
}
