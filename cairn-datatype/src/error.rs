use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("Invalid format")]
    InvalidFormat,
    #[error("timestamp out of range({0})")]
    TimestampOutOfRange(i64),
    #[error("cannot cast {from} to {to}")]
    InvalidCast {
        from: &'static str,
        to: &'static str,
    },
}

impl From<time::error::Parse> for Error {
    #[inline]
    fn from(_src: time::error::Parse) -> Self {
        Error::InvalidFormat
    }
}
