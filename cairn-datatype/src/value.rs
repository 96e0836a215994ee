use crate::error::{Error, Result};
use crate::timestamp::format_timestamp;
use crate::ColumnType;
use std::fmt;

/// Null sentinels stored in fixed-size column files.
pub const NULL_INT: i32 = i32::MIN;
pub const NULL_LONG: i64 = i64::MIN;
/// Length prefix of a null variable-size value.
pub const NULL_LEN: i32 = -1;

/// Value is a single cell of a table row.
///
/// Symbol columns carry their text as `Str`, the dictionary key is
/// resolved by the storage layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Byte(i8),
    Short(i16),
    Char(u16),
    Int(i32),
    Long(i64),
    Date(i64),
    Timestamp(i64),
    Float(f32),
    Double(f64),
    Str(String),
    Bin(Vec<u8>),
    Uuid(u128),
    Long256([u64; 4]),
}

impl Value {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    #[inline]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Byte(v) => Some(*v as i64),
            Value::Short(v) => Some(*v as i64),
            Value::Char(v) => Some(*v as i64),
            Value::Int(v) => Some(*v as i64),
            Value::Long(v) | Value::Date(v) | Value::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn as_timestamp(&self) -> Option<i64> {
        match self {
            Value::Timestamp(v) | Value::Date(v) | Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    #[inline]
    fn kind(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::Byte(_) => "BYTE",
            Value::Short(_) => "SHORT",
            Value::Char(_) => "CHAR",
            Value::Int(_) => "INT",
            Value::Long(_) => "LONG",
            Value::Date(_) => "DATE",
            Value::Timestamp(_) => "TIMESTAMP",
            Value::Float(_) => "FLOAT",
            Value::Double(_) => "DOUBLE",
            Value::Str(_) => "STRING",
            Value::Bin(_) => "BINARY",
            Value::Uuid(_) => "UUID",
            Value::Long256(_) => "LONG256",
        }
    }

    /// Converts the value so that it can be stored in a column of given type.
    pub fn cast_to(&self, ty: ColumnType) -> Result<Value> {
        let fail = || Error::InvalidCast {
            from: self.kind(),
            to: ty.name(),
        };
        if self.is_null() {
            return Ok(Value::Null);
        }
        let res = match ty {
            ColumnType::Boolean => match self {
                Value::Bool(b) => Value::Bool(*b),
                other => Value::Bool(other.as_i64().ok_or_else(fail)? != 0),
            },
            ColumnType::Byte => Value::Byte(self.integral(fail)? as i8),
            ColumnType::Short => Value::Short(self.integral(fail)? as i16),
            ColumnType::Char => Value::Char(self.integral(fail)? as u16),
            ColumnType::Int => Value::Int(self.integral(fail)? as i32),
            ColumnType::Long => Value::Long(self.integral(fail)?),
            ColumnType::Date => Value::Date(self.integral(fail)?),
            ColumnType::Timestamp => match self {
                Value::Str(s) => Value::Timestamp(crate::timestamp::parse_timestamp(s)?),
                other => Value::Timestamp(other.integral(fail)?),
            },
            ColumnType::Float => Value::Float(self.as_f64().ok_or_else(fail)? as f32),
            ColumnType::Double => Value::Double(self.as_f64().ok_or_else(fail)?),
            ColumnType::String | ColumnType::Symbol | ColumnType::Varchar => {
                Value::Str(self.to_string())
            }
            ColumnType::Binary => match self {
                Value::Bin(b) => Value::Bin(b.clone()),
                Value::Str(s) => Value::Bin(s.as_bytes().to_vec()),
                _ => return Err(fail()),
            },
            ColumnType::Uuid => match self {
                Value::Uuid(v) => Value::Uuid(*v),
                _ => return Err(fail()),
            },
            ColumnType::Long256 => match self {
                Value::Long256(v) => Value::Long256(*v),
                _ => return Err(fail()),
            },
        };
        Ok(res)
    }

    #[inline]
    fn integral<F: Fn() -> Error>(&self, fail: F) -> Result<i64> {
        match self {
            Value::Bool(b) => Ok(*b as i64),
            Value::Float(v) => Ok(*v as i64),
            Value::Double(v) => Ok(*v as i64),
            Value::Str(s) => s.trim().parse().map_err(|_| fail()),
            other => other.as_i64().ok_or_else(fail),
        }
    }

    /// Appends fixed-size little-endian representation of this value.
    /// Null is written as the type's sentinel.
    /// Symbol columns are encoded by the storage layer.
    pub fn encode_fixed(&self, ty: ColumnType, out: &mut Vec<u8>) -> Result<()> {
        let v = self.cast_to(ty)?;
        match (ty, v) {
            (ColumnType::Boolean, Value::Bool(b)) => out.push(b as u8),
            (ColumnType::Boolean | ColumnType::Byte, Value::Null) => out.push(0),
            (ColumnType::Byte, Value::Byte(b)) => out.push(b as u8),
            (ColumnType::Short, Value::Short(s)) => out.extend_from_slice(&s.to_le_bytes()),
            (ColumnType::Char, Value::Char(c)) => out.extend_from_slice(&c.to_le_bytes()),
            (ColumnType::Short | ColumnType::Char, Value::Null) => out.extend_from_slice(&[0, 0]),
            (ColumnType::Int, Value::Int(i)) => out.extend_from_slice(&i.to_le_bytes()),
            (ColumnType::Int, Value::Null) => out.extend_from_slice(&NULL_INT.to_le_bytes()),
            (
                ColumnType::Long | ColumnType::Date | ColumnType::Timestamp,
                Value::Long(l) | Value::Date(l) | Value::Timestamp(l),
            ) => out.extend_from_slice(&l.to_le_bytes()),
            (ColumnType::Long | ColumnType::Date | ColumnType::Timestamp, Value::Null) => {
                out.extend_from_slice(&NULL_LONG.to_le_bytes())
            }
            (ColumnType::Float, Value::Float(f)) => out.extend_from_slice(&f.to_le_bytes()),
            (ColumnType::Float, Value::Null) => out.extend_from_slice(&f32::NAN.to_le_bytes()),
            (ColumnType::Double, Value::Double(d)) => out.extend_from_slice(&d.to_le_bytes()),
            (ColumnType::Double, Value::Null) => out.extend_from_slice(&f64::NAN.to_le_bytes()),
            (ColumnType::Uuid, Value::Uuid(u)) => out.extend_from_slice(&u.to_le_bytes()),
            (ColumnType::Uuid, Value::Null) => {
                out.extend_from_slice(&NULL_LONG.to_le_bytes());
                out.extend_from_slice(&NULL_LONG.to_le_bytes());
            }
            (ColumnType::Long256, Value::Long256(parts)) => {
                for p in parts {
                    out.extend_from_slice(&p.to_le_bytes());
                }
            }
            (ColumnType::Long256, Value::Null) => {
                for _ in 0..4 {
                    out.extend_from_slice(&NULL_LONG.to_le_bytes());
                }
            }
            (ty, v) => {
                return Err(Error::InvalidCast {
                    from: v.kind(),
                    to: ty.name(),
                })
            }
        }
        Ok(())
    }

    /// Decodes a fixed-size value, mapping sentinels back to null.
    pub fn decode_fixed(ty: ColumnType, bytes: &[u8]) -> Result<Value> {
        let size = ty.fixed_size().ok_or(Error::InvalidFormat)?;
        if bytes.len() < size {
            return Err(Error::InvalidFormat);
        }
        let b = &bytes[..size];
        let v = match ty {
            ColumnType::Boolean => Value::Bool(b[0] != 0),
            ColumnType::Byte => Value::Byte(b[0] as i8),
            ColumnType::Short => Value::Short(i16::from_le_bytes([b[0], b[1]])),
            ColumnType::Char => Value::Char(u16::from_le_bytes([b[0], b[1]])),
            ColumnType::Int | ColumnType::Symbol => {
                let i = i32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                if i == NULL_INT {
                    Value::Null
                } else {
                    Value::Int(i)
                }
            }
            ColumnType::Long | ColumnType::Date | ColumnType::Timestamp => {
                let l = read_i64(b);
                if l == NULL_LONG {
                    Value::Null
                } else if ty == ColumnType::Long {
                    Value::Long(l)
                } else if ty == ColumnType::Date {
                    Value::Date(l)
                } else {
                    Value::Timestamp(l)
                }
            }
            ColumnType::Float => {
                let f = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                if f.is_nan() {
                    Value::Null
                } else {
                    Value::Float(f)
                }
            }
            ColumnType::Double => {
                let d = f64::from_bits(read_i64(b) as u64);
                if d.is_nan() {
                    Value::Null
                } else {
                    Value::Double(d)
                }
            }
            ColumnType::Uuid => {
                if read_i64(b) == NULL_LONG && read_i64(&b[8..]) == NULL_LONG {
                    Value::Null
                } else {
                    let mut arr = [0u8; 16];
                    arr.copy_from_slice(b);
                    Value::Uuid(u128::from_le_bytes(arr))
                }
            }
            ColumnType::Long256 => {
                let mut parts = [0u64; 4];
                for (i, p) in parts.iter_mut().enumerate() {
                    *p = read_i64(&b[i * 8..]) as u64;
                }
                if parts.iter().all(|p| *p as i64 == NULL_LONG) {
                    Value::Null
                } else {
                    Value::Long256(parts)
                }
            }
            ColumnType::String | ColumnType::Binary | ColumnType::Varchar => {
                return Err(Error::InvalidFormat)
            }
        };
        Ok(v)
    }

    /// Appends length-prefixed representation of a variable-size value.
    pub fn encode_var(&self, ty: ColumnType, out: &mut Vec<u8>) -> Result<()> {
        match self.cast_to(ty)? {
            Value::Null => out.extend_from_slice(&NULL_LEN.to_le_bytes()),
            Value::Str(s) => {
                out.extend_from_slice(&(s.len() as i32).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Value::Bin(b) => {
                out.extend_from_slice(&(b.len() as i32).to_le_bytes());
                out.extend_from_slice(&b);
            }
            v => {
                return Err(Error::InvalidCast {
                    from: v.kind(),
                    to: ty.name(),
                })
            }
        }
        Ok(())
    }

    /// Decodes a length-prefixed value, returns the value and consumed bytes.
    pub fn decode_var(ty: ColumnType, bytes: &[u8]) -> Result<(Value, usize)> {
        if bytes.len() < 4 {
            return Err(Error::InvalidFormat);
        }
        let len = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if len == NULL_LEN {
            return Ok((Value::Null, 4));
        }
        if len < 0 || bytes.len() < 4 + len as usize {
            return Err(Error::InvalidFormat);
        }
        let data = &bytes[4..4 + len as usize];
        let v = match ty {
            ColumnType::Binary => Value::Bin(data.to_vec()),
            ColumnType::String | ColumnType::Varchar => Value::Str(
                std::str::from_utf8(data)
                    .map_err(|_| Error::InvalidFormat)?
                    .to_string(),
            ),
            _ => return Err(Error::InvalidFormat),
        };
        Ok((v, 4 + len as usize))
    }

    /// Appends a canonical byte key of this value, used for equality
    /// grouping of rows (floats compare by bit pattern).
    pub fn write_key(&self, out: &mut Vec<u8>) {
        match self {
            Value::Null => out.push(0),
            Value::Bool(b) => out.extend_from_slice(&[1, *b as u8]),
            Value::Str(s) => {
                out.push(2);
                out.extend_from_slice(&(s.len() as u32).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Value::Bin(b) => {
                out.push(3);
                out.extend_from_slice(&(b.len() as u32).to_le_bytes());
                out.extend_from_slice(b);
            }
            Value::Float(f) => {
                out.push(4);
                out.extend_from_slice(&f.to_bits().to_le_bytes());
            }
            Value::Double(d) => {
                out.push(4);
                out.extend_from_slice(&d.to_bits().to_le_bytes());
            }
            Value::Uuid(u) => {
                out.push(5);
                out.extend_from_slice(&u.to_le_bytes());
            }
            Value::Long256(parts) => {
                out.push(6);
                for p in parts {
                    out.extend_from_slice(&p.to_le_bytes());
                }
            }
            other => {
                out.push(7);
                // integral kinds share one key space
                out.extend_from_slice(&other.as_i64().unwrap_or_default().to_le_bytes());
            }
        }
    }
}

#[inline]
fn read_i64(b: &[u8]) -> i64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&b[..8]);
    i64::from_le_bytes(arr)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str(""),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Byte(v) => write!(f, "{}", v),
            Value::Short(v) => write!(f, "{}", v),
            Value::Char(v) => match char::from_u32(*v as u32) {
                Some(c) => write!(f, "{}", c),
                None => write!(f, "{}", v),
            },
            Value::Int(v) => write!(f, "{}", v),
            Value::Long(v) | Value::Date(v) => write!(f, "{}", v),
            Value::Timestamp(v) => match format_timestamp(*v) {
                Ok(s) => f.write_str(&s),
                Err(_) => write!(f, "{}", v),
            },
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Str(s) => f.write_str(s),
            Value::Bin(b) => {
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            Value::Uuid(u) => write!(f, "{:032x}", u),
            Value::Long256(parts) => {
                f.write_str("0x")?;
                for p in parts.iter().rev() {
                    write!(f, "{:016x}", p)?;
                }
                Ok(())
            }
        }
    }
}
