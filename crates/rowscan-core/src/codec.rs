//! Primitive codec.
//!
//! A closed set of scalar kinds, each with a nullable [`Slot`] that a row
//! can be bound into and extracted from. The tuple and keyed decoders are
//! built on top of it and return dynamic rows (`Vec<Value>` / [`Record`]).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::{ScanError, ScanResult};
use crate::provider::Row;
use crate::value::Value;

/// A row decoded by name.
pub type Record = BTreeMap<String, Value>;

/// Timestamp layouts accepted when binding text to a timestamp slot.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

/// Supported scalar kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Kind {
    /// Boolean.
    Bool = 0,
    /// 32-bit integer.
    Int32 = 1,
    /// 64-bit integer.
    Int64 = 2,
    /// 32-bit float.
    Float32 = 3,
    /// 64-bit float.
    Float64 = 4,
    /// Text.
    Text = 5,
    /// Timestamp.
    Timestamp = 6,
    /// Byte sequence.
    Bytes = 7,
}

impl Kind {
    /// All kinds, in tag order.
    pub const ALL: [Kind; 8] = [
        Kind::Bool,
        Kind::Int32,
        Kind::Int64,
        Kind::Float32,
        Kind::Float64,
        Kind::Text,
        Kind::Timestamp,
        Kind::Bytes,
    ];

    /// Allocates an empty slot of this kind.
    pub fn alloc(self) -> Slot {
        match self {
            Kind::Bool => Slot::Bool(None),
            Kind::Int32 => Slot::Int32(None),
            Kind::Int64 => Slot::Int64(None),
            Kind::Float32 => Slot::Float32(None),
            Kind::Float64 => Slot::Float64(None),
            Kind::Text => Slot::Text(None),
            Kind::Timestamp => Slot::Timestamp(None),
            Kind::Bytes => Slot::Bytes(None),
        }
    }

    /// Canonical name.
    pub fn name(self) -> &'static str {
        match self {
            Kind::Bool => "bool",
            Kind::Int32 => "int32",
            Kind::Int64 => "int64",
            Kind::Float32 => "float32",
            Kind::Float64 => "float64",
            Kind::Text => "text",
            Kind::Timestamp => "timestamp",
            Kind::Bytes => "bytes",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Kind {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bool" | "boolean" => Ok(Kind::Bool),
            "int" | "int32" | "integer" => Ok(Kind::Int32),
            "int64" | "bigint" | "long" => Ok(Kind::Int64),
            "float" | "float32" | "real" => Ok(Kind::Float32),
            "float64" | "double" => Ok(Kind::Float64),
            "text" | "string" | "varchar" => Ok(Kind::Text),
            "timestamp" | "time" | "datetime" => Ok(Kind::Timestamp),
            "bytes" | "blob" | "binary" => Ok(Kind::Bytes),
            other => Err(ScanError::UnsupportedKind(other.to_string())),
        }
    }
}

impl TryFrom<u8> for Kind {
    type Error = ScanError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Kind::ALL
            .get(usize::from(tag))
            .copied()
            .ok_or_else(|| ScanError::UnsupportedKind(format!("tag {tag}")))
    }
}

/// A nullable, bindable location for one column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    /// Boolean slot.
    Bool(Option<bool>),
    /// 32-bit integer slot.
    Int32(Option<i32>),
    /// 64-bit integer slot.
    Int64(Option<i64>),
    /// 32-bit float slot.
    Float32(Option<f32>),
    /// 64-bit float slot.
    Float64(Option<f64>),
    /// Text slot.
    Text(Option<String>),
    /// Timestamp slot.
    Timestamp(Option<NaiveDateTime>),
    /// Byte sequence slot.
    Bytes(Option<Vec<u8>>),
}

impl Slot {
    /// Returns the slot's kind.
    pub fn kind(&self) -> Kind {
        match self {
            Slot::Bool(_) => Kind::Bool,
            Slot::Int32(_) => Kind::Int32,
            Slot::Int64(_) => Kind::Int64,
            Slot::Float32(_) => Kind::Float32,
            Slot::Float64(_) => Kind::Float64,
            Slot::Text(_) => Kind::Text,
            Slot::Timestamp(_) => Kind::Timestamp,
            Slot::Bytes(_) => Kind::Bytes,
        }
    }

    /// Returns true if nothing (or a null) has been bound.
    pub fn is_null(&self) -> bool {
        matches!(
            self,
            Slot::Bool(None)
                | Slot::Int32(None)
                | Slot::Int64(None)
                | Slot::Float32(None)
                | Slot::Float64(None)
                | Slot::Text(None)
                | Slot::Timestamp(None)
                | Slot::Bytes(None)
        )
    }

    /// Binds a column value into the slot, converting it to the slot's kind.
    ///
    /// A null column clears the slot.
    pub fn fill(&mut self, index: usize, value: &Value) -> ScanResult<()> {
        let kind = self.kind();
        let mismatch = |found: &'static str| ScanError::Conversion { index, kind, found };

        if value.is_null() {
            *self = kind.alloc();
            return Ok(());
        }

        match self {
            Slot::Bool(slot) => {
                *slot = Some(match value {
                    Value::Bool(b) => *b,
                    Value::Int32(i) => *i != 0,
                    Value::Int64(i) => *i != 0,
                    other => return Err(mismatch(other.type_name())),
                });
            }
            Slot::Int32(slot) => {
                *slot = Some(match value {
                    Value::Int32(i) => *i,
                    Value::Int64(i) => {
                        i32::try_from(*i).map_err(|_| mismatch("int64 (out of range)"))?
                    }
                    Value::Bool(b) => i32::from(*b),
                    other => return Err(mismatch(other.type_name())),
                });
            }
            Slot::Int64(slot) => {
                *slot = Some(match value {
                    Value::Int32(i) => i64::from(*i),
                    Value::Int64(i) => *i,
                    Value::Bool(b) => i64::from(*b),
                    other => return Err(mismatch(other.type_name())),
                });
            }
            Slot::Float32(slot) => {
                *slot = Some(match value {
                    Value::Float32(f) => *f,
                    Value::Float64(f) => *f as f32,
                    Value::Int32(i) => *i as f32,
                    Value::Int64(i) => *i as f32,
                    other => return Err(mismatch(other.type_name())),
                });
            }
            Slot::Float64(slot) => {
                *slot = Some(match value {
                    Value::Float32(f) => f64::from(*f),
                    Value::Float64(f) => *f,
                    Value::Int32(i) => f64::from(*i),
                    Value::Int64(i) => *i as f64,
                    other => return Err(mismatch(other.type_name())),
                });
            }
            Slot::Text(slot) => {
                *slot = Some(match value {
                    Value::Text(s) => s.clone(),
                    Value::Bytes(b) => String::from_utf8(b.clone())
                        .map_err(|_| mismatch("bytes (invalid utf-8)"))?,
                    other => return Err(mismatch(other.type_name())),
                });
            }
            Slot::Timestamp(slot) => {
                *slot = Some(match value {
                    Value::Timestamp(t) => *t,
                    Value::Text(s) => {
                        parse_timestamp(s).ok_or_else(|| mismatch("text (not a timestamp)"))?
                    }
                    other => return Err(mismatch(other.type_name())),
                });
            }
            Slot::Bytes(slot) => {
                *slot = Some(match value {
                    Value::Bytes(b) => b.clone(),
                    Value::Text(s) => s.clone().into_bytes(),
                    other => return Err(mismatch(other.type_name())),
                });
            }
        }
        Ok(())
    }

    /// Converts the bound slot into a plain value.
    pub fn extract(self) -> Value {
        match self {
            Slot::Bool(v) => v.into(),
            Slot::Int32(v) => v.into(),
            Slot::Int64(v) => v.into(),
            Slot::Float32(v) => v.into(),
            Slot::Float64(v) => v.into(),
            Slot::Text(v) => v.into(),
            Slot::Timestamp(v) => v.into(),
            Slot::Bytes(v) => v.into(),
        }
    }
}

/// Parses the timestamp layouts drivers commonly return as text.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    for format in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, format) {
            return Some(ts);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Decodes column 0 of a single-column row as one value of `kind`.
pub fn scalar_decoder(kind: Kind) -> impl FnMut(&dyn Row) -> ScanResult<Value> {
    move |row: &dyn Row| {
        let mut slots = [kind.alloc()];
        row.bind(&mut slots)?;
        let [slot] = slots;
        Ok(slot.extract())
    }
}

/// Decodes every column positionally, one kind per column.
pub fn tuple_decoder(kinds: impl Into<Vec<Kind>>) -> impl FnMut(&dyn Row) -> ScanResult<Vec<Value>> {
    let kinds: Vec<Kind> = kinds.into();
    move |row: &dyn Row| {
        let mut slots: Vec<Slot> = kinds.iter().map(|k| k.alloc()).collect();
        row.bind(&mut slots)?;
        Ok(slots.into_iter().map(Slot::extract).collect())
    }
}

/// Decodes every column into a [`Record`] keyed by the given names.
pub fn keyed_decoder<I, S>(pairs: I) -> impl FnMut(&dyn Row) -> ScanResult<Record>
where
    I: IntoIterator<Item = (S, Kind)>,
    S: Into<String>,
{
    let (names, kinds): (Vec<String>, Vec<Kind>) =
        pairs.into_iter().map(|(n, k)| (n.into(), k)).unzip();
    move |row: &dyn Row| {
        let mut slots: Vec<Slot> = kinds.iter().map(|k| k.alloc()).collect();
        row.bind(&mut slots)?;
        Ok(names
            .iter()
            .cloned()
            .zip(slots.into_iter().map(Slot::extract))
            .collect())
    }
}

/// Builds a keyed decoder from a `name:kind,name:kind` spec.
pub fn keyed_decoder_from_spec(
    spec: &str,
) -> ScanResult<impl FnMut(&dyn Row) -> ScanResult<Record>> {
    let mut pairs = Vec::new();
    for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, kind) = entry
            .split_once(':')
            .ok_or_else(|| ScanError::UnsupportedKind(format!("missing kind in '{entry}'")))?;
        pairs.push((name.trim().to_string(), kind.parse::<Kind>()?));
    }
    Ok(keyed_decoder(pairs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::BufferedCursor;
    use crate::provider::Cursor;

    fn one_row(values: Vec<Value>) -> BufferedCursor {
        let mut cursor = BufferedCursor::new(vec![values]);
        assert!(cursor.advance().unwrap());
        cursor
    }

    #[test]
    fn test_kind_tags() {
        for kind in Kind::ALL {
            assert_eq!(Kind::try_from(kind as u8).unwrap(), kind);
            assert_eq!(kind.alloc().kind(), kind);
        }
        assert!(matches!(
            Kind::try_from(42u8),
            Err(ScanError::UnsupportedKind(_))
        ));
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("BIGINT".parse::<Kind>().unwrap(), Kind::Int64);
        assert_eq!(" text ".parse::<Kind>().unwrap(), Kind::Text);
        assert!(matches!(
            "decimal".parse::<Kind>(),
            Err(ScanError::UnsupportedKind(k)) if k == "decimal"
        ));
    }

    #[test]
    fn test_fill_null_preserves_absence() {
        let mut slot = Kind::Int64.alloc();
        slot.fill(0, &Value::Int64(5)).unwrap();
        slot.fill(0, &Value::Null).unwrap();
        assert!(slot.is_null());
        assert_eq!(slot.extract(), Value::Null);
    }

    #[test]
    fn test_fill_conversions() {
        let mut slot = Kind::Bool.alloc();
        slot.fill(0, &Value::Int64(1)).unwrap();
        assert_eq!(slot.extract(), Value::Bool(true));

        let mut slot = Kind::Int32.alloc();
        assert!(matches!(
            slot.fill(3, &Value::Int64(i64::from(i32::MAX) + 1)),
            Err(ScanError::Conversion { index: 3, kind: Kind::Int32, .. })
        ));

        let mut slot = Kind::Timestamp.alloc();
        slot.fill(0, &Value::Text("2024-03-01 12:30:00".into())).unwrap();
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap();
        assert_eq!(slot.extract(), Value::Timestamp(expected));

        let mut slot = Kind::Float64.alloc();
        assert!(slot.fill(0, &Value::Text("1.5".into())).is_err());
    }

    #[test]
    fn test_tuple_decoder() {
        let cursor = one_row(vec![
            Value::Int64(7),
            Value::Text("ann".into()),
            Value::Null,
        ]);
        let mut decode = tuple_decoder([Kind::Int32, Kind::Text, Kind::Float64]);
        let row = decode(&cursor).unwrap();
        assert_eq!(
            row,
            vec![Value::Int32(7), Value::Text("ann".into()), Value::Null]
        );
    }

    #[test]
    fn test_tuple_decoder_column_count() {
        let cursor = one_row(vec![Value::Int64(1), Value::Int64(2)]);
        let mut decode = tuple_decoder([Kind::Int64]);
        assert!(matches!(
            decode(&cursor),
            Err(ScanError::ColumnCount { expected: 1, found: 2 })
        ));
    }

    #[test]
    fn test_keyed_decoder() {
        let cursor = one_row(vec![Value::Int64(1), Value::Text("bob".into())]);
        let mut decode = keyed_decoder([("id", Kind::Int64), ("name", Kind::Text)]);
        let record = decode(&cursor).unwrap();
        assert_eq!(record.get("id"), Some(&Value::Int64(1)));
        assert_eq!(record.get("name"), Some(&Value::Text("bob".into())));
    }

    #[test]
    fn test_keyed_decoder_from_spec() {
        let cursor = one_row(vec![Value::Int64(1), Value::Int64(0)]);
        let mut decode = keyed_decoder_from_spec("id:int64, active:bool").unwrap();
        let record = decode(&cursor).unwrap();
        assert_eq!(record.get("active"), Some(&Value::Bool(false)));

        assert!(matches!(
            keyed_decoder_from_spec("id:uuid").map(|_| ()),
            Err(ScanError::UnsupportedKind(_))
        ));
    }

    #[test]
    fn test_scalar_decoder() {
        let cursor = one_row(vec![Value::Text("héllo".into())]);
        let mut decode = scalar_decoder(Kind::Bytes);
        assert_eq!(decode(&cursor).unwrap(), Value::Bytes("héllo".as_bytes().to_vec()));
    }
}
