//! Value type for model properties and action arguments
//!
//! Covers the EDM-derived primitive set the device models use plus a
//! composite variant for declared struct types.

use crate::error::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Primitive kinds a property, struct field or action parameter can declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Boolean,
    Int8,
    Int16,
    Int32,
    Int64,
    Single,
    Double,
    /// Text rendered inside quotes
    String,
    /// Pre-formed JSON fragment rendered verbatim
    StringNoQuotes,
    DateTimeOffset,
    Guid,
    Binary,
}

impl ValueKind {
    /// Resolve a declaration type name to a primitive kind.
    ///
    /// Accepts both the snake_case names used by this crate and the C
    /// declaration vocabulary (`double`, `int32_t`, `ascii_char_ptr`, ...).
    /// Returns `None` for anything else, which callers treat as a struct name.
    pub fn from_type_name(name: &str) -> Option<Self> {
        let kind = match name {
            "boolean" | "bool" | "_Bool" => Self::Boolean,
            "int8" | "int8_t" => Self::Int8,
            "int16" | "int16_t" => Self::Int16,
            "int32" | "int" | "int32_t" => Self::Int32,
            "int64" | "long" | "int64_t" => Self::Int64,
            "single" | "float" => Self::Single,
            "double" => Self::Double,
            "string" | "ascii_char_ptr" => Self::String,
            "string_no_quotes" | "ascii_char_ptr_no_quotes" => Self::StringNoQuotes,
            "date_time_offset" | "EDM_DATE_TIME_OFFSET" => Self::DateTimeOffset,
            "guid" | "EDM_GUID" => Self::Guid,
            "binary" | "EDM_BINARY" => Self::Binary,
            _ => return None,
        };
        Some(kind)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Single => "single",
            Self::Double => "double",
            Self::String => "string",
            Self::StringNoQuotes => "string_no_quotes",
            Self::DateTimeOffset => "date_time_offset",
            Self::Guid => "guid",
            Self::Binary => "binary",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Calendar date-time with optional fractional seconds and UTC offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateTimeOffset {
    date_time: NaiveDateTime,
    /// Nanoseconds
    fraction: Option<u32>,
    /// Signed offset from UTC in minutes
    offset_minutes: Option<i16>,
}

impl DateTimeOffset {
    /// Build from calendar fields; fails on an impossible date or time
    pub fn new(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> Result<Self> {
        if !(0..=9999).contains(&year) {
            return Err(Error::conversion("date_time_offset", format!("year {year} out of range")));
        }
        let date_time = NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|d| d.and_hms_opt(hour, minute, second))
            .ok_or_else(|| {
                Error::conversion(
                    "date_time_offset",
                    format!("invalid calendar fields {year}-{month}-{day}T{hour}:{minute}:{second}"),
                )
            })?;
        Ok(Self {
            date_time,
            fraction: None,
            offset_minutes: None,
        })
    }

    /// Attach fractional seconds, in nanoseconds
    pub fn with_fraction(mut self, nanos: u32) -> Result<Self> {
        if nanos >= 1_000_000_000 {
            return Err(Error::conversion("date_time_offset", "fraction must be below one second"));
        }
        self.fraction = Some(nanos);
        Ok(self)
    }

    /// Attach a UTC offset given as hours and minutes; the sign of `hours`
    /// applies to the whole offset
    pub fn with_offset(self, hours: i8, minutes: u8) -> Result<Self> {
        if !(-23..=23).contains(&hours) || minutes > 59 {
            return Err(Error::conversion(
                "date_time_offset",
                format!("offset {hours}:{minutes} out of range"),
            ));
        }
        let magnitude = i16::from(hours.unsigned_abs()) * 60 + i16::from(minutes);
        self.with_offset_minutes(if hours < 0 { -magnitude } else { magnitude })
    }

    pub fn with_offset_minutes(mut self, minutes: i16) -> Result<Self> {
        if minutes.unsigned_abs() >= 24 * 60 {
            return Err(Error::conversion("date_time_offset", format!("offset of {minutes} minutes")));
        }
        self.offset_minutes = Some(minutes);
        Ok(self)
    }

    pub fn date_time(&self) -> NaiveDateTime {
        self.date_time
    }

    pub fn fraction(&self) -> Option<u32> {
        self.fraction
    }

    pub fn offset_minutes(&self) -> Option<i16> {
        self.offset_minutes
    }
}

impl fmt::Display for DateTimeOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dt = &self.date_time;
        write!(
            f,
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
            dt.year(),
            dt.month(),
            dt.day(),
            dt.hour(),
            dt.minute(),
            dt.second()
        )?;
        if let Some(nanos) = self.fraction {
            write!(f, ".{nanos:09}")?;
        }
        if let Some(offset) = self.offset_minutes {
            let sign = if offset < 0 { '-' } else { '+' };
            let magnitude = offset.unsigned_abs();
            write!(f, "{sign}{:02}:{:02}", magnitude / 60, magnitude % 60)?;
        }
        Ok(())
    }
}

impl FromStr for DateTimeOffset {
    type Err = Error;

    /// Parses `YYYY-MM-DDTHH:MM:SS[.digits][Z|±HH:MM]`.
    /// Fraction digits beyond nanosecond precision are truncated.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::conversion("date_time_offset", format!("'{s}' is not a date-time"));

        let head = s.get(..19).ok_or_else(invalid)?;
        let date_time =
            NaiveDateTime::parse_from_str(head, "%Y-%m-%dT%H:%M:%S").map_err(|_| invalid())?;
        // chrono reads `:60` as a leap second, which has no rendering here
        if date_time.nanosecond() >= 1_000_000_000 {
            return Err(invalid());
        }
        let mut value = Self {
            date_time,
            fraction: None,
            offset_minutes: None,
        };

        let mut rest = &s[19..];
        if let Some(after_dot) = rest.strip_prefix('.') {
            let digits = after_dot
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(after_dot.len());
            if digits == 0 {
                return Err(invalid());
            }
            let mut nanos: u32 = 0;
            for (i, c) in after_dot[..digits].chars().take(9).enumerate() {
                let digit = c.to_digit(10).ok_or_else(invalid)?;
                nanos += digit * 10u32.pow(8 - i as u32);
            }
            value.fraction = Some(nanos);
            rest = &after_dot[digits..];
        }

        match rest {
            "" => {}
            "Z" => value.offset_minutes = Some(0),
            _ => {
                let sign = match rest.as_bytes().first() {
                    Some(b'+') => 1,
                    Some(b'-') => -1,
                    _ => return Err(invalid()),
                };
                let body = &rest[1..];
                let digits = body.as_bytes();
                if digits.len() != 5
                    || digits[2] != b':'
                    || ![0, 1, 3, 4].iter().all(|&i| digits[i].is_ascii_digit())
                {
                    return Err(invalid());
                }
                let hours: i16 = body[..2].parse().map_err(|_| invalid())?;
                let minutes: i16 = body[3..].parse().map_err(|_| invalid())?;
                if hours > 23 || minutes > 59 {
                    return Err(invalid());
                }
                value.offset_minutes = Some(sign * (hours * 60 + minutes));
            }
        }
        Ok(value)
    }
}

/// Ordered field list of a struct-typed value.
///
/// Field order is kept for rendering; equality ignores it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Composite {
    fields: Vec<(String, Value)>,
}

impl Composite {
    /// Build from ordered fields; names must be non-empty and unique
    pub fn new(fields: Vec<(String, Value)>) -> Result<Self> {
        for (i, (name, _)) in fields.iter().enumerate() {
            if name.is_empty() {
                return Err(Error::shape("composite", "empty field name"));
            }
            if fields[..i].iter().any(|(other, _)| other == name) {
                return Err(Error::duplicate("field", name.clone()));
            }
        }
        Ok(Self { fields })
    }

    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    pub fn into_fields(self) -> Vec<(String, Value)> {
        self.fields
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl PartialEq for Composite {
    fn eq(&self, other: &Self) -> bool {
        self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .all(|(name, value)| other.get(name) == Some(value))
    }
}

impl Eq for Composite {}

/// Core value type for properties, struct fields and action arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Boolean(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Single(OrderedFloat<f32>),
    Double(OrderedFloat<f64>),

    /// Text, rendered with surrounding quotes
    String(String),

    /// Pre-formed JSON, rendered verbatim.
    ///
    /// Decoding yields the compact form of the fragment, so only compact text
    /// compares equal after a round trip; [`Value::no_quotes`] normalizes.
    StringNoQuotes(String),

    DateTimeOffset(DateTimeOffset),
    Guid(Uuid),

    /// Opaque bytes, rendered as base64
    Binary(Vec<u8>),

    /// Fields of a declared struct type
    Composite(Composite),
}

impl Value {
    /// Pre-formed JSON in compact form. Fails if `text` is not JSON.
    pub fn no_quotes(text: &str) -> Result<Self> {
        let json: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| Error::conversion("string_no_quotes", e.to_string()))?;
        Ok(Self::StringNoQuotes(json.to_string()))
    }

    /// Build a composite value, validating field names
    pub fn composite(fields: Vec<(String, Value)>) -> Result<Self> {
        Composite::new(fields).map(Self::Composite)
    }

    /// Primitive kind, or `None` for composites
    pub fn kind(&self) -> Option<ValueKind> {
        let kind = match self {
            Self::Boolean(_) => ValueKind::Boolean,
            Self::Int8(_) => ValueKind::Int8,
            Self::Int16(_) => ValueKind::Int16,
            Self::Int32(_) => ValueKind::Int32,
            Self::Int64(_) => ValueKind::Int64,
            Self::Single(_) => ValueKind::Single,
            Self::Double(_) => ValueKind::Double,
            Self::String(_) => ValueKind::String,
            Self::StringNoQuotes(_) => ValueKind::StringNoQuotes,
            Self::DateTimeOffset(_) => ValueKind::DateTimeOffset,
            Self::Guid(_) => ValueKind::Guid,
            Self::Binary(_) => ValueKind::Binary,
            Self::Composite(_) => return None,
        };
        Some(kind)
    }

    /// Type name for diagnostics
    pub fn type_name(&self) -> &'static str {
        self.kind().map_or("composite", ValueKind::name)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i8(&self) -> Option<i8> {
        match self {
            Self::Int8(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_i16(&self) -> Option<i16> {
        match self {
            Self::Int16(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::Int32(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int64(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Self::Single(f) => Some(f.into_inner()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(f) => Some(f.into_inner()),
            _ => None,
        }
    }

    /// Text of either string kind
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::StringNoQuotes(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_date_time(&self) -> Option<&DateTimeOffset> {
        match self {
            Self::DateTimeOffset(dt) => Some(dt),
            _ => None,
        }
    }

    pub fn as_guid(&self) -> Option<Uuid> {
        match self {
            Self::Guid(g) => Some(*g),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_composite(&self) -> Option<&Composite> {
        match self {
            Self::Composite(c) => Some(c),
            _ => None,
        }
    }

    /// Canonical textual form for JSON embedding.
    ///
    /// Same text as `Display`, but non-finite floats are refused since JSON
    /// has no spelling for them. Quoted strings are not escaped here.
    pub fn to_canonical_string(&self) -> Result<String> {
        self.check_finite()?;
        Ok(self.to_string())
    }

    fn check_finite(&self) -> Result<()> {
        match self {
            Self::Single(f) if !f.is_finite() => {
                Err(Error::conversion("single", format!("{f} has no JSON form")))
            }
            Self::Double(f) if !f.is_finite() => {
                Err(Error::conversion("double", format!("{f} has no JSON form")))
            }
            Self::Composite(c) => c.fields.iter().try_for_each(|(_, v)| v.check_finite()),
            _ => Ok(()),
        }
    }
}

/// GUID text: uppercase hex, dashes after bytes 4, 6, 8 and 10
pub(crate) fn guid_text(guid: &Uuid) -> String {
    guid.hyphenated().to_string().to_ascii_uppercase()
}

pub(crate) fn binary_text(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub(crate) fn binary_from_text(text: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(text)
        .map_err(|e| Error::conversion("binary", e.to_string()))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Int8(i) => write!(f, "{i}"),
            Self::Int16(i) => write!(f, "{i}"),
            Self::Int32(i) => write!(f, "{i}"),
            Self::Int64(i) => write!(f, "{i}"),
            Self::Single(fl) => write!(f, "{fl}"),
            Self::Double(fl) => write!(f, "{fl}"),
            Self::String(s) => write!(f, "\"{s}\""),
            Self::StringNoQuotes(s) => f.write_str(s),
            Self::DateTimeOffset(dt) => write!(f, "\"{dt}\""),
            Self::Guid(g) => write!(f, "\"{}\"", guid_text(g)),
            Self::Binary(b) => write!(f, "\"{}\"", binary_text(b)),
            Self::Composite(c) => {
                write!(f, "{{")?;
                for (i, (name, value)) in c.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "\"{name}\":{value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

// Conversions from Rust types
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i8> for Value {
    fn from(i: i8) -> Self {
        Value::Int8(i)
    }
}

impl From<i16> for Value {
    fn from(i: i16) -> Self {
        Value::Int16(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int32(i)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int64(i)
    }
}

impl From<f32> for Value {
    fn from(f: f32) -> Self {
        Value::Single(OrderedFloat(f))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Double(OrderedFloat(f))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<DateTimeOffset> for Value {
    fn from(dt: DateTimeOffset) -> Self {
        Value::DateTimeOffset(dt)
    }
}

impl From<Uuid> for Value {
    fn from(g: Uuid) -> Self {
        Value::Guid(g)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Binary(b)
    }
}

impl From<Composite> for Value {
    fn from(c: Composite) -> Self {
        Value::Composite(c)
    }
}

/// Build a composite [`Value`] from `"field" => value` pairs.
///
/// Evaluates to `Result<Value>`; duplicate field names are an error.
#[macro_export]
macro_rules! composite {
    ($($name:expr => $value:expr),* $(,)?) => {
        $crate::value::Value::composite(vec![
            $((::std::string::String::from($name), $crate::value::Value::from($value))),*
        ])
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_quotes_is_compact() {
        assert_eq!(
            Value::no_quotes("{ \"a\": [1, 2],\n \"b\": null }").unwrap(),
            Value::StringNoQuotes(r#"{"a":[1,2],"b":null}"#.into())
        );
        assert!(matches!(
            Value::no_quotes("{not json"),
            Err(Error::Conversion { kind: "string_no_quotes", .. })
        ));
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::from(42).as_i32(), Some(42));
        assert_eq!(Value::from(42i64).as_i64(), Some(42));
        assert_eq!(Value::from(3.5).as_f64(), Some(3.5));
        assert_eq!(Value::from(3.5f32).as_f32(), Some(3.5));
        assert_eq!(Value::from("hello").as_str(), Some("hello"));
        assert_eq!(Value::from(true).as_bool(), Some(true));
        assert_eq!(Value::from(42).as_i64(), None);
    }

    #[test]
    fn test_composite_equality_ignores_order() {
        let a = composite! { "Lat" => 3.0, "Long" => 4.0 }.unwrap();
        let b = composite! { "Long" => 4.0, "Lat" => 3.0 }.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), r#"{"Lat":3,"Long":4}"#);
        assert_eq!(b.to_string(), r#"{"Long":4,"Lat":3}"#);
    }

    #[test]
    fn test_composite_rejects_duplicate_fields() {
        assert!(composite! { "a" => 1, "a" => 2 }.is_err());
        assert!(composite! { "" => 1 }.is_err());
    }

    #[test]
    fn test_date_time_text() {
        let dt = DateTimeOffset::new(2016, 7, 4, 12, 30, 5).unwrap();
        assert_eq!(dt.to_string(), "2016-07-04T12:30:05");

        let dt = dt.with_fraction(250_000_000).unwrap().with_offset(-5, 30).unwrap();
        assert_eq!(dt.to_string(), "2016-07-04T12:30:05.250000000-05:30");
        assert_eq!(dt.to_string().parse::<DateTimeOffset>().unwrap(), dt);
    }

    #[test]
    fn test_date_time_parse_variants() {
        let z: DateTimeOffset = "2020-02-29T23:59:59Z".parse().unwrap();
        assert_eq!(z.offset_minutes(), Some(0));

        let frac: DateTimeOffset = "2020-02-29T23:59:59.5".parse().unwrap();
        assert_eq!(frac.fraction(), Some(500_000_000));

        assert!("2019-02-29T00:00:00".parse::<DateTimeOffset>().is_err());
        assert!("2020-01-01T00:00:00+24:00".parse::<DateTimeOffset>().is_err());
        assert!("2020-01-01".parse::<DateTimeOffset>().is_err());
    }

    #[test]
    fn test_non_finite_floats_have_no_canonical_form() {
        assert!(Value::from(f64::NAN).to_canonical_string().is_err());
        assert!(Value::from(f32::INFINITY).to_canonical_string().is_err());
        assert_eq!(Value::from(10.5f32).to_canonical_string().unwrap(), "10.5");
    }
}
