//! Property values and constraint metadata
//!
//! A property's value is one of a fixed set of scalar types plus date and
//! time. Dates and times travel as `(q(qqq))` structs whose leading tag
//! says which of the two it is.

use std::cmp::Ordering;
use std::fmt;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::bus::Variant;
use crate::{Error, Result};

/// Struct tag for a date value
const DATE_TAG: u16 = 0;

/// Struct tag for a time value
const TIME_TAG: u16 = 1;

/// Calendar date carried by a date property
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Date {
    pub year: u16,
    pub month: u16,
    pub day: u16,
}

impl Date {
    /// Create a validated date
    ///
    /// # Errors
    ///
    /// Returns error if the date does not exist on the calendar
    pub fn new(year: u16, month: u16, day: u16) -> Result<Self> {
        NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day))
            .ok_or_else(|| Error::InvalidPayload(format!("invalid date {year}-{month}-{day}")))?;
        Ok(Self { year, month, day })
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// Time of day carried by a time property
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Time {
    pub hour: u16,
    pub minute: u16,
    pub second: u16,
}

impl Time {
    /// Create a validated time of day
    ///
    /// # Errors
    ///
    /// Returns error if any component is out of range
    pub fn new(hour: u16, minute: u16, second: u16) -> Result<Self> {
        NaiveTime::from_hms_opt(u32::from(hour), u32::from(minute), u32::from(second))
            .ok_or_else(|| Error::InvalidPayload(format!("invalid time {hour}:{minute}:{second}")))?;
        Ok(Self {
            hour,
            minute,
            second,
        })
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }
}

/// Declared type of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    Double,
    String,
    Bool,
    Date,
    Time,
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::U16 => "uint16",
            Self::I16 => "int16",
            Self::U32 => "uint32",
            Self::I32 => "int32",
            Self::U64 => "uint64",
            Self::I64 => "int64",
            Self::Double => "double",
            Self::String => "string",
            Self::Bool => "bool",
            Self::Date => "date",
            Self::Time => "time",
        };
        f.write_str(name)
    }
}

/// Value held by a property widget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    Double(f64),
    String(String),
    Bool(bool),
    Date(Date),
    Time(Time),
}

impl PropertyValue {
    #[must_use]
    pub const fn property_type(&self) -> PropertyType {
        match self {
            Self::U16(_) => PropertyType::U16,
            Self::I16(_) => PropertyType::I16,
            Self::U32(_) => PropertyType::U32,
            Self::I32(_) => PropertyType::I32,
            Self::U64(_) => PropertyType::U64,
            Self::I64(_) => PropertyType::I64,
            Self::Double(_) => PropertyType::Double,
            Self::String(_) => PropertyType::String,
            Self::Bool(_) => PropertyType::Bool,
            Self::Date(_) => PropertyType::Date,
            Self::Time(_) => PropertyType::Time,
        }
    }

    /// Encode for the `Value` property and `ValueChanged` signal
    #[must_use]
    pub fn to_variant(&self) -> Variant {
        match self {
            Self::U16(v) => Variant::U16(*v),
            Self::I16(v) => Variant::I16(*v),
            Self::U32(v) => Variant::U32(*v),
            Self::I32(v) => Variant::I32(*v),
            Self::U64(v) => Variant::U64(*v),
            Self::I64(v) => Variant::I64(*v),
            Self::Double(v) => Variant::F64(*v),
            Self::String(v) => Variant::Str(v.clone()),
            Self::Bool(v) => Variant::Bool(*v),
            Self::Date(d) => tagged(DATE_TAG, d.day, d.month, d.year),
            Self::Time(t) => tagged(TIME_TAG, t.hour, t.minute, t.second),
        }
    }

    /// Decode a wire value
    ///
    /// # Errors
    ///
    /// Returns error if the variant is not one of the property encodings
    pub fn from_variant(variant: &Variant) -> Result<Self> {
        let value = match variant {
            Variant::U16(v) => Self::U16(*v),
            Variant::I16(v) => Self::I16(*v),
            Variant::U32(v) => Self::U32(*v),
            Variant::I32(v) => Self::I32(*v),
            Variant::U64(v) => Self::U64(*v),
            Variant::I64(v) => Self::I64(*v),
            Variant::F64(v) => Self::Double(*v),
            Variant::Str(v) => Self::String(v.clone()),
            Variant::Bool(v) => Self::Bool(*v),
            Variant::Struct(fields) => decode_tagged(fields)?,
            other => {
                return Err(Error::InvalidPayload(format!(
                    "unsupported property encoding: {}",
                    other.signature()
                )));
            }
        };
        Ok(value)
    }

    /// Decode a wire value that must have the given type
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the decoded type differs from `expected`
    pub fn from_variant_as(variant: &Variant, expected: PropertyType) -> Result<Self> {
        let value = Self::from_variant(variant)?;
        if value.property_type() != expected {
            return Err(Error::type_mismatch(expected, value.property_type()));
        }
        Ok(value)
    }

    /// Order two values of the same type
    ///
    /// Returns `None` across types, for strings and booleans, and for NaN.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::U16(a), Self::U16(b)) => Some(a.cmp(b)),
            (Self::I16(a), Self::I16(b)) => Some(a.cmp(b)),
            (Self::U32(a), Self::U32(b)) => Some(a.cmp(b)),
            (Self::I32(a), Self::I32(b)) => Some(a.cmp(b)),
            (Self::U64(a), Self::U64(b)) => Some(a.cmp(b)),
            (Self::I64(a), Self::I64(b)) => Some(a.cmp(b)),
            (Self::Double(a), Self::Double(b)) => a.partial_cmp(b),
            (Self::Date(a), Self::Date(b)) => Some(a.cmp(b)),
            (Self::Time(a), Self::Time(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::U16(v) => write!(f, "{v}"),
            Self::I16(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Date(d) => write!(f, "{d}"),
            Self::Time(t) => write!(f, "{t}"),
        }
    }
}

fn tagged(tag: u16, a: u16, b: u16, c: u16) -> Variant {
    Variant::Struct(vec![
        Variant::U16(tag),
        Variant::Struct(vec![Variant::U16(a), Variant::U16(b), Variant::U16(c)]),
    ])
}

fn decode_tagged(fields: &[Variant]) -> Result<PropertyValue> {
    let malformed = || Error::InvalidPayload("malformed date/time struct".to_string());
    let [tag, inner] = fields else {
        return Err(malformed());
    };
    let tag = tag.as_u16().ok_or_else(malformed)?;
    let parts = inner.as_struct().ok_or_else(malformed)?;
    let [a, b, c] = parts else {
        return Err(malformed());
    };
    let (a, b, c) = (
        a.as_u16().ok_or_else(malformed)?,
        b.as_u16().ok_or_else(malformed)?,
        c.as_u16().ok_or_else(malformed)?,
    );
    match tag {
        DATE_TAG => Ok(PropertyValue::Date(Date::new(c, b, a)?)),
        TIME_TAG => Ok(PropertyValue::Time(Time::new(a, b, c)?)),
        other => Err(Error::InvalidPayload(format!("unknown value tag {other}"))),
    }
}

/// One allowed value of a constraint list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintEntry {
    pub value: PropertyValue,
    /// Display text in the language the list was fetched for
    pub display: String,
}

/// Range of allowed values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintRange {
    pub min: PropertyValue,
    pub max: PropertyValue,
    pub increment: PropertyValue,
}

impl ConstraintRange {
    /// Create a range whose bounds share one type
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the three values differ in type
    pub fn new(min: PropertyValue, max: PropertyValue, increment: PropertyValue) -> Result<Self> {
        let ty = min.property_type();
        for other in [&max, &increment] {
            if other.property_type() != ty {
                return Err(Error::type_mismatch(ty, other.property_type()));
            }
        }
        Ok(Self {
            min,
            max,
            increment,
        })
    }

    /// Whether `value` lies within `[min, max]`
    #[must_use]
    pub fn contains(&self, value: &PropertyValue) -> bool {
        matches!(
            value.compare(&self.min),
            Some(Ordering::Greater | Ordering::Equal)
        ) && matches!(
            value.compare(&self.max),
            Some(Ordering::Less | Ordering::Equal)
        )
    }
}

/// Constraint metadata attached to a property: a list or a range, never both
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constraints {
    List(Vec<ConstraintEntry>),
    Range(ConstraintRange),
}

impl Constraints {
    /// Check a candidate value
    ///
    /// # Errors
    ///
    /// Returns `Constraint` if the value is not in the list or outside the range
    pub fn check(&self, value: &PropertyValue) -> Result<()> {
        match self {
            Self::List(entries) => {
                if entries.iter().any(|e| &e.value == value) {
                    Ok(())
                } else {
                    Err(Error::Constraint(format!("{value} is not an allowed value")))
                }
            }
            Self::Range(range) => {
                if range.contains(value) {
                    Ok(())
                } else {
                    Err(Error::Constraint(format!(
                        "{value} outside [{}, {}]",
                        range.min, range.max
                    )))
                }
            }
        }
    }
}
