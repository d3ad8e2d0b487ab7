//! Dynamically typed values carried by the bus

use std::fmt;

use serde::Serialize;

/// A value as it travels over the bus
///
/// Mirrors the small subset of bus types the control panel interfaces use:
/// fixed-width integers, doubles, strings, booleans, structs, arrays and the
/// `a{qv}` dictionary used by `OptParams`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "sig", content = "value")]
pub enum Variant {
    Bool(bool),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F64(f64),
    Str(String),
    Struct(Vec<Variant>),
    Array(Vec<Variant>),
    Dict(Vec<(u16, Variant)>),
}

impl Variant {
    /// Bus type signature of this value
    #[must_use]
    pub fn signature(&self) -> String {
        match self {
            Self::Bool(_) => "b".to_string(),
            Self::U16(_) => "q".to_string(),
            Self::I16(_) => "n".to_string(),
            Self::U32(_) => "u".to_string(),
            Self::I32(_) => "i".to_string(),
            Self::U64(_) => "t".to_string(),
            Self::I64(_) => "x".to_string(),
            Self::F64(_) => "d".to_string(),
            Self::Str(_) => "s".to_string(),
            Self::Struct(fields) => {
                let inner: String = fields.iter().map(Self::signature).collect();
                format!("({inner})")
            }
            // Element type is only known from the first element; empty arrays are `av`
            Self::Array(items) => items
                .first()
                .map_or_else(|| "av".to_string(), |first| format!("a{}", first.signature())),
            Self::Dict(_) => "a{qv}".to_string(),
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_u16(&self) -> Option<u16> {
        match self {
            Self::U16(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U32(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_struct(&self) -> Option<&[Self]> {
        match self {
            Self::Struct(fields) => Some(fields),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[Self]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_dict(&self) -> Option<&[(u16, Self)]> {
        match self {
            Self::Dict(entries) => Some(entries),
            _ => None,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::U16(v) => write!(f, "{v}"),
            Self::I16(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v:?}"),
            Self::Struct(fields) => {
                write!(f, "(")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{field}")?;
                }
                write!(f, ")")
            }
            Self::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Dict(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}
