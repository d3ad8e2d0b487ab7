//! Optional display parameters (`OptParams`)
//!
//! `OptParams` is an `a{qv}` dictionary keyed by small integers. The
//! controllee resolves it per language from an [`OptParamsSource`]; the
//! controller decodes it into [`OptParams`]. Decoding is all-or-nothing: a
//! single malformed entry fails the whole dictionary.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::bus::Variant;
use crate::value::{ConstraintEntry, ConstraintRange, Constraints, PropertyType, PropertyValue};
use crate::{Error, Result};

/// Keys of the `OptParams` dictionary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum OptParamKey {
    Label = 0,
    BackgroundColor = 1,
    Hints = 2,
    UnitOfMeasure = 3,
    ConstraintList = 4,
    ConstraintRange = 5,
    LabelAction1 = 6,
    LabelAction2 = 7,
    LabelAction3 = 8,
}

impl OptParamKey {
    const ACTION_LABELS: [Self; 3] = [Self::LabelAction1, Self::LabelAction2, Self::LabelAction3];

    #[must_use]
    pub const fn from_u16(key: u16) -> Option<Self> {
        Some(match key {
            0 => Self::Label,
            1 => Self::BackgroundColor,
            2 => Self::Hints,
            3 => Self::UnitOfMeasure,
            4 => Self::ConstraintList,
            5 => Self::ConstraintRange,
            6 => Self::LabelAction1,
            7 => Self::LabelAction2,
            8 => Self::LabelAction3,
            _ => return None,
        })
    }
}

/// Text callback invoked with a language index
pub type TextFn = Arc<dyn Fn(usize) -> Option<String> + Send + Sync>;

/// Text that may differ per language
#[derive(Clone)]
pub enum LocalizedText {
    /// Same text in every language
    Uniform(String),
    /// One entry per language index
    PerLanguage(Vec<String>),
    /// Computed on each read
    Dynamic(TextFn),
}

impl LocalizedText {
    /// Text for a language, if any
    #[must_use]
    pub fn get(&self, language_index: usize) -> Option<String> {
        match self {
            Self::Uniform(text) => Some(text.clone()),
            Self::PerLanguage(texts) => texts.get(language_index).cloned(),
            Self::Dynamic(f) => f(language_index),
        }
    }

    /// Build from a list that may hold a single text for all languages
    #[must_use]
    pub fn from_list(mut texts: Vec<String>) -> Option<Self> {
        match texts.len() {
            0 => None,
            1 => texts.pop().map(Self::Uniform),
            _ => Some(Self::PerLanguage(texts)),
        }
    }
}

impl fmt::Debug for LocalizedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uniform(text) => f.debug_tuple("Uniform").field(text).finish(),
            Self::PerLanguage(texts) => f.debug_tuple("PerLanguage").field(texts).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

impl From<&str> for LocalizedText {
    fn from(text: &str) -> Self {
        Self::Uniform(text.to_string())
    }
}

/// Decoded `OptParams` for one language
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OptParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bg_color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Constraints>,
    pub action_labels: [Option<String>; 3],
}

impl OptParams {
    /// Encode as the `a{qv}` dictionary
    #[must_use]
    pub fn to_variant(&self) -> Variant {
        let mut entries = Vec::new();
        if let Some(label) = &self.label {
            entries.push((OptParamKey::Label as u16, Variant::Str(label.clone())));
        }
        if let Some(color) = self.bg_color {
            entries.push((OptParamKey::BackgroundColor as u16, Variant::U32(color)));
        }
        if !self.hints.is_empty() {
            let hints = self.hints.iter().copied().map(Variant::U16).collect();
            entries.push((OptParamKey::Hints as u16, Variant::Array(hints)));
        }
        if let Some(unit) = &self.unit_of_measure {
            entries.push((OptParamKey::UnitOfMeasure as u16, Variant::Str(unit.clone())));
        }
        match &self.constraints {
            Some(Constraints::List(list)) => {
                let items = list
                    .iter()
                    .map(|e| Variant::Struct(vec![e.value.to_variant(), Variant::Str(e.display.clone())]))
                    .collect();
                entries.push((OptParamKey::ConstraintList as u16, Variant::Array(items)));
            }
            Some(Constraints::Range(range)) => {
                let bounds = Variant::Struct(vec![
                    range.min.to_variant(),
                    range.max.to_variant(),
                    range.increment.to_variant(),
                ]);
                entries.push((OptParamKey::ConstraintRange as u16, bounds));
            }
            None => {}
        }
        for (key, label) in OptParamKey::ACTION_LABELS.iter().zip(&self.action_labels) {
            if let Some(label) = label {
                entries.push((*key as u16, Variant::Str(label.clone())));
            }
        }
        Variant::Dict(entries)
    }

    /// Decode the `a{qv}` dictionary
    ///
    /// Unknown keys are skipped. When `value_type` is known, constraint
    /// values must have that type.
    ///
    /// # Errors
    ///
    /// Returns error if the variant is not a dictionary or any known entry
    /// is malformed; nothing is returned in that case
    pub fn from_variant(variant: &Variant, value_type: Option<PropertyType>) -> Result<Self> {
        let entries = variant.as_dict().ok_or_else(|| {
            Error::InvalidPayload(format!("OptParams must be a{{qv}}, got {}", variant.signature()))
        })?;

        let mut params = Self::default();
        for (raw_key, value) in entries {
            let Some(key) = OptParamKey::from_u16(*raw_key) else {
                tracing::debug!(key = raw_key, "skipping unknown OptParams key");
                continue;
            };
            match key {
                OptParamKey::Label => params.label = Some(expect_str(key, value)?),
                OptParamKey::BackgroundColor => {
                    params.bg_color = Some(value.as_u32().ok_or_else(|| malformed(key, value))?);
                }
                OptParamKey::Hints => {
                    let items = value.as_array().ok_or_else(|| malformed(key, value))?;
                    params.hints = items
                        .iter()
                        .map(|h| h.as_u16().ok_or_else(|| malformed(key, h)))
                        .collect::<Result<_>>()?;
                }
                OptParamKey::UnitOfMeasure => params.unit_of_measure = Some(expect_str(key, value)?),
                OptParamKey::ConstraintList => {
                    if params.constraints.is_some() {
                        return Err(both_constraints());
                    }
                    params.constraints = Some(Constraints::List(decode_list(value, value_type)?));
                }
                OptParamKey::ConstraintRange => {
                    if params.constraints.is_some() {
                        return Err(both_constraints());
                    }
                    params.constraints = Some(Constraints::Range(decode_range(value, value_type)?));
                }
                OptParamKey::LabelAction1 | OptParamKey::LabelAction2 | OptParamKey::LabelAction3 => {
                    let index = usize::from(*raw_key - OptParamKey::LabelAction1 as u16);
                    params.action_labels[index] = Some(expect_str(key, value)?);
                }
            }
        }
        Ok(params)
    }
}

fn malformed(key: OptParamKey, value: &Variant) -> Error {
    Error::InvalidPayload(format!(
        "OptParams {key:?} has unexpected type {}",
        value.signature()
    ))
}

fn both_constraints() -> Error {
    Error::InvalidPayload("OptParams carries both a constraint list and a range".to_string())
}

fn expect_str(key: OptParamKey, value: &Variant) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| malformed(key, value))
}

fn decode_constraint_value(
    variant: &Variant,
    value_type: Option<PropertyType>,
) -> Result<PropertyValue> {
    match value_type {
        Some(ty) => PropertyValue::from_variant_as(variant, ty),
        None => PropertyValue::from_variant(variant),
    }
}

fn decode_list(value: &Variant, value_type: Option<PropertyType>) -> Result<Vec<ConstraintEntry>> {
    let key = OptParamKey::ConstraintList;
    let items = value.as_array().ok_or_else(|| malformed(key, value))?;
    items
        .iter()
        .map(|item| {
            let [v, display] = item.as_struct().ok_or_else(|| malformed(key, item))? else {
                return Err(malformed(key, item));
            };
            Ok(ConstraintEntry {
                value: decode_constraint_value(v, value_type)?,
                display: expect_str(key, display)?,
            })
        })
        .collect()
}

fn decode_range(value: &Variant, value_type: Option<PropertyType>) -> Result<ConstraintRange> {
    let key = OptParamKey::ConstraintRange;
    let [min, max, increment] = value.as_struct().ok_or_else(|| malformed(key, value))? else {
        return Err(malformed(key, value));
    };
    ConstraintRange::new(
        decode_constraint_value(min, value_type)?,
        decode_constraint_value(max, value_type)?,
        decode_constraint_value(increment, value_type)?,
    )
}

/// Controllee-side definition of a widget's `OptParams`
#[derive(Debug, Clone, Default)]
pub struct OptParamsSource {
    pub label: Option<LocalizedText>,
    pub bg_color: Option<u32>,
    pub hints: Vec<u16>,
    pub unit_of_measure: Option<LocalizedText>,
    pub constraint_list: Vec<(PropertyValue, LocalizedText)>,
    pub constraint_range: Option<ConstraintRange>,
    pub action_labels: [Option<LocalizedText>; 3],
}

impl OptParamsSource {
    /// Resolve the parameters for one language
    ///
    /// Runs every text callback, so never call this under a widget lock.
    #[must_use]
    pub fn resolve(&self, language_index: usize) -> OptParams {
        let text = |t: &Option<LocalizedText>| t.as_ref().and_then(|t| t.get(language_index));
        let constraints =
            self.constraints_with(|display| display.get(language_index).unwrap_or_default());
        OptParams {
            label: text(&self.label),
            bg_color: self.bg_color,
            hints: self.hints.clone(),
            unit_of_measure: text(&self.unit_of_measure),
            constraints,
            action_labels: [
                text(&self.action_labels[0]),
                text(&self.action_labels[1]),
                text(&self.action_labels[2]),
            ],
        }
    }

    /// Constraints for value checks, with empty display texts
    ///
    /// Touches no text callback.
    #[must_use]
    pub fn value_constraints(&self) -> Option<Constraints> {
        self.constraints_with(|_| String::new())
    }

    fn constraints_with(&self, display: impl Fn(&LocalizedText) -> String) -> Option<Constraints> {
        if let Some(range) = &self.constraint_range {
            return Some(Constraints::Range(range.clone()));
        }
        if self.constraint_list.is_empty() {
            return None;
        }
        Some(Constraints::List(
            self.constraint_list
                .iter()
                .map(|(value, text)| ConstraintEntry {
                    value: value.clone(),
                    display: display(text),
                })
                .collect(),
        ))
    }
}
