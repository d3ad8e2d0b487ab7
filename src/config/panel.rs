//! Panel definitions from the configuration file
//!
//! A panel is a root container with nested widget tables:
//!
//! ```toml
//! [[panels]]
//! name = "main"
//! label = ["Oven", "Ofen"]
//!
//! [[panels.widgets]]
//! kind = "property"
//! name = "temp"
//! label = ["Temperature", "Temperatur"]
//! value = { type = "u16", value = 180 }
//! unit = ["C"]
//! range = { min = { type = "u16", value = 50 }, max = { type = "u16", value = 250 }, increment = { type = "u16", value = 5 } }
//! ```
//!
//! Text fields take either one entry for every language or one per language.
//! Actions defined here have no application behind them; executing one only
//! logs it.

use serde::Deserialize;

use crate::value::{ConstraintRange, Date, PropertyValue, Time};
use crate::widget::{LocalizedText, Widget};
use crate::{Error, Result};

/// One panel: the root container and its widgets
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PanelConfig {
    pub name: String,
    #[serde(default)]
    pub label: Vec<String>,
    #[serde(default)]
    pub secured: bool,
    #[serde(default)]
    pub widgets: Vec<WidgetConfig>,
}

/// Widget kinds a configuration file can declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetKind {
    Container,
    Action,
    ActionWithDialog,
    Dialog,
    Property,
    Label,
}

/// Allowed value with its display text
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChoiceConfig {
    pub value: PropertyValue,
    pub display: Vec<String>,
}

/// A widget table; which fields apply depends on `kind`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WidgetConfig {
    pub kind: WidgetKind,
    pub name: String,
    #[serde(default)]
    pub label: Vec<String>,
    #[serde(default)]
    pub secured: bool,
    pub states: Option<u32>,
    pub bg_color: Option<u32>,
    #[serde(default)]
    pub hints: Vec<u16>,

    /// Initial property value
    pub value: Option<PropertyValue>,
    #[serde(default)]
    pub unit: Vec<String>,
    pub range: Option<ConstraintRange>,
    #[serde(default)]
    pub choices: Vec<ChoiceConfig>,

    /// Label text or dialog message
    #[serde(default)]
    pub text: Vec<String>,
    /// Dialog button labels, one list per action
    #[serde(default)]
    pub actions: Vec<Vec<String>>,

    #[serde(default)]
    pub children: Vec<WidgetConfig>,
}

fn text(texts: &[String]) -> Option<LocalizedText> {
    LocalizedText::from_list(texts.to_vec())
}

/// Re-run the calendar checks serde skipped
fn validate(value: PropertyValue) -> Result<PropertyValue> {
    match value {
        PropertyValue::Date(d) => Ok(PropertyValue::Date(Date::new(d.year, d.month, d.day)?)),
        PropertyValue::Time(t) => Ok(PropertyValue::Time(Time::new(t.hour, t.minute, t.second)?)),
        other => Ok(other),
    }
}

impl PanelConfig {
    /// Build the panel's root container
    ///
    /// # Errors
    ///
    /// Returns `Config` if a widget is missing a field its kind requires, or
    /// the tree error if widgets cannot be nested as declared
    pub fn build(&self) -> Result<Widget> {
        let mut root = Widget::container(&self.name);
        if let Some(label) = text(&self.label) {
            root = root.with_label(label);
        }
        if self.secured {
            root = root.secured();
        }
        for widget in &self.widgets {
            root.add_child(&widget.build()?)?;
        }
        Ok(root)
    }
}

impl WidgetConfig {
    fn missing(&self, field: &str) -> Error {
        Error::Config(format!(
            "{:?} widget {} requires `{field}`",
            self.kind, self.name
        ))
    }

    /// Build the widget and its children
    ///
    /// # Errors
    ///
    /// Returns `Config` for missing required fields, or the tree error
    pub fn build(&self) -> Result<Widget> {
        let widget = self.build_node()?;
        for child in &self.children {
            widget.add_child(&child.build()?)?;
        }
        Ok(widget)
    }

    fn build_node(&self) -> Result<Widget> {
        let name = self.name.clone();
        let mut widget = match self.kind {
            WidgetKind::Container => Widget::container(&self.name),
            WidgetKind::Action => Widget::action(&self.name).on_execute(move || {
                tracing::info!(widget = %name, "action executed");
            }),
            WidgetKind::ActionWithDialog => Widget::action_with_dialog(&self.name),
            WidgetKind::Dialog => self.build_dialog()?,
            WidgetKind::Property => self.build_property()?,
            WidgetKind::Label => {
                Widget::label(&self.name, text(&self.text).ok_or_else(|| self.missing("text"))?)
            }
        };

        if let Some(label) = text(&self.label) {
            widget = widget.with_label(label);
        }
        if self.secured {
            widget = widget.secured();
        }
        if let Some(states) = self.states {
            widget = widget.with_states(states);
        }
        if let Some(color) = self.bg_color {
            widget = widget.with_bg_color(color);
        }
        if !self.hints.is_empty() {
            widget = widget.with_hints(self.hints.clone());
        }
        Ok(widget)
    }

    fn build_dialog(&self) -> Result<Widget> {
        let message = text(&self.text).ok_or_else(|| self.missing("text"))?;
        let mut dialog = Widget::dialog(&self.name, message);
        for (index, labels) in self.actions.iter().enumerate() {
            let label = text(labels).ok_or_else(|| self.missing("actions"))?;
            let name = self.name.clone();
            dialog = dialog.with_dialog_action(label, move || {
                tracing::info!(widget = %name, action = index + 1, "dialog action executed");
            });
        }
        Ok(dialog)
    }

    fn build_property(&self) -> Result<Widget> {
        let initial = validate(self.value.clone().ok_or_else(|| self.missing("value"))?)?;
        let mut property = Widget::property(&self.name, initial);
        if let Some(unit) = text(&self.unit) {
            property = property.with_unit_of_measure(unit);
        }
        if let Some(range) = &self.range {
            let range = ConstraintRange::new(
                range.min.clone(),
                range.max.clone(),
                range.increment.clone(),
            )?;
            property = property.with_constraint_range(range);
        } else if !self.choices.is_empty() {
            let entries = self
                .choices
                .iter()
                .map(|c| {
                    let display = text(&c.display).ok_or_else(|| self.missing("choices.display"))?;
                    Ok((validate(c.value.clone())?, display))
                })
                .collect::<Result<Vec<_>>>()?;
            property = property.with_constraint_list(entries);
        }
        Ok(property)
    }
}
