//! Controller-side operations on mirrored widgets
//!
//! A fill reads every property of one language's object in a single
//! `GetAll` and applies the result atomically: if any value fails to decode
//! nothing is stored and the previous state stays visible.

use super::{LanguageCache, OptParams, Payload, Side, Widget, check_type};
use crate::bus::Variant;
use crate::catalog::{WidgetType, member};
use crate::value::{PropertyType, PropertyValue};
use crate::{Error, Result};

const MAX_DIALOG_ACTIONS: u16 = 3;

/// Decoded `GetAll` result, not yet applied
#[derive(Default)]
struct Fetched {
    version: Option<u16>,
    states: Option<u32>,
    opt_params: Option<OptParams>,
    value: Option<PropertyValue>,
    message: Option<String>,
    num_actions: Option<u16>,
    text: Option<String>,
}

fn malformed(property: &str, value: &Variant) -> Error {
    Error::InvalidPayload(format!(
        "{property} has unexpected type {}",
        value.signature()
    ))
}

fn decode_value(variant: &Variant, value_type: Option<PropertyType>) -> Result<PropertyValue> {
    match value_type {
        Some(ty) => PropertyValue::from_variant_as(variant, ty),
        None => PropertyValue::from_variant(variant),
    }
}

impl Widget {
    fn require_controller(&self, operation: &str) -> Result<()> {
        match self.side() {
            Side::Controller => Ok(()),
            Side::Controllee => Err(Error::NotImplemented(format!(
                "{operation} on controllee widget {}",
                self.name()
            ))),
        }
    }

    /// Decode and apply one language's properties
    ///
    /// # Errors
    ///
    /// Returns `VersionMismatch` if the remote version is newer than
    /// `local_version`, or a decoding error; nothing is applied on error
    pub(crate) fn apply_properties(
        &self,
        language_index: usize,
        interface: &str,
        local_version: u16,
        properties: &[(String, Variant)],
    ) -> Result<()> {
        let known_type = self.property_type();
        let mut fetched = Fetched::default();
        let mut raw_opt_params = None;

        for (name, value) in properties {
            match name.as_str() {
                member::VERSION => {
                    fetched.version = Some(value.as_u16().ok_or_else(|| malformed(name, value))?);
                }
                member::STATES => {
                    fetched.states = Some(value.as_u32().ok_or_else(|| malformed(name, value))?);
                }
                member::OPT_PARAMS => raw_opt_params = Some(value),
                member::VALUE if self.widget_type() == WidgetType::Property => {
                    fetched.value = Some(decode_value(value, known_type)?);
                }
                member::MESSAGE => {
                    fetched.message = Some(value.as_str().ok_or_else(|| malformed(name, value))?.to_string());
                }
                member::NUM_ACTIONS => {
                    fetched.num_actions = Some(value.as_u16().ok_or_else(|| malformed(name, value))?);
                }
                member::LABEL => {
                    fetched.text = Some(value.as_str().ok_or_else(|| malformed(name, value))?.to_string());
                }
                other => tracing::trace!(widget = %self.name(), property = other, "ignoring property"),
            }
        }

        if let Some(remote) = fetched.version {
            if remote > local_version {
                return Err(Error::VersionMismatch {
                    interface: interface.to_string(),
                    remote,
                    local: local_version,
                });
            }
        }

        if let Some(raw) = raw_opt_params {
            let value_type = known_type.or_else(|| fetched.value.as_ref().map(PropertyValue::property_type));
            fetched.opt_params = Some(OptParams::from_variant(raw, value_type)?);
        }

        let mut guard = self.write();
        let data = &mut *guard;
        if let (Payload::Property { value_type, .. }, Some(new)) = (&mut data.payload, &fetched.value) {
            check_type(value_type, new)?;
        }

        if let Some(version) = fetched.version {
            data.version = version;
        }
        if let Some(states) = fetched.states {
            data.states = states;
        }
        if data.cache.len() <= language_index {
            data.cache.resize_with(language_index + 1, LanguageCache::default);
        }
        let cache = &mut data.cache[language_index];
        if let Some(params) = fetched.opt_params {
            cache.opt_params = params;
        }
        if fetched.message.is_some() {
            cache.message = fetched.message;
        }
        if fetched.text.is_some() {
            cache.text = fetched.text;
        }
        match &mut data.payload {
            Payload::Property { value, .. } => {
                if let Some(new) = fetched.value {
                    *value = Some(new);
                }
            }
            Payload::Dialog { num_actions, .. } => {
                if let Some(count) = fetched.num_actions {
                    *num_actions = count;
                }
            }
            _ => {}
        }
        data.filled = true;
        Ok(())
    }

    /// Batch re-fetch one language
    pub(crate) async fn fill(&self, language_index: usize) -> Result<()> {
        self.ensure_registered()?;
        let proxy = self.proxy(language_index)?;
        let properties = proxy.get_all_properties().await?;
        self.ensure_registered()?;
        self.apply_properties(
            language_index,
            proxy.interface_name(),
            proxy.local_version(),
            &properties,
        )?;
        tracing::trace!(widget = %self.name(), language_index, "filled");
        Ok(())
    }

    /// Re-fetch every language and wait for the result
    ///
    /// # Errors
    ///
    /// Returns `NotRegistered` if the widget is not registered, or the first
    /// fetch or decoding error
    pub async fn refresh(&self) -> Result<()> {
        self.require_controller("refresh")?;
        self.ensure_registered()?;
        for index in 0..self.binding_count() {
            self.fill(index).await?;
        }
        Ok(())
    }

    /// Write a new property value to the remote object
    ///
    /// The value is checked against the fixed type and the cached
    /// constraints first. The local cache is not touched; it follows the
    /// `ValueChanged` signal the controllee emits on success.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` or `Constraint` before any remote call, or the
    /// remote error
    pub async fn set_value(&self, value: PropertyValue) -> Result<()> {
        self.require_controller("set_value")?;
        self.ensure_registered()?;
        {
            let data = self.read();
            let Payload::Property { value_type, .. } = &data.payload else {
                return Err(Error::NotImplemented(format!("{} is not a property", self.name())));
            };
            if let Some(expected) = value_type {
                if *expected != value.property_type() {
                    return Err(Error::type_mismatch(expected, value.property_type()));
                }
            }
            if let Some(constraints) = data.constraints(Side::Controller) {
                constraints.check(&value)?;
            }
        }
        let proxy = self.proxy(0)?;
        tracing::debug!(widget = %self.name(), value = %value, "setting remote value");
        proxy.set_property(member::VALUE, value.to_variant()).await
    }

    /// Execute an action
    ///
    /// # Errors
    ///
    /// Returns `NotImplemented` unless this is a plain action, or the remote error
    pub async fn execute(&self) -> Result<()> {
        self.require_controller("execute")?;
        if self.widget_type() != WidgetType::Action {
            return Err(Error::NotImplemented(format!(
                "{} widget {} cannot execute",
                self.widget_type(),
                self.name()
            )));
        }
        self.ensure_registered()?;
        self.proxy(0)?.call(member::EXEC).await?;
        Ok(())
    }

    /// Execute dialog action `action` (1-based)
    ///
    /// # Errors
    ///
    /// Returns `NotImplemented` without a remote call if the dialog offers
    /// fewer than `action` actions, or the remote error
    pub async fn execute_action(&self, action: u16) -> Result<()> {
        self.require_controller("execute_action")?;
        let available = self.num_actions().ok_or_else(|| {
            Error::NotImplemented(format!("{} is not a dialog", self.name()))
        })?;
        if action == 0 || action > available.min(MAX_DIALOG_ACTIONS) {
            return Err(Error::NotImplemented(format!(
                "{} offers {available} actions, action {action} requested",
                self.name()
            )));
        }
        self.ensure_registered()?;
        let method = member::DIALOG_ACTIONS[usize::from(action - 1)];
        self.proxy(0)?.call(method).await?;
        Ok(())
    }

    /// Apply a `ValueChanged` payload without a round trip
    pub(crate) fn apply_value_changed(&self, args: &[Variant]) -> Result<PropertyValue> {
        self.ensure_registered()?;
        let [arg] = args else {
            return Err(Error::InvalidPayload(format!(
                "ValueChanged carries {} arguments",
                args.len()
            )));
        };
        let mut data = self.write();
        let Payload::Property {
            value, value_type, ..
        } = &mut data.payload
        else {
            return Err(Error::NotImplemented(format!("{} is not a property", self.name())));
        };
        let new = decode_value(arg, *value_type)?;
        check_type(value_type, &new)?;
        *value = Some(new.clone());
        Ok(new)
    }
}
