//! Inbound call handlers for published objects
//!
//! One [`WidgetObject`] serves one widget in one language. It holds the
//! widget weakly so a forgotten publication never keeps a tree alive.

use std::sync::Arc;

use super::emit_to_sessions;
use crate::bus::{BusError, CallContext, InterfaceDescription, ObjectHandler, Variant};
use crate::catalog::{CONTROL_PANEL_INTERFACE, INTERFACE_VERSION, WidgetType, member};
use crate::value::PropertyValue;
use crate::widget::{OptParams, Payload, STATE_ENABLED, STATE_WRITABLE, Side, WeakWidget, Widget};

fn invalid_value(e: impl ToString) -> BusError {
    BusError::new(BusError::INVALID_VALUE, e.to_string())
}

fn read_only(property: &str) -> BusError {
    BusError::new(
        BusError::READ_ONLY,
        format!("property is read-only: {property}"),
    )
}

/// Handler behind one widget object
pub(crate) struct WidgetObject {
    widget: WeakWidget,
    language_index: usize,
    interface: Arc<InterfaceDescription>,
}

impl WidgetObject {
    pub(crate) fn new(widget: &Widget, language_index: usize, interface: Arc<InterfaceDescription>) -> Self {
        Self {
            widget: widget.downgrade(),
            language_index,
            interface,
        }
    }

    fn widget(&self) -> Result<Widget, BusError> {
        self.widget
            .upgrade()
            .ok_or_else(|| BusError::new(BusError::NO_SUCH_OBJECT, "widget was dropped"))
    }

    fn check_interface(&self, interface: &str) -> Result<(), BusError> {
        if interface == self.interface.name {
            Ok(())
        } else {
            Err(BusError::new(BusError::NO_SUCH_INTERFACE, interface.to_string()))
        }
    }

    fn read(&self, widget: &Widget, property: &str) -> Result<Variant, BusError> {
        let index = self.language_index;
        // Callbacks may read the widget back, so they run without its lock
        let value = match (property, widget.widget_type()) {
            (member::STATES, _) => Some(Variant::U32(widget.states())),
            (member::OPT_PARAMS, _) => widget.opt_params(index).as_ref().map(OptParams::to_variant),
            (member::MESSAGE, WidgetType::Dialog) => {
                Some(Variant::Str(widget.message(index).unwrap_or_default()))
            }
            (member::LABEL, WidgetType::Label) => {
                Some(Variant::Str(widget.text(index).unwrap_or_default()))
            }
            _ => {
                let data = widget.read();
                match (property, &data.payload) {
                    (member::VERSION, _) => Some(Variant::U16(data.version)),
                    (member::VALUE, Payload::Property { value, .. }) => {
                        value.as_ref().map(PropertyValue::to_variant)
                    }
                    (member::NUM_ACTIONS, Payload::Dialog { num_actions, .. }) => {
                        Some(Variant::U16(*num_actions))
                    }
                    _ => None,
                }
            }
        };
        value.ok_or_else(|| BusError::no_such_property(property))
    }

    /// Validate a remote write and store it
    fn write_value(&self, ctx: &CallContext<'_>, widget: &Widget, raw: &Variant) -> Result<(), BusError> {
        if widget.states() & STATE_WRITABLE == 0 {
            return Err(read_only(member::VALUE));
        }
        let (new, hook) = {
            let data = widget.read();
            let Payload::Property {
                value_type,
                on_change,
                ..
            } = &data.payload
            else {
                return Err(BusError::no_such_property(member::VALUE));
            };
            let new = match value_type {
                Some(expected) => PropertyValue::from_variant_as(raw, *expected),
                None => PropertyValue::from_variant(raw),
            }
            .map_err(invalid_value)?;
            if let Some(constraints) = data.constraints(Side::Controllee) {
                constraints.check(&new).map_err(invalid_value)?;
            }
            (new, on_change.clone())
        };

        if let Some(hook) = hook {
            hook(&new).map_err(invalid_value)?;
        }
        widget.assign_value(new.clone()).map_err(invalid_value)?;
        tracing::debug!(widget = %widget.name(), value = %new, sender = ctx.sender, "value set remotely");

        emit_to_sessions(ctx.bus, widget, member::VALUE_CHANGED, &[new.to_variant()]);
        Ok(())
    }
}

impl ObjectHandler for WidgetObject {
    fn get_property(
        &self,
        _ctx: &CallContext<'_>,
        interface: &str,
        property: &str,
    ) -> Result<Variant, BusError> {
        self.check_interface(interface)?;
        self.read(&self.widget()?, property)
    }

    fn get_all_properties(
        &self,
        _ctx: &CallContext<'_>,
        interface: &str,
    ) -> Result<Vec<(String, Variant)>, BusError> {
        self.check_interface(interface)?;
        let widget = self.widget()?;
        self.interface
            .properties
            .iter()
            .map(|p| Ok((p.name.clone(), self.read(&widget, &p.name)?)))
            .collect()
    }

    fn set_property(
        &self,
        ctx: &CallContext<'_>,
        interface: &str,
        property: &str,
        value: Variant,
    ) -> Result<(), BusError> {
        self.check_interface(interface)?;
        if property != member::VALUE {
            return Err(read_only(property));
        }
        self.write_value(ctx, &self.widget()?, &value)
    }

    fn call_method(
        &self,
        ctx: &CallContext<'_>,
        interface: &str,
        method: &str,
        _args: Vec<Variant>,
    ) -> Result<Vec<Variant>, BusError> {
        self.check_interface(interface)?;
        let widget = self.widget()?;
        let handler = if widget.states() & STATE_ENABLED == 0 {
            None
        } else {
            let data = widget.read();
            match &data.payload {
                // An action that opens a dialog has nothing to execute itself
                Payload::Action { on_execute }
                    if method == member::EXEC && widget.widget_type() == WidgetType::Action =>
                {
                    on_execute.clone()
                }
                Payload::Dialog {
                    num_actions,
                    actions,
                    ..
                } => member::DIALOG_ACTIONS
                    .iter()
                    .position(|name| *name == method)
                    .filter(|index| *index < usize::from(*num_actions))
                    .and_then(|index| actions[index].clone()),
                _ => None,
            }
        };

        let Some(handler) = handler else {
            tracing::debug!(widget = %widget.name(), method, "method rejected");
            return Err(BusError::method_not_allowed(method));
        };
        tracing::debug!(widget = %widget.name(), method, sender = ctx.sender, "executing");
        handler();
        Ok(Vec::new())
    }
}

/// Handler behind a panel object; serves only `Version`
pub(crate) struct PanelObject;

impl ObjectHandler for PanelObject {
    fn get_property(
        &self,
        _ctx: &CallContext<'_>,
        interface: &str,
        property: &str,
    ) -> Result<Variant, BusError> {
        if interface == CONTROL_PANEL_INTERFACE && property == member::VERSION {
            Ok(Variant::U16(INTERFACE_VERSION))
        } else {
            Err(BusError::no_such_property(property))
        }
    }

    fn get_all_properties(
        &self,
        ctx: &CallContext<'_>,
        interface: &str,
    ) -> Result<Vec<(String, Variant)>, BusError> {
        let version = self.get_property(ctx, interface, member::VERSION)?;
        Ok(vec![(member::VERSION.to_string(), version)])
    }

    fn set_property(
        &self,
        _ctx: &CallContext<'_>,
        _interface: &str,
        property: &str,
        _value: Variant,
    ) -> Result<(), BusError> {
        Err(read_only(property))
    }

    fn call_method(
        &self,
        _ctx: &CallContext<'_>,
        _interface: &str,
        method: &str,
        _args: Vec<Variant>,
    ) -> Result<Vec<Variant>, BusError> {
        Err(BusError::method_not_allowed(method))
    }
}
