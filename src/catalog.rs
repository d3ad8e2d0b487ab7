//! Interface catalog
//!
//! Static table mapping control panel interface names to widget types, and
//! the interface descriptions each widget type publishes. Classification is
//! a pure lookup plus one structural test: an `Action` node that has
//! children is an `ActionWithDialog`.

use std::fmt;

use std::sync::Arc;

use serde::Serialize;

use crate::bus::{Access, Bus, BusError, InterfaceDescription};

/// Interface version this crate implements
pub const INTERFACE_VERSION: u16 = 1;

pub const CONTROL_PANEL_INTERFACE: &str = "org.alljoyn.ControlPanel.ControlPanel";
pub const CONTAINER_INTERFACE: &str = "org.alljoyn.ControlPanel.Container";
pub const SECURED_CONTAINER_INTERFACE: &str = "org.alljoyn.ControlPanel.SecuredContainer";
pub const ACTION_INTERFACE: &str = "org.alljoyn.ControlPanel.Action";
pub const SECURED_ACTION_INTERFACE: &str = "org.alljoyn.ControlPanel.SecuredAction";
pub const DIALOG_INTERFACE: &str = "org.alljoyn.ControlPanel.Dialog";
pub const SECURED_DIALOG_INTERFACE: &str = "org.alljoyn.ControlPanel.SecuredDialog";
pub const PROPERTY_INTERFACE: &str = "org.alljoyn.ControlPanel.Property";
pub const SECURED_PROPERTY_INTERFACE: &str = "org.alljoyn.ControlPanel.SecuredProperty";
pub const LABEL_INTERFACE: &str = "org.alljoyn.ControlPanel.LabelProperty";

/// Member names shared by the widget interfaces
pub mod member {
    pub const VERSION: &str = "Version";
    pub const STATES: &str = "States";
    pub const OPT_PARAMS: &str = "OptParams";
    pub const VALUE: &str = "Value";
    pub const LABEL: &str = "Label";
    pub const MESSAGE: &str = "Message";
    pub const NUM_ACTIONS: &str = "NumActions";
    pub const EXEC: &str = "Exec";
    pub const METADATA_CHANGED: &str = "MetadataChanged";
    pub const VALUE_CHANGED: &str = "ValueChanged";
    /// Dialog action methods, indexed from zero
    pub const DIALOG_ACTIONS: [&str; 3] = ["Action1", "Action2", "Action3"];
}

/// Kind of a widget, selected from the interfaces a node exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetType {
    Container,
    Action,
    ActionWithDialog,
    Dialog,
    Property,
    Label,
    /// Placeholder for a node that failed to materialize
    Error,
}

impl WidgetType {
    /// Whether widgets of this type own children
    #[must_use]
    pub const fn has_children(self) -> bool {
        matches!(self, Self::Container | Self::Dialog | Self::ActionWithDialog)
    }
}

impl fmt::Display for WidgetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Container => "container",
            Self::Action => "action",
            Self::ActionWithDialog => "action_with_dialog",
            Self::Dialog => "dialog",
            Self::Property => "property",
            Self::Label => "label",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// One catalog row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    pub interface: &'static str,
    pub widget_type: WidgetType,
    pub secured: bool,
    pub version: u16,
}

const ENTRIES: &[CatalogEntry] = &[
    entry(CONTAINER_INTERFACE, WidgetType::Container, false),
    entry(SECURED_CONTAINER_INTERFACE, WidgetType::Container, true),
    entry(ACTION_INTERFACE, WidgetType::Action, false),
    entry(SECURED_ACTION_INTERFACE, WidgetType::Action, true),
    entry(DIALOG_INTERFACE, WidgetType::Dialog, false),
    entry(SECURED_DIALOG_INTERFACE, WidgetType::Dialog, true),
    entry(PROPERTY_INTERFACE, WidgetType::Property, false),
    entry(SECURED_PROPERTY_INTERFACE, WidgetType::Property, true),
    entry(LABEL_INTERFACE, WidgetType::Label, false),
];

const fn entry(interface: &'static str, widget_type: WidgetType, secured: bool) -> CatalogEntry {
    CatalogEntry {
        interface,
        widget_type,
        secured,
        version: INTERFACE_VERSION,
    }
}

/// Result of classifying a remote node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub widget_type: WidgetType,
    pub secured: bool,
    /// The catalog interface that matched
    pub interface: &'static str,
}

/// Lookup table between interface names and widget types
#[derive(Debug, Clone, Copy, Default)]
pub struct Catalog;

impl Catalog {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// All catalog rows
    #[must_use]
    pub const fn entries(&self) -> &'static [CatalogEntry] {
        ENTRIES
    }

    /// Classify a node from its interface names
    ///
    /// Names outside the catalog are ignored; `None` means the node is not
    /// a widget and should be skipped.
    #[must_use]
    pub fn classify<'a, I>(&self, interfaces: I, has_children: bool) -> Option<Classification>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let names: Vec<&str> = interfaces.into_iter().collect();
        let found = ENTRIES.iter().find(|e| names.contains(&e.interface))?;
        let widget_type = match found.widget_type {
            WidgetType::Action if has_children => WidgetType::ActionWithDialog,
            other => other,
        };
        Some(Classification {
            widget_type,
            secured: found.secured,
            interface: found.interface,
        })
    }

    /// Interface a widget of this type publishes
    ///
    /// Labels have no secured variant and always use the plain interface.
    #[must_use]
    pub fn interface_name(&self, widget_type: WidgetType, secured: bool) -> Option<&'static str> {
        let lookup = match widget_type {
            WidgetType::ActionWithDialog => WidgetType::Action,
            WidgetType::Label => return Some(LABEL_INTERFACE),
            WidgetType::Error => return None,
            other => other,
        };
        ENTRIES
            .iter()
            .find(|e| e.widget_type == lookup && e.secured == secured)
            .map(|e| e.interface)
    }

    /// Version this crate implements for an interface
    #[must_use]
    pub fn local_version(&self, interface: &str) -> Option<u16> {
        if interface == CONTROL_PANEL_INTERFACE {
            return Some(INTERFACE_VERSION);
        }
        ENTRIES
            .iter()
            .find(|e| e.interface == interface)
            .map(|e| e.version)
    }

    /// Interface description published for a widget type
    #[must_use]
    pub fn description(&self, widget_type: WidgetType, secured: bool) -> Option<InterfaceDescription> {
        let name = self.interface_name(widget_type, secured)?;
        let secure = secured && widget_type != WidgetType::Label;
        let base = InterfaceDescription::new(name, secure)
            .property(member::VERSION, "q", Access::Read)
            .property(member::STATES, "u", Access::Read)
            .property(member::OPT_PARAMS, "a{qv}", Access::Read)
            .signal(member::METADATA_CHANGED);

        let description = match widget_type {
            WidgetType::Container | WidgetType::Error => base,
            WidgetType::Action | WidgetType::ActionWithDialog => base.method(member::EXEC),
            WidgetType::Dialog => member::DIALOG_ACTIONS.iter().fold(
                base.property(member::MESSAGE, "s", Access::Read)
                    .property(member::NUM_ACTIONS, "q", Access::Read),
                |iface, action| iface.method(action),
            ),
            WidgetType::Property => base
                .property(member::VALUE, "v", Access::ReadWrite)
                .signal(member::VALUE_CHANGED),
            WidgetType::Label => base.property(member::LABEL, "s", Access::Read),
        };
        Some(description)
    }

    /// Get or create the bus-wide description for a widget type
    ///
    /// Descriptions are keyed by interface name, so every widget of one
    /// type on a bus shares a single instance.
    ///
    /// # Errors
    ///
    /// Returns error if the type has no interface or the bus rejects it
    pub fn shared_description(
        &self,
        bus: &dyn Bus,
        widget_type: WidgetType,
        secured: bool,
    ) -> crate::Result<Arc<InterfaceDescription>> {
        let description = self.description(widget_type, secured).ok_or_else(|| {
            crate::Error::NotImplemented(format!("{widget_type} widgets have no interface"))
        })?;
        Ok(get_or_add(bus, description)?)
    }

    /// Get or create the bus-wide panel object description
    ///
    /// # Errors
    ///
    /// Returns error if the bus rejects the description
    pub fn shared_panel_description(
        &self,
        bus: &dyn Bus,
    ) -> Result<Arc<InterfaceDescription>, BusError> {
        get_or_add(bus, self.panel_description())
    }

    /// Interface description of the panel object that groups language roots
    #[must_use]
    pub fn panel_description(&self) -> InterfaceDescription {
        InterfaceDescription::new(CONTROL_PANEL_INTERFACE, false).property(
            member::VERSION,
            "q",
            Access::Read,
        )
    }
}

fn get_or_add(
    bus: &dyn Bus,
    description: InterfaceDescription,
) -> Result<Arc<InterfaceDescription>, BusError> {
    if let Some(existing) = bus.interface(&description.name) {
        return Ok(existing);
    }
    let name = description.name.clone();
    match bus.add_interface(description) {
        Ok(added) => Ok(added),
        // Lost a race with another registration
        Err(e) if e.name == BusError::DUPLICATE => bus.interface(&name).ok_or(e),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_every_catalog_name() {
        let catalog = Catalog::new();
        for entry in catalog.entries() {
            let class = catalog.classify([entry.interface], false).unwrap();
            assert_eq!(class.widget_type, entry.widget_type, "{}", entry.interface);
            assert_eq!(class.secured, entry.secured, "{}", entry.interface);
        }
    }

    #[test]
    fn action_with_children_is_action_with_dialog() {
        let catalog = Catalog::new();
        let class = catalog.classify([ACTION_INTERFACE], true).unwrap();
        assert_eq!(class.widget_type, WidgetType::ActionWithDialog);
        let class = catalog.classify([SECURED_ACTION_INTERFACE], true).unwrap();
        assert_eq!(class.widget_type, WidgetType::ActionWithDialog);
        assert!(class.secured);

        // Only actions are promoted
        let class = catalog.classify([CONTAINER_INTERFACE], true).unwrap();
        assert_eq!(class.widget_type, WidgetType::Container);
    }

    #[test]
    fn unknown_names_are_unknown() {
        let catalog = Catalog::new();
        assert!(catalog.classify(["org.example.Nope"], false).is_none());
        assert!(catalog.classify([CONTROL_PANEL_INTERFACE], true).is_none());
        assert!(catalog.classify(std::iter::empty(), false).is_none());
    }

    #[test]
    fn foreign_interfaces_are_ignored() {
        let catalog = Catalog::new();
        let class = catalog
            .classify(
                ["org.freedesktop.DBus.Introspectable", PROPERTY_INTERFACE],
                false,
            )
            .unwrap();
        assert_eq!(class.widget_type, WidgetType::Property);
    }

    #[test]
    fn interface_names_round_trip() {
        let catalog = Catalog::new();
        for entry in catalog.entries() {
            let name = catalog
                .interface_name(entry.widget_type, entry.secured)
                .unwrap();
            assert_eq!(name, entry.interface);
        }
        assert_eq!(
            catalog.interface_name(WidgetType::Label, true),
            Some(LABEL_INTERFACE)
        );
        assert_eq!(
            catalog.interface_name(WidgetType::ActionWithDialog, false),
            Some(ACTION_INTERFACE)
        );
        assert_eq!(catalog.interface_name(WidgetType::Error, false), None);
    }

    #[test]
    fn descriptions_carry_type_members() {
        let catalog = Catalog::new();
        let property = catalog.description(WidgetType::Property, true).unwrap();
        assert!(property.secure);
        assert_eq!(
            property.find_property(member::VALUE).unwrap().access,
            Access::ReadWrite
        );
        assert!(property.signals.iter().any(|s| s == member::VALUE_CHANGED));

        let dialog = catalog.description(WidgetType::Dialog, false).unwrap();
        assert_eq!(dialog.methods, vec!["Action1", "Action2", "Action3"]);
        assert!(dialog.find_property(member::NUM_ACTIONS).is_some());

        let label = catalog.description(WidgetType::Label, true).unwrap();
        assert!(!label.secure);
    }

    #[test]
    fn shared_descriptions_are_reused() {
        let hub = crate::bus::MemoryHub::new();
        let bus = hub.connect("oven").unwrap();
        let catalog = Catalog::new();
        let a = catalog
            .shared_description(&bus, WidgetType::Property, false)
            .unwrap();
        let b = catalog
            .shared_description(&bus, WidgetType::Property, false)
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(
            catalog
                .shared_description(&bus, WidgetType::Error, false)
                .is_err()
        );
    }

    #[test]
    fn local_versions() {
        let catalog = Catalog::new();
        assert_eq!(catalog.local_version(CONTAINER_INTERFACE), Some(1));
        assert_eq!(catalog.local_version(CONTROL_PANEL_INTERFACE), Some(1));
        assert_eq!(catalog.local_version("org.example.Nope"), None);
    }
}
