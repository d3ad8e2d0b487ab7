//! Controllee side: publishes widget trees and propagates their changes
//!
//! The application builds a tree of [`Widget`]s, hands its root container to
//! [`Controllee::publish_panel`], and later calls
//! [`Controllee::notify_changed`] or [`Controllee::update_value`] whenever
//! something a controller may be showing has changed.

mod handler;
mod registrar;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::bus::{Bus, ObjectPath, Variant};
use crate::catalog::{Catalog, WidgetType, member};
use crate::config::Config;
use crate::path::PanelLocation;
use crate::value::PropertyValue;
use crate::widget::{Side, Widget};
use crate::{Error, Result};

use handler::PanelObject;
use registrar::Registrar;

struct PublishedPanel {
    location: PanelLocation,
    root: Widget,
}

/// Publishes panels on a bus
pub struct Controllee {
    bus: Arc<dyn Bus>,
    catalog: Catalog,
    prefix: String,
    unit: String,
    languages: Vec<String>,
    panels: Mutex<Vec<PublishedPanel>>,
}

impl Controllee {
    /// Create a controllee publishing under the configured unit and languages
    ///
    /// # Errors
    ///
    /// Returns `Config` if no language is configured, or `MalformedPath` if
    /// the prefix or unit cannot form object paths
    pub fn new(bus: Arc<dyn Bus>, config: &Config) -> Result<Self> {
        if config.languages.is_empty() {
            return Err(Error::Config("at least one language is required".to_string()));
        }
        // Validates prefix and unit up front
        PanelLocation::new(&config.prefix, &config.unit, "check")?;
        tracing::debug!(
            bus = %bus.unique_name(),
            unit = %config.unit,
            languages = ?config.languages,
            "controllee ready"
        );
        Ok(Self {
            bus,
            catalog: Catalog::new(),
            prefix: config.prefix.clone(),
            unit: config.unit.clone(),
            languages: config.languages.clone(),
            panels: Mutex::new(Vec::new()),
        })
    }

    #[must_use]
    pub fn bus(&self) -> &Arc<dyn Bus> {
        &self.bus
    }

    #[must_use]
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Published languages in language index order
    #[must_use]
    pub fn languages(&self) -> &[String] {
        &self.languages
    }

    fn location(&self, panel: &str) -> Result<PanelLocation> {
        PanelLocation::new(&self.prefix, &self.unit, panel)
    }

    /// Publish a panel whose root is `root`; the root's name is the panel name
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the root is not a container,
    /// `AlreadyRegistered` if a panel with that name is published, or the
    /// first registration error. A failed publication leaves nothing behind.
    pub fn publish_panel(&self, root: &Widget) -> Result<PanelLocation> {
        if root.widget_type() != WidgetType::Container {
            return Err(Error::type_mismatch(WidgetType::Container, root.widget_type()));
        }
        if root.side() != Side::Controllee {
            return Err(Error::NotImplemented(format!(
                "{} is a mirrored widget and cannot be published",
                root.name()
            )));
        }
        let location = self.location(root.name())?;
        if self
            .panels
            .lock()
            .iter()
            .any(|p| p.location.panel() == root.name())
        {
            return Err(Error::AlreadyRegistered(format!("panel {}", root.name())));
        }

        let panel_path = location.panel_path()?;
        let interface = self.catalog.shared_panel_description(self.bus.as_ref())?;
        self.bus
            .publish(panel_path.clone(), vec![interface], Arc::new(PanelObject))?;

        let registrar = Registrar {
            bus: &self.bus,
            catalog: &self.catalog,
            location: &location,
            languages: &self.languages,
        };
        if let Err(e) = registrar.register_objects(root, &[]) {
            tracing::warn!(panel = %panel_path, error = %e, "panel publication failed");
            registrar::unregister_objects(self.bus.as_ref(), root);
            let _ = self.bus.unpublish(&panel_path);
            return Err(e);
        }

        tracing::info!(panel = %panel_path, languages = self.languages.len(), "panel published");
        self.panels.lock().push(PublishedPanel {
            location: location.clone(),
            root: root.clone(),
        });
        Ok(location)
    }

    /// Remove a published panel and all its objects
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no panel with that name is published
    pub fn unpublish_panel(&self, name: &str) -> Result<()> {
        let panel = {
            let mut panels = self.panels.lock();
            let index = panels
                .iter()
                .position(|p| p.location.panel() == name)
                .ok_or_else(|| Error::NotFound(format!("panel {name}")))?;
            panels.remove(index)
        };
        registrar::unregister_objects(self.bus.as_ref(), &panel.root);
        let panel_path = panel.location.panel_path()?;
        self.bus.unpublish(&panel_path)?;
        tracing::info!(panel = %panel_path, "panel unpublished");
        Ok(())
    }

    /// Locations of the published panels
    #[must_use]
    pub fn panels(&self) -> Vec<PanelLocation> {
        self.panels.lock().iter().map(|p| p.location.clone()).collect()
    }

    /// Object paths a panel rooted at `root` occupies, without publishing it
    ///
    /// # Errors
    ///
    /// Returns `MalformedPath` if a widget name is not a valid path segment
    pub fn planned_paths(&self, root: &Widget) -> Result<Vec<ObjectPath>> {
        registrar::object_paths(&self.location(root.name())?, &self.languages, root)
    }

    /// Tell every attached controller that `widget` changed
    ///
    /// Properties emit `ValueChanged` with the current value; other widgets
    /// emit `MetadataChanged`. Returns the number of deliveries that
    /// succeeded; failures are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns `NotRegistered` unless the widget is published
    pub fn notify_changed(&self, widget: &Widget) -> Result<usize> {
        widget.ensure_registered()?;
        match (widget.widget_type(), widget.value()) {
            (WidgetType::Property, Some(value)) => Ok(emit_to_sessions(
                self.bus.as_ref(),
                widget,
                member::VALUE_CHANGED,
                &[value.to_variant()],
            )),
            _ => self.notify_metadata(widget),
        }
    }

    /// Emit `MetadataChanged` so controllers re-fetch `widget`
    ///
    /// # Errors
    ///
    /// Returns `NotRegistered` unless the widget is published
    pub fn notify_metadata(&self, widget: &Widget) -> Result<usize> {
        widget.ensure_registered()?;
        Ok(emit_to_sessions(
            self.bus.as_ref(),
            widget,
            member::METADATA_CHANGED,
            &[],
        ))
    }

    /// Store a new property value and broadcast it
    ///
    /// # Errors
    ///
    /// Returns the error of [`Widget::assign_value`], or `NotRegistered`
    pub fn update_value(&self, widget: &Widget, value: PropertyValue) -> Result<usize> {
        widget.ensure_registered()?;
        widget.assign_value(value)?;
        self.notify_changed(widget)
    }
}

/// Emit one signal from every binding of `widget` into every hosted session
///
/// Returns the number of successful deliveries.
pub(crate) fn emit_to_sessions(bus: &dyn Bus, widget: &Widget, signal: &str, args: &[Variant]) -> usize {
    let sessions = bus.hosted_sessions();
    let mut delivered = 0;
    for (path, interface) in widget.binding_targets() {
        for &session in &sessions {
            match bus.emit_signal(session, &path, &interface, signal, args.to_vec()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(session, path = %path, signal, error = %e, "signal delivery failed");
                }
            }
        }
    }
    tracing::trace!(widget = %widget.name(), signal, delivered, "signal emitted");
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{MemoryBus, MemoryHub, ProxyTarget};
    use crate::catalog::{ACTION_INTERFACE, CONTAINER_INTERFACE, DIALOG_INTERFACE, PROPERTY_INTERFACE};
    use crate::value::ConstraintRange;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config() -> Config {
        Config {
            unit: "Oven".to_string(),
            languages: vec!["en".to_string(), "de-CH".to_string()],
            ..Config::default()
        }
    }

    fn setup() -> (MemoryHub, Controllee, MemoryBus) {
        let hub = MemoryHub::new();
        let bus: Arc<dyn Bus> = Arc::new(hub.connect("oven").unwrap());
        let controllee = Controllee::new(bus, &config()).unwrap();
        let phone = hub.connect("phone").unwrap();
        (hub, controllee, phone)
    }

    fn target(path: &str) -> ProxyTarget {
        ProxyTarget::new("oven", ObjectPath::new(path).unwrap())
    }

    fn panel() -> Widget {
        let root = Widget::container("main").with_label("Oven");
        let temp = Widget::property("temp", PropertyValue::U16(180)).with_constraint_range(
            ConstraintRange::new(
                PropertyValue::U16(50),
                PropertyValue::U16(250),
                PropertyValue::U16(5),
            )
            .unwrap(),
        );
        root.add_child(&temp).unwrap();
        root
    }

    #[tokio::test]
    async fn publishes_one_object_per_language() {
        let (_hub, controllee, phone) = setup();
        let root = panel();
        let location = controllee.publish_panel(&root).unwrap();
        assert_eq!(location.panel(), "main");
        assert!(root.is_registered());
        assert!(root.child("temp").unwrap().is_registered());

        let session = phone.join_session("oven").await.unwrap();
        let xml = phone
            .introspect(session, &target("/ControlPanel/Oven/main"))
            .await
            .unwrap();
        assert!(xml.contains("<node name=\"en\"/>"));
        assert!(xml.contains("<node name=\"de_CH\"/>"));

        let version = phone
            .get_property(session, &target("/ControlPanel/Oven/main/de_CH"), CONTAINER_INTERFACE, "Version")
            .await
            .unwrap();
        assert_eq!(version, Variant::U16(1));
    }

    #[tokio::test]
    async fn remote_set_checks_constraints_and_emits() {
        let (_hub, controllee, phone) = setup();
        let root = panel();
        controllee.publish_panel(&root).unwrap();
        let session = phone.join_session("oven").await.unwrap();
        let mut signals = phone.signals();
        let temp = target("/ControlPanel/Oven/main/en/temp");

        let err = phone
            .set_property(session, &temp, PROPERTY_INTERFACE, "Value", Variant::U16(300))
            .await
            .unwrap_err();
        assert_eq!(err.name, crate::bus::BusError::INVALID_VALUE);
        let err = phone
            .set_property(session, &temp, PROPERTY_INTERFACE, "Value", Variant::U32(100))
            .await
            .unwrap_err();
        assert_eq!(err.name, crate::bus::BusError::INVALID_VALUE);

        phone
            .set_property(session, &temp, PROPERTY_INTERFACE, "Value", Variant::U16(200))
            .await
            .unwrap();
        assert_eq!(root.child("temp").unwrap().value(), Some(PropertyValue::U16(200)));

        // One signal per language binding
        for _ in 0..2 {
            let signal = signals.recv().await.unwrap();
            assert_eq!(signal.member, "ValueChanged");
            assert_eq!(signal.args, vec![Variant::U16(200)]);
        }
    }

    #[tokio::test]
    async fn read_only_property_rejects_set() {
        let (_hub, controllee, phone) = setup();
        let root = Widget::container("main");
        root.add_child(&Widget::property("mode", PropertyValue::Bool(false)).with_states(0x01))
            .unwrap();
        controllee.publish_panel(&root).unwrap();
        let session = phone.join_session("oven").await.unwrap();
        let err = phone
            .set_property(
                session,
                &target("/ControlPanel/Oven/main/en/mode"),
                PROPERTY_INTERFACE,
                "Value",
                Variant::Bool(true),
            )
            .await
            .unwrap_err();
        assert_eq!(err.name, crate::bus::BusError::READ_ONLY);
    }

    #[tokio::test]
    async fn methods_run_handlers() {
        let (_hub, controllee, phone) = setup();
        let hits = Arc::new(AtomicUsize::new(0));
        let root = Widget::container("main");
        let counter = Arc::clone(&hits);
        root.add_child(&Widget::action("start").on_execute(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
        let reset = Widget::action_with_dialog("reset");
        let counter = Arc::clone(&hits);
        reset
            .add_child(&Widget::dialog("confirm", "Sure?").with_dialog_action("Yes", move || {
                counter.fetch_add(10, Ordering::SeqCst);
            }))
            .unwrap();
        root.add_child(&reset).unwrap();
        root.add_child(&Widget::action("off").with_states(0)).unwrap();
        controllee.publish_panel(&root).unwrap();

        let session = phone.join_session("oven").await.unwrap();
        let call = |path: &'static str, iface: &'static str, method: &'static str| {
            let phone = phone.clone();
            async move {
                phone
                    .call_method(session, &target(path), iface, method, Vec::new())
                    .await
            }
        };

        call("/ControlPanel/Oven/main/en/start", ACTION_INTERFACE, "Exec").await.unwrap();
        call("/ControlPanel/Oven/main/en/reset/confirm", DIALOG_INTERFACE, "Action1")
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 11);

        for (path, iface, method) in [
            ("/ControlPanel/Oven/main/en/reset/confirm", DIALOG_INTERFACE, "Action2"),
            ("/ControlPanel/Oven/main/en/reset", ACTION_INTERFACE, "Exec"),
            ("/ControlPanel/Oven/main/en/off", ACTION_INTERFACE, "Exec"),
        ] {
            let err = call(path, iface, method).await.unwrap_err();
            assert_eq!(err.name, crate::bus::BusError::METHOD_NOT_ALLOWED, "{path}");
        }
    }

    #[tokio::test]
    async fn notify_reaches_every_session() {
        let (hub, controllee, phone) = setup();
        let root = panel();
        controllee.publish_panel(&root).unwrap();
        let tablet = hub.connect("tablet").unwrap();
        phone.join_session("oven").await.unwrap();
        tablet.join_session("oven").await.unwrap();

        // Two languages times two sessions
        assert_eq!(controllee.notify_metadata(&root).unwrap(), 4);

        hub.disconnect("tablet");
        let temp = root.child("temp").unwrap();
        assert_eq!(controllee.update_value(&temp, PropertyValue::U16(60)).unwrap(), 2);
    }

    #[tokio::test]
    async fn unregistered_widgets_cannot_notify() {
        let (_hub, controllee, _phone) = setup();
        let label = Widget::label("lonely", "Hi");
        assert!(matches!(
            controllee.notify_changed(&label),
            Err(Error::NotRegistered(_))
        ));
    }

    #[tokio::test]
    async fn unpublish_removes_objects() {
        let (_hub, controllee, phone) = setup();
        let root = panel();
        controllee.publish_panel(&root).unwrap();
        assert!(matches!(
            controllee.publish_panel(&Widget::container("main")),
            Err(Error::AlreadyRegistered(_))
        ));

        controllee.unpublish_panel("main").unwrap();
        assert!(!root.is_registered());
        assert!(root.paths().is_empty());
        let session = phone.join_session("oven").await.unwrap();
        assert!(phone
            .introspect(session, &target("/ControlPanel/Oven/main"))
            .await
            .is_err());
        assert!(controllee.unpublish_panel("main").is_err());
    }

    #[tokio::test]
    async fn failed_publication_leaves_nothing() {
        let (_hub, controllee, phone) = setup();
        let root = Widget::container("main");
        root.add_child(&Widget::label("ok", "fine")).unwrap();
        root.add_child(&Widget::label("not-valid", "dash")).unwrap();
        assert!(matches!(
            controllee.publish_panel(&root),
            Err(Error::MalformedPath(_))
        ));
        assert!(!root.is_registered());
        assert!(controllee.panels().is_empty());
        let session = phone.join_session("oven").await.unwrap();
        assert!(phone
            .introspect(session, &target("/ControlPanel/Oven"))
            .await
            .is_err());
    }

    #[test]
    fn planned_paths_cover_every_language() {
        let hub = MemoryHub::new();
        let bus: Arc<dyn Bus> = Arc::new(hub.connect("oven").unwrap());
        let controllee = Controllee::new(bus, &config()).unwrap();
        let paths: Vec<String> = controllee
            .planned_paths(&panel())
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            paths,
            vec![
                "/ControlPanel/Oven/main",
                "/ControlPanel/Oven/main/en",
                "/ControlPanel/Oven/main/de_CH",
                "/ControlPanel/Oven/main/en/temp",
                "/ControlPanel/Oven/main/de_CH/temp",
            ]
        );
    }

    #[test]
    fn rejects_non_container_root_and_empty_languages() {
        let hub = MemoryHub::new();
        let bus: Arc<dyn Bus> = Arc::new(hub.connect("oven").unwrap());
        let empty = Config {
            languages: Vec::new(),
            ..config()
        };
        assert!(matches!(
            Controllee::new(Arc::clone(&bus), &empty),
            Err(Error::Config(_))
        ));
        let controllee = Controllee::new(bus, &config()).unwrap();
        assert!(matches!(
            controllee.publish_panel(&Widget::label("main", "x")),
            Err(Error::TypeMismatch { .. })
        ));
    }
}
