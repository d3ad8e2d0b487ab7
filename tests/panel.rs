//! Discovery integration tests
//!
//! Publishes panels on an in-process bus and mirrors them from a controller

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use panelbus::bus::{BusError, CallContext, ObjectHandler};
use panelbus::{
    Bus, Catalog, Error, ErrorReason, LocalizedText, ObjectPath, PropertyValue, STATE_ENABLED,
    STATE_WRITABLE, Variant, Widget, WidgetType,
};

mod common;
use common::{DEVICE, Event, Fixture, sample_panel};

/// Object claiming an interface version newer than ours
struct FutureProperty;

impl ObjectHandler for FutureProperty {
    fn get_property(
        &self,
        ctx: &CallContext<'_>,
        interface: &str,
        property: &str,
    ) -> Result<Variant, BusError> {
        self.get_all_properties(ctx, interface)?
            .into_iter()
            .find(|(name, _)| name == property)
            .map(|(_, value)| value)
            .ok_or_else(|| BusError::no_such_property(property))
    }

    fn get_all_properties(
        &self,
        _ctx: &CallContext<'_>,
        _interface: &str,
    ) -> Result<Vec<(String, Variant)>, BusError> {
        Ok(vec![
            ("Version".to_string(), Variant::U16(2)),
            ("States".to_string(), Variant::U32(1)),
            ("OptParams".to_string(), Variant::Dict(Vec::new())),
            ("Value".to_string(), Variant::U16(1)),
        ])
    }

    fn set_property(
        &self,
        _ctx: &CallContext<'_>,
        _interface: &str,
        property: &str,
        _value: Variant,
    ) -> Result<(), BusError> {
        Err(BusError::no_such_property(property))
    }

    fn call_method(
        &self,
        _ctx: &CallContext<'_>,
        _interface: &str,
        member: &str,
        _args: Vec<Variant>,
    ) -> Result<Vec<Variant>, BusError> {
        Err(BusError::method_not_allowed(member))
    }
}

fn names(widget: &Widget) -> Vec<String> {
    widget
        .children()
        .iter()
        .map(|c| c.name().to_string())
        .collect()
}

#[tokio::test]
async fn mirrors_two_language_panel() {
    let fx = Fixture::new(&["en", "en-US"]);
    let starts = Arc::new(AtomicUsize::new(0));
    let published = sample_panel(&starts);
    fx.controllee.publish_panel(&published).unwrap();

    let panels = fx.controller.discover_all(DEVICE).await.unwrap();
    assert_eq!(panels.len(), 1);
    let panel = &panels[0];
    assert_eq!(panel.unit(), "Oven");
    assert_eq!(panel.name(), "main");
    assert_eq!(panel.languages(), ["en", "en-US"]);
    assert!(panel
        .root()
        .paths()
        .iter()
        .any(|p| p.as_str() == "/ControlPanel/Oven/main/en_US"));

    let temp = panel.find("temp").unwrap();
    let paths: Vec<String> = temp.paths().iter().map(ToString::to_string).collect();
    assert_eq!(
        paths,
        vec![
            "/ControlPanel/Oven/main/en/temp",
            "/ControlPanel/Oven/main/en_US/temp"
        ]
    );
    assert_eq!(temp.languages(), ["en", "en-US"]);
    assert_eq!(temp.widget_type(), WidgetType::Property);
    assert_eq!(temp.value(), Some(PropertyValue::U16(180)));
    assert_eq!(temp.label_for(0).as_deref(), Some("Temperature"));
    assert_eq!(temp.label_for(1).as_deref(), Some("Oven temperature"));
    assert_eq!(
        temp.opt_params(0).unwrap().unit_of_measure.as_deref(),
        Some("C")
    );
    assert_eq!(panel.find("status").unwrap().text(1).as_deref(), Some("Idle"));

    temp.set_value(PropertyValue::U16(200)).await.unwrap();
    assert!(fx
        .listener
        .wait_for(|e| *e == Event::Value("temp".into(), PropertyValue::U16(200)))
        .await);
    assert_eq!(temp.value(), Some(PropertyValue::U16(200)));
    assert_eq!(
        published.child("temp").unwrap().value(),
        Some(PropertyValue::U16(200))
    );
}

#[tokio::test]
async fn remote_write_to_self_describing_property() {
    let fx = Fixture::new(&["en"]);
    let root = Widget::container("main");
    let slot: Arc<OnceLock<Widget>> = Arc::default();
    let label_slot = Arc::clone(&slot);
    let states_slot = Arc::clone(&slot);
    let temp = Widget::property("temp", PropertyValue::U16(180))
        .with_label(LocalizedText::Dynamic(Arc::new(move |_| {
            let value = label_slot.get()?.value()?;
            Some(format!("Temp {value}"))
        })))
        .with_constraint_list(vec![
            (PropertyValue::U16(180), "Low".into()),
            (PropertyValue::U16(200), "High".into()),
        ])
        .with_states_fn(move || {
            let fixed = states_slot.get().is_some_and(|w| w.property_type().is_some());
            if fixed { STATE_ENABLED | STATE_WRITABLE } else { STATE_ENABLED }
        });
    assert!(slot.set(temp.clone()).is_ok());
    root.add_child(&temp).unwrap();
    fx.controllee.publish_panel(&root).unwrap();

    let panel = fx.controller.discover_all(DEVICE).await.unwrap().remove(0);
    let mirrored = panel.find("temp").unwrap();
    assert_eq!(mirrored.label_for(0).as_deref(), Some("Temp 180"));
    assert!(mirrored.is_writable());

    tokio::time::timeout(Duration::from_secs(2), async {
        mirrored.set_value(PropertyValue::U16(200)).await.unwrap();
        mirrored.refresh().await.unwrap();
    })
    .await
    .expect("remote write stalled");
    assert_eq!(temp.value(), Some(PropertyValue::U16(200)));
    assert_eq!(mirrored.label_for(0).as_deref(), Some("Temp 200"));
}

#[tokio::test]
async fn nested_widgets_bind_every_language() {
    let fx = Fixture::new(&["en", "fr"]);
    let root = Widget::container("main");
    let settings = Widget::container("settings");
    settings
        .add_child(&Widget::property("volume", PropertyValue::U16(3)))
        .unwrap();
    root.add_child(&settings).unwrap();
    fx.controllee.publish_panel(&root).unwrap();

    let panel = fx.controller.discover_all(DEVICE).await.unwrap().remove(0);
    let volume = panel.find("settings/volume").unwrap();
    assert_eq!(volume.name(), "volume");
    let paths: Vec<String> = volume.paths().iter().map(ToString::to_string).collect();
    assert_eq!(
        paths,
        vec![
            "/ControlPanel/Oven/main/en/settings/volume",
            "/ControlPanel/Oven/main/fr/settings/volume"
        ]
    );
    assert_eq!(volume.value(), Some(PropertyValue::U16(3)));
    assert!(fx.listener.errors().is_empty());
}

#[tokio::test]
async fn set_value_is_checked_before_the_call() {
    let fx = Fixture::new(&["en"]);
    let published = sample_panel(&Arc::new(AtomicUsize::new(0)));
    fx.controllee.publish_panel(&published).unwrap();
    let panel = fx.controller.discover_all(DEVICE).await.unwrap().remove(0);
    let temp = panel.find("temp").unwrap();

    assert!(matches!(
        temp.set_value(PropertyValue::U16(300)).await,
        Err(Error::Constraint(_))
    ));
    assert!(matches!(
        temp.set_value(PropertyValue::String("hot".into())).await,
        Err(Error::TypeMismatch { .. })
    ));
    assert_eq!(
        published.child("temp").unwrap().value(),
        Some(PropertyValue::U16(180))
    );
}

#[tokio::test]
async fn actions_execute_remotely() {
    let fx = Fixture::new(&["en"]);
    let starts = Arc::new(AtomicUsize::new(0));
    fx.controllee.publish_panel(&sample_panel(&starts)).unwrap();
    let panel = fx.controller.discover_all(DEVICE).await.unwrap().remove(0);

    panel.find("start").unwrap().execute().await.unwrap();
    assert_eq!(starts.load(Ordering::SeqCst), 1);
    assert!(matches!(
        panel.find("status").unwrap().execute().await,
        Err(Error::NotImplemented(_))
    ));
}

#[tokio::test]
async fn failed_child_becomes_error_placeholder() {
    let fx = Fixture::new(&["en", "fr"]);
    fx.controllee
        .publish_panel(&sample_panel(&Arc::new(AtomicUsize::new(0))))
        .unwrap();

    let iface = Catalog::new()
        .shared_description(&fx.device, WidgetType::Property, false)
        .unwrap();
    for language in ["en", "fr"] {
        let path = ObjectPath::new(format!("/ControlPanel/Oven/main/{language}/future")).unwrap();
        fx.device
            .publish(path, vec![Arc::clone(&iface)], Arc::new(FutureProperty))
            .unwrap();
    }

    let panel = fx.controller.discover_all(DEVICE).await.unwrap().remove(0);
    let root = panel.root();
    // Introspection lists children by name
    assert_eq!(names(root), vec!["future", "start", "status", "temp"]);

    let future = root.child("future").unwrap();
    assert_eq!(future.widget_type(), WidgetType::Error);
    assert!(future.error_message().unwrap().contains("version mismatch"));
    assert!(future.parent().unwrap().ptr_eq(root));
    assert!(root.child("temp").unwrap().is_registered());

    assert_eq!(
        fx.listener.errors(),
        vec![("future".to_string(), ErrorReason::RegistrationFailed)]
    );
}

#[tokio::test]
async fn dialog_rejects_actions_beyond_num_actions() {
    let fx = Fixture::new(&["en"]);
    let confirmed = Arc::new(AtomicUsize::new(0));
    let root = Widget::container("main");
    let reset = Widget::action_with_dialog("reset").with_label("Reset");
    let hits = Arc::clone(&confirmed);
    reset
        .add_child(
            &Widget::dialog("confirm", "Reset all settings?")
                .with_dialog_action("Yes", || {})
                .with_dialog_action("No", move || {
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
        )
        .unwrap();
    root.add_child(&reset).unwrap();
    fx.controllee.publish_panel(&root).unwrap();

    let panel = fx.controller.discover_all(DEVICE).await.unwrap().remove(0);
    let mirrored = panel.find("reset").unwrap();
    assert_eq!(mirrored.widget_type(), WidgetType::ActionWithDialog);
    assert!(matches!(mirrored.execute().await, Err(Error::NotImplemented(_))));

    let dialog = panel.find("reset/confirm").unwrap();
    assert_eq!(dialog.widget_type(), WidgetType::Dialog);
    assert_eq!(dialog.num_actions(), Some(2));
    assert_eq!(dialog.message(0).as_deref(), Some("Reset all settings?"));
    assert_eq!(
        dialog.opt_params(0).unwrap().action_labels[1].as_deref(),
        Some("No")
    );

    assert!(matches!(
        dialog.execute_action(3).await,
        Err(Error::NotImplemented(_))
    ));
    dialog.execute_action(2).await.unwrap();
    assert_eq!(confirmed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_nodes_are_skipped() {
    let fx = Fixture::new(&["en"]);
    fx.controllee
        .publish_panel(&sample_panel(&Arc::new(AtomicUsize::new(0))))
        .unwrap();
    let gadget = fx
        .device
        .add_interface(panelbus::bus::InterfaceDescription::new("org.example.Gadget", false))
        .unwrap();
    fx.device
        .publish(
            ObjectPath::new("/ControlPanel/Oven/main/en/gadget").unwrap(),
            vec![gadget],
            Arc::new(FutureProperty),
        )
        .unwrap();

    let panel = fx.controller.discover_all(DEVICE).await.unwrap().remove(0);
    assert!(panel.find("gadget").is_none());
    assert_eq!(names(panel.root()), vec!["start", "status", "temp"]);
    assert!(fx.listener.errors().is_empty());
}

#[tokio::test]
async fn lists_every_published_panel() {
    let fx = Fixture::new(&["en"]);
    fx.controllee
        .publish_panel(&sample_panel(&Arc::new(AtomicUsize::new(0))))
        .unwrap();
    let settings = Widget::container("settings");
    settings
        .add_child(&Widget::property("volume", PropertyValue::U16(3)))
        .unwrap();
    fx.controllee.publish_panel(&settings).unwrap();

    let mut found: Vec<String> = fx
        .controller
        .list_panels(DEVICE)
        .await
        .unwrap()
        .iter()
        .map(|l| l.panel().to_string())
        .collect();
    found.sort();
    assert_eq!(found, vec!["main", "settings"]);

    let panels = fx.controller.discover_all(DEVICE).await.unwrap();
    assert_eq!(panels.len(), 2);
    assert_eq!(fx.controller.panels().len(), 2);
}

#[tokio::test]
async fn snapshot_serializes_mirror() {
    let fx = Fixture::new(&["en"]);
    fx.controllee
        .publish_panel(&sample_panel(&Arc::new(AtomicUsize::new(0))))
        .unwrap();
    let panel = fx.controller.discover_all(DEVICE).await.unwrap().remove(0);

    let json = serde_json::to_value(panel.snapshot()).unwrap();
    assert_eq!(json["panel"], "main");
    assert_eq!(json["root"]["type"], "container");
    assert_eq!(json["root"]["state"], "registered");
    let temp = &json["root"]["children"][2];
    assert_eq!(temp["name"], "temp");
    assert_eq!(temp["value"]["value"], 180);
    assert_eq!(temp["languages"][0]["opt_params"]["label"], "Temperature");
}
