//! Shared test utilities

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use panelbus::{
    Bus, Config, ConstraintRange, Controllee, Controller, Error, ErrorReason, MemoryBus,
    MemoryHub, PanelListener, PropertyValue, Widget,
};
use parking_lot::Mutex;

/// Bus name of the device under test
pub const DEVICE: &str = "oven";

/// One listener callback
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Metadata(String),
    Value(String, PropertyValue),
    Error(String, ErrorReason),
}

/// Listener that records every callback
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Event>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn errors(&self) -> Vec<(String, ErrorReason)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Error(widget, reason) => Some((widget, reason)),
                _ => None,
            })
            .collect()
    }

    /// Wait up to two seconds for an event matching `pred`
    pub async fn wait_for(&self, pred: impl Fn(&Event) -> bool) -> bool {
        for _ in 0..200 {
            if self.events.lock().iter().any(&pred) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

impl PanelListener for RecordingListener {
    fn metadata_changed(&self, widget: &Widget) {
        self.events
            .lock()
            .push(Event::Metadata(widget.name().to_string()));
    }

    fn value_changed(&self, widget: &Widget, value: &PropertyValue) {
        self.events
            .lock()
            .push(Event::Value(widget.name().to_string(), value.clone()));
    }

    fn error_occurred(&self, widget: &str, reason: ErrorReason, _error: &Error) {
        self.events
            .lock()
            .push(Event::Error(widget.to_string(), reason));
    }
}

/// Config for unit `Oven` with the given languages
pub fn config(languages: &[&str]) -> Config {
    Config {
        unit: "Oven".to_string(),
        languages: languages.iter().map(ToString::to_string).collect(),
        call_timeout: Duration::from_secs(1),
        ..Config::default()
    }
}

/// A device and a controller connected through one in-process hub
pub struct Fixture {
    pub hub: MemoryHub,
    /// The device's own endpoint, for publishing raw objects
    pub device: MemoryBus,
    pub controllee: Controllee,
    pub controller: Controller,
    pub listener: Arc<RecordingListener>,
}

impl Fixture {
    pub fn new(languages: &[&str]) -> Self {
        let hub = MemoryHub::new();
        let device = hub.connect(DEVICE).expect("connect device");
        let console: Arc<dyn Bus> = Arc::new(hub.connect("console").expect("connect console"));
        let config = config(languages);
        let controllee =
            Controllee::new(Arc::new(device.clone()), &config).expect("create controllee");
        let listener = Arc::new(RecordingListener::default());
        let controller =
            Controller::new(console, &config, listener.clone()).expect("create controller");
        Self {
            hub,
            device,
            controllee,
            controller,
            listener,
        }
    }
}

/// Oven panel: a temperature property, a start action and a status label
pub fn sample_panel(starts: &Arc<AtomicUsize>) -> Widget {
    let root = Widget::container("main").with_label("Oven");
    root.add_child(
        &Widget::property("temp", PropertyValue::U16(180))
            .with_label(panelbus::LocalizedText::PerLanguage(vec![
                "Temperature".to_string(),
                "Oven temperature".to_string(),
            ]))
            .with_unit_of_measure("C")
            .with_constraint_range(
                ConstraintRange::new(
                    PropertyValue::U16(50),
                    PropertyValue::U16(250),
                    PropertyValue::U16(5),
                )
                .expect("range"),
            ),
    )
    .expect("add temp");
    let starts = Arc::clone(starts);
    root.add_child(&Widget::action("start").with_label("Start").on_execute(move || {
        starts.fetch_add(1, Ordering::SeqCst);
    }))
    .expect("add start");
    root.add_child(&Widget::label("status", "Idle"))
        .expect("add status");
    root
}
