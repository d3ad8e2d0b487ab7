//! Signal router
//!
//! A single task owns the subscription table. Subscribe and unsubscribe
//! requests arrive over an `mpsc` channel, signals over the bus broadcast
//! stream; commands are drained first so a subscription always takes
//! effect before any signal emitted after it was requested.
//!
//! If the broadcast stream overflows, the dropped signals cannot be
//! recovered. Every subscribed widget is then reported as `SignalsLost`
//! once and re-fetched.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use super::SubscriptionId;
use super::listener::{ErrorReason, PanelListener};
use crate::Error;
use crate::bus::{Bus, ObjectPath, SignalMessage};
use crate::catalog::member;
use crate::widget::{WeakWidget, Widget};

enum Command {
    Subscribe {
        id: SubscriptionId,
        sender: String,
        path: ObjectPath,
        widget: WeakWidget,
        language_index: usize,
    },
    Unsubscribe {
        id: SubscriptionId,
    },
}

struct Subscription {
    id: SubscriptionId,
    widget: WeakWidget,
    language_index: usize,
}

type Key = (String, ObjectPath);

/// Dispatches bus signals to the widgets subscribed to them
pub struct SignalRouter {
    commands: mpsc::UnboundedSender<Command>,
    next_id: AtomicU64,
    task: JoinHandle<()>,
}

impl SignalRouter {
    /// Start the router task on the current runtime
    pub(crate) fn spawn(bus: &Arc<dyn Bus>, listener: Arc<dyn PanelListener>) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(rx, bus.signals(), listener));
        Self {
            commands,
            next_id: AtomicU64::new(1),
            task,
        }
    }

    /// Route signals from `sender` at `path` to `widget`
    pub(crate) fn subscribe(
        &self,
        sender: &str,
        path: &ObjectPath,
        widget: &Widget,
        language_index: usize,
    ) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let command = Command::Subscribe {
            id,
            sender: sender.to_string(),
            path: path.clone(),
            widget: widget.downgrade(),
            language_index,
        };
        if self.commands.send(command).is_err() {
            tracing::warn!(path = %path, "signal router stopped, subscription dropped");
        }
        id
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) {
        // A stopped router has no subscriptions left to remove
        let _ = self.commands.send(Command::Unsubscribe { id });
    }
}

impl Drop for SignalRouter {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut signals: broadcast::Receiver<SignalMessage>,
    listener: Arc<dyn PanelListener>,
) {
    let mut table: HashMap<Key, Vec<Subscription>> = HashMap::new();
    let mut keys: HashMap<SubscriptionId, Key> = HashMap::new();

    loop {
        tokio::select! {
            biased;
            command = commands.recv() => match command {
                Some(Command::Subscribe { id, sender, path, widget, language_index }) => {
                    let key = (sender, path);
                    keys.insert(id, key.clone());
                    table.entry(key).or_default().push(Subscription { id, widget, language_index });
                }
                Some(Command::Unsubscribe { id }) => {
                    if let Some(key) = keys.remove(&id) {
                        if let Some(subs) = table.get_mut(&key) {
                            subs.retain(|s| s.id != id);
                            if subs.is_empty() {
                                table.remove(&key);
                            }
                        }
                    }
                }
                None => break,
            },
            signal = signals.recv() => match signal {
                Ok(message) => {
                    let key = (message.sender.clone(), message.path.clone());
                    if let Some(subs) = table.get(&key) {
                        for sub in subs {
                            dispatch(sub, &message, &listener);
                        }
                    } else {
                        tracing::trace!(path = %message.path, member = %message.member, "signal without subscriber");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "signal router lagged, resyncing subscribers");
                    resync(&table, missed, &listener);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    tracing::debug!("signal router stopped");
}

fn dispatch(sub: &Subscription, message: &SignalMessage, listener: &Arc<dyn PanelListener>) {
    let Some(widget) = sub.widget.upgrade() else {
        return;
    };
    match message.member.as_str() {
        member::METADATA_CHANGED => {
            spawn_refresh(sub.widget.clone(), sub.language_index, Arc::clone(listener));
        }
        member::VALUE_CHANGED => match widget.apply_value_changed(&message.args) {
            Ok(value) => listener.value_changed(&widget, &value),
            Err(e) => listener.error_occurred(widget.name(), ErrorReason::MalformedPayload, &e),
        },
        other => tracing::trace!(widget = %widget.name(), member = other, "ignoring signal"),
    }
}

fn resync(table: &HashMap<Key, Vec<Subscription>>, missed: u64, listener: &Arc<dyn PanelListener>) {
    let error = Error::SignalsLost(missed);
    let mut reported: Vec<Widget> = Vec::new();
    for sub in table.values().flatten() {
        let Some(widget) = sub.widget.upgrade() else {
            continue;
        };
        if !reported.iter().any(|w| w.ptr_eq(&widget)) {
            listener.error_occurred(widget.name(), ErrorReason::SignalsLost, &error);
            reported.push(widget);
        }
        spawn_refresh(sub.widget.clone(), sub.language_index, Arc::clone(listener));
    }
}

/// Re-fetch in the background; the task holds the widget weakly
fn spawn_refresh(widget: WeakWidget, language_index: usize, listener: Arc<dyn PanelListener>) {
    tokio::spawn(async move {
        let Some(proxy) = widget.upgrade().and_then(|w| w.proxy(language_index).ok()) else {
            return;
        };
        let result = proxy.get_all_properties().await;

        let Some(widget) = widget.upgrade() else {
            return;
        };
        if !widget.is_registered() {
            tracing::trace!(widget = %widget.name(), "refresh result dropped after unregister");
            return;
        }
        let applied = result.and_then(|props| {
            widget.apply_properties(language_index, proxy.interface_name(), proxy.local_version(), &props)
        });
        match applied {
            Ok(()) => listener.metadata_changed(&widget),
            Err(e) => listener.error_occurred(widget.name(), ErrorReason::RefreshFailed, &e),
        }
    });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;
    use crate::bus::{MemoryBus, MemoryHub, Variant};
    use crate::catalog::{PROPERTY_INTERFACE, WidgetType};
    use crate::value::PropertyValue;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl PanelListener for Recorder {
        fn value_changed(&self, widget: &Widget, value: &PropertyValue) {
            self.events.lock().push(format!("{}={value}", widget.name()));
        }

        fn error_occurred(&self, widget: &str, reason: ErrorReason, _error: &Error) {
            self.events.lock().push(format!("{widget}:{reason}"));
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    fn setup() -> (MemoryBus, Arc<dyn Bus>, ObjectPath) {
        let hub = MemoryHub::new();
        let host = hub.connect("oven").unwrap();
        let controller: Arc<dyn Bus> = Arc::new(hub.connect("phone").unwrap());
        let path = ObjectPath::new("/ControlPanel/Oven/main/en/temp").unwrap();
        (host, controller, path)
    }

    fn registered_property() -> Widget {
        let widget = Widget::remote("temp", WidgetType::Property, false);
        widget.begin_registration().unwrap();
        widget.finish_registration();
        widget
    }

    #[tokio::test]
    async fn value_changed_reaches_subscriber() {
        let (host, controller, path) = setup();
        let session = controller.join_session("oven").await.unwrap();
        let recorder = Arc::new(Recorder::default());
        let router = SignalRouter::spawn(&controller, recorder.clone());
        let widget = registered_property();
        router.subscribe("oven", &path, &widget, 0);

        host.emit_signal(session, &path, PROPERTY_INTERFACE, "ValueChanged", vec![Variant::U16(7)])
            .unwrap();
        settle().await;
        assert_eq!(*recorder.events.lock(), vec!["temp=7"]);
        assert_eq!(widget.value(), Some(PropertyValue::U16(7)));
    }

    #[tokio::test]
    async fn malformed_payload_goes_to_listener() {
        let (host, controller, path) = setup();
        let session = controller.join_session("oven").await.unwrap();
        let recorder = Arc::new(Recorder::default());
        let router = SignalRouter::spawn(&controller, recorder.clone());
        let widget = registered_property();
        router.subscribe("oven", &path, &widget, 0);

        host.emit_signal(session, &path, PROPERTY_INTERFACE, "ValueChanged", vec![])
            .unwrap();
        settle().await;
        assert_eq!(*recorder.events.lock(), vec!["temp:malformed payload"]);
    }

    #[tokio::test]
    async fn overflow_reports_lost_signals_once() {
        let (host, controller, path) = setup();
        let session = controller.join_session("oven").await.unwrap();
        let recorder = Arc::new(Recorder::default());
        let router = SignalRouter::spawn(&controller, recorder.clone());
        let widget = registered_property();
        router.subscribe("oven", &path, &widget, 0);
        router.subscribe("oven", &path, &widget, 1);

        // The router task cannot run between these sends
        for value in 0..300u16 {
            host.emit_signal(session, &path, PROPERTY_INTERFACE, "ValueChanged", vec![Variant::U16(value)])
                .unwrap();
        }
        settle().await;

        let events = recorder.events.lock();
        let lost = events.iter().filter(|e| *e == "temp:signals lost").count();
        assert_eq!(lost, 1);
        assert_eq!(events.last().map(String::as_str), Some("temp=299"));
        assert_eq!(widget.value(), Some(PropertyValue::U16(299)));
    }

    #[tokio::test]
    async fn unsubscribed_and_dropped_widgets_are_skipped() {
        let (host, controller, path) = setup();
        let session = controller.join_session("oven").await.unwrap();
        let recorder = Arc::new(Recorder::default());
        let router = SignalRouter::spawn(&controller, recorder.clone());

        let kept = registered_property();
        let id = router.subscribe("oven", &path, &kept, 0);
        router.unsubscribe(id);
        router.subscribe("oven", &path, &registered_property(), 0);

        host.emit_signal(session, &path, PROPERTY_INTERFACE, "ValueChanged", vec![Variant::U16(1)])
            .unwrap();
        settle().await;
        assert!(recorder.events.lock().is_empty());
        assert_eq!(kept.value(), None);
    }
}
