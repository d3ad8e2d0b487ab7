//! Widget tree
//!
//! A [`Widget`] is a cheap, cloneable handle to one node of a control panel.
//! The same type is used on both sides of a session:
//!
//! - on the controllee, widgets are built by the application with the
//!   builder methods below and published by the registrar;
//! - on the controller, widgets are created by discovery and hold values
//!   fetched from the remote objects, one cache entry per language.
//!
//! Children are owned by their parent; the parent link is weak. Every
//! widget carries a registration state and refuses fills, refreshes and
//! emits unless it is `Registered`.

mod binding;
pub mod opt_params;
mod remote;

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::Serialize;

pub use binding::{AttachOutcome, Proxy, RemoteBinding};
pub use opt_params::{LocalizedText, OptParamKey, OptParams, OptParamsSource, TextFn};

use crate::bus::ObjectPath;
use crate::catalog::{INTERFACE_VERSION, WidgetType};
use crate::value::{ConstraintRange, Constraints, PropertyType, PropertyValue};
use crate::{Error, Result};

/// `States` bit: the widget accepts interaction
pub const STATE_ENABLED: u32 = 0x01;

/// `States` bit: a property accepts writes
pub const STATE_WRITABLE: u32 = 0x02;

/// Live override for the `States` bitmask
pub type StatesFn = Arc<dyn Fn() -> u32 + Send + Sync>;

/// Handler run when an action executes
pub type ActionFn = Arc<dyn Fn() + Send + Sync>;

/// Hook run before a property accepts a new value; an error rejects it
pub type ChangeFn = Arc<dyn Fn(&PropertyValue) -> Result<()> + Send + Sync>;

/// Which end of a session a widget belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Built by the application and published on the bus
    Controllee,
    /// Mirrored from a remote controllee
    Controller,
}

/// Per-widget registration lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationState {
    Unregistered,
    Registering,
    Registered,
    Unregistering,
}

/// Values fetched for one language on the controller
#[derive(Debug, Clone, Default)]
pub(crate) struct LanguageCache {
    pub(crate) opt_params: OptParams,
    pub(crate) message: Option<String>,
    pub(crate) text: Option<String>,
}

/// Type-specific state
pub(crate) enum Payload {
    Container,
    Action {
        on_execute: Option<ActionFn>,
    },
    Dialog {
        message: Option<LocalizedText>,
        num_actions: u16,
        actions: [Option<ActionFn>; 3],
    },
    Property {
        value: Option<PropertyValue>,
        value_type: Option<PropertyType>,
        on_change: Option<ChangeFn>,
    },
    Label {
        text: Option<LocalizedText>,
    },
    Error {
        message: String,
    },
}

impl Payload {
    fn empty(widget_type: WidgetType) -> Self {
        match widget_type {
            WidgetType::Container => Self::Container,
            WidgetType::Action | WidgetType::ActionWithDialog => Self::Action { on_execute: None },
            WidgetType::Dialog => Self::Dialog {
                message: None,
                num_actions: 0,
                actions: [None, None, None],
            },
            WidgetType::Property => Self::Property {
                value: None,
                value_type: None,
                on_change: None,
            },
            WidgetType::Label => Self::Label { text: None },
            WidgetType::Error => Self::Error {
                message: String::new(),
            },
        }
    }
}

pub(crate) struct WidgetData {
    pub(crate) secured: bool,
    pub(crate) version: u16,
    pub(crate) states: u32,
    pub(crate) states_fn: Option<StatesFn>,
    pub(crate) opt_source: OptParamsSource,
    pub(crate) cache: Vec<LanguageCache>,
    /// At least one fill has completed
    pub(crate) filled: bool,
    pub(crate) payload: Payload,
}

impl WidgetData {
    /// Stored `States` and its live override
    ///
    /// The override may read its own widget, so call it after the guard drops.
    pub(crate) fn states_source(&self) -> (u32, Option<StatesFn>) {
        (self.states, self.states_fn.clone())
    }

    /// Constraints that apply to a property value
    pub(crate) fn constraints(&self, side: Side) -> Option<Constraints> {
        match side {
            Side::Controllee => self.opt_source.value_constraints(),
            Side::Controller => self.cache.first().and_then(|c| c.opt_params.constraints.clone()),
        }
    }
}

pub(crate) struct WidgetInner {
    name: String,
    widget_type: WidgetType,
    side: Side,
    parent: RwLock<Weak<WidgetInner>>,
    state: Mutex<RegistrationState>,
    data: RwLock<WidgetData>,
    children: RwLock<Vec<Widget>>,
    bindings: Mutex<Vec<RemoteBinding>>,
}

/// Handle to one widget
#[derive(Clone)]
pub struct Widget {
    inner: Arc<WidgetInner>,
}

/// Non-owning widget reference held by signal subscriptions and refresh tasks
#[derive(Clone)]
pub(crate) struct WeakWidget(Weak<WidgetInner>);

impl WeakWidget {
    pub(crate) fn upgrade(&self) -> Option<Widget> {
        self.0.upgrade().map(|inner| Widget { inner })
    }
}

impl fmt::Debug for Widget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Widget")
            .field("name", &self.inner.name)
            .field("type", &self.inner.widget_type)
            .field("side", &self.inner.side)
            .field("state", &*self.inner.state.lock())
            .finish_non_exhaustive()
    }
}

// Construction

impl Widget {
    fn build(name: &str, widget_type: WidgetType, side: Side, states: u32, payload: Payload) -> Self {
        Self {
            inner: Arc::new(WidgetInner {
                name: name.to_string(),
                widget_type,
                side,
                parent: RwLock::new(Weak::new()),
                state: Mutex::new(RegistrationState::Unregistered),
                data: RwLock::new(WidgetData {
                    secured: false,
                    version: INTERFACE_VERSION,
                    states,
                    states_fn: None,
                    opt_source: OptParamsSource::default(),
                    cache: Vec::new(),
                    filled: false,
                    payload,
                }),
                children: RwLock::new(Vec::new()),
                bindings: Mutex::new(Vec::new()),
            }),
        }
    }

    fn local(name: &str, widget_type: WidgetType, payload: Payload) -> Self {
        let states = if widget_type == WidgetType::Property {
            STATE_ENABLED | STATE_WRITABLE
        } else {
            STATE_ENABLED
        };
        Self::build(name, widget_type, Side::Controllee, states, payload)
    }

    /// Container grouping other widgets
    #[must_use]
    pub fn container(name: &str) -> Self {
        Self::local(name, WidgetType::Container, Payload::Container)
    }

    /// Button-like action
    #[must_use]
    pub fn action(name: &str) -> Self {
        Self::local(name, WidgetType::Action, Payload::Action { on_execute: None })
    }

    /// Action that opens a dialog; add the dialog with [`Widget::add_child`]
    #[must_use]
    pub fn action_with_dialog(name: &str) -> Self {
        Self::local(
            name,
            WidgetType::ActionWithDialog,
            Payload::Action { on_execute: None },
        )
    }

    /// Dialog with a message and up to three actions
    #[must_use]
    pub fn dialog(name: &str, message: impl Into<LocalizedText>) -> Self {
        Self::local(
            name,
            WidgetType::Dialog,
            Payload::Dialog {
                message: Some(message.into()),
                num_actions: 0,
                actions: [None, None, None],
            },
        )
    }

    /// Property whose type is fixed by the initial value
    #[must_use]
    pub fn property(name: &str, initial: PropertyValue) -> Self {
        let value_type = initial.property_type();
        Self::local(
            name,
            WidgetType::Property,
            Payload::Property {
                value: Some(initial),
                value_type: Some(value_type),
                on_change: None,
            },
        )
    }

    /// Read-only text
    #[must_use]
    pub fn label(name: &str, text: impl Into<LocalizedText>) -> Self {
        Self::local(
            name,
            WidgetType::Label,
            Payload::Label {
                text: Some(text.into()),
            },
        )
    }

    /// Empty controller-side widget awaiting its first fill
    pub(crate) fn remote(name: &str, widget_type: WidgetType, secured: bool) -> Self {
        let widget = Self::build(
            name,
            widget_type,
            Side::Controller,
            0,
            Payload::empty(widget_type),
        );
        widget.inner.data.write().secured = secured;
        widget
    }

    /// Placeholder standing in for a node that could not be built
    pub(crate) fn error_placeholder(name: &str, message: String) -> Self {
        Self::build(
            name,
            WidgetType::Error,
            Side::Controller,
            0,
            Payload::Error { message },
        )
    }
}

// Builder setters; each returns the widget for chaining

impl Widget {
    fn configure(self, f: impl FnOnce(&mut WidgetData)) -> Self {
        f(&mut self.inner.data.write());
        self
    }

    /// Publish through the secured interface variant
    #[must_use]
    pub fn secured(self) -> Self {
        self.configure(|d| d.secured = true)
    }

    #[must_use]
    pub fn with_label(self, text: impl Into<LocalizedText>) -> Self {
        let text = text.into();
        self.configure(|d| d.opt_source.label = Some(text))
    }

    #[must_use]
    pub fn with_bg_color(self, color: u32) -> Self {
        self.configure(|d| d.opt_source.bg_color = Some(color))
    }

    #[must_use]
    pub fn with_hints(self, hints: Vec<u16>) -> Self {
        self.configure(|d| d.opt_source.hints = hints)
    }

    #[must_use]
    pub fn with_unit_of_measure(self, unit: impl Into<LocalizedText>) -> Self {
        let unit = unit.into();
        self.configure(|d| d.opt_source.unit_of_measure = Some(unit))
    }

    #[must_use]
    pub fn with_states(self, states: u32) -> Self {
        self.configure(|d| d.states = states)
    }

    /// Compute `States` on every read instead of using the stored mask
    #[must_use]
    pub fn with_states_fn(self, f: impl Fn() -> u32 + Send + Sync + 'static) -> Self {
        self.configure(|d| d.states_fn = Some(Arc::new(f)))
    }

    /// Restrict a property to a list of values; replaces any range
    #[must_use]
    pub fn with_constraint_list(self, entries: Vec<(PropertyValue, LocalizedText)>) -> Self {
        self.configure(|d| {
            d.opt_source.constraint_range = None;
            d.opt_source.constraint_list = entries;
        })
    }

    /// Restrict a property to a range; replaces any list
    #[must_use]
    pub fn with_constraint_range(self, range: ConstraintRange) -> Self {
        self.configure(|d| {
            d.opt_source.constraint_list.clear();
            d.opt_source.constraint_range = Some(range);
        })
    }

    /// Handler for `Exec`
    #[must_use]
    pub fn on_execute(self, f: impl Fn() + Send + Sync + 'static) -> Self {
        let name = self.inner.name.clone();
        self.configure(|d| match &mut d.payload {
            Payload::Action { on_execute } => *on_execute = Some(Arc::new(f)),
            _ => tracing::warn!(widget = %name, "on_execute ignored on non-action widget"),
        })
    }

    /// Append a dialog action with its button label
    ///
    /// A dialog holds at most three actions; further calls are ignored.
    #[must_use]
    pub fn with_dialog_action(
        self,
        label: impl Into<LocalizedText>,
        f: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        let name = self.inner.name.clone();
        let label = label.into();
        self.configure(|d| {
            let Payload::Dialog {
                num_actions,
                actions,
                ..
            } = &mut d.payload
            else {
                tracing::warn!(widget = %name, "dialog action ignored on non-dialog widget");
                return;
            };
            let index = usize::from(*num_actions);
            if index >= actions.len() {
                tracing::warn!(widget = %name, "dialog already has three actions");
                return;
            }
            actions[index] = Some(Arc::new(f));
            d.opt_source.action_labels[index] = Some(label);
            *num_actions += 1;
        })
    }

    /// Hook consulted before a property accepts a remote write
    #[must_use]
    pub fn on_change(self, f: impl Fn(&PropertyValue) -> Result<()> + Send + Sync + 'static) -> Self {
        let name = self.inner.name.clone();
        self.configure(|d| match &mut d.payload {
            Payload::Property { on_change, .. } => *on_change = Some(Arc::new(f)),
            _ => tracing::warn!(widget = %name, "on_change ignored on non-property widget"),
        })
    }
}

// Tree structure

impl Widget {
    /// Attach `child` below this widget
    ///
    /// # Errors
    ///
    /// Returns `InvalidTree` if this widget cannot hold children, the child
    /// already has a parent, a sibling has the same name, or this widget is
    /// already published
    pub fn add_child(&self, child: &Self) -> Result<()> {
        if !self.inner.widget_type.has_children() {
            return Err(Error::InvalidTree(format!(
                "{} widget {} cannot hold children",
                self.inner.widget_type, self.inner.name
            )));
        }
        if self.inner.side != child.inner.side {
            return Err(Error::InvalidTree(format!(
                "{} and {} belong to different sides",
                self.inner.name, child.inner.name
            )));
        }
        if self.registration_state() != RegistrationState::Unregistered {
            return Err(Error::InvalidTree(format!(
                "{} is already published",
                self.inner.name
            )));
        }
        if self.inner.widget_type == WidgetType::ActionWithDialog {
            if child.inner.widget_type != WidgetType::Dialog {
                return Err(Error::type_mismatch(WidgetType::Dialog, child.inner.widget_type));
            }
            if !self.inner.children.read().is_empty() {
                return Err(Error::InvalidTree(format!(
                    "{} already has a dialog",
                    self.inner.name
                )));
            }
        }
        if self.child(&child.inner.name).is_some() {
            return Err(Error::InvalidTree(format!(
                "{} already has a child named {}",
                self.inner.name, child.inner.name
            )));
        }
        self.push_child(child)
    }

    /// Attach without the controllee-side checks
    pub(crate) fn push_child(&self, child: &Self) -> Result<()> {
        {
            let mut parent = child.inner.parent.write();
            if parent.upgrade().is_some() || Arc::ptr_eq(&self.inner, &child.inner) {
                return Err(Error::InvalidTree(format!(
                    "{} already has a parent",
                    child.inner.name
                )));
            }
            *parent = Arc::downgrade(&self.inner);
        }
        self.inner.children.write().push(child.clone());
        Ok(())
    }

    /// Swap `old` for `new` in place, keeping sibling order
    pub(crate) fn replace_child(&self, old: &Self, new: &Self) {
        let mut children = self.inner.children.write();
        if let Some(slot) = children.iter_mut().find(|c| c.ptr_eq(old)) {
            *old.inner.parent.write() = Weak::new();
            *new.inner.parent.write() = Arc::downgrade(&self.inner);
            *slot = new.clone();
        }
    }

    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.inner.parent.read().upgrade().map(|inner| Self { inner })
    }

    /// Children in insertion order
    #[must_use]
    pub fn children(&self) -> Vec<Self> {
        self.inner.children.read().clone()
    }

    /// Direct child by name
    #[must_use]
    pub fn child(&self, name: &str) -> Option<Self> {
        self.inner
            .children
            .read()
            .iter()
            .find(|c| c.inner.name == name)
            .cloned()
    }

    /// Descendant by slash-separated names, e.g. `settings/temp`
    #[must_use]
    pub fn find(&self, path: &str) -> Option<Self> {
        path.split('/')
            .filter(|s| !s.is_empty())
            .try_fold(self.clone(), |widget, name| widget.child(name))
    }

    /// Whether two handles refer to the same widget
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> WeakWidget {
        WeakWidget(Arc::downgrade(&self.inner))
    }
}

// Accessors

impl Widget {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn widget_type(&self) -> WidgetType {
        self.inner.widget_type
    }

    #[must_use]
    pub fn side(&self) -> Side {
        self.inner.side
    }

    #[must_use]
    pub fn is_secured(&self) -> bool {
        self.inner.data.read().secured
    }

    #[must_use]
    pub fn registration_state(&self) -> RegistrationState {
        *self.inner.state.lock()
    }

    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.registration_state() == RegistrationState::Registered
    }

    /// Whether the controller has completed at least one fill
    #[must_use]
    pub fn is_filled(&self) -> bool {
        self.inner.data.read().filled
    }

    /// Interface version (the remote one on the controller)
    #[must_use]
    pub fn version(&self) -> u16 {
        self.inner.data.read().version
    }

    /// `States` bitmask
    #[must_use]
    pub fn states(&self) -> u32 {
        let (stored, live) = self.inner.data.read().states_source();
        live.map_or(stored, |f| f())
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.states() & STATE_ENABLED != 0
    }

    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.states() & STATE_WRITABLE != 0
    }

    /// Languages of the bindings, in language index order
    #[must_use]
    pub fn languages(&self) -> Vec<String> {
        self.inner
            .bindings
            .lock()
            .iter()
            .map(|b| b.language().to_string())
            .collect()
    }

    /// Object paths of the bindings, in language index order
    #[must_use]
    pub fn paths(&self) -> Vec<ObjectPath> {
        self.inner
            .bindings
            .lock()
            .iter()
            .map(|b| b.path().clone())
            .collect()
    }

    /// `OptParams` for a language
    ///
    /// On the controller this is `None` until the first fill.
    #[must_use]
    pub fn opt_params(&self, language_index: usize) -> Option<OptParams> {
        match self.inner.side {
            Side::Controllee => {
                let source = self.inner.data.read().opt_source.clone();
                Some(source.resolve(language_index))
            }
            Side::Controller => {
                let data = self.inner.data.read();
                data.filled
                    .then(|| data.cache.get(language_index).map(|c| c.opt_params.clone()))
                    .flatten()
            }
        }
    }

    /// Display label for a language
    #[must_use]
    pub fn label_for(&self, language_index: usize) -> Option<String> {
        self.opt_params(language_index).and_then(|p| p.label)
    }

    /// Dialog message for a language
    #[must_use]
    pub fn message(&self, language_index: usize) -> Option<String> {
        let local = {
            let data = self.inner.data.read();
            match (&data.payload, self.inner.side) {
                (Payload::Dialog { message, .. }, Side::Controllee) => message.clone(),
                (Payload::Dialog { .. }, Side::Controller) => {
                    return data.cache.get(language_index).and_then(|c| c.message.clone());
                }
                _ => None,
            }
        };
        local.and_then(|m| m.get(language_index))
    }

    /// Label widget text for a language
    #[must_use]
    pub fn text(&self, language_index: usize) -> Option<String> {
        let local = {
            let data = self.inner.data.read();
            match (&data.payload, self.inner.side) {
                (Payload::Label { text }, Side::Controllee) => text.clone(),
                (Payload::Label { .. }, Side::Controller) => {
                    return data.cache.get(language_index).and_then(|c| c.text.clone());
                }
                _ => None,
            }
        };
        local.and_then(|t| t.get(language_index))
    }

    /// Number of dialog actions
    #[must_use]
    pub fn num_actions(&self) -> Option<u16> {
        match &self.inner.data.read().payload {
            Payload::Dialog { num_actions, .. } => Some(*num_actions),
            _ => None,
        }
    }

    /// Current property value
    #[must_use]
    pub fn value(&self) -> Option<PropertyValue> {
        match &self.inner.data.read().payload {
            Payload::Property { value, .. } => value.clone(),
            _ => None,
        }
    }

    /// Fixed property type, once known
    #[must_use]
    pub fn property_type(&self) -> Option<PropertyType> {
        match &self.inner.data.read().payload {
            Payload::Property { value_type, .. } => *value_type,
            _ => None,
        }
    }

    /// Why an Error placeholder was substituted
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        match &self.inner.data.read().payload {
            Payload::Error { message } => Some(message.clone()),
            _ => None,
        }
    }

    /// Store a new property value locally
    ///
    /// Used by the controllee application; publishing the change is up to
    /// the caller (see `Controllee::update_value`).
    ///
    /// # Errors
    ///
    /// Returns `NotImplemented` for non-property widgets, `TypeMismatch` if
    /// the value type differs from the fixed type and `Constraint` if the
    /// value violates the widget's constraints
    pub fn assign_value(&self, new: PropertyValue) -> Result<()> {
        let mut data = self.inner.data.write();
        let constraints = data.constraints(self.inner.side);
        let Payload::Property {
            value, value_type, ..
        } = &mut data.payload
        else {
            return Err(Error::NotImplemented(format!(
                "{} is not a property",
                self.inner.name
            )));
        };
        check_type(value_type, &new)?;
        if let Some(constraints) = constraints {
            constraints.check(&new)?;
        }
        *value = Some(new);
        Ok(())
    }
}

/// Fix the type on first assignment, reject a different type afterwards
pub(crate) fn check_type(value_type: &mut Option<PropertyType>, value: &PropertyValue) -> Result<()> {
    match value_type {
        Some(expected) if *expected != value.property_type() => {
            Err(Error::type_mismatch(*expected, value.property_type()))
        }
        Some(_) => Ok(()),
        None => {
            *value_type = Some(value.property_type());
            Ok(())
        }
    }
}

// Registration bookkeeping

impl Widget {
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, WidgetData> {
        self.inner.data.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, WidgetData> {
        self.inner.data.write()
    }

    /// `Unregistered → Registering`
    pub(crate) fn begin_registration(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        if *state != RegistrationState::Unregistered {
            return Err(Error::AlreadyRegistered(format!(
                "{} is {:?}",
                self.inner.name, *state
            )));
        }
        *state = RegistrationState::Registering;
        Ok(())
    }

    /// `Registering → Registered`
    pub(crate) fn finish_registration(&self) {
        let mut state = self.inner.state.lock();
        if *state == RegistrationState::Registering {
            *state = RegistrationState::Registered;
        }
    }

    /// Back to `Unregistered` after a failed registration
    ///
    /// Bindings published so far are kept so unregistering can remove them.
    pub(crate) fn abort_registration(&self) {
        *self.inner.state.lock() = RegistrationState::Unregistered;
    }

    /// Enter `Unregistering`; `false` if already on the way out
    pub(crate) fn begin_unregistration(&self) -> bool {
        let mut state = self.inner.state.lock();
        if *state == RegistrationState::Unregistering {
            return false;
        }
        *state = RegistrationState::Unregistering;
        true
    }

    pub(crate) fn finish_unregistration(&self) {
        *self.inner.state.lock() = RegistrationState::Unregistered;
    }

    /// # Errors
    ///
    /// Returns `NotRegistered` unless the widget is `Registered`
    pub(crate) fn ensure_registered(&self) -> Result<()> {
        match self.registration_state() {
            RegistrationState::Registered => Ok(()),
            state => Err(Error::NotRegistered(format!(
                "{} is {state:?}",
                self.inner.name
            ))),
        }
    }

    pub(crate) fn push_binding(&self, binding: RemoteBinding) {
        self.inner.bindings.lock().push(binding);
    }

    pub(crate) fn take_bindings(&self) -> Vec<RemoteBinding> {
        std::mem::take(&mut *self.inner.bindings.lock())
    }

    pub(crate) fn for_each_binding(&self, mut f: impl FnMut(&mut RemoteBinding)) {
        for binding in self.inner.bindings.lock().iter_mut() {
            f(binding);
        }
    }

    /// Path and interface name of every binding
    pub(crate) fn binding_targets(&self) -> Vec<(ObjectPath, String)> {
        self.inner
            .bindings
            .lock()
            .iter()
            .map(|b| (b.path().clone(), b.interface().name.clone()))
            .collect()
    }

    pub(crate) fn binding_count(&self) -> usize {
        self.inner.bindings.lock().len()
    }

    /// Proxy of the binding for a language
    pub(crate) fn proxy(&self, language_index: usize) -> Result<Proxy> {
        self.inner
            .bindings
            .lock()
            .iter()
            .find(|b| b.language_index() == language_index)
            .and_then(|b| b.proxy().cloned())
            .ok_or_else(|| {
                Error::NotRegistered(format!(
                    "{} has no session for language {language_index}",
                    self.inner.name
                ))
            })
    }
}

// Snapshot

/// Per-language view inside a [`WidgetSnapshot`]
#[derive(Debug, Clone, Serialize)]
pub struct LanguageView {
    pub language: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opt_params: Option<OptParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Serializable copy of a widget subtree
#[derive(Debug, Clone, Serialize)]
pub struct WidgetSnapshot {
    pub name: String,
    #[serde(rename = "type")]
    pub widget_type: WidgetType,
    pub secured: bool,
    pub state: RegistrationState,
    pub version: u16,
    pub states: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<PropertyValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_actions: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub languages: Vec<LanguageView>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<WidgetSnapshot>,
}

impl Widget {
    /// Copy this subtree into plain data
    #[must_use]
    pub fn snapshot(&self) -> WidgetSnapshot {
        let bindings: Vec<(usize, String, String)> = self
            .inner
            .bindings
            .lock()
            .iter()
            .map(|b| (b.language_index(), b.language().to_string(), b.path().to_string()))
            .collect();
        let languages = bindings
            .into_iter()
            .map(|(index, language, path)| LanguageView {
                language,
                path,
                opt_params: self.opt_params(index),
                message: self.message(index),
                text: self.text(index),
            })
            .collect();

        WidgetSnapshot {
            name: self.inner.name.clone(),
            widget_type: self.inner.widget_type,
            secured: self.is_secured(),
            state: self.registration_state(),
            version: self.version(),
            states: self.states(),
            value: self.value(),
            num_actions: self.num_actions(),
            error: self.error_message(),
            languages,
            children: self.children().iter().map(Self::snapshot).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_set_defaults() {
        let temp = Widget::property("temp", PropertyValue::U16(180))
            .with_label("Temperature")
            .with_unit_of_measure("C");
        assert_eq!(temp.widget_type(), WidgetType::Property);
        assert_eq!(temp.states(), STATE_ENABLED | STATE_WRITABLE);
        assert_eq!(temp.property_type(), Some(PropertyType::U16));
        assert_eq!(temp.label_for(0).as_deref(), Some("Temperature"));
        assert_eq!(temp.registration_state(), RegistrationState::Unregistered);

        let start = Widget::action("start");
        assert!(start.is_enabled());
        assert!(!start.is_writable());
    }

    #[test]
    fn states_fn_overrides_stored_mask() {
        let light = Widget::label("status", "Idle").with_states_fn(|| 0);
        assert!(!light.is_enabled());
    }

    /// Run `f` on a thread and fail instead of hanging if it never returns
    fn within_deadline<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(f());
        });
        rx.recv_timeout(std::time::Duration::from_secs(2))
            .expect("widget lock was held across a callback")
    }

    #[test]
    fn callbacks_may_read_their_own_widget() {
        let slot: Arc<std::sync::OnceLock<WeakWidget>> = Arc::default();
        let (label_slot, list_slot, states_slot) =
            (Arc::clone(&slot), Arc::clone(&slot), Arc::clone(&slot));
        let own_value = move |slot: &std::sync::OnceLock<WeakWidget>| {
            slot.get()
                .and_then(WeakWidget::upgrade)
                .and_then(|w| w.value())
                .map(|v| v.to_string())
        };
        let temp = Widget::property("temp", PropertyValue::U16(180))
            .with_label(LocalizedText::Dynamic(Arc::new(move |_| {
                own_value(&label_slot).map(|v| format!("Temp {v}"))
            })))
            .with_constraint_list(vec![
                (
                    PropertyValue::U16(180),
                    LocalizedText::Dynamic(Arc::new(move |_| own_value(&list_slot))),
                ),
                (PropertyValue::U16(190), "High".into()),
            ])
            .with_states_fn(move || {
                let writable = states_slot
                    .get()
                    .and_then(WeakWidget::upgrade)
                    .is_some_and(|w| w.value().is_some());
                if writable { STATE_ENABLED | STATE_WRITABLE } else { STATE_ENABLED }
            });
        assert!(slot.set(temp.downgrade()).is_ok());

        let handle = temp.clone();
        let (label, states) = within_deadline(move || {
            handle.assign_value(PropertyValue::U16(190)).unwrap();
            (handle.label_for(0), handle.states())
        });
        assert_eq!(label.as_deref(), Some("Temp 190"));
        assert_eq!(states, STATE_ENABLED | STATE_WRITABLE);

        let handle = temp.clone();
        let params = within_deadline(move || handle.opt_params(0).unwrap());
        let Some(Constraints::List(list)) = params.constraints else {
            panic!("expected constraint list");
        };
        assert_eq!(list[0].display, "190");
    }

    #[test]
    fn children_keep_order_and_parent() {
        let root = Widget::container("main");
        let a = Widget::label("a", "A");
        let b = Widget::label("b", "B");
        root.add_child(&a).unwrap();
        root.add_child(&b).unwrap();
        let names: Vec<_> = root.children().iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(a.parent().unwrap().ptr_eq(&root));
        assert!(root.parent().is_none());
    }

    #[test]
    fn child_cannot_have_two_parents() {
        let one = Widget::container("one");
        let two = Widget::container("two");
        let child = Widget::action("go");
        one.add_child(&child).unwrap();
        assert!(matches!(two.add_child(&child), Err(Error::InvalidTree(_))));
    }

    #[test]
    fn leaves_reject_children() {
        let label = Widget::label("l", "text");
        assert!(label.add_child(&Widget::action("a")).is_err());
    }

    #[test]
    fn duplicate_sibling_names_rejected() {
        let root = Widget::container("main");
        root.add_child(&Widget::action("go")).unwrap();
        assert!(root.add_child(&Widget::action("go")).is_err());
    }

    #[test]
    fn action_with_dialog_holds_one_dialog() {
        let reset = Widget::action_with_dialog("reset");
        assert!(reset.add_child(&Widget::action("nope")).is_err());
        reset.add_child(&Widget::dialog("confirm", "Sure?")).unwrap();
        assert!(reset.add_child(&Widget::dialog("again", "Really?")).is_err());
    }

    #[test]
    fn dialog_actions_count_up_to_three() {
        let dialog = Widget::dialog("confirm", "Sure?")
            .with_dialog_action("Yes", || {})
            .with_dialog_action("No", || {});
        assert_eq!(dialog.num_actions(), Some(2));
        let params = dialog.opt_params(0).unwrap();
        assert_eq!(params.action_labels[1].as_deref(), Some("No"));
        assert_eq!(params.action_labels[2], None);

        let full = dialog
            .with_dialog_action("Maybe", || {})
            .with_dialog_action("Extra", || {});
        assert_eq!(full.num_actions(), Some(3));
    }

    #[test]
    fn find_walks_names() {
        let root = Widget::container("main");
        let settings = Widget::container("settings");
        let temp = Widget::property("temp", PropertyValue::U16(1));
        settings.add_child(&temp).unwrap();
        root.add_child(&settings).unwrap();
        assert!(root.find("settings/temp").unwrap().ptr_eq(&temp));
        assert!(root.find("settings/nope").is_none());
        assert!(root.find("").unwrap().ptr_eq(&root));
    }

    #[test]
    fn assign_value_keeps_type_and_constraints() {
        let mode = Widget::property("mode", PropertyValue::U16(1)).with_constraint_range(
            ConstraintRange::new(
                PropertyValue::U16(1),
                PropertyValue::U16(3),
                PropertyValue::U16(1),
            )
            .unwrap(),
        );
        mode.assign_value(PropertyValue::U16(3)).unwrap();
        assert_eq!(mode.value(), Some(PropertyValue::U16(3)));
        assert!(matches!(
            mode.assign_value(PropertyValue::U32(2)),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(matches!(
            mode.assign_value(PropertyValue::U16(4)),
            Err(Error::Constraint(_))
        ));
        assert!(Widget::action("a").assign_value(PropertyValue::Bool(true)).is_err());
    }

    #[test]
    fn registration_state_machine() {
        let w = Widget::container("main");
        assert!(w.ensure_registered().is_err());
        w.begin_registration().unwrap();
        assert!(matches!(w.begin_registration(), Err(Error::AlreadyRegistered(_))));
        w.finish_registration();
        assert!(w.ensure_registered().is_ok());
        assert!(w.begin_unregistration());
        assert!(!w.begin_unregistration());
        w.finish_unregistration();
        assert_eq!(w.registration_state(), RegistrationState::Unregistered);
    }

    #[test]
    fn registered_widget_rejects_new_children() {
        let root = Widget::container("main");
        root.begin_registration().unwrap();
        assert!(root.add_child(&Widget::action("late")).is_err());
    }

    #[test]
    fn replace_child_keeps_position() {
        let root = Widget::remote("main", WidgetType::Container, false);
        let a = Widget::remote("a", WidgetType::Action, false);
        let b = Widget::remote("b", WidgetType::Label, false);
        root.push_child(&a).unwrap();
        root.push_child(&b).unwrap();
        let placeholder = Widget::error_placeholder("a", "boom".into());
        root.replace_child(&a, &placeholder);
        let children = root.children();
        assert!(children[0].ptr_eq(&placeholder));
        assert_eq!(children[0].widget_type(), WidgetType::Error);
        assert!(a.parent().is_none());
        assert!(placeholder.parent().unwrap().ptr_eq(&root));
    }

    #[test]
    fn snapshot_serializes_tree() {
        let root = Widget::container("main").with_label("Oven");
        root.add_child(&Widget::property("temp", PropertyValue::U16(180)))
            .unwrap();
        let json = serde_json::to_value(root.snapshot()).unwrap();
        assert_eq!(json["type"], "container");
        assert_eq!(json["children"][0]["value"]["type"], "u16");
        assert_eq!(json["children"][0]["value"]["value"], 180);
    }
}
