//! panelbus - remote control panels over a remote-object bus
//!
//! A device (the *controllee*) publishes a tree of widgets as bus objects,
//! one object per widget per language. A remote UI (the *controller*)
//! discovers that tree by introspection, mirrors it locally and keeps the
//! mirror live through `MetadataChanged` and `ValueChanged` signals.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐          ┌──────────────────────────┐
//! │        Controllee        │          │        Controller        │
//! │  Widget tree → Registrar │          │ Introspector → Tree      │
//! │  ObjectHandler per lang  │◄── bus ──┤ Proxy calls, fills       │
//! │  notify_changed ─────────┼─signals─►│ SignalRouter → Listener  │
//! └──────────────────────────┘          └──────────────────────────┘
//! ```

pub mod bus;
pub mod catalog;
pub mod config;
pub mod controllee;
pub mod controller;
pub mod error;
pub mod path;
pub mod value;
pub mod widget;

pub use bus::{Bus, BusError, MemoryBus, MemoryHub, ObjectPath, SessionId, Variant};
pub use catalog::{Catalog, WidgetType};
pub use config::{Config, PanelConfig};
pub use controllee::Controllee;
pub use controller::{Controller, ErrorReason, LogListener, Panel, PanelListener, PanelSnapshot};
pub use error::{Error, Result};
pub use path::PanelLocation;
pub use value::{ConstraintRange, Constraints, Date, PropertyType, PropertyValue, Time};
pub use widget::{
    AttachOutcome, LocalizedText, OptParams, RegistrationState, STATE_ENABLED, STATE_WRITABLE, Side,
    Widget, WidgetSnapshot,
};
