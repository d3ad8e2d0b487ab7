//! Application callbacks for a mirrored panel

use std::fmt;

use serde::Serialize;

use crate::Error;
use crate::value::PropertyValue;
use crate::widget::Widget;

/// Why a background operation reported an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    /// A discovered node could not be built; an Error placeholder replaced it
    RegistrationFailed,
    /// A node could not be introspected and was skipped
    IntrospectionFailed,
    /// A `MetadataChanged` re-fetch failed
    RefreshFailed,
    /// A `ValueChanged` payload could not be decoded
    MalformedPayload,
    /// The router fell behind and dropped signals; a re-fetch follows
    SignalsLost,
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::RegistrationFailed => "registration failed",
            Self::IntrospectionFailed => "introspection failed",
            Self::RefreshFailed => "refresh failed",
            Self::MalformedPayload => "malformed payload",
            Self::SignalsLost => "signals lost",
        };
        f.write_str(reason)
    }
}

/// Receives change and error notifications for mirrored widgets
///
/// Called from the signal router task and from discovery. Implementations
/// must not block.
pub trait PanelListener: Send + Sync {
    /// A widget's metadata was re-fetched
    fn metadata_changed(&self, widget: &Widget) {
        let _ = widget;
    }

    /// A property received a new value
    fn value_changed(&self, widget: &Widget, value: &PropertyValue) {
        let _ = (widget, value);
    }

    /// A background operation failed for the named widget
    fn error_occurred(&self, widget: &str, reason: ErrorReason, error: &Error);
}

/// Listener that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct LogListener;

impl PanelListener for LogListener {
    fn metadata_changed(&self, widget: &Widget) {
        tracing::debug!(widget = %widget.name(), "metadata changed");
    }

    fn value_changed(&self, widget: &Widget, value: &PropertyValue) {
        tracing::debug!(widget = %widget.name(), value = %value, "value changed");
    }

    fn error_occurred(&self, widget: &str, reason: ErrorReason, error: &Error) {
        tracing::warn!(widget, reason = %reason, error = %error, "panel error");
    }
}
