//! Remote-object bus substrate
//!
//! The control panel protocol is built on top of a bus offering method
//! calls, property access, signals, object publication and introspection.
//! [`Bus`] captures exactly that surface so the protocol code never depends
//! on a concrete transport; [`memory`] provides an in-process implementation.

pub mod memory;
mod variant;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

pub use memory::{MemoryBus, MemoryHub};
pub use variant::Variant;

/// Identifier of a session between a controller and a controllee
pub type SessionId = u32;

/// Error returned by the bus or by a remote object handler
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{name}: {message}")]
pub struct BusError {
    /// Error name (reverse-DNS style)
    pub name: String,
    /// Human-readable message
    pub message: String,
}

impl BusError {
    pub const NO_SUCH_PROPERTY: &'static str = "org.alljoyn.Bus.NoSuchProperty";
    pub const METHOD_NOT_ALLOWED: &'static str = "org.alljoyn.ControlPanel.Error.MethodNotAllowed";
    pub const INVALID_VALUE: &'static str = "org.alljoyn.ControlPanel.Error.InvalidValue";
    pub const READ_ONLY: &'static str = "org.alljoyn.Bus.PropertyReadOnly";
    pub const NO_SUCH_OBJECT: &'static str = "org.alljoyn.Bus.NoSuchObject";
    pub const NO_SUCH_INTERFACE: &'static str = "org.alljoyn.Bus.NoSuchInterface";
    pub const NO_SESSION: &'static str = "org.alljoyn.Bus.NoSession";
    pub const UNREACHABLE: &'static str = "org.alljoyn.Bus.Unreachable";
    pub const TIMEOUT: &'static str = "org.alljoyn.Bus.Timeout";
    pub const DUPLICATE: &'static str = "org.alljoyn.Bus.Duplicate";
    pub const BAD_PATH: &'static str = "org.alljoyn.Bus.BadObjectPath";

    /// Create an error with the given name and message
    #[must_use]
    pub fn new(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn no_such_property(property: &str) -> Self {
        Self::new(Self::NO_SUCH_PROPERTY, format!("no such property: {property}"))
    }

    #[must_use]
    pub fn method_not_allowed(member: &str) -> Self {
        Self::new(Self::METHOD_NOT_ALLOWED, format!("cannot execute {member}"))
    }

    #[must_use]
    pub fn timeout(what: &str) -> Self {
        Self::new(Self::TIMEOUT, format!("{what} timed out"))
    }
}

/// A slash-delimited object path
///
/// Segments are restricted to `[A-Za-z0-9_]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ObjectPath(String);

impl ObjectPath {
    /// Parse and validate an object path
    ///
    /// # Errors
    ///
    /// Returns error if the path is empty, relative, has a trailing slash
    /// or contains characters outside `[A-Za-z0-9_]`
    pub fn new(path: impl Into<String>) -> Result<Self, BusError> {
        let path = path.into();
        if path == "/" {
            return Ok(Self(path));
        }
        let Some(rest) = path.strip_prefix('/') else {
            return Err(BusError::new(BusError::BAD_PATH, format!("not absolute: {path}")));
        };
        let valid = rest.split('/').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
        if !valid {
            return Err(BusError::new(BusError::BAD_PATH, format!("invalid path: {path}")));
        }
        Ok(Self(path))
    }

    /// The root path `/`
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segments, excluding the empty root
    #[must_use]
    pub fn segments(&self) -> Vec<&str> {
        self.0.split('/').filter(|s| !s.is_empty()).collect()
    }

    /// Number of segments
    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments().len()
    }

    /// Last segment, or `None` for the root
    #[must_use]
    pub fn last_segment(&self) -> Option<&str> {
        self.0.rsplit('/').next().filter(|s| !s.is_empty())
    }

    /// Append one segment
    ///
    /// # Errors
    ///
    /// Returns error if the segment is not a valid path segment
    pub fn child(&self, segment: &str) -> Result<Self, BusError> {
        if self.0 == "/" {
            Self::new(format!("/{segment}"))
        } else {
            Self::new(format!("{}/{segment}", self.0))
        }
    }

    /// Whether `self` lies strictly below `ancestor`
    #[must_use]
    pub fn is_descendant_of(&self, ancestor: &Self) -> bool {
        if ancestor.0 == "/" {
            return self.0 != "/";
        }
        self.0
            .strip_prefix(ancestor.0.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Access mode of an interface property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    ReadWrite,
}

impl Access {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::ReadWrite => "readwrite",
        }
    }
}

/// A property declared on an interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDecl {
    pub name: String,
    pub signature: String,
    pub access: Access,
}

/// Shape of one bus interface
///
/// Descriptions are created once per bus and shared by every object that
/// implements the interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescription {
    pub name: String,
    /// Whether calls require an authenticated session
    pub secure: bool,
    pub properties: Vec<PropertyDecl>,
    pub methods: Vec<String>,
    pub signals: Vec<String>,
}

impl InterfaceDescription {
    /// Create an empty description
    #[must_use]
    pub fn new(name: &str, secure: bool) -> Self {
        Self {
            name: name.to_string(),
            secure,
            properties: Vec::new(),
            methods: Vec::new(),
            signals: Vec::new(),
        }
    }

    /// Add a property
    #[must_use]
    pub fn property(mut self, name: &str, signature: &str, access: Access) -> Self {
        self.properties.push(PropertyDecl {
            name: name.to_string(),
            signature: signature.to_string(),
            access,
        });
        self
    }

    /// Add a no-argument method
    #[must_use]
    pub fn method(mut self, name: &str) -> Self {
        self.methods.push(name.to_string());
        self
    }

    /// Add a signal
    #[must_use]
    pub fn signal(mut self, name: &str) -> Self {
        self.signals.push(name.to_string());
        self
    }

    /// Look up a declared property
    #[must_use]
    pub fn find_property(&self, name: &str) -> Option<&PropertyDecl> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// Remote endpoint addressed by a proxy
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyTarget {
    /// Unique bus name of the peer hosting the object
    pub bus_name: String,
    pub path: ObjectPath,
}

impl ProxyTarget {
    #[must_use]
    pub fn new(bus_name: &str, path: ObjectPath) -> Self {
        Self {
            bus_name: bus_name.to_string(),
            path,
        }
    }
}

/// A signal delivered by the bus
#[derive(Debug, Clone, PartialEq)]
pub struct SignalMessage {
    /// Unique name of the emitting peer
    pub sender: String,
    pub session: SessionId,
    pub path: ObjectPath,
    pub interface: String,
    pub member: String,
    pub args: Vec<Variant>,
}

/// Context handed to an object handler for one inbound call
///
/// `bus` is the handler's own bus; handlers may call back into it, for
/// example to emit a signal in response to a property write.
pub struct CallContext<'a> {
    pub session: SessionId,
    pub sender: &'a str,
    pub bus: &'a dyn Bus,
}

/// Serves inbound calls for one published object
pub trait ObjectHandler: Send + Sync {
    /// Read one property
    ///
    /// # Errors
    ///
    /// Returns error if the property does not exist on the interface
    fn get_property(
        &self,
        ctx: &CallContext<'_>,
        interface: &str,
        property: &str,
    ) -> Result<Variant, BusError>;

    /// Read every property of an interface in one batch
    ///
    /// # Errors
    ///
    /// Returns error if any property cannot be read
    fn get_all_properties(
        &self,
        ctx: &CallContext<'_>,
        interface: &str,
    ) -> Result<Vec<(String, Variant)>, BusError>;

    /// Write one property
    ///
    /// # Errors
    ///
    /// Returns error if the property does not exist, is read-only, or the
    /// value is rejected
    fn set_property(
        &self,
        ctx: &CallContext<'_>,
        interface: &str,
        property: &str,
        value: Variant,
    ) -> Result<(), BusError>;

    /// Invoke a method
    ///
    /// # Errors
    ///
    /// Returns error if the method is unknown or fails
    fn call_method(
        &self,
        ctx: &CallContext<'_>,
        interface: &str,
        member: &str,
        args: Vec<Variant>,
    ) -> Result<Vec<Variant>, BusError>;
}

/// The bus substrate
///
/// Local operations (publication, interface table, signal emission) are
/// synchronous; operations that reach a remote peer are asynchronous.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Unique name of this endpoint on the bus
    fn unique_name(&self) -> &str;

    /// Look up an interface description previously added to this bus
    fn interface(&self, name: &str) -> Option<Arc<InterfaceDescription>>;

    /// Add an interface description
    ///
    /// # Errors
    ///
    /// Returns error if an interface with the same name already exists
    fn add_interface(
        &self,
        description: InterfaceDescription,
    ) -> Result<Arc<InterfaceDescription>, BusError>;

    /// Publish an object
    ///
    /// # Errors
    ///
    /// Returns error if an object already exists at `path`
    fn publish(
        &self,
        path: ObjectPath,
        interfaces: Vec<Arc<InterfaceDescription>>,
        handler: Arc<dyn ObjectHandler>,
    ) -> Result<(), BusError>;

    /// Remove a published object
    ///
    /// # Errors
    ///
    /// Returns error if no object exists at `path`
    fn unpublish(&self, path: &ObjectPath) -> Result<(), BusError>;

    /// Sessions in which this endpoint is the host
    fn hosted_sessions(&self) -> Vec<SessionId>;

    /// Emit a signal from a local object to the peer of `session`
    ///
    /// # Errors
    ///
    /// Returns error if the session or its peer is gone
    fn emit_signal(
        &self,
        session: SessionId,
        path: &ObjectPath,
        interface: &str,
        member: &str,
        args: Vec<Variant>,
    ) -> Result<(), BusError>;

    /// Stream of signals delivered to this endpoint
    fn signals(&self) -> broadcast::Receiver<SignalMessage>;

    /// Join a session hosted by `host`
    async fn join_session(&self, host: &str) -> Result<SessionId, BusError>;

    /// Leave a session
    async fn leave_session(&self, session: SessionId) -> Result<(), BusError>;

    /// Fetch the introspection XML of a remote object
    async fn introspect(
        &self,
        session: SessionId,
        target: &ProxyTarget,
    ) -> Result<String, BusError>;

    async fn get_property(
        &self,
        session: SessionId,
        target: &ProxyTarget,
        interface: &str,
        property: &str,
    ) -> Result<Variant, BusError>;

    async fn get_all_properties(
        &self,
        session: SessionId,
        target: &ProxyTarget,
        interface: &str,
    ) -> Result<Vec<(String, Variant)>, BusError>;

    async fn set_property(
        &self,
        session: SessionId,
        target: &ProxyTarget,
        interface: &str,
        property: &str,
        value: Variant,
    ) -> Result<(), BusError>;

    async fn call_method(
        &self,
        session: SessionId,
        target: &ProxyTarget,
        interface: &str,
        member: &str,
        args: Vec<Variant>,
    ) -> Result<Vec<Variant>, BusError>;
}
