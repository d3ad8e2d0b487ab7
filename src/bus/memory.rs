//! In-process bus
//!
//! A [`MemoryHub`] connects any number of named [`MemoryBus`] endpoints.
//! Calls are dispatched synchronously to the handler of the target object;
//! the handler is cloned out of the object table first so it may re-enter
//! the bus. Signals are delivered through a per-endpoint broadcast channel.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::{
    Access, Bus, BusError, CallContext, InterfaceDescription, ObjectHandler, ObjectPath,
    ProxyTarget, SessionId, SignalMessage, Variant,
};

/// Capacity of each endpoint's signal channel
const SIGNAL_CAPACITY: usize = 256;

/// Shared state connecting in-process endpoints
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

#[derive(Default)]
struct HubInner {
    endpoints: RwLock<HashMap<String, Arc<Endpoint>>>,
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,
    next_session: AtomicU32,
}

#[derive(Debug, Clone)]
struct SessionEntry {
    host: String,
    joiner: String,
}

struct Endpoint {
    name: String,
    objects: RwLock<BTreeMap<ObjectPath, PublishedObject>>,
    interfaces: RwLock<HashMap<String, Arc<InterfaceDescription>>>,
    signal_tx: broadcast::Sender<SignalMessage>,
}

#[derive(Clone)]
struct PublishedObject {
    interfaces: Vec<Arc<InterfaceDescription>>,
    handler: Arc<dyn ObjectHandler>,
}

impl PublishedObject {
    fn interface(&self, name: &str) -> Result<&Arc<InterfaceDescription>, BusError> {
        self.interfaces
            .iter()
            .find(|i| i.name == name)
            .ok_or_else(|| BusError::new(BusError::NO_SUCH_INTERFACE, name.to_string()))
    }
}

impl MemoryHub {
    /// Create an empty hub
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a new endpoint under a unique name
    ///
    /// # Errors
    ///
    /// Returns error if the name is already taken
    pub fn connect(&self, name: &str) -> Result<MemoryBus, BusError> {
        let mut endpoints = self.inner.endpoints.write();
        if endpoints.contains_key(name) {
            return Err(BusError::new(
                BusError::DUPLICATE,
                format!("bus name already connected: {name}"),
            ));
        }
        let (signal_tx, _) = broadcast::channel(SIGNAL_CAPACITY);
        let endpoint = Arc::new(Endpoint {
            name: name.to_string(),
            objects: RwLock::new(BTreeMap::new()),
            interfaces: RwLock::new(HashMap::new()),
            signal_tx,
        });
        endpoints.insert(name.to_string(), Arc::clone(&endpoint));
        tracing::debug!(name, "endpoint connected");
        Ok(MemoryBus {
            hub: Arc::clone(&self.inner),
            endpoint,
        })
    }

    /// Drop an endpoint from the hub
    ///
    /// Sessions involving it are kept, so later deliveries to them fail
    /// the way a vanished peer does on a real bus.
    pub fn disconnect(&self, name: &str) -> bool {
        let removed = self.inner.endpoints.write().remove(name).is_some();
        if removed {
            tracing::debug!(name, "endpoint disconnected");
        }
        removed
    }
}

impl HubInner {
    fn endpoint(&self, name: &str) -> Result<Arc<Endpoint>, BusError> {
        self.endpoints
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| BusError::new(BusError::UNREACHABLE, format!("no such peer: {name}")))
    }

    fn session(&self, session: SessionId) -> Result<SessionEntry, BusError> {
        self.sessions
            .read()
            .get(&session)
            .cloned()
            .ok_or_else(|| BusError::new(BusError::NO_SESSION, format!("no session {session}")))
    }
}

/// One endpoint connected to a [`MemoryHub`]
#[derive(Clone)]
pub struct MemoryBus {
    hub: Arc<HubInner>,
    endpoint: Arc<Endpoint>,
}

impl MemoryBus {
    /// Resolve the host bus and object a remote call is addressed to
    fn resolve(
        &self,
        session: SessionId,
        target: &ProxyTarget,
    ) -> Result<(Self, PublishedObject), BusError> {
        let entry = self.hub.session(session)?;
        if entry.host != target.bus_name || entry.joiner != self.endpoint.name {
            return Err(BusError::new(
                BusError::NO_SESSION,
                format!("session {session} does not connect to {}", target.bus_name),
            ));
        }
        let host = self.hub.endpoint(&target.bus_name)?;
        let object = host
            .objects
            .read()
            .get(&target.path)
            .cloned()
            .ok_or_else(|| BusError::new(BusError::NO_SUCH_OBJECT, target.path.to_string()))?;
        let host_bus = Self {
            hub: Arc::clone(&self.hub),
            endpoint: host,
        };
        Ok((host_bus, object))
    }

    fn introspection_xml(&self, path: &ObjectPath) -> Result<String, BusError> {
        let objects = self.endpoint.objects.read();
        let object = objects.get(path);

        let depth = path.depth();
        let children: BTreeSet<String> = objects
            .keys()
            .filter(|p| p.is_descendant_of(path))
            .filter_map(|p| p.segments().get(depth).map(|s| (*s).to_string()))
            .collect();

        if object.is_none() && children.is_empty() {
            return Err(BusError::new(BusError::NO_SUCH_OBJECT, path.to_string()));
        }

        let mut xml = String::new();
        let _ = writeln!(xml, "<node name=\"{path}\">");
        if let Some(object) = object {
            for iface in &object.interfaces {
                write_interface(&mut xml, iface);
            }
        }
        for child in &children {
            let _ = writeln!(xml, "  <node name=\"{child}\"/>");
        }
        xml.push_str("</node>\n");
        Ok(xml)
    }
}

fn write_interface(xml: &mut String, iface: &InterfaceDescription) {
    let _ = writeln!(xml, "  <interface name=\"{}\">", iface.name);
    if iface.secure {
        xml.push_str("    <annotation name=\"org.alljoyn.Bus.Secure\" value=\"true\"/>\n");
    }
    for property in &iface.properties {
        let _ = writeln!(
            xml,
            "    <property name=\"{}\" type=\"{}\" access=\"{}\"/>",
            property.name,
            property.signature,
            property.access.as_str()
        );
    }
    for method in &iface.methods {
        let _ = writeln!(xml, "    <method name=\"{method}\"/>");
    }
    for signal in &iface.signals {
        let _ = writeln!(xml, "    <signal name=\"{signal}\"/>");
    }
    xml.push_str("  </interface>\n");
}

#[async_trait]
impl Bus for MemoryBus {
    fn unique_name(&self) -> &str {
        &self.endpoint.name
    }

    fn interface(&self, name: &str) -> Option<Arc<InterfaceDescription>> {
        self.endpoint.interfaces.read().get(name).cloned()
    }

    fn add_interface(
        &self,
        description: InterfaceDescription,
    ) -> Result<Arc<InterfaceDescription>, BusError> {
        let mut interfaces = self.endpoint.interfaces.write();
        if interfaces.contains_key(&description.name) {
            return Err(BusError::new(
                BusError::DUPLICATE,
                format!("interface already exists: {}", description.name),
            ));
        }
        let description = Arc::new(description);
        interfaces.insert(description.name.clone(), Arc::clone(&description));
        Ok(description)
    }

    fn publish(
        &self,
        path: ObjectPath,
        interfaces: Vec<Arc<InterfaceDescription>>,
        handler: Arc<dyn ObjectHandler>,
    ) -> Result<(), BusError> {
        let mut objects = self.endpoint.objects.write();
        if objects.contains_key(&path) {
            return Err(BusError::new(
                BusError::DUPLICATE,
                format!("object already published: {path}"),
            ));
        }
        tracing::trace!(bus = %self.endpoint.name, path = %path, "object published");
        objects.insert(
            path,
            PublishedObject {
                interfaces,
                handler,
            },
        );
        Ok(())
    }

    fn unpublish(&self, path: &ObjectPath) -> Result<(), BusError> {
        self.endpoint
            .objects
            .write()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| BusError::new(BusError::NO_SUCH_OBJECT, path.to_string()))
    }

    fn hosted_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self
            .hub
            .sessions
            .read()
            .iter()
            .filter(|(_, entry)| entry.host == self.endpoint.name)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    fn emit_signal(
        &self,
        session: SessionId,
        path: &ObjectPath,
        interface: &str,
        member: &str,
        args: Vec<Variant>,
    ) -> Result<(), BusError> {
        let entry = self.hub.session(session)?;
        if entry.host != self.endpoint.name {
            return Err(BusError::new(
                BusError::NO_SESSION,
                format!("{} does not host session {session}", self.endpoint.name),
            ));
        }
        let peer = self.hub.endpoint(&entry.joiner)?;
        let message = SignalMessage {
            sender: self.endpoint.name.clone(),
            session,
            path: path.clone(),
            interface: interface.to_string(),
            member: member.to_string(),
            args,
        };
        // No subscriber on the peer is not a delivery failure
        let _ = peer.signal_tx.send(message);
        Ok(())
    }

    fn signals(&self) -> broadcast::Receiver<SignalMessage> {
        self.endpoint.signal_tx.subscribe()
    }

    async fn join_session(&self, host: &str) -> Result<SessionId, BusError> {
        self.hub.endpoint(host)?;
        let id = self.hub.next_session.fetch_add(1, Ordering::Relaxed) + 1;
        self.hub.sessions.write().insert(
            id,
            SessionEntry {
                host: host.to_string(),
                joiner: self.endpoint.name.clone(),
            },
        );
        tracing::debug!(session = id, host, joiner = %self.endpoint.name, "session joined");
        Ok(id)
    }

    async fn leave_session(&self, session: SessionId) -> Result<(), BusError> {
        let mut sessions = self.hub.sessions.write();
        let owned = sessions.get(&session).is_some_and(|entry| {
            entry.joiner == self.endpoint.name || entry.host == self.endpoint.name
        });
        if !owned {
            return Err(BusError::new(BusError::NO_SESSION, format!("no session {session}")));
        }
        sessions.remove(&session);
        tracing::debug!(session, "session left");
        Ok(())
    }

    async fn introspect(
        &self,
        session: SessionId,
        target: &ProxyTarget,
    ) -> Result<String, BusError> {
        let entry = self.hub.session(session)?;
        if entry.host != target.bus_name {
            return Err(BusError::new(
                BusError::NO_SESSION,
                format!("session {session} does not connect to {}", target.bus_name),
            ));
        }
        let host = Self {
            hub: Arc::clone(&self.hub),
            endpoint: self.hub.endpoint(&target.bus_name)?,
        };
        host.introspection_xml(&target.path)
    }

    async fn get_property(
        &self,
        session: SessionId,
        target: &ProxyTarget,
        interface: &str,
        property: &str,
    ) -> Result<Variant, BusError> {
        let (host, object) = self.resolve(session, target)?;
        if object.interface(interface)?.find_property(property).is_none() {
            return Err(BusError::no_such_property(property));
        }
        let ctx = CallContext {
            session,
            sender: &self.endpoint.name,
            bus: &host,
        };
        object.handler.get_property(&ctx, interface, property)
    }

    async fn get_all_properties(
        &self,
        session: SessionId,
        target: &ProxyTarget,
        interface: &str,
    ) -> Result<Vec<(String, Variant)>, BusError> {
        let (host, object) = self.resolve(session, target)?;
        object.interface(interface)?;
        let ctx = CallContext {
            session,
            sender: &self.endpoint.name,
            bus: &host,
        };
        object.handler.get_all_properties(&ctx, interface)
    }

    async fn set_property(
        &self,
        session: SessionId,
        target: &ProxyTarget,
        interface: &str,
        property: &str,
        value: Variant,
    ) -> Result<(), BusError> {
        let (host, object) = self.resolve(session, target)?;
        match object.interface(interface)?.find_property(property) {
            None => return Err(BusError::no_such_property(property)),
            Some(decl) if decl.access != Access::ReadWrite => {
                return Err(BusError::new(
                    BusError::READ_ONLY,
                    format!("property is read-only: {property}"),
                ));
            }
            Some(_) => {}
        }
        let ctx = CallContext {
            session,
            sender: &self.endpoint.name,
            bus: &host,
        };
        object.handler.set_property(&ctx, interface, property, value)
    }

    async fn call_method(
        &self,
        session: SessionId,
        target: &ProxyTarget,
        interface: &str,
        member: &str,
        args: Vec<Variant>,
    ) -> Result<Vec<Variant>, BusError> {
        let (host, object) = self.resolve(session, target)?;
        if !object.interface(interface)?.methods.iter().any(|m| m == member) {
            return Err(BusError::method_not_allowed(member));
        }
        let ctx = CallContext {
            session,
            sender: &self.endpoint.name,
            bus: &host,
        };
        object.handler.call_method(&ctx, interface, member, args)
    }
}
