//! Per-language remote bindings
//!
//! A widget owns one [`RemoteBinding`] per language. On the controller the
//! binding carries a [`Proxy`] used to call back into the controllee and the
//! id of the signal subscription that keeps the mirror live.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::bus::{Bus, BusError, InterfaceDescription, ObjectPath, ProxyTarget, SessionId, Variant};
use crate::Result;
use crate::catalog::INTERFACE_VERSION;
use crate::controller::SubscriptionId;

/// Outbound handle to one remote object within one session
#[derive(Clone)]
pub struct Proxy {
    bus: Arc<dyn Bus>,
    session: SessionId,
    target: ProxyTarget,
    interface: Arc<InterfaceDescription>,
    local_version: u16,
    timeout: Duration,
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("session", &self.session)
            .field("target", &self.target)
            .field("interface", &self.interface.name)
            .finish_non_exhaustive()
    }
}

impl Proxy {
    #[must_use]
    pub const fn session(&self) -> SessionId {
        self.session
    }

    #[must_use]
    pub const fn target(&self) -> &ProxyTarget {
        &self.target
    }

    #[must_use]
    pub fn interface_name(&self) -> &str {
        &self.interface.name
    }

    /// Highest interface version this side accepts from the remote object
    #[must_use]
    pub const fn local_version(&self) -> u16 {
        self.local_version
    }

    async fn bounded<T, F>(&self, what: &str, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, BusError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(BusError::timeout(what).into()),
        }
    }

    /// Read one property
    ///
    /// # Errors
    ///
    /// Returns the remote error or a timeout
    pub async fn get_property(&self, property: &str) -> Result<Variant> {
        self.bounded(
            property,
            self.bus
                .get_property(self.session, &self.target, &self.interface.name, property),
        )
        .await
    }

    /// Read every property of the interface in one batch
    ///
    /// # Errors
    ///
    /// Returns the remote error or a timeout
    pub async fn get_all_properties(&self) -> Result<Vec<(String, Variant)>> {
        self.bounded(
            "GetAll",
            self.bus
                .get_all_properties(self.session, &self.target, &self.interface.name),
        )
        .await
    }

    /// Write one property
    ///
    /// # Errors
    ///
    /// Returns the remote error or a timeout
    pub async fn set_property(&self, property: &str, value: Variant) -> Result<()> {
        self.bounded(
            property,
            self.bus.set_property(
                self.session,
                &self.target,
                &self.interface.name,
                property,
                value,
            ),
        )
        .await
    }

    /// Call a no-argument method
    ///
    /// # Errors
    ///
    /// Returns the remote error or a timeout
    pub async fn call(&self, member: &str) -> Result<Vec<Variant>> {
        self.bounded(
            member,
            self.bus
                .call_method(self.session, &self.target, &self.interface.name, member, Vec::new()),
        )
        .await
    }
}

/// What [`RemoteBinding::attach`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    /// A proxy for this session already existed
    Unchanged,
    /// First proxy for this binding
    Created,
    /// A proxy for another session was dropped and replaced
    Replaced,
}

/// Couples a widget to the object at one path for one language
#[derive(Debug)]
pub struct RemoteBinding {
    language: String,
    language_index: usize,
    path: ObjectPath,
    interface: Arc<InterfaceDescription>,
    local_version: u16,
    proxy: Option<Proxy>,
    subscription: Option<SubscriptionId>,
}

impl RemoteBinding {
    #[must_use]
    pub const fn new(
        language: String,
        language_index: usize,
        path: ObjectPath,
        interface: Arc<InterfaceDescription>,
    ) -> Self {
        Self {
            language,
            language_index,
            path,
            interface,
            local_version: INTERFACE_VERSION,
            proxy: None,
            subscription: None,
        }
    }

    /// Accept remote versions up to `version` instead of the default
    #[must_use]
    pub const fn with_local_version(mut self, version: u16) -> Self {
        self.local_version = version;
        self
    }

    #[must_use]
    pub fn language(&self) -> &str {
        &self.language
    }

    #[must_use]
    pub const fn language_index(&self) -> usize {
        self.language_index
    }

    #[must_use]
    pub const fn path(&self) -> &ObjectPath {
        &self.path
    }

    #[must_use]
    pub fn interface(&self) -> &Arc<InterfaceDescription> {
        &self.interface
    }

    #[must_use]
    pub const fn proxy(&self) -> Option<&Proxy> {
        self.proxy.as_ref()
    }

    #[must_use]
    pub const fn subscription(&self) -> Option<SubscriptionId> {
        self.subscription
    }

    pub(crate) fn set_subscription(&mut self, id: Option<SubscriptionId>) -> Option<SubscriptionId> {
        std::mem::replace(&mut self.subscription, id)
    }

    /// Bind a proxy for `session` to the object hosted by `host`
    ///
    /// Re-attaching with the session the current proxy already uses is a
    /// no-op; any other session replaces the proxy.
    pub fn attach(
        &mut self,
        bus: &Arc<dyn Bus>,
        session: SessionId,
        host: &str,
        timeout: Duration,
    ) -> AttachOutcome {
        if self.proxy.as_ref().is_some_and(|p| p.session == session) {
            return AttachOutcome::Unchanged;
        }
        let proxy = Proxy {
            bus: Arc::clone(bus),
            session,
            target: ProxyTarget::new(host, self.path.clone()),
            interface: Arc::clone(&self.interface),
            local_version: self.local_version,
            timeout,
        };
        match self.proxy.replace(proxy) {
            Some(old) => {
                tracing::debug!(
                    path = %self.path,
                    old_session = old.session,
                    session,
                    "proxy replaced"
                );
                AttachOutcome::Replaced
            }
            None => AttachOutcome::Created,
        }
    }

    /// Drop the proxy, returning it
    pub fn detach(&mut self) -> Option<Proxy> {
        self.proxy.take()
    }
}
