//! Controller side: discovers remote panels and keeps a live mirror
//!
//! A [`Controller`] joins a session with a controllee, lists or discovers
//! its panels and mirrors each as a [`Panel`]. Mirrored widgets stay in
//! sync through the [`SignalRouter`](router::SignalRouter) and expose
//! `refresh`, `set_value`, `execute` and `execute_action`.

pub mod introspect;
pub mod listener;
pub mod router;
mod tree;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

pub use introspect::{ChildNode, Introspector, NodeInfo};
pub use listener::{ErrorReason, LogListener, PanelListener};
pub use router::SignalRouter;

use crate::bus::{Bus, BusError, ObjectPath, SessionId};
use crate::catalog::{CONTROL_PANEL_INTERFACE, Catalog};
use crate::config::Config;
use crate::path::PanelLocation;
use crate::widget::{AttachOutcome, Widget, WidgetSnapshot};
use crate::{Error, Result};

/// Identifier of one signal subscription
pub type SubscriptionId = u64;

/// Everything discovery needs, shared by all panels of one controller
pub struct DiscoveryContext {
    pub(crate) bus: Arc<dyn Bus>,
    pub(crate) catalog: Catalog,
    pub(crate) router: SignalRouter,
    pub(crate) listener: Arc<dyn PanelListener>,
    pub(crate) introspector: Introspector,
    pub(crate) timeout: Duration,
    pub(crate) prefix: ObjectPath,
}

/// A mirrored panel
#[derive(Debug, Clone)]
pub struct Panel {
    host: String,
    session: SessionId,
    location: PanelLocation,
    languages: Vec<String>,
    root: Widget,
}

/// Serializable copy of a mirrored panel
#[derive(Debug, Clone, Serialize)]
pub struct PanelSnapshot {
    pub host: String,
    pub unit: String,
    pub panel: String,
    pub languages: Vec<String>,
    pub root: WidgetSnapshot,
}

impl Panel {
    /// Bus name of the controllee
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub const fn session(&self) -> SessionId {
        self.session
    }

    #[must_use]
    pub const fn location(&self) -> &PanelLocation {
        &self.location
    }

    #[must_use]
    pub fn unit(&self) -> &str {
        self.location.unit()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.location.panel()
    }

    /// Languages in language index order
    #[must_use]
    pub fn languages(&self) -> &[String] {
        &self.languages
    }

    /// Root container
    #[must_use]
    pub const fn root(&self) -> &Widget {
        &self.root
    }

    /// Widget below the root by slash-separated names
    #[must_use]
    pub fn find(&self, path: &str) -> Option<Widget> {
        self.root.find(path)
    }

    #[must_use]
    pub fn snapshot(&self) -> PanelSnapshot {
        PanelSnapshot {
            host: self.host.clone(),
            unit: self.unit().to_string(),
            panel: self.name().to_string(),
            languages: self.languages.clone(),
            root: self.root.snapshot(),
        }
    }
}

/// Discovers and mirrors panels published by controllees
pub struct Controller {
    ctx: DiscoveryContext,
    sessions: Mutex<HashMap<String, SessionId>>,
    panels: Mutex<Vec<Panel>>,
}

impl Controller {
    /// Create a controller on `bus`
    ///
    /// Spawns the signal router, so this must run inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `MalformedPath` if the configured prefix is not a valid path
    pub fn new(bus: Arc<dyn Bus>, config: &Config, listener: Arc<dyn PanelListener>) -> Result<Self> {
        let prefix =
            ObjectPath::new(config.prefix.as_str()).map_err(|e| Error::MalformedPath(e.message))?;
        let router = SignalRouter::spawn(&bus, Arc::clone(&listener));
        let introspector = Introspector::new(Arc::clone(&bus), config.call_timeout);
        tracing::debug!(bus = %bus.unique_name(), prefix = %prefix, "controller ready");
        Ok(Self {
            ctx: DiscoveryContext {
                bus,
                catalog: Catalog::new(),
                router,
                listener,
                introspector,
                timeout: config.call_timeout,
                prefix,
            },
            sessions: Mutex::new(HashMap::new()),
            panels: Mutex::new(Vec::new()),
        })
    }

    #[must_use]
    pub fn bus(&self) -> &Arc<dyn Bus> {
        &self.ctx.bus
    }

    /// Session with `host`, if joined
    #[must_use]
    pub fn session(&self, host: &str) -> Option<SessionId> {
        self.sessions.lock().get(host).copied()
    }

    /// Join a session with `host`; an existing session is reused
    ///
    /// # Errors
    ///
    /// Returns the bus error if the host cannot be reached
    pub async fn join(&self, host: &str) -> Result<SessionId> {
        if let Some(session) = self.session(host) {
            return Ok(session);
        }
        let session = tokio::time::timeout(self.ctx.timeout, self.ctx.bus.join_session(host))
            .await
            .map_err(|_| BusError::timeout("JoinSession"))??;
        let session = *self
            .sessions
            .lock()
            .entry(host.to_string())
            .or_insert(session);
        tracing::info!(host, session, "joined session");
        Ok(session)
    }

    /// List the panels `host` publishes under the prefix
    ///
    /// # Errors
    ///
    /// Returns `IntrospectionFailed` if the prefix cannot be introspected
    pub async fn list_panels(&self, host: &str) -> Result<Vec<PanelLocation>> {
        let session = self.join(host).await?;
        let introspector = &self.ctx.introspector;
        let prefix = &self.ctx.prefix;

        let mut found = Vec::new();
        for unit in introspector.node(session, host, prefix).await?.children {
            let unit_path = prefix
                .child(&unit)
                .map_err(|e| Error::MalformedPath(e.message))?;
            for (name, lookup) in introspector.children(session, host, &unit_path).await? {
                match lookup {
                    Ok(node) if node.interfaces.contains(CONTROL_PANEL_INTERFACE) => {
                        found.push(PanelLocation::parse(prefix, &node.path)?);
                    }
                    Ok(_) => tracing::debug!(unit = %unit, name, "not a panel object"),
                    Err(e) => {
                        self.ctx
                            .listener
                            .error_occurred(&name, ErrorReason::IntrospectionFailed, &e);
                    }
                }
            }
        }
        Ok(found)
    }

    /// Mirror one panel
    ///
    /// # Errors
    ///
    /// Returns error if the panel object or its root container cannot be
    /// discovered; failures below the root become Error placeholders
    pub async fn discover_panel(&self, host: &str, location: &PanelLocation) -> Result<Panel> {
        let session = self.join(host).await?;
        let panel = tree::discover_root(&self.ctx, session, host, &location.panel_path()?).await?;
        self.panels.lock().push(panel.clone());
        Ok(panel)
    }

    /// Mirror every panel of `host`
    ///
    /// A panel that fails to mirror is reported to the listener and left out.
    ///
    /// # Errors
    ///
    /// Returns error only if the panels cannot be listed
    pub async fn discover_all(&self, host: &str) -> Result<Vec<Panel>> {
        let mut panels = Vec::new();
        for location in self.list_panels(host).await? {
            match self.discover_panel(host, &location).await {
                Ok(panel) => panels.push(panel),
                Err(e) => {
                    tracing::warn!(panel = %location.panel(), error = %e, "panel discovery failed");
                    self.ctx
                        .listener
                        .error_occurred(location.panel(), ErrorReason::RegistrationFailed, &e);
                }
            }
        }
        Ok(panels)
    }

    /// Panels mirrored so far
    #[must_use]
    pub fn panels(&self) -> Vec<Panel> {
        self.panels.lock().clone()
    }

    /// Bind every panel mirrored from `host` to `session`
    ///
    /// For a session the bus re-delivered or replaced. Bindings already on
    /// `session` are left alone and the rest get a fresh proxy. Signal
    /// subscriptions are keyed by sender and path, so they carry over. The
    /// previous session is not left; that is up to the caller.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no panel is mirrored from `host`
    pub fn attach_session(&self, host: &str, session: SessionId) -> Result<Vec<AttachOutcome>> {
        let mut roots = Vec::new();
        for panel in self.panels.lock().iter_mut().filter(|p| p.host == host) {
            panel.session = session;
            roots.push(panel.root.clone());
        }
        if roots.is_empty() {
            return Err(Error::NotFound(format!("no panel mirrored from {host}")));
        }

        let mut outcomes = Vec::new();
        for root in &roots {
            tree::attach_objects(&self.ctx, root, session, host, &mut outcomes);
        }
        let previous = self.sessions.lock().insert(host.to_string(), session);
        let replaced = outcomes
            .iter()
            .filter(|o| **o == AttachOutcome::Replaced)
            .count();
        tracing::info!(host, session, ?previous, replaced, "session attached");
        Ok(outcomes)
    }

    /// Drop the bindings and subscriptions of a mirrored subtree
    pub fn unregister_objects(&self, widget: &Widget) {
        tree::unregister_objects(&self.ctx.router, widget);
    }

    /// Unregister every panel mirrored from `host` and leave its session
    ///
    /// # Errors
    ///
    /// Returns the bus error if leaving the session fails
    pub async fn leave(&self, host: &str) -> Result<()> {
        let Some(session) = self.sessions.lock().remove(host) else {
            return Ok(());
        };
        let gone: Vec<Panel> = {
            let mut panels = self.panels.lock();
            let (gone, kept): (Vec<Panel>, Vec<Panel>) =
                panels.drain(..).partition(|p| p.host == host);
            *panels = kept;
            gone
        };
        for panel in &gone {
            self.unregister_objects(panel.root());
        }
        self.ctx.bus.leave_session(session).await?;
        tracing::info!(host, session, panels = gone.len(), "left session");
        Ok(())
    }
}
