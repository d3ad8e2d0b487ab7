//! Tree builder
//!
//! Discovery is best effort. A child that cannot be built is replaced by an
//! Error placeholder carrying its name, the listener hears about it once,
//! and expansion carries on with the siblings.

use std::sync::Arc;

use futures::future::BoxFuture;

use super::listener::ErrorReason;
use super::router::SignalRouter;
use super::{DiscoveryContext, Panel};
use crate::bus::{BusError, ObjectPath, ProxyTarget, SessionId};
use crate::catalog::{CONTROL_PANEL_INTERFACE, INTERFACE_VERSION, WidgetType, member};
use crate::path::{PanelLocation, WidgetLocation, normalize_language};
use crate::widget::{AttachOutcome, RemoteBinding, Widget};
use crate::{Error, Result};

/// Builds the mirror of one panel within one session
struct TreeBuilder<'a> {
    ctx: &'a DiscoveryContext,
    session: SessionId,
    host: &'a str,
    location: PanelLocation,
    languages: Vec<String>,
}

/// Discover the panel at `panel_path` and mirror its whole tree
///
/// Languages are inferred from the panel object's children. The root
/// container must register; failures below it only produce placeholders.
pub(crate) async fn discover_root(
    ctx: &DiscoveryContext,
    session: SessionId,
    host: &str,
    panel_path: &ObjectPath,
) -> Result<Panel> {
    let location = PanelLocation::parse(&ctx.prefix, panel_path)?;
    let panel = ctx.introspector.node(session, host, panel_path).await?;
    if panel.interfaces.contains(CONTROL_PANEL_INTERFACE) {
        check_panel_version(ctx, session, host, panel_path).await?;
    }

    let languages: Vec<String> = panel
        .children
        .iter()
        .map(String::as_str)
        .map(normalize_language)
        .collect();
    if languages.is_empty() {
        return Err(Error::NotFound(format!("no language roots under {panel_path}")));
    }
    tracing::debug!(panel = %panel_path, ?languages, "languages inferred");

    let root_path = location.widget_path(&languages[0], &[])?;
    let root_location = WidgetLocation::parse(&ctx.prefix, &root_path)?;
    let root_info = ctx.introspector.node(session, host, &root_path).await?;
    let class = ctx
        .catalog
        .classify(
            root_info.interfaces.iter().map(String::as_str),
            !root_info.children.is_empty(),
        )
        .filter(|c| c.widget_type == WidgetType::Container)
        .ok_or_else(|| Error::IntrospectionFailed {
            path: root_path.to_string(),
            reason: "panel root is not a container".to_string(),
        })?;

    let root = Widget::remote(location.panel(), WidgetType::Container, class.secured);
    let builder = TreeBuilder {
        ctx,
        session,
        host,
        location: location.clone(),
        languages: languages.clone(),
    };
    if let Err(e) = builder.register(&root, root_location).await {
        unregister_objects(&ctx.router, &root);
        return Err(e);
    }
    tracing::info!(panel = %panel_path, host, "panel discovered");

    Ok(Panel {
        host: host.to_string(),
        session,
        location,
        languages,
        root,
    })
}

async fn check_panel_version(
    ctx: &DiscoveryContext,
    session: SessionId,
    host: &str,
    panel_path: &ObjectPath,
) -> Result<()> {
    let target = ProxyTarget::new(host, panel_path.clone());
    let call = ctx
        .bus
        .get_property(session, &target, CONTROL_PANEL_INTERFACE, member::VERSION);
    let version = tokio::time::timeout(ctx.timeout, call)
        .await
        .map_err(|_| BusError::timeout(member::VERSION))??;
    let remote = version.as_u16().ok_or_else(|| {
        Error::InvalidPayload(format!("panel Version has type {}", version.signature()))
    })?;
    let local = ctx
        .catalog
        .local_version(CONTROL_PANEL_INTERFACE)
        .unwrap_or(INTERFACE_VERSION);
    if remote > local {
        return Err(Error::VersionMismatch {
            interface: CONTROL_PANEL_INTERFACE.to_string(),
            remote,
            local,
        });
    }
    Ok(())
}

impl TreeBuilder<'_> {
    /// Bind, subscribe, attach, fill, then expand
    fn register<'b>(&'b self, widget: &'b Widget, location: WidgetLocation) -> BoxFuture<'b, Result<()>> {
        Box::pin(async move {
            widget.begin_registration()?;
            let interface = self.ctx.catalog.shared_description(
                self.ctx.bus.as_ref(),
                widget.widget_type(),
                widget.is_secured(),
            )?;
            let local_version = self
                .ctx
                .catalog
                .local_version(&interface.name)
                .unwrap_or(INTERFACE_VERSION);

            for (index, language) in self.languages.iter().enumerate() {
                let path = location.path_for(language)?;
                let mut binding =
                    RemoteBinding::new(language.clone(), index, path.clone(), Arc::clone(&interface))
                        .with_local_version(local_version);
                binding.attach(&self.ctx.bus, self.session, self.host, self.ctx.timeout);
                let id = self.ctx.router.subscribe(self.host, &path, widget, index);
                binding.set_subscription(Some(id));
                widget.push_binding(binding);
            }
            widget.finish_registration();

            for index in 0..self.languages.len() {
                widget.fill(index).await?;
            }
            if widget.widget_type().has_children() {
                self.expand_children(widget, &location).await?;
            }
            Ok(())
        })
    }

    async fn expand_children(&self, widget: &Widget, parent: &WidgetLocation) -> Result<()> {
        let path = parent.path_for(&self.languages[0])?;
        let children = self
            .ctx
            .introspector
            .children(self.session, self.host, &path)
            .await?;

        for (name, lookup) in children {
            let node = match lookup {
                Ok(node) => node,
                Err(e) => {
                    self.ctx
                        .listener
                        .error_occurred(&name, ErrorReason::IntrospectionFailed, &e);
                    continue;
                }
            };
            let location = match self.child_location(parent, &node.path) {
                Ok(location) => location,
                Err(e) => {
                    self.ctx
                        .listener
                        .error_occurred(&name, ErrorReason::IntrospectionFailed, &e);
                    continue;
                }
            };
            let Some(class) = self.ctx.catalog.classify(
                node.interfaces.iter().map(String::as_str),
                node.has_children,
            ) else {
                tracing::debug!(path = %node.path, "skipping node without a widget interface");
                continue;
            };

            let child = Widget::remote(location.name(), class.widget_type, class.secured);
            widget.push_child(&child)?;

            if let Err(e) = self.register(&child, location).await {
                tracing::warn!(widget = %name, error = %e, "substituting error placeholder");
                unregister_objects(&self.ctx.router, &child);
                let placeholder = Widget::error_placeholder(&name, e.to_string());
                widget.replace_child(&child, &placeholder);
                self.ctx
                    .listener
                    .error_occurred(&name, ErrorReason::RegistrationFailed, &e);
            }
        }
        Ok(())
    }

    /// A child sits exactly one segment below its parent, in the same panel
    /// and the first language
    fn child_location(&self, parent: &WidgetLocation, path: &ObjectPath) -> Result<WidgetLocation> {
        let location = WidgetLocation::parse(&self.ctx.prefix, path)?;
        if location.is_root() {
            return Err(Error::MalformedPath(format!(
                "{path} is too shallow for a child widget"
            )));
        }
        let names = location.names();
        let directly_below = names.len() == parent.names().len() + 1
            && names.starts_with(parent.names());
        if *location.panel() != self.location
            || location.language() != self.languages[0]
            || !directly_below
        {
            return Err(Error::MalformedPath(format!(
                "{path} is not a child of {}",
                parent.path_for(&self.languages[0])?
            )));
        }
        Ok(location)
    }
}

/// Point every proxy of a subtree at `session`
pub(crate) fn attach_objects(
    ctx: &DiscoveryContext,
    widget: &Widget,
    session: SessionId,
    host: &str,
    outcomes: &mut Vec<AttachOutcome>,
) {
    widget.for_each_binding(|binding| {
        outcomes.push(binding.attach(&ctx.bus, session, host, ctx.timeout));
    });
    for child in widget.children() {
        attach_objects(ctx, &child, session, host, outcomes);
    }
}

/// Drop bindings and subscriptions for a subtree, children first
pub(crate) fn unregister_objects(router: &SignalRouter, widget: &Widget) {
    if !widget.begin_unregistration() {
        return;
    }
    for child in widget.children() {
        unregister_objects(router, &child);
    }
    for mut binding in widget.take_bindings() {
        if let Some(id) = binding.set_subscription(None) {
            router.unsubscribe(id);
        }
        binding.detach();
    }
    widget.finish_unregistration();
    tracing::trace!(widget = %widget.name(), "unregistered");
}
