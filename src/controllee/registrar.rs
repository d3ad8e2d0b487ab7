//! Publishes a widget tree as bus objects
//!
//! Every widget becomes one object per language. The first error aborts the
//! subtree being registered and propagates; objects published before it stay
//! until [`unregister_objects`] removes them.

use std::sync::Arc;

use super::handler::WidgetObject;
use crate::bus::{Bus, ObjectPath};
use crate::catalog::Catalog;
use crate::path::PanelLocation;
use crate::widget::{RemoteBinding, Side, Widget};
use crate::{Error, Result};

pub(crate) struct Registrar<'a> {
    pub(crate) bus: &'a Arc<dyn Bus>,
    pub(crate) catalog: &'a Catalog,
    pub(crate) location: &'a PanelLocation,
    pub(crate) languages: &'a [String],
}

impl Registrar<'_> {
    /// Publish `widget` and its subtree; `names` locates it below the root
    pub(crate) fn register_objects(&self, widget: &Widget, names: &[String]) -> Result<()> {
        if widget.side() != Side::Controllee {
            return Err(Error::NotImplemented(format!(
                "{} is a mirrored widget and cannot be published",
                widget.name()
            )));
        }
        widget.begin_registration()?;
        if let Err(e) = self.publish(widget, names) {
            widget.abort_registration();
            return Err(e);
        }
        widget.finish_registration();

        for child in widget.children() {
            let mut child_names = names.to_vec();
            child_names.push(child.name().to_string());
            self.register_objects(&child, &child_names)?;
        }
        Ok(())
    }

    fn publish(&self, widget: &Widget, names: &[String]) -> Result<()> {
        let interface = self.catalog.shared_description(
            self.bus.as_ref(),
            widget.widget_type(),
            widget.is_secured(),
        )?;
        for (index, language) in self.languages.iter().enumerate() {
            let path = self.location.widget_path(language, names)?;
            let handler = Arc::new(WidgetObject::new(widget, index, Arc::clone(&interface)));
            self.bus
                .publish(path.clone(), vec![Arc::clone(&interface)], handler)?;
            tracing::trace!(widget = %widget.name(), path = %path, "object published");
            widget.push_binding(RemoteBinding::new(
                language.clone(),
                index,
                path,
                Arc::clone(&interface),
            ));
        }
        Ok(())
    }
}

/// Unpublish a subtree, children first
pub(crate) fn unregister_objects(bus: &dyn Bus, widget: &Widget) {
    if !widget.begin_unregistration() {
        return;
    }
    for child in widget.children() {
        unregister_objects(bus, &child);
    }
    for binding in widget.take_bindings() {
        if let Err(e) = bus.unpublish(binding.path()) {
            tracing::warn!(path = %binding.path(), error = %e, "unpublish failed");
        }
    }
    widget.finish_unregistration();
}

/// Every object path a tree would occupy, in publication order
///
/// # Errors
///
/// Returns `MalformedPath` if a widget name is not a valid path segment
pub(crate) fn object_paths(
    location: &PanelLocation,
    languages: &[String],
    root: &Widget,
) -> Result<Vec<ObjectPath>> {
    fn walk(
        location: &PanelLocation,
        languages: &[String],
        widget: &Widget,
        names: &mut Vec<String>,
        out: &mut Vec<ObjectPath>,
    ) -> Result<()> {
        for language in languages {
            out.push(location.widget_path(language, names)?);
        }
        for child in widget.children() {
            names.push(child.name().to_string());
            walk(location, languages, &child, names, out)?;
            names.pop();
        }
        Ok(())
    }

    let mut out = vec![location.panel_path()?];
    walk(location, languages, root, &mut Vec::new(), &mut out)?;
    Ok(out)
}
