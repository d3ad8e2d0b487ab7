//! Object path layout
//!
//! Every widget object lives at
//! `<prefix>/<unit>/<panel>/<language>/<ancestor>/.../<name>`. The panel
//! object itself sits at `<prefix>/<unit>/<panel>` and its children are the
//! per-language root containers. Path segments cannot hold `-`, so language
//! tags are published with `_` and normalized back on discovery.

use crate::bus::ObjectPath;
use crate::{Error, Result};

/// Default object path prefix
pub const DEFAULT_PREFIX: &str = "/ControlPanel";

/// Segments between the prefix and the first widget name: unit, panel, language
const FIXED_SEGMENTS: usize = 3;

/// Language tag as an object path segment (`en-US` → `en_US`)
#[must_use]
pub fn language_segment(language: &str) -> String {
    language.replace('-', "_")
}

/// Language tag from an object path segment (`en_US` → `en-US`)
#[must_use]
pub fn normalize_language(segment: &str) -> String {
    segment.replace('_', "-")
}

fn path(raw: String) -> Result<ObjectPath> {
    ObjectPath::new(raw).map_err(|e| Error::MalformedPath(e.message))
}

/// Where a panel lives: prefix, unit and panel name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelLocation {
    prefix: ObjectPath,
    unit: String,
    panel: String,
}

impl PanelLocation {
    /// Create a location, validating every segment
    ///
    /// # Errors
    ///
    /// Returns `MalformedPath` if the prefix or names are not valid path parts
    pub fn new(prefix: &str, unit: &str, panel: &str) -> Result<Self> {
        let location = Self {
            prefix: path(prefix.to_string())?,
            unit: unit.to_string(),
            panel: panel.to_string(),
        };
        location.panel_path()?;
        Ok(location)
    }

    /// Parse a panel object path (`<prefix>/<unit>/<panel>`)
    ///
    /// # Errors
    ///
    /// Returns `MalformedPath` if the path is not exactly two segments below the prefix
    pub fn parse(prefix: &ObjectPath, panel_path: &ObjectPath) -> Result<Self> {
        let rest = relative_segments(prefix, panel_path)?;
        let [unit, panel] = rest.as_slice() else {
            return Err(Error::MalformedPath(format!(
                "{panel_path} is not a panel path below {prefix}"
            )));
        };
        Ok(Self {
            prefix: prefix.clone(),
            unit: (*unit).to_string(),
            panel: (*panel).to_string(),
        })
    }

    #[must_use]
    pub const fn prefix(&self) -> &ObjectPath {
        &self.prefix
    }

    #[must_use]
    pub fn unit(&self) -> &str {
        &self.unit
    }

    #[must_use]
    pub fn panel(&self) -> &str {
        &self.panel
    }

    /// Path of the panel object
    ///
    /// # Errors
    ///
    /// Returns `MalformedPath` if unit or panel are not valid segments
    pub fn panel_path(&self) -> Result<ObjectPath> {
        path(format!("{}/{}/{}", prefix_str(&self.prefix), self.unit, self.panel))
    }

    /// Path of a widget for one language
    ///
    /// `names` are the widget's ancestor names below the root followed by
    /// its own name; an empty list addresses the root container.
    ///
    /// # Errors
    ///
    /// Returns `MalformedPath` if any name is not a valid segment
    pub fn widget_path(&self, language: &str, names: &[String]) -> Result<ObjectPath> {
        let mut raw = format!(
            "{}/{}/{}/{}",
            prefix_str(&self.prefix),
            self.unit,
            self.panel,
            language_segment(language)
        );
        for name in names {
            raw.push('/');
            raw.push_str(name);
        }
        path(raw)
    }
}

/// A widget object path split into its fixed positions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetLocation {
    panel: PanelLocation,
    language_segment: String,
    names: Vec<String>,
}

impl WidgetLocation {
    /// Split a widget object path
    ///
    /// # Errors
    ///
    /// Returns `MalformedPath` if the path is not below the prefix or is
    /// shallower than `<prefix>/<unit>/<panel>/<language>`
    pub fn parse(prefix: &ObjectPath, widget_path: &ObjectPath) -> Result<Self> {
        let rest = relative_segments(prefix, widget_path)?;
        if rest.len() < FIXED_SEGMENTS {
            return Err(Error::MalformedPath(format!(
                "{widget_path} has {} segments below {prefix}, need at least {FIXED_SEGMENTS}",
                rest.len()
            )));
        }
        Ok(Self {
            panel: PanelLocation {
                prefix: prefix.clone(),
                unit: rest[0].to_string(),
                panel: rest[1].to_string(),
            },
            language_segment: rest[2].to_string(),
            names: rest[FIXED_SEGMENTS..].iter().map(|s| (*s).to_string()).collect(),
        })
    }

    #[must_use]
    pub const fn panel(&self) -> &PanelLocation {
        &self.panel
    }

    /// Language tag in normalized form
    #[must_use]
    pub fn language(&self) -> String {
        normalize_language(&self.language_segment)
    }

    /// Names below the language segment
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Whether this is a language root container
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.names.is_empty()
    }

    /// Widget name: the panel name for a root, the last segment otherwise
    #[must_use]
    pub fn name(&self) -> &str {
        self.names.last().map_or(self.panel.panel(), String::as_str)
    }

    /// The same widget's path in another language
    ///
    /// # Errors
    ///
    /// Returns `MalformedPath` if the language is not a valid segment
    pub fn path_for(&self, language: &str) -> Result<ObjectPath> {
        self.panel.widget_path(language, &self.names)
    }
}

fn prefix_str(prefix: &ObjectPath) -> &str {
    if prefix.as_str() == "/" { "" } else { prefix.as_str() }
}

fn relative_segments<'a>(prefix: &ObjectPath, full: &'a ObjectPath) -> Result<Vec<&'a str>> {
    if !full.is_descendant_of(prefix) {
        return Err(Error::MalformedPath(format!("{full} is not below {prefix}")));
    }
    Ok(full.segments().split_off(prefix.depth()))
}
