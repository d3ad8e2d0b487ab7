//! One-level enumeration of remote objects
//!
//! The parent is introspected to list its child names; each child is then
//! introspected once to learn its interface set and whether it has children
//! of its own. Nothing deeper is visited.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::bus::{Bus, BusError, ObjectPath, ProxyTarget, SessionId};
use crate::{Error, Result};

/// Interfaces and child names of one object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub path: ObjectPath,
    pub interfaces: BTreeSet<String>,
    pub children: Vec<String>,
}

/// A child discovered below an introspected object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildNode {
    pub path: ObjectPath,
    pub interfaces: BTreeSet<String>,
    pub has_children: bool,
}

fn failed(path: &ObjectPath, reason: impl ToString) -> Error {
    Error::IntrospectionFailed {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

/// Parse introspection XML
///
/// # Errors
///
/// Returns `IntrospectionFailed` if the document is not well formed or its
/// root is not a `<node>`
pub fn parse_node(path: &ObjectPath, xml: &str) -> Result<NodeInfo> {
    let document = roxmltree::Document::parse(xml).map_err(|e| failed(path, e))?;
    let root = document.root_element();
    if root.tag_name().name() != "node" {
        return Err(failed(
            path,
            format!("expected root <node>, found <{}>", root.tag_name().name()),
        ));
    }

    let mut interfaces = BTreeSet::new();
    let mut children = Vec::new();
    for element in root.children().filter(roxmltree::Node::is_element) {
        let Some(name) = element.attribute("name") else {
            continue;
        };
        match element.tag_name().name() {
            "interface" => {
                interfaces.insert(name.to_string());
            }
            "node" => children.push(name.to_string()),
            _ => {}
        }
    }
    Ok(NodeInfo {
        path: path.clone(),
        interfaces,
        children,
    })
}

/// Introspects objects hosted by one peer
#[derive(Clone)]
pub struct Introspector {
    bus: Arc<dyn Bus>,
    timeout: Duration,
}

impl Introspector {
    #[must_use]
    pub fn new(bus: Arc<dyn Bus>, timeout: Duration) -> Self {
        Self { bus, timeout }
    }

    /// Introspect one object
    ///
    /// # Errors
    ///
    /// Returns `IntrospectionFailed` if the object is unreachable, the call
    /// times out or the XML cannot be parsed
    pub async fn node(&self, session: SessionId, host: &str, path: &ObjectPath) -> Result<NodeInfo> {
        let target = ProxyTarget::new(host, path.clone());
        let xml = match tokio::time::timeout(self.timeout, self.bus.introspect(session, &target)).await {
            Ok(Ok(xml)) => xml,
            Ok(Err(e)) => return Err(failed(path, e)),
            Err(_) => return Err(failed(path, BusError::timeout("Introspect"))),
        };
        parse_node(path, &xml)
    }

    /// List the children of `path`, paired with their names
    ///
    /// The outer error means the parent itself could not be introspected;
    /// an inner error affects that child only.
    ///
    /// # Errors
    ///
    /// Returns `IntrospectionFailed` if the parent cannot be introspected
    pub async fn children(
        &self,
        session: SessionId,
        host: &str,
        path: &ObjectPath,
    ) -> Result<Vec<(String, Result<ChildNode>)>> {
        let parent = self.node(session, host, path).await?;
        let lookups = parent.children.iter().map(|name| async move {
            let lookup = async {
                let child_path = path
                    .child(name)
                    .map_err(|e| Error::MalformedPath(e.message))?;
                let info = self.node(session, host, &child_path).await?;
                Ok::<_, Error>(ChildNode {
                    path: child_path,
                    has_children: !info.children.is_empty(),
                    interfaces: info.interfaces,
                })
            };
            (name.clone(), lookup.await)
        });
        Ok(join_all(lookups).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path() -> ObjectPath {
        ObjectPath::new("/ControlPanel/Oven/main/en").unwrap()
    }

    #[test]
    fn parses_interfaces_and_children() {
        let xml = r#"<node name="/ControlPanel/Oven/main/en">
  <interface name="org.alljoyn.ControlPanel.Container">
    <property name="Version" type="q" access="read"/>
  </interface>
  <interface name="org.freedesktop.DBus.Introspectable"/>
  <node name="temp"/>
  <node name="start"/>
</node>"#;
        let info = parse_node(&path(), xml).unwrap();
        assert!(info.interfaces.contains("org.alljoyn.ControlPanel.Container"));
        assert_eq!(info.interfaces.len(), 2);
        assert_eq!(info.children, vec!["temp", "start"]);
    }

    #[test]
    fn rejects_broken_xml() {
        assert!(matches!(
            parse_node(&path(), "<node><interface></node>"),
            Err(Error::IntrospectionFailed { .. })
        ));
        assert!(parse_node(&path(), "<root/>").is_err());
    }

    #[test]
    fn empty_node_has_nothing() {
        let info = parse_node(&path(), "<node/>").unwrap();
        assert!(info.interfaces.is_empty());
        assert!(info.children.is_empty());
    }
}
