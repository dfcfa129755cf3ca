//! WebDAV multistatus parsing.
//!
//! Servers disagree on namespace prefixes (`d:`, `D:`, default namespace), so
//! every element is matched by its local name. Each response body goes
//! through [`parse_multistatus`] once; callers only see [`DavResponse`].

use std::collections::HashMap;

use calmesh_core::{CalMeshError, CalMeshResult};
use roxmltree::Node;

/// One property of a `<response>`, flattened.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DavProp {
    /// Concatenated, trimmed text content (None if empty)
    pub text: Option<String>,
    /// Local names of child elements (`resourcetype` → `["collection", "calendar"]`)
    pub children: Vec<String>,
    /// Text of every nested `<href>`
    pub hrefs: Vec<String>,
    /// `name` attributes of nested `<comp>` elements
    pub components: Vec<String>,
}

impl DavProp {
    pub fn has_child(&self, name: &str) -> bool {
        self.children.iter().any(|c| c == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DavResponse {
    pub href: String,
    pub props: HashMap<String, DavProp>,
}

impl DavResponse {
    pub fn prop(&self, name: &str) -> Option<&DavProp> {
        self.props.get(name)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.prop(name).and_then(|p| p.text.as_deref())
    }

    pub fn first_href(&self, name: &str) -> Option<&str> {
        self.prop(name)
            .and_then(|p| p.hrefs.first())
            .map(String::as_str)
    }
}

/// Parse a `<multistatus>` body into its responses.
///
/// Only `<propstat>` blocks with a 2xx status (or without a status)
/// contribute properties.
pub fn parse_multistatus(body: &str) -> CalMeshResult<Vec<DavResponse>> {
    let doc = roxmltree::Document::parse(body).map_err(|e| CalMeshError::Xml(e.to_string()))?;

    let responses = doc
        .root_element()
        .descendants()
        .filter(|n| is(n, "response"))
        .filter_map(|response| {
            let href = children(response, "href")
                .next()
                .and_then(|n| text_of(n))?;

            let mut props = HashMap::new();
            for propstat in children(response, "propstat") {
                let ok = children(propstat, "status")
                    .next()
                    .and_then(|n| text_of(n))
                    .is_none_or(|status| is_success_status(&status));
                if !ok {
                    continue;
                }
                for prop in children(propstat, "prop") {
                    for element in prop.children().filter(Node::is_element) {
                        props.insert(element.tag_name().name().to_string(), flatten(element));
                    }
                }
            }

            Some(DavResponse { href, props })
        })
        .collect();

    Ok(responses)
}

fn is(node: &Node, local_name: &str) -> bool {
    node.is_element() && node.tag_name().name() == local_name
}

fn children<'a, 'input>(node: Node<'a, 'input>, local_name: &'static str) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(move |n| is(n, local_name))
}

/// All text below `node`, trimmed.
fn text_of(node: Node) -> Option<String> {
    let text: String = node
        .descendants()
        .filter(Node::is_text)
        .filter_map(|n| n.text())
        .collect();
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn flatten(element: Node) -> DavProp {
    DavProp {
        text: text_of(element),
        children: element
            .children()
            .filter(Node::is_element)
            .map(|c| c.tag_name().name().to_string())
            .collect(),
        hrefs: element
            .descendants()
            .filter(|n| is(n, "href"))
            .filter_map(text_of)
            .collect(),
        components: element
            .descendants()
            .filter(|n| is(n, "comp"))
            .filter_map(|n| n.attribute("name"))
            .map(str::to_string)
            .collect(),
    }
}

/// `HTTP/1.1 200 OK` → true
fn is_success_status(status: &str) -> bool {
    status
        .split_whitespace()
        .nth(1)
        .is_some_and(|code| code.starts_with('2'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_do_not_matter() {
        let prefixed = r#"<?xml version="1.0"?>
<D:multistatus xmlns:D="DAV:">
  <D:response>
    <D:href>/123/principal/</D:href>
    <D:propstat>
      <D:prop><D:current-user-principal><D:href>/123/principal/</D:href></D:current-user-principal></D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
</D:multistatus>"#;
        let lowercase = prefixed.replace("D:", "d:").replace("xmlns:D", "xmlns:d");
        let unprefixed = prefixed.replace("D:", "").replace("xmlns:D", "xmlns");

        for body in [prefixed.to_string(), lowercase, unprefixed] {
            let responses = parse_multistatus(&body).unwrap();
            assert_eq!(responses.len(), 1);
            assert_eq!(responses[0].href, "/123/principal/");
            assert_eq!(
                responses[0].first_href("current-user-principal"),
                Some("/123/principal/")
            );
        }
    }

    #[test]
    fn failed_propstat_is_ignored() {
        let body = r#"<multistatus xmlns="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
  <response>
    <href>/cal/work/</href>
    <propstat>
      <prop><displayname>Work</displayname><resourcetype><collection/><C:calendar/></resourcetype></prop>
      <status>HTTP/1.1 200 OK</status>
    </propstat>
    <propstat>
      <prop><C:supported-calendar-component-set/></prop>
      <status>HTTP/1.1 404 Not Found</status>
    </propstat>
  </response>
</multistatus>"#;
        let responses = parse_multistatus(body).unwrap();
        let work = &responses[0];

        assert_eq!(work.text("displayname"), Some("Work"));
        assert!(work.prop("resourcetype").unwrap().has_child("calendar"));
        assert!(work.prop("supported-calendar-component-set").is_none());
    }

    #[test]
    fn components_and_cdata() {
        let body = r#"<d:multistatus xmlns:d="DAV:" xmlns:cal="urn:ietf:params:xml:ns:caldav">
  <d:response>
    <d:href>/cal/1.ics</d:href>
    <d:propstat>
      <d:prop>
        <d:getetag>"abc"</d:getetag>
        <cal:calendar-data><![CDATA[BEGIN:VCALENDAR
END:VCALENDAR]]></cal:calendar-data>
        <cal:supported-calendar-component-set><cal:comp name="VEVENT"/><cal:comp name="VTODO"/></cal:supported-calendar-component-set>
      </d:prop>
    </d:propstat>
  </d:response>
</d:multistatus>"#;
        let responses = parse_multistatus(body).unwrap();
        let r = &responses[0];

        assert_eq!(r.text("getetag"), Some("\"abc\""));
        assert!(r.text("calendar-data").unwrap().starts_with("BEGIN:VCALENDAR"));
        assert_eq!(
            r.prop("supported-calendar-component-set").unwrap().components,
            vec!["VEVENT", "VTODO"]
        );
    }

    #[test]
    fn malformed_body_is_an_xml_error() {
        assert!(matches!(parse_multistatus("<multistatus>"), Err(CalMeshError::Xml(_))));
    }
}
