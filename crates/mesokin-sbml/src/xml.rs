//! Minimal XML element tree over quick-xml events.
//!
//! The SBML fragment is small and models are read once, so a plain
//! owned tree is simpler and more robust than streaming interpretation.

use mesokin_core::{MesokinError, Result};
use quick_xml::events::Event;
use quick_xml::Reader;

/// One XML element with attributes, children and concatenated text.
#[derive(Debug, Clone, Default)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: String,
}

impl Element {
    /// Attribute value by (local) name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name || k.ends_with(&format!(":{}", name)))
            .map(|(_, v)| v.as_str())
    }

    pub fn required_attr(&self, name: &str) -> Result<&str> {
        self.attr(name).ok_or_else(|| {
            MesokinError::ParseError(format!(
                "element <{}> is missing the `{}` attribute",
                self.name, name
            ))
        })
    }

    /// First child with the given local name.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.local_name() == name)
    }

    /// All children with the given local name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.local_name() == name)
    }

    /// Element name with any namespace prefix stripped.
    pub fn local_name(&self) -> &str {
        self.name.rsplit(':').next().unwrap_or(&self.name)
    }
}

/// Parse a complete document into its root element.
pub fn parse_document(input: &str) -> Result<Element> {
    let mut reader = Reader::from_str(input);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader
            .read_event()
            .map_err(|e| MesokinError::ParseError(format!("malformed XML: {}", e)))?
        {
            Event::Start(start) => {
                let element = element_from_start(&start)?;
                stack.push(element);
            }
            Event::Empty(start) => {
                let element = element_from_start(&start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack.pop().ok_or_else(|| {
                    MesokinError::ParseError("unbalanced closing tag".to_string())
                })?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    let decoded = text.unescape().map_err(|e| {
                        MesokinError::ParseError(format!("malformed text node: {}", e))
                    })?;
                    top.text.push_str(&decoded);
                }
            }
            Event::Eof => break,
            // declarations, comments and processing instructions carry
            // no model content
            _ => {}
        }
    }

    root.ok_or_else(|| MesokinError::ParseError("document has no root element".to_string()))
}

fn element_from_start(start: &quick_xml::events::BytesStart<'_>) -> Result<Element> {
    let name = String::from_utf8_lossy(start.name().as_ref()).to_string();
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr =
            attr.map_err(|e| MesokinError::ParseError(format!("malformed attribute: {}", e)))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| MesokinError::ParseError(format!("malformed attribute value: {}", e)))?
            .to_string();
        attributes.push((key, value));
    }
    Ok(Element {
        name,
        attributes,
        children: Vec::new(),
        text: String::new(),
    })
}

fn attach(stack: &mut Vec<Element>, root: &mut Option<Element>, element: Element) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(element);
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(MesokinError::ParseError(
            "multiple root elements".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tree() {
        let doc = r#"<?xml version="1.0"?>
            <a x="1"><b>text</b><c y="2"/></a>"#;
        let root = parse_document(doc).unwrap();
        assert_eq!(root.name, "a");
        assert_eq!(root.attr("x"), Some("1"));
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.child("b").unwrap().text, "text");
        assert_eq!(root.child("c").unwrap().attr("y"), Some("2"));
    }

    #[test]
    fn test_namespace_prefix_stripped() {
        let doc = r#"<m:math xmlns:m="x"><m:ci>S</m:ci></m:math>"#;
        let root = parse_document(doc).unwrap();
        assert_eq!(root.local_name(), "math");
        assert_eq!(root.children[0].local_name(), "ci");
    }

    #[test]
    fn test_malformed_rejected() {
        assert!(parse_document("<a><b></a>").is_err());
    }
}
