//! Owned XML tree, parsed once and mutated in place.
//!
//! Untouched attributes, elements, text and comments survive the round trip;
//! only formatting of self-closing tags is normalized on output.

use std::io::Cursor;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::{LibraryError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone)]
pub struct XmlDocument {
    /// Original declaration line, kept verbatim when present.
    pub declaration: Option<String>,
    pub root: XmlElement,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Non-empty attribute value.
    pub fn attr_text(&self, name: &str) -> Option<&str> {
        self.attr(name).filter(|v| !v.trim().is_empty())
    }

    pub fn parse_attr<T: std::str::FromStr>(&self, name: &str) -> Option<T> {
        self.attr_text(name).and_then(|v| v.trim().parse().ok())
    }

    /// Replaces an existing attribute or appends a new one.
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| k == name) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((name.to_string(), value)),
        }
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.elements().find(|e| e.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut XmlElement> {
        self.elements_mut().find(|e| e.name == name)
    }

    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|n| match n {
            XmlNode::Element(e) => Some(e),
            _ => None,
        })
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut XmlElement> {
        self.children.iter_mut().filter_map(|n| match n {
            XmlNode::Element(e) => Some(e),
            _ => None,
        })
    }

    pub fn elements_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.elements().filter(move |e| e.name == name)
    }

    pub fn push_element(&mut self, element: XmlElement) {
        self.children.push(XmlNode::Element(element));
    }

    /// Drops child elements matching the predicate; other nodes stay.
    pub fn remove_elements(&mut self, mut predicate: impl FnMut(&XmlElement) -> bool) {
        self.children.retain(|n| match n {
            XmlNode::Element(e) => !predicate(e),
            _ => true,
        });
    }

    pub fn count_elements(&self, name: &str) -> usize {
        self.elements_named(name).count()
    }
}

pub fn parse(text: &str) -> Result<XmlDocument> {
    let mut reader = Reader::from_str(text);
    let mut declaration = None;
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event()? {
            Event::Decl(decl) => {
                declaration = Some(declaration_line(&decl));
            }
            Event::Start(start) => {
                stack.push(element_from_start(&start)?);
            }
            Event::Empty(start) => {
                let element = element_from_start(&start)?;
                attach(&mut stack, &mut root, XmlNode::Element(element))?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| LibraryError::UnsupportedDocument("unbalanced XML".into()))?;
                attach(&mut stack, &mut root, XmlNode::Element(element))?;
            }
            Event::Text(text) => {
                let value = text.unescape()?.into_owned();
                if !stack.is_empty() {
                    attach(&mut stack, &mut root, XmlNode::Text(value))?;
                }
            }
            Event::CData(data) => {
                let value = String::from_utf8_lossy(data.as_ref()).into_owned();
                if !stack.is_empty() {
                    attach(&mut stack, &mut root, XmlNode::Text(value))?;
                }
            }
            Event::Comment(comment) => {
                let value = String::from_utf8_lossy(comment.as_ref()).into_owned();
                if !stack.is_empty() {
                    attach(&mut stack, &mut root, XmlNode::Comment(value))?;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(LibraryError::UnsupportedDocument(
            "unterminated XML element".into(),
        ));
    }
    let root = root.ok_or_else(|| LibraryError::UnsupportedDocument("empty document".into()))?;
    Ok(XmlDocument { declaration, root })
}

/// Serializes the document, prefixing `default_declaration` when the parsed
/// input had no declaration of its own.
pub fn to_string(doc: &XmlDocument, default_declaration: &str) -> Result<String> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    write_element(&mut writer, &doc.root)?;
    let body = writer.into_inner().into_inner();

    let mut out = String::new();
    out.push_str(doc.declaration.as_deref().unwrap_or(default_declaration));
    out.push('\n');
    out.push_str(&String::from_utf8_lossy(&body));
    Ok(out)
}

fn declaration_line(decl: &quick_xml::events::BytesDecl) -> String {
    let version = decl
        .version()
        .map(|v| String::from_utf8_lossy(&v).into_owned())
        .unwrap_or_else(|_| "1.0".to_string());
    let mut line = format!("<?xml version=\"{}\"", version);
    if let Some(Ok(encoding)) = decl.encoding() {
        line.push_str(&format!(" encoding=\"{}\"", String::from_utf8_lossy(&encoding)));
    }
    if let Some(Ok(standalone)) = decl.standalone() {
        line.push_str(&format!(
            " standalone=\"{}\"",
            String::from_utf8_lossy(&standalone)
        ));
    }
    line.push_str("?>");
    line
}

fn element_from_start(start: &BytesStart<'_>) -> Result<XmlElement> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(quick_xml::Error::InvalidAttr)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        attributes.push((key, value));
    }
    Ok(XmlElement {
        name,
        attributes,
        children: Vec::new(),
    })
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    node: XmlNode,
) -> Result<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
        return Ok(());
    }
    match node {
        XmlNode::Element(element) => {
            if root.is_some() {
                return Err(LibraryError::UnsupportedDocument(
                    "multiple root elements".into(),
                ));
            }
            *root = Some(element);
            Ok(())
        }
        // Top-level text/comments outside the root are dropped.
        _ => Ok(()),
    }
}

fn write_element(writer: &mut Writer<Cursor<Vec<u8>>>, element: &XmlElement) -> Result<()> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }
    if element.children.is_empty() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }
    writer.write_event(Event::Start(start))?;
    for child in &element.children {
        match child {
            XmlNode::Element(e) => write_element(writer, e)?,
            XmlNode::Text(t) => writer.write_event(Event::Text(BytesText::new(t)))?,
            XmlNode::Comment(c) => writer.write_event(Event::Comment(BytesText::new(c)))?,
        }
    }
    writer.write_event(Event::End(BytesEnd::new(element.name.as_str())))?;
    Ok(())
}
