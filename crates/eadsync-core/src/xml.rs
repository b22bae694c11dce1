//! Minimal owned XML element tree on top of `quick-xml`.
//!
//! Only what the validator and the MARC transformer need: elements,
//! attributes and text. Comments, processing instructions and the doctype
//! are dropped on parse.

use std::io::Cursor;

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    /// Qualified name as written, e.g. `marc:record`.
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    /// Name without namespace prefix.
    pub fn local_name(&self) -> &str {
        local(&self.name)
    }

    fn prefix(&self) -> Option<&str> {
        self.name.split_once(':').map(|(p, _)| p)
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Namespace URI declared for this element's prefix on the element itself.
    pub fn declared_namespace(&self) -> Option<&str> {
        match self.prefix() {
            Some(prefix) => self.attribute(&format!("xmlns:{prefix}")),
            None => self.attribute("xmlns"),
        }
    }

    /// Child elements, skipping text.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// Child elements with the given local name.
    pub fn children_named<'a>(&'a self, local_name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.elements().filter(move |e| e.local_name() == local_name)
    }

    /// Concatenated direct text content.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|n| match n {
                Node::Text(t) => Some(t.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    /// Depth-first walk over this element and all descendants.
    pub fn descendants(&self) -> Vec<&Element> {
        let mut out = vec![self];
        let mut i = 0;
        while i < out.len() {
            let current = out[i];
            out.extend(current.elements());
            i += 1;
        }
        out
    }
}

pub fn local(name: &str) -> &str {
    name.rsplit_once(':').map(|(_, l)| l).unwrap_or(name)
}

/// A parsed XML document: a single root element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub root: Element,
}

impl Document {
    /// Parse bytes into a document. Any well-formedness problem becomes
    /// [`AppError::MalformedXml`].
    pub fn parse(bytes: &[u8]) -> Result<Self, AppError> {
        let mut reader = Reader::from_reader(bytes);
        reader.config_mut().trim_text(false);

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;
        let mut buf = Vec::new();

        loop {
            let event = reader.read_event_into(&mut buf).map_err(|e| {
                AppError::MalformedXml(format!(
                    "at byte {}: {e}",
                    reader.error_position()
                ))
            })?;

            match event {
                Event::Start(start) => {
                    let element = start_to_element(&start)?;
                    if root.is_some() && stack.is_empty() {
                        return Err(AppError::MalformedXml(
                            "multiple root elements".to_string(),
                        ));
                    }
                    stack.push(element);
                }
                Event::Empty(start) => {
                    let element = start_to_element(&start)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack.pop().ok_or_else(|| {
                        AppError::MalformedXml("unexpected closing tag".to_string())
                    })?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    let text = text
                        .unescape()
                        .map_err(|e| AppError::MalformedXml(e.to_string()))?;
                    push_text(&mut stack, &text)?;
                }
                Event::CData(data) => {
                    let text = String::from_utf8(data.into_inner().into_owned())
                        .map_err(|e| AppError::MalformedXml(e.to_string()))?;
                    push_text(&mut stack, &text)?;
                }
                Event::Eof => break,
                Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_) => {}
            }
            buf.clear();
        }

        if let Some(open) = stack.last() {
            return Err(AppError::MalformedXml(format!(
                "unclosed element <{}>",
                open.name
            )));
        }
        root.map(|root| Document { root })
            .ok_or_else(|| AppError::MalformedXml("document has no root element".to_string()))
    }

    /// Serialize with an XML declaration, UTF-8.
    pub fn to_bytes(&self) -> Result<Vec<u8>, AppError> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(write_err)?;
        writer
            .write_event(Event::Text(BytesText::new("\n")))
            .map_err(write_err)?;
        write_element(&mut writer, &self.root)?;
        Ok(writer.into_inner().into_inner())
    }
}

fn start_to_element(start: &BytesStart<'_>) -> Result<Element, AppError> {
    let name = String::from_utf8(start.name().as_ref().to_vec())
        .map_err(|e| AppError::MalformedXml(e.to_string()))?;
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| AppError::MalformedXml(e.to_string()))?;
        let key = String::from_utf8(attr.key.as_ref().to_vec())
            .map_err(|e| AppError::MalformedXml(e.to_string()))?;
        let value = attr
            .unescape_value()
            .map_err(|e| AppError::MalformedXml(e.to_string()))?
            .into_owned();
        attributes.push((key, value));
    }
    Ok(Element {
        name,
        attributes,
        children: Vec::new(),
    })
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), AppError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(Node::Element(element));
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(AppError::MalformedXml("multiple root elements".to_string())),
    }
}

fn push_text(stack: &mut [Element], text: &str) -> Result<(), AppError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(Node::Text(text.to_string()));
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(AppError::MalformedXml(
            "text content outside the root element".to_string(),
        )),
    }
}

fn write_element(writer: &mut Writer<Cursor<Vec<u8>>>, element: &Element) -> Result<(), AppError> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if element.children.is_empty() {
        return writer.write_event(Event::Empty(start)).map_err(write_err);
    }

    writer.write_event(Event::Start(start)).map_err(write_err)?;
    for child in &element.children {
        match child {
            Node::Element(e) => write_element(writer, e)?,
            Node::Text(t) => writer
                .write_event(Event::Text(BytesText::new(t)))
                .map_err(write_err)?,
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new(element.name.as_str())))
        .map_err(write_err)
}

fn write_err(e: impl std::fmt::Display) -> AppError {
    AppError::Generic(format!("XML write failed: {e}"))
}
