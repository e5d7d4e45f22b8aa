//! Owned XML element tree.
//!
//! Service payloads are parsed once into [`XmlElement`], normalized, and then
//! either re-serialized (relative tokens, user profile) or loaded into an
//! `sxd_document` package for `XPath` evaluation. The tree keeps local names
//! only; namespace URIs and prefixes never survive parsing.

use std::fmt::{self, Write as _};

use sxd_document::dom::{self, ChildOfElement, ChildOfRoot};
use sxd_document::{parser, Package};

use crate::error::XmlError;

/// A node in an [`XmlElement`] tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

/// An element with local name, attributes and children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

/// How much of the source document is carried into the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conversion {
    /// Elements with element children keep only those; leaf elements keep
    /// their concatenated text. Namespace declarations are dropped.
    Flatten,
    /// Every element and text node is kept, local names only.
    Preserve,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

impl XmlElement {
    /// Creates an element with no attributes or children.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Parses a document and strips namespaces from every element.
    ///
    /// Mixed content is normalized: an element that has child elements keeps
    /// only those, and a leaf element keeps its text value.
    ///
    /// # Errors
    ///
    /// Returns [`XmlError`] when `xml` is not well-formed.
    pub fn parse_stripped(xml: &str) -> Result<Self, XmlError> {
        parse_with(xml, Conversion::Flatten)
    }

    /// Parses a document keeping all element and text content.
    ///
    /// # Errors
    ///
    /// Returns [`XmlError`] when `xml` is not well-formed.
    pub fn parse(xml: &str) -> Result<Self, XmlError> {
        parse_with(xml, Conversion::Preserve)
    }

    /// Appends a child element and returns `self` for chaining.
    #[must_use]
    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(XmlNode::Element(child));
        self
    }

    /// Appends a text child and returns `self` for chaining.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(XmlNode::Text(text.into()));
        self
    }

    pub fn push(&mut self, node: XmlNode) {
        self.children.push(node);
    }

    /// Child elements in document order.
    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(element) => Some(element),
            XmlNode::Text(_) => None,
        })
    }

    /// Concatenated text of all descendants.
    #[must_use]
    pub fn text_value(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }

    /// Serialized children, without the element's own tags.
    #[must_use]
    pub fn inner_xml(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            write_node(child, &mut out);
        }
        out
    }

    /// Serialized element including its own tags.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        write_element(self, &mut out);
        out
    }

    /// Loads the tree into a fresh `sxd_document` package.
    #[must_use]
    pub fn to_package(&self) -> Package {
        let package = Package::new();
        {
            let document = package.as_document();
            let root = build_element(&document, self);
            document.root().append_child(root);
        }
        package
    }

    /// Converts an `sxd_document` element, keeping all content.
    #[must_use]
    pub fn from_dom(element: dom::Element<'_>) -> Self {
        convert(element, Conversion::Preserve)
    }
}

impl fmt::Display for XmlElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_xml())
    }
}

/// Parses `raw` as XML, or wraps it as a text node when it is not well-formed.
#[must_use]
pub fn element_or_text(raw: &str) -> XmlNode {
    match XmlElement::parse(raw) {
        Ok(element) => XmlNode::Element(element),
        Err(_) => XmlNode::Text(raw.to_string()),
    }
}

/// Turns `name` into a legal element name.
///
/// Characters outside letters, digits, `-`, `.` and `_` become `_`, and a
/// name that does not start with a letter or `_` gets a leading `_`.
#[must_use]
pub fn element_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '.' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if !out.starts_with(|c: char| c.is_alphabetic() || c == '_') {
        out.insert(0, '_');
    }
    out
}

fn parse_with(xml: &str, mode: Conversion) -> Result<XmlElement, XmlError> {
    let package = parser::parse(xml).map_err(|e| XmlError::Malformed(format!("{e:?}")))?;
    let document = package.as_document();
    let root = document
        .root()
        .children()
        .into_iter()
        .find_map(|child| match child {
            ChildOfRoot::Element(element) => Some(element),
            _ => None,
        })
        .ok_or(XmlError::NoRootElement)?;
    Ok(convert(root, mode))
}

fn convert(element: dom::Element<'_>, mode: Conversion) -> XmlElement {
    let mut out = XmlElement::new(element.name().local_part());
    out.attributes = element
        .attributes()
        .into_iter()
        .map(|attribute| {
            (
                attribute.name().local_part().to_string(),
                attribute.value().to_string(),
            )
        })
        .collect();

    match mode {
        Conversion::Preserve => {
            for child in element.children() {
                match child {
                    ChildOfElement::Element(child) => {
                        out.push(XmlNode::Element(convert(child, mode)));
                    }
                    ChildOfElement::Text(text) => {
                        out.push(XmlNode::Text(text.text().to_string()));
                    }
                    _ => {}
                }
            }
        }
        Conversion::Flatten => {
            let children = element.children();
            let has_elements = children
                .iter()
                .any(|child| matches!(child, ChildOfElement::Element(_)));
            if has_elements {
                for child in children {
                    if let ChildOfElement::Element(child) = child {
                        out.push(XmlNode::Element(convert(child, mode)));
                    }
                }
            } else {
                let text: String = children
                    .iter()
                    .filter_map(|child| match child {
                        ChildOfElement::Text(text) => Some(text.text()),
                        _ => None,
                    })
                    .collect();
                if !text.is_empty() {
                    out.push(XmlNode::Text(text));
                }
            }
        }
    }
    out
}

fn build_element<'d>(document: &dom::Document<'d>, source: &XmlElement) -> dom::Element<'d> {
    let element = document.create_element(source.name.as_str());
    for (name, value) in &source.attributes {
        element.set_attribute_value(name.as_str(), value);
    }
    for child in &source.children {
        match child {
            XmlNode::Element(child) => element.append_child(build_element(document, child)),
            XmlNode::Text(text) => element.append_child(document.create_text(text)),
        }
    }
    element
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

fn collect_text(element: &XmlElement, out: &mut String) {
    for child in &element.children {
        match child {
            XmlNode::Element(child) => collect_text(child, out),
            XmlNode::Text(text) => out.push_str(text),
        }
    }
}

fn write_node(node: &XmlNode, out: &mut String) {
    match node {
        XmlNode::Element(element) => write_element(element, out),
        XmlNode::Text(text) => escape_into(text, false, out),
    }
}

fn write_element(element: &XmlElement, out: &mut String) {
    let _ = write!(out, "<{}", element.name);
    for (name, value) in &element.attributes {
        let _ = write!(out, " {name}=\"");
        escape_into(value, true, out);
        out.push('"');
    }
    out.push('>');
    for child in &element.children {
        write_node(child, out);
    }
    let _ = write!(out, "</{}>", element.name);
}

fn escape_into(text: &str, attribute: bool, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}
