//! `XPath` evaluation over [`XmlElement`] documents.

use sxd_document::dom;
use sxd_xpath::nodeset::Node;
use sxd_xpath::{Context, Factory, Value, XPath};

use crate::error::XPathError;
use crate::xml::XmlElement;

/// Compiles `expression`, reporting syntax errors.
///
/// `Ok(None)` means the expression was empty after parsing.
///
/// # Errors
///
/// Returns [`XPathError::Compile`] on a syntax error.
pub fn compile(expression: &str) -> Result<Option<XPath>, XPathError> {
    Factory::new()
        .build(expression)
        .map_err(|e| XPathError::Compile {
            expression: expression.to_string(),
            message: format!("{e:?}"),
        })
}

/// Evaluates `expression` from `context` and returns the raw value.
///
/// # Errors
///
/// Returns [`XPathError`] when the expression does not compile or fails.
pub fn evaluate_at<'d>(
    expression: &str,
    context: impl Into<Node<'d>>,
) -> Result<Option<Value<'d>>, XPathError> {
    let Some(xpath) = compile(expression)? else {
        return Ok(None);
    };
    xpath
        .evaluate(&Context::new(), context)
        .map(Some)
        .map_err(|e| XPathError::Evaluation(format!("{e:?}")))
}

/// Evaluates `expression` against `document` and renders the first node.
///
/// The document element is the context node, so relative expressions start
/// below the root.
///
/// Text nodes yield their text, attributes their value, and elements (or the
/// document root) their inner XML. An empty node set yields `Ok(None)`.
///
/// # Errors
///
/// Returns [`XPathError::NotANodeSet`] for scalar results, and
/// [`XPathError::Compile`]/[`XPathError::Evaluation`] for bad expressions.
pub fn select_first(document: &XmlElement, expression: &str) -> Result<Option<String>, XPathError> {
    let package = document.to_package();
    let doc = package.as_document();
    let context = match document_element(doc.root()) {
        Some(element) => Node::Element(element),
        None => Node::Root(doc.root()),
    };
    match evaluate_at(expression, context)? {
        None => Ok(None),
        Some(Value::Nodeset(nodes)) => Ok(nodes.document_order_first().map(render_node)),
        Some(_) => Err(XPathError::NotANodeSet),
    }
}

/// First element child of the document root.
#[must_use]
pub fn document_element(root: dom::Root<'_>) -> Option<dom::Element<'_>> {
    root.children().into_iter().find_map(|child| match child {
        dom::ChildOfRoot::Element(element) => Some(element),
        _ => None,
    })
}

/// Renders a node the way token values are reported.
#[must_use]
pub fn render_node(node: Node<'_>) -> String {
    match node {
        Node::Text(text) => text.text().to_string(),
        Node::Attribute(attribute) => attribute.value().to_string(),
        Node::Element(element) => XmlElement::from_dom(element).inner_xml(),
        Node::Root(root) => document_element(root)
            .map(|element| XmlElement::from_dom(element).to_xml())
            .unwrap_or_default(),
        other => other.string_value(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(xml: &str) -> XmlElement {
        XmlElement::parse_stripped(xml).unwrap()
    }

    #[test]
    fn text_node_yields_text() {
        let value = select_first(&doc("<test>Text</test>"), "/test/text()").unwrap();
        assert_eq!(value.as_deref(), Some("Text"));
    }

    #[test]
    fn missing_path_yields_none() {
        let value = select_first(&doc("<test>Text</test>"), "/test1/text()").unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn syntax_error_is_reported() {
        let err = select_first(&doc("<test>Text</test>"), "/test/tex()").unwrap_err();
        assert!(matches!(
            err,
            XPathError::Compile { .. } | XPathError::Evaluation(_)
        ));
    }

    #[test]
    fn root_selection_yields_whole_document() {
        let value = select_first(&doc("<test></test>"), "/").unwrap();
        assert_eq!(value.as_deref(), Some("<test></test>"));
    }

    #[test]
    fn element_selection_yields_inner_xml() {
        let value = select_first(&doc("<a><b><c>1</c></b></a>"), "/a/b").unwrap();
        assert_eq!(value.as_deref(), Some("<c>1</c>"));
    }

    #[test]
    fn attribute_selection_yields_value() {
        let value = select_first(&doc("<a id=\"42\"></a>"), "/a/@id").unwrap();
        assert_eq!(value.as_deref(), Some("42"));
    }

    #[test]
    fn relative_expression_starts_at_document_element() {
        let value = select_first(&doc("<a><b>x</b></a>"), "b/text()").unwrap();
        assert_eq!(value.as_deref(), Some("x"));
    }

    #[test]
    fn scalar_result_is_not_a_node_set() {
        let err = select_first(&doc("<a>1</a>"), "count(/a)").unwrap_err();
        assert_eq!(err, XPathError::NotANodeSet);
    }

    #[test]
    fn first_match_wins_in_document_order() {
        let value = select_first(&doc("<r><v>1</v><v>2</v></r>"), "/r/v/text()").unwrap();
        assert_eq!(value.as_deref(), Some("1"));
    }
}
