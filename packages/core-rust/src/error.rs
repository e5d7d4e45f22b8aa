//! Error types for the XML helpers and the token engine.

use thiserror::Error;

/// XML could not be turned into an element tree.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum XmlError {
    #[error("malformed xml: {0}")]
    Malformed(String),

    #[error("document has no root element")]
    NoRootElement,
}

/// Failure to evaluate an `XPath` expression against a document.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum XPathError {
    #[error("invalid xpath expression {expression:?}: {message}")]
    Compile { expression: String, message: String },

    #[error("xpath evaluation failed: {0}")]
    Evaluation(String),

    #[error("xpath result is not a node set")]
    NotANodeSet,
}

/// Failure to compile or run a template.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error(transparent)]
    Xml(#[from] XmlError),

    #[error(transparent)]
    XPath(#[from] XPathError),

    #[error("stylesheet root must be xsl:stylesheet, found {0}")]
    NotAStylesheet(String),

    #[error("unsupported instruction xsl:{0}")]
    UnsupportedInstruction(String),

    #[error("xsl:{instruction} is missing the {attribute} attribute")]
    MissingAttribute {
        instruction: String,
        attribute: &'static str,
    },

    #[error("invalid priority {0:?}")]
    InvalidPriority(String),
}

/// Argument errors raised by the token engine before any extraction runs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("relative index must be at least 1, got {0}")]
    IndexOutOfRange(usize),
}
