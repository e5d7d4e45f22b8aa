//! Template (XSLT-like) extraction.
//!
//! Compilation is behind [`TemplateCompiler`] so the engine can be pointed at
//! a different processor. The built-in [`XslSubsetCompiler`] understands the
//! part of XSLT 1.0 that token templates use with text output:
//!
//! - `xsl:template` with `match` and optional `priority`
//! - `xsl:value-of`, `xsl:text`, `xsl:for-each`, `xsl:if`, `xsl:choose`
//! - literal result elements and literal text (text output keeps only text)
//!
//! Template rules are tried against the document root, then the document
//! element. The highest priority wins; ties go to the rule declared last.
//!
//! Every other XSLT instruction fails compilation with
//! [`TemplateError::UnsupportedInstruction`], and the token using the template
//! reports `Error`. That includes `xsl:apply-templates`, `xsl:call-template`,
//! `xsl:copy-of`, `xsl:copy`, `xsl:variable`, `xsl:param`, `xsl:element`,
//! `xsl:attribute` and the top-level `xsl:import`/`xsl:include`/`xsl:key`.

use std::fmt::Debug;
use std::sync::Arc;

use sxd_document::dom::{self, ChildOfElement};
use sxd_document::parser;
use sxd_xpath::nodeset::Node;
use sxd_xpath::Value;

use super::xpath::{compile, document_element, evaluate_at};
use crate::error::{TemplateError, XPathError, XmlError};
use crate::xml::XmlElement;

/// Namespace URI of XSLT instructions.
pub const XSL_NAMESPACE: &str = "http://www.w3.org/1999/XSL/Transform";

/// A compiled template that turns an input document into text output.
pub trait TemplateExecutable: Send + Sync + Debug {
    /// Runs the template against `input`.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError`] when an expression fails at run time.
    fn transform(&self, input: &XmlElement) -> Result<String, TemplateError>;
}

/// Compiles full stylesheet documents into executables.
pub trait TemplateCompiler: Send + Sync {
    /// # Errors
    ///
    /// Returns [`TemplateError`] for malformed or unsupported stylesheets.
    fn compile(&self, stylesheet: &str) -> Result<Arc<dyn TemplateExecutable>, TemplateError>;
}

// ---------------------------------------------------------------------------
// Compiled form
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Instruction {
    Text(String),
    ValueOf(String),
    ForEach {
        select: String,
        body: Vec<Instruction>,
    },
    If {
        test: String,
        body: Vec<Instruction>,
    },
    Choose {
        branches: Vec<(String, Vec<Instruction>)>,
        otherwise: Vec<Instruction>,
    },
    Literal(Vec<Instruction>),
}

#[derive(Debug, Clone, PartialEq)]
struct TemplateRule {
    pattern: String,
    priority: f64,
    body: Vec<Instruction>,
}

/// Stylesheet compiled by [`XslSubsetCompiler`].
#[derive(Debug, Clone, PartialEq)]
pub struct XslStylesheet {
    rules: Vec<TemplateRule>,
}

/// Built-in compiler for the supported XSLT subset.
#[derive(Debug, Default, Clone, Copy)]
pub struct XslSubsetCompiler;

impl TemplateCompiler for XslSubsetCompiler {
    fn compile(&self, stylesheet: &str) -> Result<Arc<dyn TemplateExecutable>, TemplateError> {
        Ok(Arc::new(XslStylesheet::compile(stylesheet)?))
    }
}

impl XslStylesheet {
    /// Parses and validates a full stylesheet document.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError`] when the document is malformed, uses an
    /// unsupported instruction, or contains an invalid expression.
    pub fn compile(stylesheet: &str) -> Result<Self, TemplateError> {
        let package =
            parser::parse(stylesheet).map_err(|e| XmlError::Malformed(format!("{e:?}")))?;
        let document = package.as_document();
        let root = document_element(document.root()).ok_or(XmlError::NoRootElement)?;

        let local = root.name().local_part();
        if !is_xsl(root) || !(local == "stylesheet" || local == "transform") {
            return Err(TemplateError::NotAStylesheet(local.to_string()));
        }

        let mut rules = Vec::new();
        for child in root.children() {
            let ChildOfElement::Element(element) = child else {
                continue;
            };
            if !is_xsl(element) {
                continue;
            }
            match element.name().local_part() {
                "template" => rules.push(compile_rule(element)?),
                "output" | "strip-space" | "preserve-space" => {}
                other => return Err(TemplateError::UnsupportedInstruction(other.to_string())),
            }
        }
        Ok(Self { rules })
    }

    fn best_rule<'d>(
        &self,
        candidate: Node<'d>,
        root: dom::Root<'d>,
    ) -> Result<Option<&TemplateRule>, TemplateError> {
        let mut best: Option<&TemplateRule> = None;
        for rule in &self.rules {
            if !pattern_matches(&rule.pattern, candidate, root)? {
                continue;
            }
            if best.map_or(true, |current| rule.priority >= current.priority) {
                best = Some(rule);
            }
        }
        Ok(best)
    }
}

impl TemplateExecutable for XslStylesheet {
    fn transform(&self, input: &XmlElement) -> Result<String, TemplateError> {
        let package = input.to_package();
        let document = package.as_document();
        let root = document.root();
        let mut out = String::new();

        if let Some(rule) = self.best_rule(Node::Root(root), root)? {
            execute(&rule.body, Node::Root(root), &mut out)?;
            return Ok(out);
        }

        if let Some(element) = document_element(root) {
            let node = Node::Element(element);
            match self.best_rule(node, root)? {
                Some(rule) => execute(&rule.body, node, &mut out)?,
                None => out.push_str(&node.string_value()),
            }
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

fn is_xsl(element: dom::Element<'_>) -> bool {
    element.name().namespace_uri() == Some(XSL_NAMESPACE)
}

fn required<'d>(element: dom::Element<'d>, attribute: &'static str) -> Result<&'d str, TemplateError> {
    element
        .attribute_value(attribute)
        .ok_or_else(|| TemplateError::MissingAttribute {
            instruction: element.name().local_part().to_string(),
            attribute,
        })
}

fn expression(element: dom::Element<'_>, attribute: &'static str) -> Result<String, TemplateError> {
    let text = required(element, attribute)?;
    compile(text)?;
    Ok(text.to_string())
}

fn compile_rule(element: dom::Element<'_>) -> Result<TemplateRule, TemplateError> {
    let pattern = expression(element, "match")?;
    let priority = match element.attribute_value("priority") {
        Some(raw) => raw
            .trim()
            .parse::<f64>()
            .map_err(|_| TemplateError::InvalidPriority(raw.to_string()))?,
        None => default_priority(&pattern),
    };
    Ok(TemplateRule {
        pattern,
        priority,
        body: compile_body(element)?,
    })
}

/// XSLT default priorities, simplified to the pattern shapes in use.
fn default_priority(pattern: &str) -> f64 {
    let pattern = pattern.trim();
    if matches!(pattern, "*" | "node()" | "text()") {
        -0.5
    } else if pattern
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        0.0
    } else {
        0.5
    }
}

fn compile_body(element: dom::Element<'_>) -> Result<Vec<Instruction>, TemplateError> {
    let mut body = Vec::new();
    for child in element.children() {
        match child {
            ChildOfElement::Text(text) => {
                let text = text.text();
                if !text.trim().is_empty() {
                    body.push(Instruction::Text(text.to_string()));
                }
            }
            ChildOfElement::Element(child) if is_xsl(child) => {
                body.push(compile_instruction(child)?);
            }
            ChildOfElement::Element(child) => {
                body.push(Instruction::Literal(compile_body(child)?));
            }
            _ => {}
        }
    }
    Ok(body)
}

fn compile_instruction(element: dom::Element<'_>) -> Result<Instruction, TemplateError> {
    let instruction = match element.name().local_part() {
        "value-of" => Instruction::ValueOf(expression(element, "select")?),
        "text" => Instruction::Text(
            element
                .children()
                .into_iter()
                .filter_map(|child| match child {
                    ChildOfElement::Text(text) => Some(text.text()),
                    _ => None,
                })
                .collect(),
        ),
        "for-each" => Instruction::ForEach {
            select: expression(element, "select")?,
            body: compile_body(element)?,
        },
        "if" => Instruction::If {
            test: expression(element, "test")?,
            body: compile_body(element)?,
        },
        "choose" => compile_choose(element)?,
        other => return Err(TemplateError::UnsupportedInstruction(other.to_string())),
    };
    Ok(instruction)
}

fn compile_choose(element: dom::Element<'_>) -> Result<Instruction, TemplateError> {
    let mut branches = Vec::new();
    let mut otherwise = Vec::new();
    for child in element.children() {
        let ChildOfElement::Element(child) = child else {
            continue;
        };
        if !is_xsl(child) {
            continue;
        }
        match child.name().local_part() {
            "when" => branches.push((expression(child, "test")?, compile_body(child)?)),
            "otherwise" => otherwise = compile_body(child)?,
            other => return Err(TemplateError::UnsupportedInstruction(other.to_string())),
        }
    }
    Ok(Instruction::Choose {
        branches,
        otherwise,
    })
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

fn pattern_matches<'d>(
    pattern: &str,
    candidate: Node<'d>,
    root: dom::Root<'d>,
) -> Result<bool, TemplateError> {
    match evaluate_at(pattern, Node::Root(root))? {
        Some(Value::Nodeset(nodes)) => Ok(nodes.document_order().contains(&candidate)),
        Some(_) => Err(XPathError::NotANodeSet.into()),
        None => Ok(false),
    }
}

fn execute<'d>(
    body: &[Instruction],
    context: Node<'d>,
    out: &mut String,
) -> Result<(), TemplateError> {
    for instruction in body {
        match instruction {
            Instruction::Text(text) => out.push_str(text),
            Instruction::ValueOf(select) => {
                if let Some(value) = evaluate_at(select, context)? {
                    out.push_str(&value.string());
                }
            }
            Instruction::ForEach { select, body } => match evaluate_at(select, context)? {
                Some(Value::Nodeset(nodes)) => {
                    for node in nodes.document_order() {
                        execute(body, node, out)?;
                    }
                }
                Some(_) => return Err(XPathError::NotANodeSet.into()),
                None => {}
            },
            Instruction::If { test, body } => {
                if truthy(test, context)? {
                    execute(body, context, out)?;
                }
            }
            Instruction::Choose {
                branches,
                otherwise,
            } => {
                let mut taken = false;
                for (test, body) in branches {
                    if truthy(test, context)? {
                        execute(body, context, out)?;
                        taken = true;
                        break;
                    }
                }
                if !taken {
                    execute(otherwise, context, out)?;
                }
            }
            Instruction::Literal(body) => execute(body, context, out)?,
        }
    }
    Ok(())
}

fn truthy(test: &str, context: Node<'_>) -> Result<bool, TemplateError> {
    Ok(evaluate_at(test, context)?.is_some_and(|value| value.boolean()))
}
