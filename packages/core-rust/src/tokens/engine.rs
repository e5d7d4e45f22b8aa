//! Token extraction with cache lookup.

use std::sync::Arc;

use tracing::{debug, error};

use super::template::{TemplateCompiler, TemplateExecutable, XslSubsetCompiler, XSL_NAMESPACE};
use super::xpath;
use crate::cache::{Cache, CacheValue};
use crate::error::{TemplateError, TokenError, XmlError};
use crate::types::{TokenDefinition, TokenResult, TokenStatus, TokenStrategy};
use crate::xml::XmlElement;

/// Cache region holding compiled template executables.
pub const TEMPLATE_CACHE_REGION: &str = "XSLT";

/// Output marker of the fallback rule appended to every template fragment.
pub const NO_MATCH_SENTINEL: &str = "-------NO MATCH-------";

/// Wraps a template fragment into a text-output stylesheet with a
/// lowest-priority fallback rule emitting [`NO_MATCH_SENTINEL`].
#[must_use]
pub fn wrap_template(fragment: &str) -> String {
    format!(
        "<xsl:stylesheet xmlns:xsl=\"{XSL_NAMESPACE}\" version=\"1.0\">\
         <xsl:output method=\"text\" />\
         {fragment}\
         <xsl:template match=\"/*\" priority=\"0\">{NO_MATCH_SENTINEL}</xsl:template>\
         </xsl:stylesheet>"
    )
}

/// Evaluates token definitions against response bodies.
///
/// Token values already cached in the caller's region win over extraction.
/// Compiled templates are cached under [`TEMPLATE_CACHE_REGION`] keyed by the
/// literal fragment text.
pub struct TokenEngine {
    cache: Arc<dyn Cache>,
    compiler: Arc<dyn TemplateCompiler>,
}

impl TokenEngine {
    /// Creates an engine using the built-in template compiler.
    #[must_use]
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self::with_compiler(cache, Arc::new(XslSubsetCompiler))
    }

    #[must_use]
    pub fn with_compiler(cache: Arc<dyn Cache>, compiler: Arc<dyn TemplateCompiler>) -> Self {
        Self { cache, compiler }
    }

    /// Evaluates `tokens` against `body`, one result per token in order.
    ///
    /// A malformed body or a failing expression yields a token with status
    /// [`TokenStatus::Error`]; only argument errors are returned as `Err`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::MissingArgument`] when `region` is empty.
    pub fn parse_tokens(
        &self,
        region: &str,
        body: &str,
        tokens: &[TokenDefinition],
    ) -> Result<Vec<TokenResult>, TokenError> {
        if region.is_empty() {
            return Err(TokenError::MissingArgument("region"));
        }

        let mut document: Option<Result<XmlElement, XmlError>> = None;
        let mut results = Vec::with_capacity(tokens.len());
        for token in tokens {
            if let Some(cached) = self.cached_token(region, token) {
                results.push(cached);
                continue;
            }

            let parsed = document.get_or_insert_with(|| XmlElement::parse_stripped(body));
            let result = match parsed {
                Ok(document) => self.evaluate(document, token),
                Err(e) => {
                    error!(token_id = %token.id, error = %e, "failed to execute token");
                    TokenResult::error(token.id)
                }
            };
            results.push(result);
        }
        Ok(results)
    }

    /// Evaluates `relative` against the `index`-th (1-based) child element of
    /// the cached value of `base`.
    ///
    /// An uncached base, a base without child elements, or an index past the
    /// last child yields `NotFound`. A base value that is not well-formed
    /// yields `Error`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError`] on an empty region or an index below 1.
    pub fn parse_relative_token(
        &self,
        region: &str,
        base: &TokenDefinition,
        relative: &TokenDefinition,
        index: usize,
    ) -> Result<TokenResult, TokenError> {
        if region.is_empty() {
            return Err(TokenError::MissingArgument("region"));
        }
        if index < 1 {
            return Err(TokenError::IndexOutOfRange(index));
        }

        let Some(base_value) = self.cached_token(region, base).and_then(|t| t.value) else {
            return Ok(TokenResult::not_found(relative.id));
        };

        let wrapper = match XmlElement::parse(&format!("<root>{base_value}</root>")) {
            Ok(wrapper) => wrapper,
            Err(e) => {
                error!(
                    relative_token = %relative.id,
                    base_token = %base.id,
                    index,
                    error = %e,
                    "failed to parse relative token"
                );
                return Ok(TokenResult::error(relative.id));
            }
        };

        let Some(target) = wrapper.elements().nth(index - 1) else {
            return Ok(TokenResult::not_found(relative.id));
        };

        let mut results = self.parse_tokens(region, &target.to_xml(), std::slice::from_ref(relative))?;
        Ok(results
            .pop()
            .unwrap_or_else(|| TokenResult::not_found(relative.id)))
    }

    /// Writes `Found` token values into `region`.
    pub fn cache_tokens(&self, region: &str, tokens: &[TokenResult]) {
        for token in tokens {
            if token.status == TokenStatus::Found {
                self.cache
                    .set_text(region, &token.cache_key(), token.value.clone());
            }
        }
    }

    fn cached_token(&self, region: &str, token: &TokenDefinition) -> Option<TokenResult> {
        match self.cache.get_text(region, &token.cache_key()) {
            Some(Some(value)) => Some(TokenResult {
                token_id: token.id,
                status: TokenStatus::Found,
                value: Some(value),
            }),
            _ => None,
        }
    }

    fn evaluate(&self, document: &XmlElement, token: &TokenDefinition) -> TokenResult {
        let outcome = match &token.strategy {
            TokenStrategy::XPath(None) => Ok(None),
            TokenStrategy::XPath(Some(expression)) => {
                xpath::select_first(document, expression).map_err(TemplateError::from)
            }
            TokenStrategy::Template(fragment) => self.run_template(document, fragment),
        };
        match outcome {
            Ok(value) => {
                let result = TokenResult::from_value(token.id, value);
                debug!(token_id = %token.id, status = ?result.status, "token evaluated");
                result
            }
            Err(e) => {
                error!(token_id = %token.id, error = %e, "failed to execute token");
                TokenResult::error(token.id)
            }
        }
    }

    fn run_template(
        &self,
        document: &XmlElement,
        fragment: &str,
    ) -> Result<Option<String>, TemplateError> {
        let executable = self.executable(fragment)?;
        let output = executable.transform(document)?;
        if output.contains(NO_MATCH_SENTINEL) {
            return Ok(None);
        }
        Ok(Some(output.trim().to_string()))
    }

    fn executable(&self, fragment: &str) -> Result<Arc<dyn TemplateExecutable>, TemplateError> {
        if let Some(CacheValue::Template(executable)) =
            self.cache.get(TEMPLATE_CACHE_REGION, fragment)
        {
            return Ok(executable);
        }
        let executable = self.compiler.compile(&wrap_template(fragment))?;
        self.cache.set(
            TEMPLATE_CACHE_REGION,
            fragment,
            CacheValue::Template(Arc::clone(&executable)),
        );
        Ok(executable)
    }
}
