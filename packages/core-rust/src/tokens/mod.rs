//! Token extraction: `XPath` selection, template transforms, and the engine
//! that combines them with the cache.

pub mod engine;
pub mod template;
pub mod xpath;

pub use engine::{wrap_template, TokenEngine, NO_MATCH_SENTINEL, TEMPLATE_CACHE_REGION};
pub use template::{TemplateCompiler, TemplateExecutable, XslStylesheet, XslSubsetCompiler};
