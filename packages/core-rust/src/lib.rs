//! Broker Core — service and token definitions, result types, the region
//! cache contract, and token extraction over XML payloads.

pub mod cache;
pub mod error;
pub mod tokens;
pub mod types;
pub mod xml;

pub use cache::{Cache, CacheValue, MemoryCache};
pub use error::{TemplateError, TokenError, XPathError, XmlError};
pub use tokens::TokenEngine;
pub use types::{
    BrokerResponse, CalledService, CircuitBreakerSettings, ParameterDefinition, PostParameter,
    ServiceCallResult, ServiceDefinition, ServiceId, ServiceKind, ServiceKindTag, ServiceStatus,
    TokenDefinition, TokenId, TokenResult, TokenStatus, TokenStrategy,
};
pub use xml::{XmlElement, XmlNode};
