//! Service, token, and call-result model shared by the broker and the token engine.
//!
//! Definitions are immutable once loaded from a repository. Results are created
//! fresh per call and handed to the caller by value.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a service definition.
pub type ServiceId = Uuid;

/// Identifier of a token definition.
pub type TokenId = Uuid;

/// A name/value pair sent in the body of a downstream post request.
pub type PostParameter = (String, String);

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// A downstream service known to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDefinition {
    pub id: ServiceId,
    /// Display name. Also the element name used when rendering the user profile.
    pub name: String,
    /// Tokens extracted from every successful response body.
    #[serde(default)]
    pub tokens: Vec<TokenDefinition>,
    /// Hide this service from visual renderings of the user profile.
    #[serde(default)]
    pub exclude_from_visible_profile: bool,
    pub kind: ServiceKind,
}

impl ServiceDefinition {
    /// Key under which the raw response body is cached.
    #[must_use]
    pub fn cache_key(&self) -> String {
        self.id.to_string()
    }

    /// Discriminant of [`ServiceDefinition::kind`].
    #[must_use]
    pub fn kind_tag(&self) -> ServiceKindTag {
        self.kind.tag()
    }

    /// Parameters for called kinds, `None` for static services.
    #[must_use]
    pub fn called(&self) -> Option<&CalledService> {
        match &self.kind {
            ServiceKind::Dynamic(called) | ServiceKind::Cached(called) => Some(called),
            ServiceKind::Static { .. } => None,
        }
    }
}

/// How a service is executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServiceKind {
    /// Called on every request.
    Dynamic(CalledService),
    /// Called once per cache region, then served from the cache.
    Cached(CalledService),
    /// Precomputed payload, written by another operation such as login.
    #[serde(rename_all = "camelCase")]
    Static {
        #[serde(default)]
        data: Option<String>,
    },
}

impl ServiceKind {
    #[must_use]
    pub fn tag(&self) -> ServiceKindTag {
        match self {
            Self::Dynamic(_) => ServiceKindTag::Dynamic,
            Self::Cached(_) => ServiceKindTag::Cached,
            Self::Static { .. } => ServiceKindTag::Static,
        }
    }
}

/// Field-less discriminant of [`ServiceKind`], used as a routing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServiceKindTag {
    Dynamic,
    Cached,
    Static,
}

impl ServiceKindTag {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dynamic => "dynamic",
            Self::Cached => "cached",
            Self::Static => "static",
        }
    }
}

/// Settings shared by the kinds that perform a network call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalledService {
    /// Absent or empty means there is nothing to call.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Upper bound for a single downstream call.
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    /// Cached values appended to the request body.
    #[serde(default)]
    pub additional_parameters: Vec<ParameterDefinition>,
}

impl CalledService {
    /// The endpoint, if one is configured and non-empty.
    #[must_use]
    pub fn callable_endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref().filter(|endpoint| !endpoint.is_empty())
    }
}

/// Circuit breaker parameters for one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerSettings {
    /// Consecutive handled failures before the circuit opens.
    pub exception_count: u32,
    /// How long the circuit stays open before a probe call is allowed.
    #[serde(with = "duration_ms")]
    pub break_duration: Duration,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            exception_count: 5,
            break_duration: Duration::from_secs(30),
        }
    }
}

/// A request parameter whose value is read from the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDefinition {
    /// Cache key (within the region) holding the value.
    pub token_id: TokenId,
    /// Name of the post parameter.
    pub name: String,
}

/// A named value extracted from a response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenDefinition {
    pub id: TokenId,
    pub name: String,
    pub strategy: TokenStrategy,
}

impl TokenDefinition {
    #[must_use]
    pub fn cache_key(&self) -> String {
        self.id.to_string()
    }
}

/// Extraction strategy of a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "expression", rename_all = "camelCase")]
pub enum TokenStrategy {
    /// XPath 1.0 expression. `None` always yields no value.
    XPath(Option<String>),
    /// XSLT template fragment, wrapped in a text-output stylesheet before use.
    Template(String),
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Outcome of one service call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceStatus {
    Success,
    Error,
    Timeout,
}

impl ServiceStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }
}

/// Outcome of one token extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenStatus {
    Found,
    NotFound,
    Error,
}

/// Result of calling a single service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCallResult {
    pub service_id: ServiceId,
    pub status: ServiceStatus,
    pub value: Option<String>,
    pub tokens: Vec<TokenResult>,
}

impl ServiceCallResult {
    /// A result with the given status and no body or tokens.
    #[must_use]
    pub fn with_status(service_id: ServiceId, status: ServiceStatus) -> Self {
        Self {
            service_id,
            status,
            value: None,
            tokens: Vec::new(),
        }
    }

    #[must_use]
    pub fn success(service_id: ServiceId, value: Option<String>, tokens: Vec<TokenResult>) -> Self {
        Self {
            service_id,
            status: ServiceStatus::Success,
            value,
            tokens,
        }
    }

    #[must_use]
    pub fn error(service_id: ServiceId) -> Self {
        Self::with_status(service_id, ServiceStatus::Error)
    }

    #[must_use]
    pub fn timeout(service_id: ServiceId) -> Self {
        Self::with_status(service_id, ServiceStatus::Timeout)
    }
}

/// Result of evaluating a single token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResult {
    pub token_id: TokenId,
    pub status: TokenStatus,
    pub value: Option<String>,
}

impl TokenResult {
    /// Derives the status from the extracted value: empty or absent is `NotFound`.
    #[must_use]
    pub fn from_value(token_id: TokenId, value: Option<String>) -> Self {
        let status = match value.as_deref() {
            Some(v) if !v.is_empty() => TokenStatus::Found,
            _ => TokenStatus::NotFound,
        };
        Self {
            token_id,
            status,
            value,
        }
    }

    #[must_use]
    pub fn not_found(token_id: TokenId) -> Self {
        Self {
            token_id,
            status: TokenStatus::NotFound,
            value: None,
        }
    }

    #[must_use]
    pub fn error(token_id: TokenId) -> Self {
        Self {
            token_id,
            status: TokenStatus::Error,
            value: None,
        }
    }

    #[must_use]
    pub fn cache_key(&self) -> String {
        self.token_id.to_string()
    }
}

/// Aggregated results of one broker batch, in dispatch order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerResponse {
    pub service_responses: Vec<ServiceCallResult>,
}

/// Serde adapter storing a [`Duration`] as integer milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        #[allow(clippy::cast_possible_truncation)]
        let millis = value.as_millis() as u64;
        serializer.serialize_u64(millis)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
