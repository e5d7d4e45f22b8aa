//! HTTP transport: response model, success classification, and a `reqwest`
//! implementation of [`HttpTransport`].

use std::time::Duration;

use async_trait::async_trait;
use broker_core::PostParameter;
use http::StatusCode;
use tokio_util::sync::CancellationToken;

use crate::traits::HttpTransport;

/// Status and body of a downstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: String,
}

impl HttpResponse {
    #[must_use]
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        is_success_status(self.status)
    }
}

/// Errors raised while talking to a downstream service.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request cancelled")]
    Cancelled,
    #[error("request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("transport failure: {0}")]
    Other(String),
}

/// Statuses treated as success: 200 through 206.
///
/// 207 and the other 2xx codes count as failures.
#[must_use]
pub fn is_success_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 200..=206)
}

// ---------------------------------------------------------------------------
// ReqwestTransport
// ---------------------------------------------------------------------------

/// [`HttpTransport`] over a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Builds a client with a connect timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn with_connect_timeout(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().connect_timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post(
        &self,
        endpoint: &str,
        params: &[PostParameter],
        cancel: CancellationToken,
    ) -> Result<HttpResponse, TransportError> {
        let request_error = |source| TransportError::Request {
            endpoint: endpoint.to_string(),
            source,
        };

        let exchange = async {
            let response = self
                .client
                .post(endpoint)
                .form(params)
                .send()
                .await
                .map_err(request_error)?;
            let status = response.status();
            let body = response.text().await.map_err(request_error)?;
            Ok(HttpResponse { status, body })
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(TransportError::Cancelled),
            result = exchange => result,
        }
    }
}
