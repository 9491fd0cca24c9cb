//! HTTP adapters for the collaborator services and the payment processor.
//!
//! Every adapter maps transport failures and HTTP statuses onto
//! [`ServiceError`]: 404 is `NotFound`, 409 is `Conflict`, anything else
//! unsuccessful is `Unavailable`.

pub mod catalog;
pub mod identity;
pub mod notification;
pub mod razorpay;

pub use catalog::HttpCatalogClient;
pub use identity::HttpIdentityClient;
pub use notification::HttpNotificationClient;
pub use razorpay::{RazorpayConfig, RazorpayGateway};

use checkout::ServiceError;
use reqwest::{RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;

/// Base URL plus credentials of one collaborator service.
#[derive(Debug, Clone)]
pub struct ServiceEndpoint {
    client: reqwest::Client,
    base_url: String,
    token: Option<SecretString>,
}

impl ServiceEndpoint {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    /// Sends `token` as a bearer token on every request.
    pub fn with_token(mut self, token: Option<SecretString>) -> Self {
        self.token = token;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    pub(crate) fn get(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.get(self.url(path)))
    }

    pub(crate) fn post(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.post(self.url(path)))
    }
}

/// Sends the request and turns a non-success status into a [`ServiceError`].
pub(crate) async fn send(request: RequestBuilder, what: &str) -> Result<Response, ServiceError> {
    let response = request.send().await.map_err(|e| {
        tracing::warn!(error = %e, call = what, "collaborator request failed");
        ServiceError::Unavailable(format!("{what}: {e}"))
    })?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::warn!(%status, call = what, body = %body, "collaborator returned an error");
    Err(status_error(status, what, &body))
}

/// Sends the request and decodes a JSON body.
pub(crate) async fn send_json<T: DeserializeOwned>(
    request: RequestBuilder,
    what: &str,
) -> Result<T, ServiceError> {
    send(request, what)
        .await?
        .json()
        .await
        .map_err(|e| ServiceError::Unavailable(format!("{what}: invalid response: {e}")))
}

pub(crate) fn status_error(status: StatusCode, what: &str, body: &str) -> ServiceError {
    let detail = format!("{what} returned {status}: {body}");
    match status {
        StatusCode::NOT_FOUND => ServiceError::NotFound(detail),
        StatusCode::CONFLICT => ServiceError::Conflict(detail),
        _ => ServiceError::Unavailable(detail),
    }
}
