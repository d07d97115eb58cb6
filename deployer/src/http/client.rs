//! HTTP client implementation

use std::time::Duration;

use machines_api::ErrorResponse;
use reqwest::{header, Client, Method, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};
use url::Url;

use crate::errors::{ApiError, DeployError};

/// Header proving the caller holds a machine's lease
pub const LEASE_NONCE_HEADER: &str = "machine-lease-nonce";

/// Default timeout of a single request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the control plane and release service
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    base_url: Url,
    token: SecretString,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(base_url: &str, token: SecretString) -> Result<Self, DeployError> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| DeployError::ConfigError(format!("invalid base url {}: {}", base_url, e)))?;
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        let joined = format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path);
        Url::parse(&joined).map_err(|e| ApiError::Transport(format!("invalid url {}: {}", joined, e)))
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        lease_nonce: Option<&str>,
    ) -> Result<RequestBuilder, ApiError> {
        let url = self.url(path)?;
        debug!("{} {}", method, url);

        let mut request = self
            .client
            .request(method, url)
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.token.expose_secret()),
            );
        if let Some(nonce) = lease_nonce {
            request = request.header(LEASE_NONCE_HEADER, nonce);
        }
        Ok(request)
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.request(Method::GET, path, None)?.send().await?;
        read_json(check(response).await?).await
    }

    /// Make a GET request with query parameters and its own timeout
    pub async fn get_with_query(
        &self,
        path: &str,
        query: &[(&str, String)],
        timeout: Duration,
    ) -> Result<(), ApiError> {
        let response = self
            .request(Method::GET, path, None)?
            .query(query)
            .timeout(timeout)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    /// Make a POST request
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
        lease_nonce: Option<&str>,
    ) -> Result<T, ApiError> {
        let response = self
            .request(Method::POST, path, lease_nonce)?
            .json(body)
            .send()
            .await?;
        read_json(check(response).await?).await
    }

    /// Make a POST request without a body, ignoring the response body
    pub async fn post_empty(&self, path: &str) -> Result<(), ApiError> {
        let response = self.request(Method::POST, path, None)?.send().await?;
        check(response).await?;
        Ok(())
    }

    /// Make a DELETE request
    pub async fn delete(
        &self,
        path: &str,
        query: &[(&str, String)],
        lease_nonce: Option<&str>,
    ) -> Result<(), ApiError> {
        let response = self
            .request(Method::DELETE, path, lease_nonce)?
            .query(query)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}

async fn check(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| e.error)
        .unwrap_or(body);
    error!("HTTP request failed: {} - {}", status, message);
    Err(ApiError::Status {
        status: status.as_u16(),
        message,
    })
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
}
