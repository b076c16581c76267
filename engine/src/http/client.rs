//! HTTP client for the control plane API

use std::time::Duration;

use reqwest::{header, Client, Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};

use crate::errors::EngineError;

/// HTTP client for control plane communication
pub struct HttpClient {
    client: Client,
    base_url: String,
    token: SecretString,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(base_url: &str, token: SecretString, timeout: Duration) -> Result<Self, EngineError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, EngineError> {
        self.send::<T, ()>(Method::GET, path, None).await
    }

    /// Make a GET request, mapping 404 to `None`
    pub async fn get_optional<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>, EngineError> {
        match self.send::<T, ()>(Method::GET, path, None).await {
            Ok(body) => Ok(Some(body)),
            Err(EngineError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Make a POST request
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, EngineError> {
        self.send(Method::POST, path, Some(body)).await
    }

    /// Make a PUT request
    pub async fn put<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, EngineError> {
        self.send(Method::PUT, path, Some(body)).await
    }

    /// Make a PATCH request
    pub async fn patch<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, EngineError> {
        self.send(Method::PATCH, path, Some(body)).await
    }

    async fn send<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, EngineError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("{} {}", method, url);

        let mut request = self
            .client
            .request(method.clone(), &url)
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.token.expose_secret()),
            );
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(EngineError::NotFound(url));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("HTTP {} failed: {} - {}", method, status, body);
            return Err(EngineError::StoreError(format!("{}: {}", status, body)));
        }

        let body = response.json().await?;
        Ok(body)
    }
}
