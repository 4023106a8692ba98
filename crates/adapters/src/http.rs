// Copyright 2025 Memory Validation Contributors
// SPDX-License-Identifier: Apache-2.0

//! [`HttpProbe`] over `reqwest`.

use async_trait::async_trait;
use memory_validation_core::error::HttpError;
use memory_validation_core::http::{HttpMethod, HttpProbe, HttpResponse};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, RequestBuilder};
use std::time::Duration;
use tracing::debug;

/// Probe with one shared client and a per-request timeout.
#[derive(Debug, Clone)]
pub struct ReqwestProbe {
    client: Client,
    timeout: Duration,
}

impl ReqwestProbe {
    /// Probe whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, HttpError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HttpError::Request(e.to_string()))?;
        Ok(Self { client, timeout })
    }

    fn classify(&self, url: &str, err: reqwest::Error) -> HttpError {
        if err.is_timeout() {
            HttpError::Timeout(self.timeout)
        } else if err.is_connect() {
            HttpError::ConnectionRefused(url.to_string())
        } else if err.is_decode() {
            HttpError::Decode(err.to_string())
        } else {
            HttpError::Request(err.to_string())
        }
    }

    async fn send(&self, url: &str, request: RequestBuilder) -> Result<HttpResponse, HttpError> {
        let response = request.send().await.map_err(|e| self.classify(url, e))?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(|e| self.classify(url, e))?;
        debug!(url = %url, status, bytes = body.len(), "HTTP response");
        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}

fn method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Patch => Method::PATCH,
    }
}

#[async_trait]
impl HttpProbe for ReqwestProbe {
    async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<HttpResponse, HttpError> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        self.send(url, request).await
    }

    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<HttpResponse, HttpError> {
        self.send(url, self.client.post(url).json(body)).await
    }

    async fn request(
        &self,
        verb: HttpMethod,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> Result<HttpResponse, HttpError> {
        let mut request = self.client.request(method(verb), url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        self.send(url, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_mapping() {
        assert_eq!(method(HttpMethod::Get), Method::GET);
        assert_eq!(method(HttpMethod::Delete), Method::DELETE);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_refused() {
        let probe = ReqwestProbe::new(Duration::from_secs(2)).unwrap();
        let err = probe.get("http://127.0.0.1:1/health", &[]).await.unwrap_err();
        assert!(matches!(
            err,
            HttpError::ConnectionRefused(_) | HttpError::Request(_) | HttpError::Timeout(_)
        ));
    }
}
