//! Minimal HTTP transport shared by adapters.

use std::time::Duration;

use log::debug;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;

use crate::config::ConfigError;
use crate::errors::UpstreamFailure;
use crate::models::RawPayload;

/// GET helper returning the raw body, with non-2xx statuses as failures.
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a fetcher whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    pub async fn get(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        query: &[(&str, &str)],
    ) -> Result<RawPayload, UpstreamFailure> {
        let mut request = self.client.get(url);

        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        if !query.is_empty() {
            request = request.query(query);
        }

        // Headers may carry credentials; log the url and counts only
        debug!("GET {} with {} params", url, query.len());

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = if body.is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                body
            };
            return Err(UpstreamFailure::http(status.as_u16(), message));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let body = response.bytes().await?;

        Ok(RawPayload {
            body: body.to_vec(),
            content_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_refused_connection_is_connection_failure() {
        let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();
        // Port 9 (discard) is not listening on loopback in test environments
        let result = fetcher.get("http://127.0.0.1:9/quote", &[], &[]).await;

        match result {
            Err(UpstreamFailure::Connection { .. }) | Err(UpstreamFailure::Timeout { .. }) => {}
            other => panic!("expected connection failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_configured_timeout_applies_to_requests() {
        // Accepted by the kernel backlog, never answered
        let silent = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/quote", silent.local_addr().unwrap());

        let fetcher = HttpFetcher::new(Duration::from_millis(50)).unwrap();
        let started = std::time::Instant::now();
        let result = fetcher.get(&url, &[], &[]).await;

        assert!(matches!(result, Err(UpstreamFailure::Timeout { .. })), "got {:?}", result);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
