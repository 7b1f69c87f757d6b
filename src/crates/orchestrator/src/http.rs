//! HTTP fetcher for http-request nodes.

use async_trait::async_trait;
use flowgraph_core::services::{HttpFetchError, HttpFetcher, HttpResponseData};
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// reqwest-backed implementation of the engine's HTTP contract.
pub struct ReqwestFetcher {
    client: Client,
}

impl ReqwestFetcher {
    pub fn new(timeout: Duration) -> Result<Self, HttpFetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HttpFetchError(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn fetch(
        &self,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        body: Option<&Value>,
    ) -> Result<HttpResponseData, HttpFetchError> {
        let method: reqwest::Method = method
            .parse()
            .map_err(|_| HttpFetchError(format!("invalid method '{method}'")))?;

        let mut request = self.client.request(method, url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| HttpFetchError(e.to_string()))?;

        let status = response.status().as_u16();
        let response_headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| HttpFetchError(e.to_string()))?;

        Ok(HttpResponseData { status, body, headers: response_headers })
    }
}
