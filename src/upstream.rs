// Copyright 2025 Memophor Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! HTTP client for the Farmanet endpoint.
//!
//! Every call is a cookie preflight GET followed by a form-encoded POST. The
//! body is handed back as raw bytes because the upstream content type cannot
//! be trusted; decoding is [`crate::normalize`]'s job.

use std::time::Duration;

use anyhow::anyhow;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, COOKIE, REFERER, SET_COOKIE,
    USER_AGENT,
};
use reqwest::Client;
use thiserror::Error;

use crate::config::UpstreamConfig;
use crate::error::AppError;
use crate::model::{RawResponse, UpstreamQuery};
use crate::normalize;

const BROWSER_USER_AGENT: &str = concat!(
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) ",
    "AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36"
);
const BROWSER_ACCEPT: &str = "application/json, text/javascript, */*; q=0.01";
const BROWSER_ACCEPT_LANGUAGE: &str = "es-CL,es;q=0.9,en;q=0.8";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("upstream request timed out after {0:?}")]
    Timeout(Duration),
    #[error("upstream request failed: {0}")]
    Network(#[source] reqwest::Error),
    #[error("upstream returned status {status}")]
    Status { status: u16, preview: String },
}

/// HTTP client wrapper for talking to Farmanet.
#[derive(Clone)]
pub struct UpstreamClient {
    api_url: String,
    preflight_url: String,
    timeout: Duration,
    headers: HeaderMap,
    client: Client,
}

impl UpstreamClient {
    /// Construct a new upstream client using the provided configuration.
    pub fn try_new(config: UpstreamConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Internal(anyhow!("Failed to build upstream client: {}", e)))?;

        Ok(Self {
            headers: browser_headers(&config.preflight_url),
            api_url: config.api_url,
            preflight_url: config.preflight_url,
            timeout: config.timeout,
            client,
        })
    }

    /// Preflight for cookies, then POST the query.
    ///
    /// Non-2xx answers are errors; the body of a 2xx answer is returned as is.
    pub async fn fetch(&self, query: &UpstreamQuery) -> Result<RawResponse, FetchError> {
        let cookies = self.preflight().await;

        let mut request = self
            .client
            .post(&self.api_url)
            .headers(self.headers.clone())
            .timeout(self.timeout)
            .form(&query.form());
        if let Some(cookies) = cookies {
            request = request.header(COOKIE, cookies);
        }

        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.classify(e))?
            .to_vec();

        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                preview: normalize::preview(&body),
            });
        }

        tracing::debug!(
            func = query.operation().func(),
            status = status.as_u16(),
            bytes = body.len(),
            "upstream responded"
        );

        Ok(RawResponse {
            status: status.as_u16(),
            headers,
            body,
        })
    }

    /// GET the landing page and collect its session cookies.
    ///
    /// Any failure is logged and yields no cookies.
    async fn preflight(&self) -> Option<String> {
        let response = match self
            .client
            .get(&self.preflight_url)
            .headers(self.headers.clone())
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(%error, "preflight failed, continuing without cookies");
                return None;
            }
        };

        let pairs: Vec<String> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(cookie_pair)
            .collect();

        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }

    fn classify(&self, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Network(error)
        }
    }
}

/// `name=value` part of a `Set-Cookie` header.
fn cookie_pair(set_cookie: &str) -> Option<String> {
    let pair = set_cookie.split(';').next()?.trim();
    pair.contains('=').then(|| pair.to_string())
}

fn browser_headers(referer: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(ACCEPT, HeaderValue::from_static(BROWSER_ACCEPT));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(BROWSER_ACCEPT_LANGUAGE));
    headers.insert(
        HeaderName::from_static("x-requested-with"),
        HeaderValue::from_static("XMLHttpRequest"),
    );
    if let Ok(referer) = HeaderValue::from_str(referer) {
        headers.insert(REFERER, referer);
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_pair_keeps_name_and_value_only() {
        assert_eq!(
            cookie_pair("PHPSESSID=abc123; path=/; HttpOnly"),
            Some("PHPSESSID=abc123".to_string())
        );
        assert_eq!(cookie_pair("garbage"), None);
    }

    #[test]
    fn browser_headers_include_referer() {
        let headers = browser_headers("https://example.test/mapa");
        assert_eq!(headers.get(REFERER).unwrap(), "https://example.test/mapa");
        assert!(headers.get(USER_AGENT).is_some());
        assert!(headers.get(ACCEPT_LANGUAGE).is_some());
    }
}
