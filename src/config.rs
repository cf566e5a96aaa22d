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

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};

const DEFAULT_API_URL: &str = "https://seremienlinea.minsal.cl/asdigital/mfarmacias/mapa.php";

pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub upstream: UpstreamConfig,
    pub cache_ttl: Duration,
    pub janitor_interval: Duration,
    pub debug_enabled: bool,
    pub proximity_box_degrees: Option<f64>,
    pub remote_cache: RemoteCacheConfig,
    pub json_logs: bool,
}

#[derive(Clone, Debug)]
pub struct UpstreamConfig {
    pub api_url: String,
    pub preflight_url: String,
    pub timeout: Duration,
}

/// Which remote tier, if any, backs the local cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteCacheConfig {
    None,
    Redis { url: String },
    Upstash { url: String, token: String },
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let listen_addr: SocketAddr = match env::var("FARMANET_ADDR") {
            Ok(addr) => addr,
            Err(_) => match env::var("PORT") {
                Ok(port) => format!("0.0.0.0:{port}"),
                Err(_) => "0.0.0.0:3001".to_string(),
            },
        }
        .parse()
        .context("invalid FARMANET_ADDR")?;

        let api_url =
            non_empty_var("FARMANET_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let preflight_url =
            non_empty_var("FARMANET_PREFLIGHT_URL").unwrap_or_else(|| api_url.clone());
        let timeout_ms = parse_u64("FARMANET_TIMEOUT_MS", 7_000)?;

        let cache_ttl = Duration::from_secs(parse_u64("FARMANET_CACHE_TTL_SECONDS", 60)?);
        let janitor_interval = Duration::from_secs(parse_u64("FARMANET_JANITOR_SECONDS", 30)?);

        let proximity_box_degrees = match non_empty_var("FARMANET_PROXIMITY_BOX_DEGREES") {
            Some(raw) => {
                let degrees: f64 = raw
                    .parse()
                    .context("FARMANET_PROXIMITY_BOX_DEGREES must be a number of degrees")?;
                (degrees > 0.0).then_some(degrees)
            }
            None => None,
        };

        Ok(Self {
            listen_addr,
            upstream: UpstreamConfig {
                api_url,
                preflight_url,
                timeout: Duration::from_millis(timeout_ms),
            },
            cache_ttl,
            janitor_interval,
            debug_enabled: parse_flag("FARMANET_ENABLE_DEBUG"),
            proximity_box_degrees,
            remote_cache: remote_cache_from_env(),
            json_logs: env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    pub fn janitor_interval(&self) -> Duration {
        self.janitor_interval
    }
}

fn remote_cache_from_env() -> RemoteCacheConfig {
    if let Some(url) = non_empty_var("REDIS_URL") {
        return RemoteCacheConfig::Redis { url };
    }

    let url = non_empty_var("UPSTASH_REDIS_REST_URL")
        .or_else(|| non_empty_var("UPSTASH_REDIS_REST_URL_HTTP"));
    let token = non_empty_var("UPSTASH_REDIS_REST_TOKEN")
        .or_else(|| non_empty_var("UPSTASH_REDIS_REST_TOKEN_HTTP"));

    match (url, token) {
        (Some(url), Some(token)) => RemoteCacheConfig::Upstash { url, token },
        _ => RemoteCacheConfig::None,
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_flag(key: &str) -> bool {
    matches!(
        non_empty_var(key).map(|v| v.to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}

fn parse_u64(env_key: &str, default: u64) -> Result<u64> {
    let raw = env::var(env_key).unwrap_or_else(|_| default.to_string());
    raw.trim()
        .parse()
        .with_context(|| format!("{env_key} must be a non-negative integer"))
}
