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

//! Prometheus metrics collection for the Farmanet proxy.
//!
//! Tracks cache efficiency, upstream health and how often each normalizer
//! strategy was needed.

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Arc;

use crate::error::AppError;
use crate::normalize::Strategy;

/// Hit and miss counters shared between the cache and the registry.
#[derive(Clone)]
pub struct CacheCounters {
    pub hits: IntCounter,
    pub misses: IntCounter,
}

impl CacheCounters {
    /// Counters that are not attached to any registry.
    pub fn detached() -> Self {
        Self {
            hits: IntCounter::new("farmaproxy_cache_hits_total", "Local cache hits")
                .expect("static counter options are valid"),
            misses: IntCounter::new("farmaproxy_cache_misses_total", "Local cache misses")
                .expect("static counter options are valid"),
        }
    }
}

/// Metrics collector for the proxy
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,

    // Cache metrics
    pub cache: CacheCounters,
    pub cache_stores: IntCounter,
    pub cache_size: IntGauge,

    // Upstream metrics
    pub upstream_requests: IntCounter,
    pub upstream_failures: IntCounter,
    pub upstream_latency: Histogram,

    // Normalizer metrics
    pub normalized: IntCounterVec,
}

fn metric_error(e: prometheus::Error) -> AppError {
    AppError::Internal(anyhow::anyhow!("Failed to create metric: {}", e))
}

impl Metrics {
    pub fn new() -> Result<Self, AppError> {
        let registry = Registry::new();

        let cache = CacheCounters {
            hits: IntCounter::with_opts(Opts::new(
                "farmaproxy_cache_hits_total",
                "Total number of local cache hits",
            ))
            .map_err(metric_error)?,
            misses: IntCounter::with_opts(Opts::new(
                "farmaproxy_cache_misses_total",
                "Total number of local cache misses",
            ))
            .map_err(metric_error)?,
        };

        let cache_stores = IntCounter::with_opts(Opts::new(
            "farmaproxy_cache_stores_total",
            "Total number of cache stores",
        ))
        .map_err(metric_error)?;

        let cache_size = IntGauge::with_opts(Opts::new(
            "farmaproxy_cache_size",
            "Current number of locally cached entries",
        ))
        .map_err(metric_error)?;

        let upstream_requests = IntCounter::with_opts(Opts::new(
            "farmaproxy_upstream_requests_total",
            "Total number of calls made to Farmanet",
        ))
        .map_err(metric_error)?;

        let upstream_failures = IntCounter::with_opts(Opts::new(
            "farmaproxy_upstream_failures_total",
            "Total number of Farmanet calls that failed or returned unusable data",
        ))
        .map_err(metric_error)?;

        let upstream_latency = Histogram::with_opts(
            HistogramOpts::new(
                "farmaproxy_upstream_latency_seconds",
                "Duration of Farmanet calls including the cookie preflight",
            )
            .buckets(vec![0.050, 0.100, 0.250, 0.500, 1.0, 2.0, 5.0, 10.0]),
        )
        .map_err(metric_error)?;

        let normalized = IntCounterVec::new(
            Opts::new(
                "farmaproxy_normalized_total",
                "Upstream bodies by the normalizer strategy that recovered them",
            ),
            &["strategy"],
        )
        .map_err(metric_error)?;

        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(cache.hits.clone()),
            Box::new(cache.misses.clone()),
            Box::new(cache_stores.clone()),
            Box::new(cache_size.clone()),
            Box::new(upstream_requests.clone()),
            Box::new(upstream_failures.clone()),
            Box::new(upstream_latency.clone()),
            Box::new(normalized.clone()),
        ];
        for collector in collectors {
            registry.register(collector).map_err(|e| {
                AppError::Internal(anyhow::anyhow!("Failed to register metric: {}", e))
            })?;
        }

        Ok(Self {
            registry: Arc::new(registry),
            cache,
            cache_stores,
            cache_size,
            upstream_requests,
            upstream_failures,
            upstream_latency,
            normalized,
        })
    }

    /// Record a cache store operation
    pub fn record_cache_store(&self) {
        self.cache_stores.inc();
    }

    /// Update the cache size gauge
    pub fn update_cache_size(&self, size: usize) {
        self.cache_size.set(i64::try_from(size).unwrap_or(i64::MAX));
    }

    /// Record an upstream call
    pub fn record_upstream_request(&self) {
        self.upstream_requests.inc();
    }

    /// Record an upstream failure
    pub fn record_upstream_failure(&self) {
        self.upstream_failures.inc();
    }

    /// Observe latency for an upstream call in seconds
    pub fn record_upstream_latency(&self, seconds: f64) {
        self.upstream_latency.observe(seconds);
    }

    /// Record which strategy recovered a body, `unparsed` when none did
    pub fn record_normalized(&self, strategy: Option<Strategy>) {
        let label = strategy.map_or("unparsed", |s| s.as_str());
        self.normalized.with_label_values(&[label]).inc();
    }

    /// Export metrics in Prometheus format
    pub fn export(&self) -> Result<String, AppError> {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to encode metrics: {}", e)))?;

        String::from_utf8(buffer).map_err(|e| {
            AppError::Internal(anyhow::anyhow!(
                "Failed to convert metrics to string: {}",
                e
            ))
        })
    }
}
