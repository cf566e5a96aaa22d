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

use std::time::Duration;

use farmaproxy::cache::RedisBackend;
use farmaproxy::config::RemoteCacheConfig;
use farmaproxy::{router, AppConfig, AppState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cfg = AppConfig::from_env()?;
    init_tracing(cfg.json_logs);

    if let RemoteCacheConfig::Redis { url } = &cfg.remote_cache {
        if let Err(error) = RedisBackend::new(url)?.ping().await {
            tracing::warn!(%error, "redis unreachable at startup, serving from local cache");
        }
    }

    let state = AppState::from_config(&cfg)?;
    tracing::info!(
        remote = state.cache.remote_name(),
        ttl_seconds = cfg.cache_ttl().as_secs(),
        upstream = %cfg.upstream.api_url,
        "cache configured"
    );

    spawn_janitor(state.clone(), cfg.janitor_interval());

    let app = router(state);

    let listen_addr = cfg.listen_addr();
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;

    tracing::info!(%listen_addr, "starting farmanet proxy");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("farmaproxy exited cleanly");

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn spawn_janitor(state: AppState, interval: Duration) {
    if interval.is_zero() {
        tracing::warn!("janitor interval disabled; expired entries are only evicted on read");
        return;
    }

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let purged = state.cache.purge_expired().await;
            state.metrics.update_cache_size(state.cache.len().await);
            if purged > 0 {
                tracing::debug!(purged, "purged expired cache entries");
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(%error, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term_signal) => term_signal.recv().await,
            Err(error) => {
                tracing::warn!(%error, "failed to install SIGTERM handler");
                None
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
