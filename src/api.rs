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

//! HTTP API handlers for the Farmanet proxy.
//!
//! Every route below is mounted under both `/api` and `/mfarmacias`:
//!
//! - `GET /regions` - Region list
//! - `GET /communes?region=` - Communes of a region
//! - `GET /pharmacies?region=&comuna=&tipo=&lat=&lng=` - Pharmacies, nearest first
//!   when coordinates are given
//! - `GET /pharmacies/:id?fecha=` - Detail and schedule of one pharmacy
//! - `GET /health` - Liveness plus cache counters
//! - `GET /version` - Package name and version
//! - `GET /debug/upstream?func=` - Raw upstream inspection, when enabled
//!
//! `GET /metrics` and the legacy `POST /mfarmacias/mapa.php` live at fixed paths.

use std::collections::BTreeMap;
use std::future::Future;

use axum::extract::{Path, Query, State};
use axum::http::Method;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::adapter::{AdapterError, FarmanetAdapter};
use crate::cache;
use crate::config::AppConfig;
use crate::error::{AppError, FieldError};
use crate::geo;
use crate::legacy;
use crate::metrics::Metrics;
use crate::model::{
    Commune, CommunesQuery, DetailQuery, HealthResponse, Operation, PharmaciesQuery,
    PharmacyRecord, Region, UpstreamQuery,
};
use crate::state::CacheState;
use crate::upstream::UpstreamClient;
use crate::validate;

#[derive(Clone)]
pub struct AppState {
    pub cache: CacheState<Value>,
    pub adapter: FarmanetAdapter,
    pub metrics: Metrics,
    pub debug_enabled: bool,
    pub proximity_box_degrees: Option<f64>,
}

impl AppState {
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let metrics = Metrics::new()?;
        let remote = cache::backend_from_config(&config.remote_cache)?;
        let cache = CacheState::new(config.cache_ttl(), remote, metrics.cache.clone());
        let upstream = UpstreamClient::try_new(config.upstream.clone())?;

        Ok(Self {
            cache,
            adapter: FarmanetAdapter::new(upstream, metrics.clone()),
            metrics,
            debug_enabled: config.debug_enabled,
            proximity_box_degrees: config.proximity_box_degrees,
        })
    }
}

/// Assemble the full router.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/regions", get(handle_regions))
        .route("/communes", get(handle_communes))
        .route("/pharmacies", get(handle_pharmacies))
        .route("/pharmacies/:id", get(handle_pharmacy_detail))
        .route("/health", get(health))
        .route("/version", get(version))
        .route("/debug/upstream", get(handle_debug_upstream));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/mfarmacias/mapa.php", post(legacy::handle_mapa))
        .nest("/api", api.clone())
        .nest("/mfarmacias", api)
        .route("/metrics", get(metrics))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn not_found() -> AppError {
    AppError::not_found("Not found")
}

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        cache: state.cache.metrics(),
        remote: state.cache.remote_name(),
    })
}

pub async fn version() -> Json<Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Metrics endpoint
pub async fn metrics(State(state): State<AppState>) -> Result<String, AppError> {
    state.metrics.update_cache_size(state.cache.len().await);
    state.metrics.export()
}

pub async fn handle_regions(State(state): State<AppState>) -> Result<Json<Vec<Region>>, AppError> {
    let regions = read_through(&state, "regions", || state.adapter.regions()).await?;
    Ok(Json(regions))
}

pub async fn handle_communes(
    State(state): State<AppState>,
    Query(query): Query<CommunesQuery>,
) -> Result<Json<Vec<Commune>>, AppError> {
    let region = validate::region(query.region.as_deref()).map_err(single)?;

    let key = format!("communes:{region}");
    let communes = read_through(&state, &key, || state.adapter.communes(region)).await?;
    Ok(Json(communes))
}

/// List pharmacies of a region.
///
/// Only the unsorted upstream list is cached; proximity ordering is applied
/// per request.
pub async fn handle_pharmacies(
    State(state): State<AppState>,
    Query(query): Query<PharmaciesQuery>,
) -> Result<Json<Vec<PharmacyRecord>>, AppError> {
    let mut errors = Vec::new();
    let region = validate::region(query.region.as_deref())
        .map_err(|e| errors.push(e))
        .ok();
    let lat = validate::latitude("lat", query.lat.as_deref())
        .map_err(|e| errors.push(e))
        .ok()
        .flatten();
    let lng = validate::longitude("lng", query.lng.as_deref())
        .map_err(|e| errors.push(e))
        .ok()
        .flatten();

    let Some(region) = region.filter(|_| errors.is_empty()) else {
        return Err(AppError::Validation(errors));
    };

    let comuna = validate::sanitize_text(query.comuna.as_deref());
    let tipo = validate::sanitize_text(query.tipo.as_deref());

    let key = format!(
        "pharmacies:{region}:{}:{}",
        comuna.as_deref().unwrap_or_default(),
        tipo.as_deref().unwrap_or_default()
    );
    let records = read_through(&state, &key, || {
        state
            .adapter
            .pharmacies(region, comuna.as_deref(), tipo.as_deref())
    })
    .await?;

    let records = match (lat, lng) {
        (Some(lat), Some(lng)) => {
            let nearby = match state.proximity_box_degrees {
                Some(degrees) => geo::within_box(records, lat, lng, degrees),
                None => records,
            };
            geo::rank_by_proximity(nearby, lat, lng)
        }
        _ => records,
    };

    Ok(Json(records))
}

pub async fn handle_pharmacy_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DetailQuery>,
) -> Result<Json<Value>, AppError> {
    let mut errors = Vec::new();
    let id = validate::pharmacy_id("id", Some(id.as_str()))
        .map_err(|e| errors.push(e))
        .ok();
    let fecha = validate::fecha(query.fecha.as_deref())
        .map_err(|e| errors.push(e))
        .ok()
        .flatten();

    let Some(id) = id.filter(|_| errors.is_empty()) else {
        return Err(AppError::Validation(errors));
    };
    let fecha = fecha.unwrap_or_else(today);

    let detail = state.adapter.pharmacy_detail(&id, &fecha).await?;
    Ok(Json(detail))
}

/// Raw view of one upstream call, for diagnosing parser failures.
pub async fn handle_debug_upstream(
    State(state): State<AppState>,
    Query(mut params): Query<BTreeMap<String, String>>,
) -> Result<Json<Value>, AppError> {
    if !state.debug_enabled {
        return Err(AppError::not_found("Not found"));
    }

    let func = params.remove("func").unwrap_or_else(|| "regiones".to_string());
    let operation = Operation::from_func(&func).ok_or(AppError::Unsupported(func))?;

    let query = params.iter().fold(UpstreamQuery::new(operation), |query, (key, value)| {
        match validate::sanitize_text(Some(value)) {
            Some(clean) => query.param(key.as_str(), clean),
            None => query,
        }
    });

    let (raw, normalized) = state.adapter.inspect(&query).await?;
    let content_type = raw
        .headers
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    Ok(Json(json!({
        "func": operation.func(),
        "status": raw.status,
        "contentType": content_type,
        "bytes": raw.body.len(),
        "structured": normalized.is_structured(),
        "strategy": normalized.strategy.map(|s| s.as_str()),
        "preview": normalized.preview,
        "data": normalized.data,
    })))
}

fn single(error: FieldError) -> AppError {
    AppError::Validation(vec![error])
}

fn today() -> String {
    chrono::Local::now().date_naive().format("%Y-%m-%d").to_string()
}

/// Serve `key` from cache or load it; only non-empty lists are stored.
async fn read_through<T, F, Fut>(state: &AppState, key: &str, load: F) -> Result<Vec<T>, AppError>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<T>, AdapterError>>,
{
    if let Some(value) = state.cache.get(key).await {
        match serde_json::from_value(value) {
            Ok(items) => return Ok(items),
            Err(error) => tracing::debug!(key, %error, "ignoring cached entry of another shape"),
        }
    }

    let items = load().await?;

    if !items.is_empty() {
        match serde_json::to_value(&items) {
            Ok(value) => {
                state.cache.put(key, value).await;
                state.metrics.record_cache_store();
            }
            Err(error) => tracing::warn!(key, %error, "result not cacheable"),
        }
    }

    Ok(items)
}
