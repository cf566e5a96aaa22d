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

//! Maps public operations onto Farmanet's `func` protocol.
//!
//! The upstream wraps lists in several envelope shapes and reports failures
//! inside a `200` as `{"correcto": false, "error": ...}`. This module hides
//! both behind typed results so handlers only see public records.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;

use crate::metrics::Metrics;
use crate::model::{
    text_field, Commune, Operation, PharmacyRecord, RawResponse, Region, UpstreamQuery,
};
use crate::normalize::{self, NormalizedResult, PREVIEW_LIMIT};
use crate::upstream::{FetchError, UpstreamClient};

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("operation not supported: {0}")]
    Unsupported(String),
    #[error(transparent)]
    Unreachable(#[from] FetchError),
    #[error("upstream response could not be parsed")]
    Malformed { preview: String },
    #[error("upstream response has an unexpected shape")]
    ShapeMismatch { preview: String },
    #[error("upstream rejected the request: {message}")]
    Rejected { message: String, preview: String },
}

/// The list envelopes Farmanet is known to produce.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvelopeShape {
    /// `[...]`
    Array(Vec<Value>),
    /// `{"respuesta": [...]}` or `{"respuesta": {"1": {...}, ...}}`
    Enveloped(Vec<Value>),
    /// `{"respuesta": {"locales": [...]}}`
    EnvelopedLocales(Vec<Value>),
    Unknown(Value),
}

impl EnvelopeShape {
    pub fn detect(value: Value) -> Self {
        match value {
            Value::Array(items) => EnvelopeShape::Array(items),
            Value::Object(mut fields) => match fields.remove("respuesta") {
                Some(Value::Array(items)) => EnvelopeShape::Enveloped(items),
                Some(Value::Object(mut inner)) => match inner.remove("locales") {
                    Some(Value::Array(items)) => EnvelopeShape::EnvelopedLocales(items),
                    Some(other) => {
                        inner.insert("locales".to_string(), other);
                        EnvelopeShape::Unknown(Value::Object(inner))
                    }
                    None if !inner.is_empty() && inner.values().all(Value::is_object) => {
                        EnvelopeShape::Enveloped(inner.into_iter().map(|(_, item)| item).collect())
                    }
                    None => EnvelopeShape::Unknown(Value::Object(inner)),
                },
                Some(other) => EnvelopeShape::Unknown(other),
                None => EnvelopeShape::Unknown(Value::Object(fields)),
            },
            other => EnvelopeShape::Unknown(other),
        }
    }

    /// Flat item list, or the unrecognised value.
    pub fn into_items(self) -> Result<Vec<Value>, Value> {
        match self {
            EnvelopeShape::Array(items)
            | EnvelopeShape::Enveloped(items)
            | EnvelopeShape::EnvelopedLocales(items) => Ok(items),
            EnvelopeShape::Unknown(value) => Err(value),
        }
    }
}

/// Typed facade over [`UpstreamClient`].
#[derive(Clone)]
pub struct FarmanetAdapter {
    upstream: UpstreamClient,
    metrics: Metrics,
}

impl FarmanetAdapter {
    pub fn new(upstream: UpstreamClient, metrics: Metrics) -> Self {
        Self { upstream, metrics }
    }

    pub async fn regions(&self) -> Result<Vec<Region>, AdapterError> {
        let value = self.call(&UpstreamQuery::new(Operation::Regions)).await?;
        Ok(regions_from_items(list_items(value)?))
    }

    pub async fn communes(&self, region: u8) -> Result<Vec<Commune>, AdapterError> {
        let query = UpstreamQuery::new(Operation::Communes).param("region", region.to_string());
        let value = self.call(&query).await?;
        Ok(communes_from_items(list_items(value)?))
    }

    /// Pharmacies of a region, optionally narrowed to a commune and type.
    pub async fn pharmacies(
        &self,
        region: u8,
        comuna: Option<&str>,
        tipo: Option<&str>,
    ) -> Result<Vec<PharmacyRecord>, AdapterError> {
        let query =
            UpstreamQuery::new(Operation::PharmaciesByRegion).param("region", region.to_string());
        let value = self.call(&query).await?;
        let records: Vec<PharmacyRecord> = list_items(value)?
            .iter()
            .filter_map(PharmacyRecord::from_upstream)
            .collect();
        Ok(filter_pharmacies(records, comuna, tipo))
    }

    /// Detail and schedule of one pharmacy on a given date.
    pub async fn pharmacy_detail(&self, id: &str, fecha: &str) -> Result<Value, AdapterError> {
        let query = UpstreamQuery::new(Operation::PharmacyDetail)
            .param("im", id)
            .param("fecha", fecha);
        let value = self.call(&query).await?;
        ensure_accepted(&value)?;

        match value {
            Value::Object(mut fields) if fields.contains_key("respuesta") => {
                Ok(fields.remove("respuesta").unwrap_or(Value::Null))
            }
            Value::Object(fields) => Ok(Value::Object(fields)),
            other => Err(AdapterError::ShapeMismatch {
                preview: preview_of(&other),
            }),
        }
    }

    /// Forward a whitelisted `func` with its raw parameters.
    ///
    /// The upstream envelope is returned untouched, failures included.
    pub async fn forward(
        &self,
        func: &str,
        parameters: BTreeMap<String, String>,
    ) -> Result<Value, AdapterError> {
        let operation =
            Operation::from_func(func).ok_or_else(|| AdapterError::Unsupported(func.to_string()))?;

        let query = parameters
            .into_iter()
            .fold(UpstreamQuery::new(operation), |query, (key, value)| {
                query.param(key, value)
            });

        self.call(&query).await
    }

    /// Fetch and normalize without interpreting the result.
    pub async fn inspect(
        &self,
        query: &UpstreamQuery,
    ) -> Result<(RawResponse, NormalizedResult), AdapterError> {
        let raw = self.fetch(query).await?;
        let normalized = normalize::normalize(&raw.body);
        self.metrics.record_normalized(normalized.strategy);
        Ok((raw, normalized))
    }

    async fn call(&self, query: &UpstreamQuery) -> Result<Value, AdapterError> {
        let (_, normalized) = self.inspect(query).await?;

        match normalized.data {
            Some(data) => Ok(data),
            None => {
                self.metrics.record_upstream_failure();
                tracing::warn!(
                    func = query.operation().func(),
                    preview = %normalize::truncate_chars(&normalized.preview, 200),
                    "upstream body could not be normalized"
                );
                Err(AdapterError::Malformed {
                    preview: normalized.preview,
                })
            }
        }
    }

    async fn fetch(&self, query: &UpstreamQuery) -> Result<RawResponse, AdapterError> {
        self.metrics.record_upstream_request();
        let start = Instant::now();
        let outcome = self.upstream.fetch(query).await;
        self.metrics
            .record_upstream_latency(start.elapsed().as_secs_f64());

        outcome.map_err(|error| {
            self.metrics.record_upstream_failure();
            tracing::warn!(func = query.operation().func(), %error, "upstream call failed");
            AdapterError::from(error)
        })
    }
}

fn preview_of(value: &Value) -> String {
    normalize::truncate_chars(&value.to_string(), PREVIEW_LIMIT)
}

/// Turn an in-band `{"correcto": false}` into an error.
fn ensure_accepted(value: &Value) -> Result<(), AdapterError> {
    if value.get("correcto").and_then(Value::as_bool) == Some(false) {
        let message = value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("upstream reported failure")
            .to_string();
        return Err(AdapterError::Rejected {
            message,
            preview: preview_of(value),
        });
    }
    Ok(())
}

fn list_items(value: Value) -> Result<Vec<Value>, AdapterError> {
    ensure_accepted(&value)?;
    EnvelopeShape::detect(value)
        .into_items()
        .map_err(|unknown| AdapterError::ShapeMismatch {
            preview: preview_of(&unknown),
        })
}

fn region_id(item: &Value) -> Option<u32> {
    ["region_id", "id", "rg"]
        .iter()
        .filter_map(|key| item.get(*key))
        .find_map(|value| match value {
            Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
}

/// `{region_id, region_nombre}` items to public regions, first id wins.
pub(crate) fn regions_from_items(items: Vec<Value>) -> Vec<Region> {
    let mut seen = HashSet::new();
    items
        .iter()
        .filter_map(|item| {
            let fields = item.as_object()?;
            let id = region_id(item)?;
            let nombre = text_field(fields, &["region_nombre", "nombre"]);
            (!nombre.is_empty() && seen.insert(id)).then_some(Region { id, nombre })
        })
        .collect()
}

/// Distinct commune names in first-seen order.
pub(crate) fn communes_from_items(items: Vec<Value>) -> Vec<Commune> {
    let mut seen = HashSet::new();
    items
        .iter()
        .filter_map(|item| {
            let fields = item.as_object()?;
            let nombre = text_field(fields, &["comuna_nombre", "nombre", "cm"]);
            (!nombre.is_empty() && seen.insert(nombre.clone())).then(|| Commune::from_name(nombre))
        })
        .collect()
}

/// Case-insensitive equality filters on commune and type.
pub(crate) fn filter_pharmacies(
    records: Vec<PharmacyRecord>,
    comuna: Option<&str>,
    tipo: Option<&str>,
) -> Vec<PharmacyRecord> {
    let comuna = comuna.map(str::to_lowercase);
    let tipo = tipo.map(str::to_lowercase);

    records
        .into_iter()
        .filter(|record| {
            comuna
                .as_deref()
                .map_or(true, |c| record.commune.to_lowercase() == c)
                && tipo
                    .as_deref()
                    .map_or(true, |t| record.kind.to_lowercase() == t)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn locales() -> Vec<Value> {
        vec![
            json!({"local_id": "1", "comuna_nombre": "Curicó", "local_tipo": "Farmacia"}),
            json!({"local_id": "2", "comuna_nombre": "Talca", "local_tipo": "Almacen"}),
        ]
    }

    #[test]
    fn detects_every_known_envelope() {
        assert_eq!(
            EnvelopeShape::detect(json!([{"a": 1}])),
            EnvelopeShape::Array(vec![json!({"a": 1})])
        );
        assert_eq!(
            EnvelopeShape::detect(json!({"correcto": true, "respuesta": [{"a": 1}]})),
            EnvelopeShape::Enveloped(vec![json!({"a": 1})])
        );
        assert_eq!(
            EnvelopeShape::detect(json!({"correcto": true, "respuesta": {"locales": [{"a": 1}]}})),
            EnvelopeShape::EnvelopedLocales(vec![json!({"a": 1})])
        );
        assert_eq!(
            EnvelopeShape::detect(json!({"respuesta": {"1": {"a": 1}, "2": {"a": 2}}})),
            EnvelopeShape::Enveloped(vec![json!({"a": 1}), json!({"a": 2})])
        );
    }

    #[test]
    fn unknown_shapes_are_reported() {
        assert!(matches!(
            EnvelopeShape::detect(json!({"data": []})),
            EnvelopeShape::Unknown(_)
        ));
        assert!(matches!(
            EnvelopeShape::detect(json!("hola")),
            EnvelopeShape::Unknown(_)
        ));
        assert!(matches!(
            EnvelopeShape::detect(json!({"respuesta": {"locales": "none"}})),
            EnvelopeShape::Unknown(_)
        ));
        assert!(matches!(
            list_items(json!({"respuesta": 3})),
            Err(AdapterError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn in_band_failures_are_rejected() {
        let err = list_items(json!({"correcto": false, "error": "Func no soportado"})).unwrap_err();
        match err {
            AdapterError::Rejected { message, .. } => assert_eq!(message, "Func no soportado"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn regions_are_mapped_and_deduplicated() {
        let items = vec![
            json!({"region_id": "7", "region_nombre": "Maule"}),
            json!({"region_id": 7, "region_nombre": "Maule"}),
            json!({"id": 13, "nombre": "Metropolitana"}),
            json!({"region_id": "x", "region_nombre": "Sin id"}),
        ];

        assert_eq!(
            regions_from_items(items),
            vec![
                Region { id: 7, nombre: "Maule".to_string() },
                Region { id: 13, nombre: "Metropolitana".to_string() },
            ]
        );
    }

    #[test]
    fn communes_are_slugged_and_deduplicated() {
        let items = vec![
            json!({"comuna_nombre": "San Javier"}),
            json!({"comuna_nombre": "Curicó"}),
            json!({"comuna_nombre": "San Javier"}),
            json!({"comuna_nombre": ""}),
        ];

        let communes = communes_from_items(items);

        assert_eq!(communes.len(), 2);
        assert_eq!(
            communes[0],
            Commune {
                id: "san-javier".to_string(),
                nombre: "San Javier".to_string()
            }
        );
        assert!(communes.iter().all(|c| !c.id.is_empty() && !c.nombre.is_empty()));
    }

    #[test]
    fn pharmacy_filters_ignore_case() {
        let records: Vec<PharmacyRecord> =
            locales().iter().filter_map(PharmacyRecord::from_upstream).collect();

        let by_commune = filter_pharmacies(records.clone(), Some("CURICÓ"), None);
        assert_eq!(by_commune.len(), 1);
        assert_eq!(by_commune[0].id, "1");

        let by_type = filter_pharmacies(records.clone(), None, Some("almacen"));
        assert_eq!(by_type.len(), 1);
        assert_eq!(by_type[0].id, "2");

        assert_eq!(filter_pharmacies(records, None, None).len(), 2);
    }
}
