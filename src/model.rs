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

//! Wire types for the public API and the Farmanet protocol.
//!
//! Upstream field names drift between response variants (`local_lat`, `lat`,
//! `lt`, ...). [`PharmacyRecord`] is the stable public shape they all map to.

use std::collections::BTreeMap;
use std::fmt;

use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::geo::{self, Located};

/// Operations the upstream `func` parameter may select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Regions,
    Communes,
    PharmaciesByRegion,
    PharmacyDetail,
    Sector,
    Dates,
    Icons,
}

impl Operation {
    /// Every operation that may be forwarded upstream.
    pub const ALL: [Operation; 7] = [
        Operation::Regions,
        Operation::Communes,
        Operation::PharmaciesByRegion,
        Operation::PharmacyDetail,
        Operation::Sector,
        Operation::Dates,
        Operation::Icons,
    ];

    pub fn func(&self) -> &'static str {
        match self {
            Operation::Regions => "regiones",
            Operation::Communes => "comunas",
            Operation::PharmaciesByRegion => "region",
            Operation::PharmacyDetail => "local",
            Operation::Sector => "sector",
            Operation::Dates => "fechas",
            Operation::Icons => "iconos",
        }
    }

    /// Resolve a `func` value against the whitelist.
    pub fn from_func(func: &str) -> Option<Self> {
        let func = func.trim();
        Self::ALL.into_iter().find(|op| op.func().eq_ignore_ascii_case(func))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.func())
    }
}

/// One upstream call: the operation plus its form parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamQuery {
    operation: Operation,
    parameters: BTreeMap<String, String>,
}

impl UpstreamQuery {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            parameters: BTreeMap::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Form body as sent upstream, `func` first.
    pub fn form(&self) -> Vec<(&str, &str)> {
        std::iter::once(("func", self.operation.func()))
            .chain(
                self.parameters
                    .iter()
                    .filter(|(key, _)| key.as_str() != "func")
                    .map(|(key, value)| (key.as_str(), value.as_str())),
            )
            .collect()
    }
}

/// Undecoded upstream answer.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub id: u32,
    pub nombre: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commune {
    pub id: String,
    pub nombre: String,
}

impl Commune {
    pub fn from_name(nombre: impl Into<String>) -> Self {
        let nombre = nombre.into();
        Self {
            id: slug(&nombre),
            nombre,
        }
    }
}

/// Lower-case, spaces to dashes, as the public API has always produced.
pub fn slug(name: &str) -> String {
    name.trim()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase()
}

/// Public pharmacy shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PharmacyRecord {
    pub id: String,
    pub name: String,
    pub commune: String,
    pub address: String,
    pub phone: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    #[serde(rename = "type")]
    pub kind: String,
    pub open_hour: String,
    pub close_hour: String,
    pub date: String,
}

const ID_KEYS: &[&str] = &["local_id", "im", "id"];
const NAME_KEYS: &[&str] = &["local_nombre", "nm", "nombre"];
const COMMUNE_KEYS: &[&str] = &["comuna_nombre", "cm", "comuna"];
const ADDRESS_KEYS: &[&str] = &["local_direccion", "dr", "direccion"];
const PHONE_KEYS: &[&str] = &["local_telefono", "tl", "telefono"];
const LAT_KEYS: &[&str] = &["local_lat", "lat", "lt"];
const LNG_KEYS: &[&str] = &["local_lng", "lng", "lg"];
const KIND_KEYS: &[&str] = &["local_tipo", "tp", "tipo"];
const OPEN_KEYS: &[&str] = &["funcionamiento_hora_apertura", "hora_apertura", "ha"];
const CLOSE_KEYS: &[&str] = &["funcionamiento_hora_cierre", "hora_cierre", "hc"];
const DATE_KEYS: &[&str] = &["fecha", "fc"];

impl PharmacyRecord {
    /// Map one upstream item onto the public shape.
    ///
    /// Returns `None` when the item is not an object.
    pub fn from_upstream(item: &Value) -> Option<Self> {
        let fields = item.as_object()?;
        Some(Self {
            id: text_field(fields, ID_KEYS),
            name: text_field(fields, NAME_KEYS),
            commune: text_field(fields, COMMUNE_KEYS),
            address: text_field(fields, ADDRESS_KEYS),
            phone: text_field(fields, PHONE_KEYS),
            lat: coordinate_field(fields, LAT_KEYS),
            lng: coordinate_field(fields, LNG_KEYS),
            kind: text_field(fields, KIND_KEYS),
            open_hour: text_field(fields, OPEN_KEYS),
            close_hour: text_field(fields, CLOSE_KEYS),
            date: text_field(fields, DATE_KEYS),
        })
    }
}

impl Located for PharmacyRecord {
    fn coordinates(&self) -> Option<(f64, f64)> {
        Some((self.lat?, self.lng?))
    }
}

/// First non-empty value among `keys`, rendered as text.
pub(crate) fn text_field(fields: &Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|key| fields.get(*key))
        .find_map(|value| match value {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_default()
}

fn coordinate_field(fields: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .filter_map(|key| fields.get(*key))
        .find_map(|value| match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => geo::parse_coordinate(s),
            _ => None,
        })
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommunesQuery {
    pub region: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PharmaciesQuery {
    pub region: Option<String>,
    pub comuna: Option<String>,
    pub tipo: Option<String>,
    pub lat: Option<String>,
    pub lng: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DetailQuery {
    pub fecha: Option<String>,
}

/// Form accepted by the legacy `mapa.php` endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyForm {
    pub func: Option<String>,
    pub region: Option<String>,
    pub comuna: Option<String>,
    pub fecha: Option<String>,
    pub hora: Option<String>,
    pub im: Option<String>,
    pub filtro: Option<String>,
    pub lat: Option<String>,
    pub lng: Option<String>,
    #[serde(rename = "latMin")]
    pub lat_min: Option<String>,
    #[serde(rename = "latMax")]
    pub lat_max: Option<String>,
    #[serde(rename = "lngMin")]
    pub lng_min: Option<String>,
    #[serde(rename = "lngMax")]
    pub lng_max: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub cache: CacheMetricsSnapshot,
    pub remote: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn whitelist_resolves_known_funcs_only() {
        assert_eq!(Operation::from_func("regiones"), Some(Operation::Regions));
        assert_eq!(Operation::from_func(" LOCAL "), Some(Operation::PharmacyDetail));
        assert_eq!(Operation::from_func("unsupported"), None);
        assert_eq!(Operation::from_func(""), None);
    }

    #[test]
    fn form_puts_func_first_and_ignores_overrides() {
        let query = UpstreamQuery::new(Operation::Communes)
            .param("region", "7")
            .param("func", "attack");

        assert_eq!(query.form(), vec![("func", "comunas"), ("region", "7")]);
    }

    #[test]
    fn slug_lowercases_and_dashes() {
        assert_eq!(slug("San Pedro de la Paz"), "san-pedro-de-la-paz");
        assert_eq!(slug("  Curicó "), "curicó");
    }

    #[test]
    fn pharmacy_record_maps_long_field_names() {
        let item = json!({
            "local_id": "1",
            "local_nombre": "Farmacia Uno",
            "comuna_nombre": "Curicó",
            "local_direccion": "Calle 1",
            "local_telefono": "123",
            "local_lat": "-34.98",
            "local_lng": "-71.24",
            "local_tipo": "Farmacia",
            "funcionamiento_hora_apertura": "09:00",
            "funcionamiento_hora_cierre": "21:00",
            "fecha": "2025-10-08"
        });

        let record = PharmacyRecord::from_upstream(&item).unwrap();

        assert_eq!(record.id, "1");
        assert_eq!(record.commune, "Curicó");
        assert_eq!(record.lat, Some(-34.98));
        assert_eq!(record.lng, Some(-71.24));
        assert_eq!(record.kind, "Farmacia");
        assert_eq!(record.open_hour, "09:00");
    }

    #[test]
    fn pharmacy_record_maps_short_field_names() {
        let item = json!({
            "im": 4501,
            "nm": "Cruz Verde",
            "cm": "Talca",
            "lt": "-35,42",
            "lg": -71.67,
            "tp": "2"
        });

        let record = PharmacyRecord::from_upstream(&item).unwrap();

        assert_eq!(record.id, "4501");
        assert_eq!(record.name, "Cruz Verde");
        assert_eq!(record.lat, Some(-35.42));
        assert_eq!(record.lng, Some(-71.67));
        assert_eq!(record.address, "");
    }

    #[test]
    fn pharmacy_record_without_coordinates_is_not_located() {
        let record =
            PharmacyRecord::from_upstream(&json!({"im": "1", "lt": "", "lg": "x"})).unwrap();
        assert_eq!(record.coordinates(), None);
        assert!(PharmacyRecord::from_upstream(&json!("1")).is_none());
    }

    #[test]
    fn pharmacy_record_serializes_public_names() {
        let record = PharmacyRecord::from_upstream(&json!({"im": "1", "tp": "Farmacia"})).unwrap();
        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(value["type"], "Farmacia");
        assert!(value.get("openHour").is_some());
        assert!(value["lat"].is_null());
    }
}
