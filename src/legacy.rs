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

//! Drop-in replacement for the upstream `mapa.php` form endpoint.
//!
//! Older map clients post the same form they used to send to Farmanet. The
//! form is validated, reduced to known fields and forwarded; the reply keeps
//! the upstream `{correcto, respuesta}` envelope.

use std::collections::BTreeMap;

use axum::extract::rejection::FormRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use serde_json::{json, Value};

use crate::adapter::AdapterError;
use crate::api::AppState;
use crate::error::FieldError;
use crate::model::{LegacyForm, Operation};
use crate::validate;

/// `{correcto: false, error}` with a status.
#[derive(Debug)]
pub struct LegacyError {
    status: StatusCode,
    message: String,
}

impl LegacyError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn bad_gateway(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: message.into(),
        }
    }
}

impl From<FieldError> for LegacyError {
    fn from(error: FieldError) -> Self {
        Self::bad_request(error.msg)
    }
}

impl From<AdapterError> for LegacyError {
    fn from(error: AdapterError) -> Self {
        match error {
            AdapterError::Unsupported(_) => Self::bad_request("Func no soportado"),
            AdapterError::Unreachable(_) => Self::bad_gateway("External API error"),
            AdapterError::Malformed { .. }
            | AdapterError::ShapeMismatch { .. }
            | AdapterError::Rejected { .. } => Self::bad_gateway("Invalid data from API"),
        }
    }
}

impl IntoResponse for LegacyError {
    fn into_response(self) -> Response {
        let body = json!({ "correcto": false, "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

pub async fn handle_mapa(
    State(state): State<AppState>,
    form: Result<Form<LegacyForm>, FormRejection>,
) -> Result<Json<Value>, LegacyError> {
    let Form(form) = form.map_err(|rejection| LegacyError::bad_request(rejection.body_text()))?;

    let func = form.func.as_deref().unwrap_or_default().trim().to_string();
    let Some(operation) = Operation::from_func(&func) else {
        tracing::debug!(%func, "legacy func rejected");
        return Err(LegacyError::bad_request("Func no soportado"));
    };

    let parameters = legacy_parameters(operation, &form)?;
    let value = state.adapter.forward(operation.func(), parameters).await?;

    Ok(Json(into_envelope(value)))
}

/// Validated subset of the form, keyed by upstream parameter name.
fn legacy_parameters(
    operation: Operation,
    form: &LegacyForm,
) -> Result<BTreeMap<String, String>, LegacyError> {
    let mut parameters = BTreeMap::new();

    let needs_region = matches!(
        operation,
        Operation::Communes | Operation::PharmaciesByRegion
    );
    if needs_region || is_filled(&form.region) {
        let region = validate::region(form.region.as_deref())?;
        parameters.insert("region".to_string(), region.to_string());
    }

    if operation == Operation::PharmacyDetail || is_filled(&form.im) {
        let im = validate::pharmacy_id("im", form.im.as_deref())?;
        parameters.insert("im".to_string(), im);
    }

    if let Some(fecha) = validate::fecha(form.fecha.as_deref())? {
        parameters.insert("fecha".to_string(), fecha);
    }
    if let Some(hora) = validate::hora(form.hora.as_deref())? {
        parameters.insert("hora".to_string(), hora);
    }

    for (name, raw) in [("comuna", &form.comuna), ("filtro", &form.filtro)] {
        if let Some(text) = validate::sanitize_text(raw.as_deref()) {
            parameters.insert(name.to_string(), text);
        }
    }

    let latitudes = [("lat", &form.lat), ("latMin", &form.lat_min), ("latMax", &form.lat_max)];
    for (name, raw) in latitudes {
        if let Some(value) = validate::latitude(name, raw.as_deref())? {
            parameters.insert(name.to_string(), value.to_string());
        }
    }
    let longitudes = [("lng", &form.lng), ("lngMin", &form.lng_min), ("lngMax", &form.lng_max)];
    for (name, raw) in longitudes {
        if let Some(value) = validate::longitude(name, raw.as_deref())? {
            parameters.insert(name.to_string(), value.to_string());
        }
    }

    Ok(parameters)
}

fn is_filled(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|v| !v.trim().is_empty())
}

fn into_envelope(value: Value) -> Value {
    if value.get("correcto").is_some() {
        value
    } else {
        json!({ "correcto": true, "respuesta": value })
    }
}
