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

//! Input checks shared by the REST and legacy endpoints.

use chrono::{NaiveDate, NaiveTime};

use crate::error::FieldError;

pub const MIN_REGION: u8 = 1;
pub const MAX_REGION: u8 = 16;

const STRIPPED_CHARS: &[char] = &['<', '>', '"', '\'', '`', ';', '(', ')', '{', '}'];
const MAX_ID_LEN: usize = 32;

fn present(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|v| !v.is_empty())
}

/// Required region number between 1 and 16.
pub fn region(raw: Option<&str>) -> Result<u8, FieldError> {
    let invalid = || FieldError::query("region", "Invalid region", raw);
    let value: u8 = present(raw).ok_or_else(invalid)?.parse().map_err(|_| invalid())?;
    if (MIN_REGION..=MAX_REGION).contains(&value) {
        Ok(value)
    } else {
        Err(invalid())
    }
}

fn bounded_float(param: &str, raw: Option<&str>, limit: f64) -> Result<Option<f64>, FieldError> {
    let Some(text) = present(raw) else {
        return Ok(None);
    };
    match text.parse::<f64>() {
        Ok(value) if value.is_finite() && value.abs() <= limit => Ok(Some(value)),
        _ => Err(FieldError::query(param, &format!("Invalid {param}"), raw)),
    }
}

pub fn latitude(param: &str, raw: Option<&str>) -> Result<Option<f64>, FieldError> {
    bounded_float(param, raw, 90.0)
}

pub fn longitude(param: &str, raw: Option<&str>) -> Result<Option<f64>, FieldError> {
    bounded_float(param, raw, 180.0)
}

/// Trim free text and drop markup and script characters; empty becomes `None`.
pub fn sanitize_text(raw: Option<&str>) -> Option<String> {
    let cleaned: String = raw?.chars().filter(|c| !STRIPPED_CHARS.contains(c)).collect();
    let cleaned = cleaned.trim();
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

/// Optional `YYYY-MM-DD` date. `0` is the legacy form's "no date".
pub fn fecha(raw: Option<&str>) -> Result<Option<String>, FieldError> {
    match present(raw) {
        None | Some("0") => Ok(None),
        Some(text) => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .map(|date| Some(date.format("%Y-%m-%d").to_string()))
            .map_err(|_| FieldError::query("fecha", "Invalid fecha, expected YYYY-MM-DD", raw)),
    }
}

/// Optional `HH:MM` time.
pub fn hora(raw: Option<&str>) -> Result<Option<String>, FieldError> {
    match present(raw) {
        None => Ok(None),
        Some(text) => NaiveTime::parse_from_str(text, "%H:%M")
            .map(|time| Some(time.format("%H:%M").to_string()))
            .map_err(|_| FieldError::query("hora", "Invalid hora, expected HH:MM", raw)),
    }
}

/// Upstream pharmacy identifier: short and alphanumeric.
pub fn pharmacy_id(param: &str, raw: Option<&str>) -> Result<String, FieldError> {
    let invalid = || FieldError::query(param, "Invalid pharmacy id", raw);
    let text = present(raw).ok_or_else(invalid)?;
    let valid = text.len() <= MAX_ID_LEN
        && text.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(text.to_string())
    } else {
        Err(invalid())
    }
}
