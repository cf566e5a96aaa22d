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

//! Recovery of structured JSON from upstream bodies of uncertain encoding.
//!
//! Farmanet answers with JSON, JSON wrapped in HTML, JSON encoded twice,
//! latin1 text and locale formatted decimals, all under the same content
//! type. [`normalize`] runs an ordered chain of pure parsers over the raw
//! bytes and stops at the first one that yields a value. When every parser
//! gives up the caller still gets a bounded preview for diagnostics.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// Maximum number of characters kept in a diagnostic preview.
pub const PREVIEW_LIMIT: usize = 2000;

/// Largest number of bracketed substrings tried by the extraction step.
const MAX_EXTRACT_CANDIDATES: usize = 16;

/// Nested string encodings unwrapped before giving up.
const MAX_UNWRAP_DEPTH: usize = 3;

static QUOTED_DECIMAL_COMMA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"("[^"\\]*"\s*:\s*")(-?\d+),(\d+)(")"#).expect("valid quoted decimal regex")
});
static BARE_COORDINATE_COMMA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"("(?:lat|lng|lon|lt|lg|local_lat|local_lng|latitud|longitud)"\s*:\s*)(-?\d+),(\d+)"#,
    )
    .expect("valid bare coordinate regex")
});
static QUOTED_JSON_LITERAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""[\{\[](?:[^"\\]|\\.)*[\}\]]""#).expect("valid quoted literal regex")
});

/// The parser that produced a [`NormalizedResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Direct,
    Sanitized,
    Extracted,
    DecimalComma,
    Latin1,
    QuotedLiteral,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Direct => "direct",
            Strategy::Sanitized => "sanitized",
            Strategy::Extracted => "extracted",
            Strategy::DecimalComma => "decimal_comma",
            Strategy::Latin1 => "latin1",
            Strategy::QuotedLiteral => "quoted_literal",
        }
    }
}

/// Outcome of normalizing one upstream body.
///
/// `data` is either a fully parsed JSON value or absent; partial parses never
/// leak out of this module.
#[derive(Debug, Clone)]
pub struct NormalizedResult {
    pub data: Option<Value>,
    pub preview: String,
    pub strategy: Option<Strategy>,
}

impl NormalizedResult {
    pub fn is_structured(&self) -> bool {
        self.data.is_some()
    }
}

type Parser = fn(&[u8]) -> Option<Value>;

/// Parsers in the order they are attempted.
const CHAIN: &[(Strategy, Parser)] = &[
    (Strategy::Direct, parse_direct),
    (Strategy::Sanitized, parse_sanitized),
    (Strategy::Extracted, parse_extracted),
    (Strategy::DecimalComma, parse_decimal_comma),
    (Strategy::Latin1, parse_latin1),
    (Strategy::QuotedLiteral, parse_quoted_literal),
];

/// Turn a raw upstream body into JSON when at all possible.
pub fn normalize(body: &[u8]) -> NormalizedResult {
    let preview = preview(body);

    for (strategy, parser) in CHAIN {
        if let Some(data) = parser(body) {
            if *strategy != Strategy::Direct {
                tracing::debug!(strategy = strategy.as_str(), "recovered upstream payload");
            }
            return NormalizedResult {
                data: Some(data),
                preview,
                strategy: Some(*strategy),
            };
        }
    }

    NormalizedResult {
        data: None,
        preview,
        strategy: None,
    }
}

/// Bounded, human readable rendering of a body.
///
/// Uses UTF-8 when the leading bytes are valid UTF-8 and latin1 otherwise.
pub fn preview(body: &[u8]) -> String {
    let prefix = &body[..body.len().min(PREVIEW_LIMIT * 4)];
    let text = match std::str::from_utf8(prefix) {
        Ok(text) => text.to_string(),
        // Cut in the middle of a multi-byte sequence.
        Err(err) if err.error_len().is_none() => {
            String::from_utf8_lossy(&prefix[..err.valid_up_to()]).into_owned()
        }
        Err(_) => decode_latin1(&prefix[..prefix.len().min(PREVIEW_LIMIT)]),
    };
    truncate_chars(&text, PREVIEW_LIMIT)
}

pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}

/// ISO-8859-1 maps every byte onto the code point of the same value.
pub fn decode_latin1(body: &[u8]) -> String {
    body.iter().map(|&byte| char::from(byte)).collect()
}

fn parse_direct(body: &[u8]) -> Option<Value> {
    std::str::from_utf8(body).ok().and_then(parse_unwrapping)
}

fn parse_sanitized(body: &[u8]) -> Option<Value> {
    let text = std::str::from_utf8(body).ok()?;
    let clean = sanitize(text);
    if clean.len() == text.len() {
        return None;
    }
    parse_unwrapping(&clean)
}

fn parse_extracted(body: &[u8]) -> Option<Value> {
    let text = std::str::from_utf8(body).ok()?;
    extract_and_parse(&sanitize(text))
}

fn parse_decimal_comma(body: &[u8]) -> Option<Value> {
    let text = std::str::from_utf8(body).ok()?;
    parse_with_decimal_points(&sanitize(text))
}

fn parse_latin1(body: &[u8]) -> Option<Value> {
    if std::str::from_utf8(body).is_ok() {
        return None;
    }

    let text = decode_latin1(body);
    parse_unwrapping(&text).or_else(|| {
        let clean = sanitize(&text);
        parse_unwrapping(&clean)
            .or_else(|| extract_and_parse(&clean))
            .or_else(|| parse_with_decimal_points(&clean))
    })
}

fn parse_quoted_literal(body: &[u8]) -> Option<Value> {
    let text = match std::str::from_utf8(body) {
        Ok(text) => text.to_string(),
        Err(_) => decode_latin1(body),
    };

    QUOTED_JSON_LITERAL_RE.find_iter(&text).find_map(|literal| {
        let unescaped: String = serde_json::from_str(literal.as_str()).ok()?;
        parse_unwrapping(&unescaped).filter(is_container)
    })
}

/// Parse `text`, then peel off string layers that themselves hold JSON.
fn parse_unwrapping(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut value: Value = serde_json::from_str(trimmed).ok()?;
    for _ in 0..MAX_UNWRAP_DEPTH {
        let Value::String(inner) = &value else {
            break;
        };
        match serde_json::from_str::<Value>(inner.trim()) {
            Ok(nested) if is_container(&nested) || nested.is_string() => value = nested,
            _ => break,
        }
    }

    Some(value)
}

fn is_container(value: &Value) -> bool {
    value.is_object() || value.is_array()
}

/// Drop the byte order mark and control characters other than whitespace.
fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|c| *c != '\u{feff}' && (!c.is_control() || matches!(c, '\t' | '\n' | '\r')))
        .collect()
}

fn extract_and_parse(text: &str) -> Option<Value> {
    let mut spans = balanced_spans(text);
    spans.sort_by_key(|span| std::cmp::Reverse(span.len()));
    spans
        .into_iter()
        .take(MAX_EXTRACT_CANDIDATES)
        .find_map(parse_unwrapping)
}

/// Outermost balanced `{...}` or `[...]` substrings.
///
/// Spans nested inside another span are never candidates: when the outer
/// document fails to parse, a fragment of it must not stand in for the
/// whole. Quotes are only tracked inside a bracket so markup around the
/// payload cannot desynchronise the scan. A mismatched closer abandons the
/// open candidates.
fn balanced_spans(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut open: Vec<(usize, char)> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' if !open.is_empty() => in_string = true,
            '{' => open.push((idx, '}')),
            '[' => open.push((idx, ']')),
            '}' | ']' => match open.last() {
                Some(&(start, closer)) if closer == ch => {
                    open.pop();
                    if open.is_empty() {
                        spans.push(&text[start..=idx]);
                    }
                }
                Some(_) => open.clear(),
                None => {}
            },
            _ => {}
        }
    }

    spans
}

fn parse_with_decimal_points(text: &str) -> Option<Value> {
    let rewritten = normalize_decimal_commas(text);
    if rewritten == text {
        return None;
    }
    parse_unwrapping(&rewritten).or_else(|| extract_and_parse(&rewritten))
}

/// Rewrite `"12,34"` style decimals into `"12.34"`.
///
/// Quoted values are rewritten for any key; unquoted values only for
/// coordinate keys, where a bare comma would otherwise break the document.
pub fn normalize_decimal_commas(text: &str) -> String {
    let quoted = QUOTED_DECIMAL_COMMA_RE.replace_all(text, "${1}${2}.${3}${4}");
    BARE_COORDINATE_COMMA_RE
        .replace_all(&quoted, "${1}${2}.${3}")
        .into_owned()
}
