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

//! Great-circle distance and proximity ordering.

use std::sync::LazyLock;

use regex::Regex;

const EARTH_RADIUS_KM: f64 = 6371.0;

static FLOAT_LIKE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-+]?\d+(?:[.,]\d+)?").expect("valid float regex"));

/// Anything that may carry a coordinate pair.
pub trait Located {
    fn coordinates(&self) -> Option<(f64, f64)>;
}

/// Haversine distance in kilometres.
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// Extract the first signed float-like number from an upstream coordinate.
///
/// Accepts `"-33,45"`, `" -33.45 S"` and similar. Returns `None` for
/// anything without digits or that does not produce a finite value.
pub fn parse_coordinate(raw: &str) -> Option<f64> {
    let found = FLOAT_LIKE_RE.find(raw)?;
    let value: f64 = found.as_str().replace(',', ".").parse().ok()?;
    value.is_finite().then_some(value)
}

/// Distance from the origin, `+inf` when the record has no usable coordinates.
pub fn distance_from<T: Located>(record: &T, origin_lat: f64, origin_lng: f64) -> f64 {
    match record.coordinates() {
        Some((lat, lng)) => haversine_km(origin_lat, origin_lng, lat, lng),
        None => f64::INFINITY,
    }
}

/// Stable ascending sort by distance; records without coordinates go last.
pub fn rank_by_proximity<T: Located>(
    records: Vec<T>,
    origin_lat: f64,
    origin_lng: f64,
) -> Vec<T> {
    let mut keyed: Vec<(f64, T)> = records
        .into_iter()
        .map(|record| (distance_from(&record, origin_lat, origin_lng), record))
        .collect();
    keyed.sort_by(|(a, _), (b, _)| a.total_cmp(b));
    keyed.into_iter().map(|(_, record)| record).collect()
}

/// Keep records within `degrees` of the origin on both axes.
pub fn within_box<T: Located>(
    records: Vec<T>,
    origin_lat: f64,
    origin_lng: f64,
    degrees: f64,
) -> Vec<T> {
    records
        .into_iter()
        .filter(|record| match record.coordinates() {
            Some((lat, lng)) => {
                (lat - origin_lat).abs() <= degrees && (lng - origin_lng).abs() <= degrees
            }
            None => false,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Point(&'static str, Option<(f64, f64)>);

    impl Located for Point {
        fn coordinates(&self) -> Option<(f64, f64)> {
            self.1
        }
    }

    #[test]
    fn haversine_matches_known_distance() {
        // Santiago to Valparaíso is roughly 100 km.
        let km = haversine_km(-33.4489, -70.6693, -33.0472, -71.6127);
        assert!((km - 98.0).abs() < 5.0, "got {km}");
        assert_eq!(haversine_km(-34.98, -71.24, -34.98, -71.24), 0.0);
    }

    #[test]
    fn coordinates_tolerate_locale_and_noise() {
        assert_eq!(parse_coordinate("-33.45"), Some(-33.45));
        assert_eq!(parse_coordinate("-33,45"), Some(-33.45));
        assert_eq!(parse_coordinate("  lat: -70.5 W"), Some(-70.5));
        assert_eq!(parse_coordinate("+12"), Some(12.0));
        assert_eq!(parse_coordinate(""), None);
        assert_eq!(parse_coordinate("sin datos"), None);
    }

    #[test]
    fn ranking_orders_by_distance_and_pushes_unknown_last() {
        let records = vec![
            Point("unknown", None),
            Point("far", Some((-35.42, -71.67))),
            Point("near", Some((-34.98, -71.24))),
        ];

        let ranked = rank_by_proximity(records, -34.98, -71.24);
        let names: Vec<_> = ranked.iter().map(|p| p.0).collect();

        assert_eq!(names, vec!["near", "far", "unknown"]);
    }

    #[test]
    fn ranking_is_stable_for_ties() {
        let records = vec![
            Point("a", Some((1.0, 1.0))),
            Point("x", None),
            Point("b", Some((1.0, 1.0))),
            Point("y", None),
            Point("c", Some((1.0, 1.0))),
        ];

        let ranked = rank_by_proximity(records, 0.0, 0.0);
        let names: Vec<_> = ranked.iter().map(|p| p.0).collect();

        assert_eq!(names, vec!["a", "b", "c", "x", "y"]);
    }

    #[test]
    fn ranked_output_is_non_decreasing() {
        let records: Vec<Point> = (0..20)
            .map(|i| Point("p", Some((f64::from(i * 7 % 13) - 6.0, f64::from(i * 11 % 17) - 8.0))))
            .collect();

        let ranked = rank_by_proximity(records, 0.5, -0.5);
        let distances: Vec<f64> = ranked.iter().map(|p| distance_from(p, 0.5, -0.5)).collect();

        assert!(distances.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn box_filter_drops_distant_and_unknown_records() {
        let records = vec![
            Point("inside", Some((-34.95, -71.20))),
            Point("outside", Some((-35.42, -71.67))),
            Point("unknown", None),
        ];

        let kept = within_box(records, -34.98, -71.24, 0.1);

        assert_eq!(kept, vec![Point("inside", Some((-34.95, -71.20)))]);
    }
}
