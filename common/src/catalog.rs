//! The static location catalog.
//!
//! 500 cities embedded at compile time. The catalog is the unit of work for
//! one cycle: every entry is enqueued exactly once per minute.

use crate::model::Location;
use errors::{Error, ErrorKind};
use once_cell::sync::Lazy;

static CATALOG_JSON: &str = include_str!("../assets/locations.json");

static CATALOG: Lazy<Result<Vec<Location>, serde_json::Error>> =
    Lazy::new(|| serde_json::from_str(CATALOG_JSON));

/// Parses and returns the embedded catalog. Called once at startup; a
/// catalog that fails to parse is a fatal configuration error, reported
/// the same way as any other startup failure.
pub fn load() -> errors::Result<&'static [Location]> {
    match CATALOG.as_ref() {
        Ok(locations) => Ok(locations),
        Err(e) => Err(Error::with_message(
            ErrorKind::Config,
            format!("embedded location catalog failed to parse: {e}"),
            None::<errors::BoxError>,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_size() {
        assert_eq!(load().unwrap().len(), 500);
    }

    #[test]
    fn test_city_names_unique() {
        let locations = load().unwrap();
        let names: HashSet<&str> = locations.iter().map(|l| l.city_name.as_str()).collect();
        assert_eq!(names.len(), locations.len());
    }

    #[test]
    fn test_coordinates_in_range() {
        for loc in load().unwrap() {
            assert!(
                (-90.0..=90.0).contains(&loc.latitude),
                "{} latitude out of range",
                loc.city_name
            );
            assert!(
                (-180.0..=180.0).contains(&loc.longitude),
                "{} longitude out of range",
                loc.city_name
            );
            assert!(!loc.city_name.is_empty());
        }
    }
}
