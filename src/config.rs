//! Extraction settings shared by every pass.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::error::{Error, Result};

pub const DEFAULT_DISTANCE_THRESHOLD_KM: f64 = 0.2;

/// Main road classes from <https://wiki.openstreetmap.org/wiki/Key:highway>.
pub const DEFAULT_ROAD_CLASSES: [&str; 13] = [
    "motorway",
    "motorway_link",
    "trunk",
    "trunk_link",
    "primary",
    "primary_link",
    "secondary",
    "secondary_link",
    "tertiary",
    "tertiary_link",
    "unclassified",
    "residential",
    "living_street",
];

#[derive(Clone, Debug, Serialize)]
pub struct ExtractConfig {
    /// Components whose centroids lie within this distance are merged.
    /// Zero disables the spatial merge.
    pub distance_threshold_km: f64,
    /// Accepted values of the `highway` tag.
    pub road_classes: BTreeSet<String>,
    /// Size of the partition worker pool; `None` uses one worker per CPU.
    #[serde(skip)]
    pub workers: Option<usize>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            distance_threshold_km: DEFAULT_DISTANCE_THRESHOLD_KM,
            road_classes: DEFAULT_ROAD_CLASSES
                .iter()
                .map(|class| class.to_string())
                .collect(),
            workers: None,
        }
    }
}

impl ExtractConfig {
    pub fn with_threshold(mut self, distance_threshold_km: f64) -> Self {
        self.distance_threshold_km = distance_threshold_km;
        self
    }

    pub fn with_road_classes<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.road_classes = classes.into_iter().map(Into::into).collect();
        self
    }

    pub fn accepts(&self, road_class: &str) -> bool {
        self.road_classes.contains(road_class)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.distance_threshold_km.is_finite() || self.distance_threshold_km < 0.0 {
            return Err(Error::Config(format!(
                "distance threshold must be a non-negative number of km, got {}",
                self.distance_threshold_km
            )));
        }
        if self.road_classes.is_empty() {
            return Err(Error::Config("accepted road class set is empty".into()));
        }
        if self.road_classes.iter().any(|class| class.trim().is_empty()) {
            return Err(Error::Config("road classes must not be blank".into()));
        }
        if self.workers == Some(0) {
            return Err(Error::Config("worker count must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ExtractConfig::default();
        config.validate().unwrap();
        assert!(config.accepts("residential"));
        assert!(!config.accepts("footway"));
        assert!(!config.accepts("service"));
    }

    #[test]
    fn rejects_negative_threshold() {
        let err = ExtractConfig::default()
            .with_threshold(-0.1)
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = ExtractConfig::default()
            .with_threshold(f64::NAN)
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_empty_road_classes() {
        let err = ExtractConfig::default()
            .with_road_classes(Vec::<String>::new())
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_zero_workers() {
        let config = ExtractConfig {
            workers: Some(0),
            ..ExtractConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn zero_threshold_is_allowed() {
        ExtractConfig::default().with_threshold(0.0).validate().unwrap();
    }
}
