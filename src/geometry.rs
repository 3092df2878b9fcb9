use serde::{Deserialize, Serialize};

pub const EARTH_RADIUS_KM: f64 = 6371.0;
pub const KM_PER_DEGREE: f64 = 111.0;

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

pub fn haversine_km(a: Coordinate, b: Coordinate) -> f64 {
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let sin_dlat = (dlat / 2.0).sin();
    let sin_dlon = (dlon / 2.0).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// `lon` moved by a full turn when it lies more than 180 degrees from
/// `reference`.
pub fn unwrap_lon(lon: f64, reference: f64) -> f64 {
    if lon - reference > 180.0 {
        lon - 360.0
    } else if lon - reference < -180.0 {
        lon + 360.0
    } else {
        lon
    }
}

/// Brings an unwrapped longitude back into [-180, 180].
pub fn normalize_lon(lon: f64) -> f64 {
    if lon > 180.0 {
        lon - 360.0
    } else if lon < -180.0 {
        lon + 360.0
    } else {
        lon
    }
}

/// Arithmetic mean of `coords`, or `None` for an empty slice.
pub fn centroid(coords: &[Coordinate]) -> Option<Coordinate> {
    let reference = coords.first()?.lon;
    let mut sum_lat = 0.0;
    let mut sum_lon = 0.0;
    for coord in coords {
        sum_lat += coord.lat;
        sum_lon += unwrap_lon(coord.lon, reference);
    }
    let count = coords.len() as f64;
    Some(Coordinate::new(sum_lat / count, normalize_lon(sum_lon / count)))
}

/// Mean of two points weighted by how many segments each one stands for.
pub fn weighted_midpoint(a: Coordinate, a_weight: usize, b: Coordinate, b_weight: usize) -> Coordinate {
    let total = (a_weight + b_weight) as f64;
    if total == 0.0 {
        return a;
    }
    let wa = a_weight as f64 / total;
    let wb = b_weight as f64 / total;
    let b_lon = unwrap_lon(b.lon, a.lon);
    Coordinate::new(a.lat * wa + b.lat * wb, normalize_lon(a.lon * wa + b_lon * wb))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_one_degree_of_latitude() {
        let d = haversine_km(Coordinate::new(0.0, 0.0), Coordinate::new(1.0, 0.0));
        assert!((d - 111.19).abs() < 0.01, "got {d}");
    }

    #[test]
    fn haversine_is_symmetric_and_zero_on_identity() {
        let a = Coordinate::new(52.52, 13.405);
        let b = Coordinate::new(48.137, 11.575);
        assert_eq!(haversine_km(a, a), 0.0);
        assert!((haversine_km(a, b) - haversine_km(b, a)).abs() < 1e-9);
    }

    #[test]
    fn centroid_of_square_corners() {
        let coords = vec![
            Coordinate::new(0.0, 0.0),
            Coordinate::new(0.0, 2.0),
            Coordinate::new(2.0, 2.0),
            Coordinate::new(2.0, 0.0),
        ];
        let c = centroid(&coords).unwrap();
        assert!((c.lat - 1.0).abs() < 1e-9);
        assert!((c.lon - 1.0).abs() < 1e-9);
        assert!(centroid(&[]).is_none());
    }

    #[test]
    fn means_stay_near_the_antimeridian() {
        let c = centroid(&[Coordinate::new(51.8, 179.999), Coordinate::new(51.8, -179.999)]).unwrap();
        assert!(c.lon.abs() > 179.99, "got {}", c.lon);

        let m = weighted_midpoint(Coordinate::new(0.0, -179.998), 1, Coordinate::new(0.0, 179.998), 3);
        assert!((m.lon - 179.999).abs() < 1e-9, "got {}", m.lon);
    }

    #[test]
    fn weighted_midpoint_leans_to_heavier_side() {
        let m = weighted_midpoint(Coordinate::new(0.0, 0.0), 3, Coordinate::new(4.0, 0.0), 1);
        assert!((m.lat - 1.0).abs() < 1e-9);
    }
}
