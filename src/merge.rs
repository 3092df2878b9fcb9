//! Spatial merge of disconnected components that carry the same street name.

use std::collections::HashMap;

use log::debug;

use crate::geometry::{haversine_km, normalize_lon, unwrap_lon, weighted_midpoint, Coordinate, KM_PER_DEGREE};
use crate::grouping::{Component, UnionFind};

/// Smallest grid cell, in degrees; keeps cell coordinates inside `i32`.
const MIN_CELL_SIZE_DEG: f64 = 1e-4;

/// Uniform lat/lon grid over a fixed set of points. Buckets hold indices
/// into `points`.
pub struct GridIndex {
    points: Vec<Coordinate>,
    grid: HashMap<(i32, i32), Vec<usize>>,
    cell_size_deg: f64,
}

impl GridIndex {
    pub fn new(points: Vec<Coordinate>, cell_size_deg: f64) -> Self {
        let cell_size_deg = cell_size_deg.max(MIN_CELL_SIZE_DEG);
        let mut grid: HashMap<(i32, i32), Vec<usize>> = HashMap::new();
        for (idx, point) in points.iter().enumerate() {
            let cell = Self::cell_for(*point, cell_size_deg);
            grid.entry(cell).or_default().push(idx);
        }
        Self {
            points,
            grid,
            cell_size_deg,
        }
    }

    /// Grid whose cells are about `radius_km` tall.
    pub fn for_radius(points: Vec<Coordinate>, radius_km: f64) -> Self {
        Self::new(points, radius_km / KM_PER_DEGREE)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn point(&self, idx: usize) -> Coordinate {
        self.points[idx]
    }

    /// Indices of every point within `radius_km` of `point`, ascending.
    pub fn within(&self, point: Coordinate, radius_km: f64) -> Vec<usize> {
        let cos_lat = point.lat.to_radians().cos().abs();
        // pad the box slightly; haversine decides membership
        let delta_lat = radius_km / KM_PER_DEGREE * 1.01;
        let delta_lon = if cos_lat < 1e-6 {
            180.0
        } else {
            (radius_km / (KM_PER_DEGREE * cos_lat) * 1.01).min(180.0)
        };

        let mut found = Vec::new();
        for (west, east) in lon_spans(point.lon - delta_lon, point.lon + delta_lon) {
            let min_cell = Self::cell_for(
                Coordinate::new(point.lat - delta_lat, west),
                self.cell_size_deg,
            );
            let max_cell = Self::cell_for(
                Coordinate::new(point.lat + delta_lat, east),
                self.cell_size_deg,
            );
            for x in min_cell.0..=max_cell.0 {
                for y in min_cell.1..=max_cell.1 {
                    let Some(bucket) = self.grid.get(&(x, y)) else {
                        continue;
                    };
                    for &idx in bucket {
                        if haversine_km(point, self.points[idx]) <= radius_km {
                            found.push(idx);
                        }
                    }
                }
            }
        }
        found.sort_unstable();
        found.dedup();
        found
    }

    fn cell_for(coord: Coordinate, cell_size_deg: f64) -> (i32, i32) {
        let x = (coord.lon / cell_size_deg).floor() as i32;
        let y = (coord.lat / cell_size_deg).floor() as i32;
        (x, y)
    }
}

/// Splits a longitude span that runs past the antimeridian into spans inside
/// [-180, 180].
fn lon_spans(west: f64, east: f64) -> Vec<(f64, f64)> {
    let mut spans = vec![(west.max(-180.0), east.min(180.0))];
    if west < -180.0 {
        spans.push((west + 360.0, 180.0));
    }
    if east > 180.0 {
        spans.push((-180.0, east - 360.0));
    }
    spans
}

/// Components of one partition that were merged by proximity.
#[derive(Clone, Debug, PartialEq)]
pub struct MergedGroup {
    /// Lowest component id in the group.
    pub id: usize,
    /// Ordered by component id.
    pub components: Vec<Component>,
    /// Segment-weighted mean of the component centroids.
    pub centroid: Coordinate,
}

impl MergedGroup {
    fn from_components(components: Vec<Component>) -> Self {
        let total = components
            .iter()
            .map(Component::segment_count)
            .sum::<usize>()
            .max(1) as f64;
        let reference = components[0].centroid.lon;
        let mut lat = 0.0;
        let mut lon = 0.0;
        for component in &components {
            let weight = component.segment_count() as f64 / total;
            lat += component.centroid.lat * weight;
            lon += unwrap_lon(component.centroid.lon, reference) * weight;
        }
        Self {
            id: components[0].id,
            centroid: Coordinate::new(lat, normalize_lon(lon)),
            components,
        }
    }

    pub fn segment_count(&self) -> usize {
        self.components.iter().map(Component::segment_count).sum()
    }

    /// Global indices of every contributing segment, ascending.
    pub fn segments(&self) -> Vec<usize> {
        let mut segments: Vec<usize> = self
            .components
            .iter()
            .flat_map(|component| component.segments.iter().copied())
            .collect();
        segments.sort_unstable();
        segments
    }
}

/// Merges components whose centroids lie within `distance_threshold_km`.
///
/// Each pass snapshots the centroids of the current groups into a fresh grid
/// and unions every snapshot pair within the threshold, so one pass closes
/// the proximity graph transitively. Centroids of merged groups are updated
/// as segment-weighted means, which can bring further groups into range;
/// passes repeat until one performs no union. A threshold of zero returns
/// one group per component.
pub fn merge_components(mut components: Vec<Component>, distance_threshold_km: f64) -> Vec<MergedGroup> {
    components.sort_by_key(|component| component.id);
    if distance_threshold_km <= 0.0 || components.len() < 2 {
        return components
            .into_iter()
            .map(|component| MergedGroup::from_components(vec![component]))
            .collect();
    }

    let count = components.len();
    let mut sets = UnionFind::new(count);
    let mut centroids: Vec<Coordinate> = components.iter().map(|c| c.centroid).collect();
    let mut weights: Vec<usize> = components.iter().map(Component::segment_count).collect();

    let mut passes = 0;
    loop {
        passes += 1;
        let roots: Vec<usize> = (0..count).filter(|&i| sets.find(i) == i).collect();
        let index = GridIndex::for_radius(
            roots.iter().map(|&root| centroids[root]).collect(),
            distance_threshold_km,
        );

        let mut unions = 0;
        for slot in 0..index.len() {
            for neighbor in index.within(index.point(slot), distance_threshold_km) {
                let a = sets.find(roots[slot]);
                let b = sets.find(roots[neighbor]);
                if a == b {
                    continue;
                }
                let merged = weighted_midpoint(centroids[a], weights[a], centroids[b], weights[b]);
                let weight = weights[a] + weights[b];
                sets.union(a, b);
                let root = sets.find(a);
                centroids[root] = merged;
                weights[root] = weight;
                unions += 1;
            }
        }
        debug!("merge pass {passes}: {unions} unions over {} groups", roots.len());
        if unions == 0 {
            break;
        }
    }

    let mut slots: Vec<Option<Component>> = components.into_iter().map(Some).collect();
    sets.sets()
        .into_iter()
        .map(|members| {
            let grouped: Vec<Component> = members
                .into_iter()
                .filter_map(|position| slots[position].take())
                .collect();
            MergedGroup::from_components(grouped)
        })
        .collect()
}
