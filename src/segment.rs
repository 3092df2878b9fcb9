//! Pass 2b: turn qualifying ways into road segments.

use log::{debug, info};

use crate::config::ExtractConfig;
use crate::coords::CoordinateStore;
use crate::error::Result;
use crate::geometry::{centroid, Coordinate};
use crate::report::{Inconsistency, InconsistencyReport};
use crate::scan::{is_qualifying, road_class, road_name};
use crate::source::{Element, ElementKind, ElementSource, NodeId, WayRecord};

#[derive(Clone, Debug, PartialEq)]
pub struct RoadSegment {
    /// Position in extraction order; the tie-breaker for everything downstream.
    pub index: usize,
    pub way_id: i64,
    pub name: String,
    pub region: String,
    pub endpoint_ids: (NodeId, NodeId),
    pub node_ids: Vec<NodeId>,
    pub representative_point: Coordinate,
    pub road_class: String,
}

pub struct SegmentExtractor<'a> {
    config: &'a ExtractConfig,
    coords: &'a CoordinateStore,
    region: &'a str,
    segments: Vec<RoadSegment>,
    report: InconsistencyReport,
}

impl<'a> SegmentExtractor<'a> {
    pub fn new(config: &'a ExtractConfig, coords: &'a CoordinateStore, region: &'a str) -> Self {
        Self {
            config,
            coords,
            region,
            segments: Vec::new(),
            report: InconsistencyReport::default(),
        }
    }

    pub fn push_way(&mut self, way: &WayRecord) {
        if !is_qualifying(&way.tags, self.config) {
            return;
        }
        let (Some(name), Some(class)) = (road_name(&way.tags), road_class(&way.tags)) else {
            return;
        };
        let (Some(&first), Some(&last)) = (way.node_ids.first(), way.node_ids.last()) else {
            debug!("way {} has no nodes", way.id);
            return;
        };

        let mut resolved = Vec::with_capacity(way.node_ids.len());
        let mut missing = Vec::new();
        for &node_id in &way.node_ids {
            match self.coords.get(node_id) {
                Some(coord) => resolved.push(coord),
                None => missing.push(node_id),
            }
        }

        let Some(representative_point) = centroid(&resolved) else {
            self.report.record_dropped(Inconsistency {
                way_id: way.id,
                missing,
            });
            return;
        };
        if !missing.is_empty() {
            debug!(
                "way {} resolved {} of {} nodes",
                way.id,
                resolved.len(),
                way.node_ids.len()
            );
            self.report.record_partial();
        }

        self.segments.push(RoadSegment {
            index: self.segments.len(),
            way_id: way.id,
            name: name.to_string(),
            region: self.region.to_string(),
            endpoint_ids: (first, last),
            node_ids: way.node_ids.clone(),
            representative_point,
            road_class: class.to_string(),
        });
    }

    pub fn finish(self) -> (Vec<RoadSegment>, InconsistencyReport) {
        (self.segments, self.report)
    }
}

pub fn extract_segments(
    source: &dyn ElementSource,
    config: &ExtractConfig,
    coords: &CoordinateStore,
    region: &str,
) -> Result<(Vec<RoadSegment>, InconsistencyReport)> {
    info!("pass 2b: extracting road segments");
    let mut extractor = SegmentExtractor::new(config, coords, region);
    source.scan(ElementKind::Ways, &mut |element| {
        if let Element::Way(way) = element {
            extractor.push_way(&way);
        }
    })?;
    let (segments, report) = extractor.finish();
    info!("  found {} road segments", segments.len());
    Ok((segments, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::load_coordinates;
    use crate::scan::collect_referenced_nodes;
    use crate::scan::tests::way;
    use crate::source::NodeRecord;

    fn node(id: NodeId, lat: f64, lon: f64) -> Element {
        Element::Node(NodeRecord {
            id,
            coord: Coordinate::new(lat, lon),
        })
    }

    fn run(records: &Vec<Element>) -> (Vec<RoadSegment>, InconsistencyReport) {
        let config = ExtractConfig::default();
        let references = collect_referenced_nodes(records, &config).unwrap();
        let coords = load_coordinates(records, &references).unwrap();
        extract_segments(records, &config, &coords, "de").unwrap()
    }

    #[test]
    fn builds_segment_with_centroid_and_endpoints() {
        let records = vec![
            node(1, 0.0, 0.0),
            node(2, 0.0, 2.0),
            node(3, 1.0, 4.0),
            way(
                7,
                &[1, 2, 3],
                &[("highway", "residential"), ("name", "Main St")],
            ),
        ];
        let (segments, report) = run(&records);
        assert!(report.is_clean());
        assert_eq!(segments.len(), 1);
        let segment = &segments[0];
        assert_eq!(segment.index, 0);
        assert_eq!(segment.way_id, 7);
        assert_eq!(segment.name, "Main St");
        assert_eq!(segment.region, "de");
        assert_eq!(segment.road_class, "residential");
        assert_eq!(segment.endpoint_ids, (1, 3));
        assert_eq!(segment.node_ids, vec![1, 2, 3]);
        assert!((segment.representative_point.lat - 1.0 / 3.0).abs() < 1e-9);
        assert!((segment.representative_point.lon - 2.0).abs() < 1e-9);
    }

    #[test]
    fn unnamed_way_is_never_a_segment() {
        let records = vec![
            node(1, 0.0, 0.0),
            node(2, 0.0, 1.0),
            way(1, &[1, 2], &[("highway", "primary")]),
            way(2, &[1, 2], &[("highway", "motorway"), ("name", "")]),
        ];
        let (segments, _) = run(&records);
        assert!(segments.is_empty());
    }

    #[test]
    fn fully_unresolved_way_is_dropped_and_reported() {
        let records = vec![
            node(1, 0.0, 0.0),
            way(
                1,
                &[1],
                &[("highway", "residential"), ("name", "Kept Road")],
            ),
            way(
                2,
                &[40, 41],
                &[("highway", "residential"), ("name", "Ghost Road")],
            ),
        ];
        let (segments, report) = run(&records);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].name, "Kept Road");
        assert_eq!(report.dropped, 1);
        assert_eq!(
            report.examples,
            vec![Inconsistency {
                way_id: 2,
                missing: vec![40, 41],
            }]
        );
    }

    #[test]
    fn partially_resolved_way_uses_resolved_nodes() {
        let records = vec![
            node(1, 2.0, 2.0),
            way(
                3,
                &[1, 99],
                &[("highway", "residential"), ("name", "Half Road")],
            ),
        ];
        let (segments, report) = run(&records);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].representative_point, Coordinate::new(2.0, 2.0));
        assert_eq!(segments[0].node_ids, vec![1, 99]);
        assert_eq!(report.partially_resolved, 1);
        assert_eq!(report.dropped, 0);
    }
}
