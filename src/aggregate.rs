//! Reduces merged groups to one output row per street.

use serde::{Deserialize, Serialize};

use crate::grouping::{connected_components, Partition};
use crate::merge::{merge_components, MergedGroup};
use crate::segment::RoadSegment;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreetRecord {
    pub street_name: String,
    pub region: String,
    pub lat: f64,
    pub lon: f64,
    pub num_segments: usize,
    pub road_class: String,
}

/// An output row plus the key that fixes its position in the table.
#[derive(Clone, Debug, PartialEq)]
pub struct StreetRow {
    pub record: StreetRecord,
    /// Smallest original segment index in the group.
    pub first_segment: usize,
}

/// Most frequent road class among `indices`; ties go to the class seen first
/// when walking the indices in ascending order.
pub fn majority_road_class(segments: &[RoadSegment], indices: &[usize]) -> String {
    let mut ordered: Vec<usize> = indices.to_vec();
    ordered.sort_unstable();

    let mut counts: Vec<(&str, usize)> = Vec::new();
    for idx in ordered {
        let class = segments[idx].road_class.as_str();
        match counts.iter_mut().find(|(seen, _)| *seen == class) {
            Some((_, count)) => *count += 1,
            None => counts.push((class, 1)),
        }
    }

    let mut best: Option<(&str, usize)> = None;
    for (class, count) in counts {
        match best {
            Some((_, best_count)) if count <= best_count => {}
            _ => best = Some((class, count)),
        }
    }
    best.map(|(class, _)| class.to_string()).unwrap_or_default()
}

pub fn aggregate_group(segments: &[RoadSegment], partition: &Partition, group: &MergedGroup) -> StreetRow {
    let members = group.segments();
    StreetRow {
        record: StreetRecord {
            street_name: partition.name.clone(),
            region: partition.region.clone(),
            lat: group.centroid.lat,
            lon: group.centroid.lon,
            num_segments: members.len(),
            road_class: majority_road_class(segments, &members),
        },
        first_segment: members[0],
    }
}

/// Groups, merges and aggregates a single partition. Touches nothing outside
/// the partition, so partitions can run on any worker.
pub fn process_partition(
    segments: &[RoadSegment],
    partition: &Partition,
    distance_threshold_km: f64,
) -> Vec<StreetRow> {
    let components = connected_components(segments, &partition.segments);
    merge_components(components, distance_threshold_km)
        .iter()
        .map(|group| aggregate_group(segments, partition, group))
        .collect()
}

/// Orders rows by (region, street name, first segment index).
pub fn sort_rows(rows: &mut [StreetRow]) {
    rows.sort_by(|a, b| {
        a.record
            .region
            .cmp(&b.record.region)
            .then_with(|| a.record.street_name.cmp(&b.record.street_name))
            .then_with(|| a.first_segment.cmp(&b.first_segment))
    });
}
