//! Recoverable data problems and end-of-run statistics.

use std::collections::HashMap;
use std::fmt;

use log::{info, warn};
use serde::Serialize;

use crate::aggregate::StreetRecord;
use crate::source::NodeId;

const MAX_EXAMPLES: usize = 5;
const TOP_NAMES: usize = 10;

/// A qualifying way whose nodes could not be resolved to coordinates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Inconsistency {
    pub way_id: i64,
    pub missing: Vec<NodeId>,
}

impl fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "way {} missing nodes {:?}", self.way_id, self.missing)
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct InconsistencyReport {
    /// Ways dropped because none of their nodes resolved.
    pub dropped: usize,
    /// Ways kept with only part of their nodes resolved.
    pub partially_resolved: usize,
    pub examples: Vec<Inconsistency>,
}

impl InconsistencyReport {
    pub fn record_dropped(&mut self, inconsistency: Inconsistency) {
        warn!("dropping segment: {inconsistency}");
        self.dropped += 1;
        if self.examples.len() < MAX_EXAMPLES {
            self.examples.push(inconsistency);
        }
    }

    pub fn record_partial(&mut self) {
        self.partially_resolved += 1;
    }

    pub fn is_clean(&self) -> bool {
        self.dropped == 0 && self.partially_resolved == 0
    }

    pub fn log(&self) {
        if self.is_clean() {
            return;
        }
        warn!(
            "inconsistent source data: {} segments dropped, {} partially resolved",
            self.dropped, self.partially_resolved
        );
        for example in &self.examples {
            warn!("  e.g. {example}");
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct RunSummary {
    pub rows: usize,
    pub segments: usize,
    pub multi_segment_streets: usize,
    pub top_names: Vec<(String, usize)>,
    pub inconsistencies: InconsistencyReport,
}

impl RunSummary {
    pub fn new(records: &[StreetRecord], inconsistencies: InconsistencyReport) -> Self {
        let mut name_counts: HashMap<&str, usize> = HashMap::new();
        for record in records {
            *name_counts.entry(record.street_name.as_str()).or_insert(0) += 1;
        }
        let mut top_names: Vec<(String, usize)> = name_counts
            .into_iter()
            .map(|(name, count)| (name.to_string(), count))
            .collect();
        top_names.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_names.truncate(TOP_NAMES);

        Self {
            rows: records.len(),
            segments: records.iter().map(|record| record.num_segments).sum(),
            multi_segment_streets: records
                .iter()
                .filter(|record| record.num_segments > 1)
                .count(),
            top_names,
            inconsistencies,
        }
    }

    pub fn log(&self) {
        info!("total unique streets: {}", self.rows);
        info!("contributing segments: {}", self.segments);
        info!("streets with multiple segments: {}", self.multi_segment_streets);
        if !self.top_names.is_empty() {
            info!("top {} street names:", self.top_names.len());
            for (name, count) in &self.top_names {
                info!("  {count:>6}  {name}");
            }
        }
        self.inconsistencies.log();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, num_segments: usize) -> StreetRecord {
        StreetRecord {
            street_name: name.to_string(),
            region: "de".to_string(),
            lat: 0.0,
            lon: 0.0,
            num_segments,
            road_class: "residential".to_string(),
        }
    }

    #[test]
    fn summary_counts_rows_and_ranks_names() {
        let records = vec![
            record("Main St", 3),
            record("Main St", 1),
            record("Oak Ave", 1),
            record("Elm St", 2),
            record("Elm St", 1),
        ];
        let summary = RunSummary::new(&records, InconsistencyReport::default());
        assert_eq!(summary.rows, 5);
        assert_eq!(summary.segments, 8);
        assert_eq!(summary.multi_segment_streets, 2);
        assert_eq!(
            summary.top_names,
            vec![
                ("Elm St".to_string(), 2),
                ("Main St".to_string(), 2),
                ("Oak Ave".to_string(), 1),
            ]
        );
    }

    #[test]
    fn report_keeps_a_bounded_number_of_examples() {
        let mut report = InconsistencyReport::default();
        for way_id in 0..8 {
            report.record_dropped(Inconsistency {
                way_id,
                missing: vec![way_id * 10],
            });
        }
        report.record_partial();
        assert_eq!(report.dropped, 8);
        assert_eq!(report.partially_resolved, 1);
        assert_eq!(report.examples.len(), MAX_EXAMPLES);
        assert_eq!(report.examples[0].way_id, 0);
        assert!(!report.is_clean());
    }
}
