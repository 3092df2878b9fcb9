//! Pass 1: collect the node ids referenced by qualifying ways.

use std::collections::HashSet;

use log::info;
use osmpbfreader::Tags;

use crate::config::ExtractConfig;
use crate::error::Result;
use crate::source::{Element, ElementKind, ElementSource, NodeId, WayRecord};

pub const ROAD_CLASS_KEY: &str = "highway";
pub const NAME_KEY: &str = "name";

fn tag_value<'a>(tags: &'a Tags, key: &str) -> Option<&'a str> {
    tags.get(key)
        .map(|value| value.as_str())
        .filter(|value| !value.is_empty())
}

pub fn road_name(tags: &Tags) -> Option<&str> {
    tag_value(tags, NAME_KEY)
}

pub fn road_class(tags: &Tags) -> Option<&str> {
    tag_value(tags, ROAD_CLASS_KEY)
}

/// A way qualifies when it carries a non-empty name and an accepted road class.
pub fn is_qualifying(tags: &Tags, config: &ExtractConfig) -> bool {
    road_name(tags).is_some() && road_class(tags).map_or(false, |class| config.accepts(class))
}

#[derive(Default, Debug)]
pub struct ReferenceSet {
    pub node_ids: HashSet<NodeId>,
    pub qualifying_ways: usize,
}

impl ReferenceSet {
    pub fn add_way(&mut self, way: &WayRecord) {
        self.qualifying_ways += 1;
        self.node_ids.extend(way.node_ids.iter().copied());
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node_ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.node_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_ids.is_empty()
    }
}

pub fn collect_referenced_nodes(
    source: &dyn ElementSource,
    config: &ExtractConfig,
) -> Result<ReferenceSet> {
    info!("pass 1: collecting nodes of named roads from {}", source.describe());
    let mut references = ReferenceSet::default();
    source.scan(ElementKind::Ways, &mut |element| {
        if let Element::Way(way) = element {
            if is_qualifying(&way.tags, config) {
                references.add_way(&way);
            }
        }
    })?;
    info!(
        "  found {} named roads using {} nodes",
        references.qualifying_ways,
        references.len()
    );
    Ok(references)
}
