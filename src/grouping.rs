//! Street grouping: split segments into (name, region) partitions and find the
//! connected components of each partition through shared node ids.

use std::collections::{BTreeMap, HashMap};

use crate::geometry::{centroid, Coordinate};
use crate::segment::RoadSegment;
use crate::source::NodeId;

/// Disjoint sets over `0..len`, stored as a parent array.
#[derive(Clone, Debug)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut current = x;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    /// Merges the sets of `a` and `b`; returns false if they were already one set.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a == root_b {
            return false;
        }
        match self.rank[root_a].cmp(&self.rank[root_b]) {
            std::cmp::Ordering::Less => self.parent[root_a] = root_b,
            std::cmp::Ordering::Greater => self.parent[root_b] = root_a,
            std::cmp::Ordering::Equal => {
                self.parent[root_b] = root_a;
                self.rank[root_a] += 1;
            }
        }
        true
    }

    /// Members of every set, each sorted ascending, sets ordered by their
    /// smallest member.
    pub fn sets(&mut self) -> Vec<Vec<usize>> {
        let mut by_root: HashMap<usize, usize> = HashMap::new();
        let mut sets: Vec<Vec<usize>> = Vec::new();
        for x in 0..self.len() {
            let root = self.find(x);
            let slot = *by_root.entry(root).or_insert_with(|| {
                sets.push(Vec::new());
                sets.len() - 1
            });
            sets[slot].push(x);
        }
        sets
    }
}

/// All segments sharing one street name within one region.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    pub name: String,
    pub region: String,
    /// Global segment indices, ascending.
    pub segments: Vec<usize>,
}

/// Partitions ordered by (region, name).
pub fn partition_segments(segments: &[RoadSegment]) -> Vec<Partition> {
    let mut by_key: BTreeMap<(&str, &str), Vec<usize>> = BTreeMap::new();
    for segment in segments {
        by_key
            .entry((segment.region.as_str(), segment.name.as_str()))
            .or_default()
            .push(segment.index);
    }
    by_key
        .into_iter()
        .map(|((region, name), mut indices)| {
            indices.sort_unstable();
            Partition {
                name: name.to_string(),
                region: region.to_string(),
                segments: indices,
            }
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq)]
pub struct Component {
    /// Smallest global segment index among the members.
    pub id: usize,
    /// Global segment indices, ascending.
    pub segments: Vec<usize>,
    /// Mean of the members' representative points.
    pub centroid: Coordinate,
}

impl Component {
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }
}

/// Connected components of one partition. Two segments are adjacent when
/// they share any node id, endpoints or not.
pub fn connected_components(segments: &[RoadSegment], members: &[usize]) -> Vec<Component> {
    let mut node_index: HashMap<NodeId, Vec<usize>> = HashMap::new();
    for (local, &global) in members.iter().enumerate() {
        for &node_id in &segments[global].node_ids {
            let locals = node_index.entry(node_id).or_default();
            // closed ways repeat their first node
            if locals.last() != Some(&local) {
                locals.push(local);
            }
        }
    }

    let mut sets = UnionFind::new(members.len());
    for locals in node_index.values() {
        if let Some((&first, rest)) = locals.split_first() {
            for &other in rest {
                sets.union(first, other);
            }
        }
    }

    let mut components: Vec<Component> = sets
        .sets()
        .into_iter()
        .map(|locals| {
            let mut globals: Vec<usize> = locals.iter().map(|&local| members[local]).collect();
            globals.sort_unstable();
            let points: Vec<Coordinate> = globals
                .iter()
                .map(|&global| segments[global].representative_point)
                .collect();
            Component {
                id: globals[0],
                centroid: centroid(&points).unwrap_or(points[0]),
                segments: globals,
            }
        })
        .collect();
    components.sort_by_key(|component| component.id);
    components
}
