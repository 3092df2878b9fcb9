//! Pass 2a: keep coordinates only for nodes referenced by qualifying ways.

use std::collections::HashMap;

use log::{info, warn};

use crate::error::Result;
use crate::geometry::Coordinate;
use crate::scan::ReferenceSet;
use crate::source::{Element, ElementKind, ElementSource, NodeId};

/// Read-only once built; shared by reference with every consumer.
#[derive(Default, Debug)]
pub struct CoordinateStore {
    coords: HashMap<NodeId, Coordinate>,
    scanned: usize,
    unresolved: usize,
}

impl CoordinateStore {
    /// Coordinate of `id`, or `None` when the source never delivered it.
    pub fn get(&self, id: NodeId) -> Option<Coordinate> {
        self.coords.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    /// Number of node records seen during the scan.
    pub fn scanned(&self) -> usize {
        self.scanned
    }

    /// Number of referenced ids that never appeared in the node stream.
    pub fn unresolved(&self) -> usize {
        self.unresolved
    }
}

pub fn load_coordinates(
    source: &dyn ElementSource,
    references: &ReferenceSet,
) -> Result<CoordinateStore> {
    info!("pass 2a: loading coordinates of {} referenced nodes", references.len());
    let mut store = CoordinateStore {
        coords: HashMap::with_capacity(references.len()),
        ..CoordinateStore::default()
    };
    source.scan(ElementKind::Nodes, &mut |element| {
        if let Element::Node(node) = element {
            store.scanned += 1;
            if references.contains(node.id) {
                store.coords.entry(node.id).or_insert(node.coord);
            }
        }
    })?;
    store.unresolved = references.len() - store.coords.len();
    info!(
        "  scanned {} nodes, loaded {} coordinates",
        store.scanned,
        store.coords.len()
    );
    if store.unresolved > 0 {
        warn!(
            "  {} referenced nodes are missing from the node stream",
            store.unresolved
        );
    }
    Ok(store)
}
