//! Street table extraction from OpenStreetMap extracts.
//!
//! A run scans the extract twice: once for the ways that qualify as named
//! roads, once for the coordinates of the nodes those ways reference. Road
//! segments are grouped per street name by shared nodes and then by
//! proximity, and each group becomes one row of the output table.

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod coords;
pub mod error;
pub mod geometry;
pub mod grouping;
pub mod merge;
pub mod pipeline;
pub mod report;
pub mod scan;
pub mod segment;
pub mod source;
pub mod writer;

pub use aggregate::StreetRecord;
pub use cache::CacheStore;
pub use config::ExtractConfig;
pub use error::{Error, Result};
pub use pipeline::{run, run_batch, run_cached};
pub use report::RunSummary;
