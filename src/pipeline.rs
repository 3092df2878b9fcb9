//! End-to-end extraction: two scans of the source, partition-parallel
//! grouping, one ordered table.

use std::path::{Path, PathBuf};
use std::sync::mpsc;

use log::{error, info};
use rayon::ThreadPoolBuilder;

use crate::aggregate::{process_partition, sort_rows, StreetRecord, StreetRow};
use crate::cache::CacheStore;
use crate::config::ExtractConfig;
use crate::coords::load_coordinates;
use crate::error::{Error, Result};
use crate::grouping::partition_segments;
use crate::report::{InconsistencyReport, RunSummary};
use crate::scan::collect_referenced_nodes;
use crate::segment::{extract_segments, RoadSegment};
use crate::source::{open_source, ElementSource};
use crate::writer::{read_table, write_table};

/// Partitions handed to a worker at a time.
const PARTITIONS_PER_TASK: usize = 64;

pub const REGION_FILE_SUFFIX: &str = "-latest.osm.pbf";

pub fn default_output_path(region: &str) -> PathBuf {
    PathBuf::from("streetdfs").join(format!("{region}_streets.parquet"))
}

/// Groups segments into streets on a bounded pool. Workers only read
/// `segments`; their rows come back over a channel and are ordered here.
pub fn group_streets(segments: &[RoadSegment], config: &ExtractConfig) -> Result<Vec<StreetRecord>> {
    let partitions = partition_segments(segments);
    info!("grouping {} segments in {} name partitions", segments.len(), partitions.len());

    let pool = ThreadPoolBuilder::new()
        .num_threads(config.workers.unwrap_or(0))
        .build()?;
    let threshold = config.distance_threshold_km;
    let (tx, rx) = mpsc::channel::<Vec<StreetRow>>();
    pool.scope(|scope| {
        for chunk in partitions.chunks(PARTITIONS_PER_TASK) {
            let tx = tx.clone();
            scope.spawn(move |_| {
                let rows: Vec<StreetRow> = chunk
                    .iter()
                    .flat_map(|partition| process_partition(segments, partition, threshold))
                    .collect();
                // rx is held until the scope ends
                let _ = tx.send(rows);
            });
        }
    });
    drop(tx);

    let mut rows: Vec<StreetRow> = rx.into_iter().flatten().collect();
    sort_rows(&mut rows);
    info!("  created {} unique streets", rows.len());
    Ok(rows.into_iter().map(|row| row.record).collect())
}

pub fn extract_streets(
    source: &dyn ElementSource,
    region: &str,
    config: &ExtractConfig,
) -> Result<(Vec<StreetRecord>, InconsistencyReport)> {
    let references = collect_referenced_nodes(source, config)?;
    let coords = load_coordinates(source, &references)?;
    drop(references);
    let (segments, report) = extract_segments(source, config, &coords, region)?;
    drop(coords);
    let records = group_streets(&segments, config)?;
    Ok((records, report))
}

/// Extracts the street table of `source_path` into `output_path`.
///
/// The configuration is validated before the source is opened. Any parse or
/// I/O failure aborts the run and leaves no table at `output_path`.
pub fn run(
    region: &str,
    source_path: &Path,
    config: &ExtractConfig,
    output_path: &Path,
) -> Result<RunSummary> {
    config.validate()?;
    info!("input file:         {}", source_path.display());
    info!("region:             {region}");
    info!("distance threshold: {} km", config.distance_threshold_km);

    let source = open_source(source_path)?;
    let (records, report) = extract_streets(source.as_ref(), region, config)?;
    write_table(output_path, &records)?;

    let summary = RunSummary::new(&records, report);
    summary.log();
    Ok(summary)
}

/// Like [`run`], but reuses a cached table when the region, configuration
/// and source modification time are unchanged.
pub fn run_cached(
    store: &CacheStore,
    region: &str,
    source_path: &Path,
    config: &ExtractConfig,
    output_path: &Path,
) -> Result<RunSummary> {
    config.validate()?;
    let params = serde_json::json!({
        "region": region,
        "source": source_path.display().to_string(),
        "config": config,
    });
    let mut computed = None;
    let outcome = store.get_or_compute("streets", &params, &[source_path.to_path_buf()], |table| {
        computed = Some(run(region, source_path, config, table)?);
        Ok(())
    })?;

    let records = read_table(&outcome.path)?;
    write_table(output_path, &records)?;
    Ok(match computed {
        Some(summary) => summary,
        None => {
            let summary = RunSummary::new(&records, InconsistencyReport::default());
            summary.log();
            summary
        }
    })
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub succeeded: Vec<(String, RunSummary)>,
    pub failed: Vec<(String, String)>,
}

/// Region labels and paths of every `<region>-latest.osm.pbf` in `input_dir`,
/// sorted by region.
pub fn discover_regions(input_dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut regions = Vec::new();
    for entry in input_dir.read_dir().map_err(|err| Error::io(input_dir, err))? {
        let path = entry.map_err(|err| Error::io(input_dir, err))?.path();
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if let Some(region) = file_name.strip_suffix(REGION_FILE_SUFFIX) {
            if !region.is_empty() {
                regions.push((region.to_string(), path.clone()));
            }
        }
    }
    regions.sort();
    Ok(regions)
}

/// Runs every region found in `input_dir`. A failing region is logged and
/// recorded; the others still run.
pub fn run_batch(input_dir: &Path, output_dir: &Path, config: &ExtractConfig) -> Result<BatchSummary> {
    config.validate()?;
    let regions = discover_regions(input_dir)?;
    info!("processing {} regions from {}", regions.len(), input_dir.display());

    let mut batch = BatchSummary::default();
    for (region, source_path) in regions {
        let output_path = output_dir.join(format!("{region}_streets.parquet"));
        match run(&region, &source_path, config, &output_path) {
            Ok(summary) => batch.succeeded.push((region, summary)),
            Err(err) => {
                error!("{region}: {err}");
                batch.failed.push((region, err.to_string()));
            }
        }
    }
    info!(
        "batch finished: {} succeeded, {} failed",
        batch.succeeded.len(),
        batch.failed.len()
    );
    Ok(batch)
}

/// The only `.pbf` file in `folder`.
pub fn find_default_pbf(folder: &Path) -> Result<PathBuf> {
    let mut pbfs = Vec::new();
    for entry in folder.read_dir().map_err(|err| Error::io(folder, err))? {
        let path = entry.map_err(|err| Error::io(folder, err))?.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some("pbf") {
            pbfs.push(path);
        }
    }
    pbfs.sort();

    match pbfs.len() {
        0 => Err(Error::Config(format!(
            "no .pbf files found in {}",
            folder.display()
        ))),
        1 => Ok(pbfs.remove(0)),
        _ => Err(Error::Config(
            "multiple .pbf files found; pass --input explicitly".into(),
        )),
    }
}
