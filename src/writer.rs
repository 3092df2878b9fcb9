//! Persisting the street table. Writes go to a temporary file in the target
//! directory and are renamed into place, so a reader never sees a partial
//! table under the final name.
//!
//! Tables are Parquet unless the path ends in `.csv`.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use arrow_array::{Array, ArrayRef, Float64Array, RecordBatch, StringArray, UInt64Array};
use arrow_schema::{ArrowError, DataType, Field, Schema, SchemaRef};
use csv::{ReaderBuilder, Writer};
use log::info;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use tempfile::NamedTempFile;

use crate::aggregate::StreetRecord;
use crate::error::{Error, Result};

pub const COLUMNS: [&str; 6] = [
    "street_name",
    "region",
    "lat",
    "lon",
    "num_segments",
    "road_class",
];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TableFormat {
    Parquet,
    Csv,
}

impl TableFormat {
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("csv") => TableFormat::Csv,
            _ => TableFormat::Parquet,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            TableFormat::Parquet => "parquet",
            TableFormat::Csv => "csv",
        }
    }
}

fn schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(COLUMNS[0], DataType::Utf8, false),
        Field::new(COLUMNS[1], DataType::Utf8, false),
        Field::new(COLUMNS[2], DataType::Float64, false),
        Field::new(COLUMNS[3], DataType::Float64, false),
        Field::new(COLUMNS[4], DataType::UInt64, false),
        Field::new(COLUMNS[5], DataType::Utf8, false),
    ]))
}

fn record_batch(records: &[StreetRecord]) -> std::result::Result<RecordBatch, ArrowError> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|record| record.street_name.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|record| record.region.as_str()),
        )),
        Arc::new(Float64Array::from_iter_values(records.iter().map(|record| record.lat))),
        Arc::new(Float64Array::from_iter_values(records.iter().map(|record| record.lon))),
        Arc::new(UInt64Array::from_iter_values(
            records.iter().map(|record| record.num_segments as u64),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|record| record.road_class.as_str()),
        )),
    ];
    RecordBatch::try_new(schema(), columns)
}

fn write_parquet<W: Write + Send>(sink: W, records: &[StreetRecord]) -> parquet::errors::Result<()> {
    let batch = record_batch(records)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(sink, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

/// Floats use the shortest text that reads back to the same value.
fn write_csv<W: Write>(writer: &mut Writer<W>, records: &[StreetRecord]) -> csv::Result<()> {
    writer.write_record(COLUMNS)?;
    for record in records {
        let lat = record.lat.to_string();
        let lon = record.lon.to_string();
        let num_segments = record.num_segments.to_string();
        writer.write_record([
            record.street_name.as_str(),
            record.region.as_str(),
            lat.as_str(),
            lon.as_str(),
            num_segments.as_str(),
            record.road_class.as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_table(output_path: &Path, records: &[StreetRecord]) -> Result<()> {
    let parent = match output_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(|err| Error::io(parent, err))?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(|err| Error::io(parent, err))?;
    match TableFormat::for_path(output_path) {
        TableFormat::Parquet => write_parquet(&mut tmp, records)
            .map_err(|err| Error::io(output_path, std::io::Error::other(err)))?,
        TableFormat::Csv => {
            let mut writer = Writer::from_writer(&mut tmp);
            write_csv(&mut writer, records).map_err(|err| Error::io(output_path, err))?;
        }
    }
    tmp.as_file()
        .sync_all()
        .map_err(|err| Error::io(output_path, err))?;
    tmp.persist(output_path)
        .map_err(|err| Error::io(output_path, err))?;

    info!("wrote {} rows to {}", records.len(), output_path.display());
    Ok(())
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, path: &Path, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|column| column.as_any().downcast_ref::<T>())
        .ok_or_else(|| Error::parse(path, format!("missing or mistyped column {name}")))
}

fn read_parquet(path: &Path) -> Result<Vec<StreetRecord>> {
    let file = File::open(path).map_err(|err| Error::io(path, err))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .and_then(|builder| builder.build())
        .map_err(|err| Error::parse(path, err))?;

    let mut records = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|err| Error::parse(path, err))?;
        let names = column::<StringArray>(&batch, path, COLUMNS[0])?;
        let regions = column::<StringArray>(&batch, path, COLUMNS[1])?;
        let lats = column::<Float64Array>(&batch, path, COLUMNS[2])?;
        let lons = column::<Float64Array>(&batch, path, COLUMNS[3])?;
        let counts = column::<UInt64Array>(&batch, path, COLUMNS[4])?;
        let classes = column::<StringArray>(&batch, path, COLUMNS[5])?;
        for row in 0..batch.num_rows() {
            records.push(StreetRecord {
                street_name: names.value(row).to_string(),
                region: regions.value(row).to_string(),
                lat: lats.value(row),
                lon: lons.value(row),
                num_segments: counts.value(row) as usize,
                road_class: classes.value(row).to_string(),
            });
        }
    }
    Ok(records)
}

fn read_csv(path: &Path) -> Result<Vec<StreetRecord>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|err| Error::io(path, err))?;
    reader
        .deserialize()
        .map(|row| row.map_err(|err| Error::io(path, err)))
        .collect()
}

pub fn read_table(path: &Path) -> Result<Vec<StreetRecord>> {
    match TableFormat::for_path(path) {
        TableFormat::Parquet => read_parquet(path),
        TableFormat::Csv => read_csv(path),
    }
}
