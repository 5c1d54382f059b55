//! CSV export of accepted records.
//!
//! One file per symbol, named `<kind>_<symbol>.csv`, written under an
//! explicit output directory.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use ashare_common::ExportConfig;

use crate::data::{DataKind, NormalizedRecord};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot export {first} and {other} records together")]
    MixedKinds { first: DataKind, other: DataKind },

    #[error("nothing to export")]
    Empty,
}

/// Writes records to CSV files.
#[derive(Debug, Clone)]
pub struct CsvExporter {
    output_dir: PathBuf,
}

impl CsvExporter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn from_config(config: &ExportConfig) -> Self {
        Self::new(&config.output_dir)
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Target path for one symbol's records.
    pub fn path_for(&self, kind: DataKind, symbol: &str) -> PathBuf {
        let symbol: String = symbol
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '_' })
            .collect();
        self.output_dir.join(format!("{kind}_{symbol}.csv"))
    }

    /// Write records of a single kind, one file per symbol. Returns the
    /// written paths in symbol order.
    pub fn export(&self, records: &[NormalizedRecord]) -> Result<Vec<PathBuf>, ExportError> {
        let kind = single_kind(records)?;

        let mut by_symbol: BTreeMap<&str, Vec<&NormalizedRecord>> = BTreeMap::new();
        for record in records {
            by_symbol.entry(record.symbol()).or_default().push(record);
        }

        fs::create_dir_all(&self.output_dir)?;

        let mut paths = Vec::with_capacity(by_symbol.len());
        for (symbol, rows) in by_symbol {
            let path = self.path_for(kind, symbol);
            let file = fs::File::create(&path)?;
            write_records(file, rows.into_iter())?;
            info!(path = %path.display(), kind = %kind, symbol, "Exported records");
            paths.push(path);
        }

        Ok(paths)
    }
}

/// Render records of a single kind as one CSV document.
pub fn to_csv_string(records: &[NormalizedRecord]) -> Result<String, ExportError> {
    single_kind(records)?;
    let mut buffer = Vec::new();
    write_records(&mut buffer, records.iter())?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

fn single_kind(records: &[NormalizedRecord]) -> Result<DataKind, ExportError> {
    let first = records.first().ok_or(ExportError::Empty)?.kind();
    match records.iter().find(|r| r.kind() != first) {
        Some(other) => Err(ExportError::MixedKinds {
            first,
            other: other.kind(),
        }),
        None => Ok(first),
    }
}

fn write_records<'a, W: Write>(
    writer: W,
    records: impl Iterator<Item = &'a NormalizedRecord>,
) -> Result<(), ExportError> {
    let mut wtr = csv::Writer::from_writer(writer);
    for record in records {
        match record {
            NormalizedRecord::IndexBar(r) => wtr.serialize(r)?,
            NormalizedRecord::Tick(r) => wtr.serialize(r)?,
            NormalizedRecord::FinancialIndicator(r) => wtr.serialize(r)?,
            NormalizedRecord::Announcement(r) => wtr.serialize(r)?,
        }
    }
    wtr.flush()?;
    Ok(())
}
