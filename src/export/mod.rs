//! Export functionality for turning workbooks into CSV tables
//!
//! This module reads one worksheet of a workbook and writes it as a
//! comma-delimited file named after the workbook in the output directory.

pub mod table;

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Reader};
use serde::Serialize;

pub use table::{render_cell, Table};

use crate::config::ExportConfig;
use crate::error::ConversionError;

/// Extension of exported tables
pub const TABLE_EXTENSION: &str = "csv";

/// Result of a successful export
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportedTable {
    pub source: PathBuf,
    pub path: PathBuf,
    pub sheet: String,
    pub rows: usize,
    pub columns: usize,
}

/// Converts workbooks into CSV tables
#[derive(Debug, Clone, Default)]
pub struct TableExporter {
    config: ExportConfig,
}

impl TableExporter {
    pub fn new(config: ExportConfig) -> Self {
        Self { config }
    }

    /// Export a named sheet instead of the first one
    pub fn with_sheet(sheet: impl Into<String>) -> Self {
        Self::new(ExportConfig {
            sheet: Some(sheet.into()),
        })
    }

    /// Read the workbook's sheet into a `Table` without writing anything
    pub fn read_table(&self, source: &Path) -> Result<(String, Table), ConversionError> {
        let mut workbook = open_workbook_auto(source).map_err(|e| ConversionError::Open {
            path: source.to_path_buf(),
            reason: e.to_string(),
        })?;

        let sheet_names = workbook.sheet_names().to_vec();
        let sheet = match &self.config.sheet {
            Some(name) if sheet_names.contains(name) => name.clone(),
            Some(name) => {
                return Err(ConversionError::SheetNotFound {
                    path: source.to_path_buf(),
                    sheet: name.clone(),
                })
            }
            None => sheet_names
                .first()
                .cloned()
                .ok_or_else(|| ConversionError::NoSheets {
                    path: source.to_path_buf(),
                })?,
        };

        let range = workbook
            .worksheet_range(&sheet)
            .map_err(|e| ConversionError::Read {
                path: source.to_path_buf(),
                sheet: sheet.clone(),
                reason: e.to_string(),
            })?;

        Ok((sheet, Table::from_range(&range)))
    }

    /// Export `source` into `output_dir`, replacing any earlier table.
    ///
    /// The table is written to a temporary sibling first and renamed into
    /// place, so the destination never holds a partial table.
    pub fn export(&self, source: &Path, output_dir: &Path) -> Result<ExportedTable, ConversionError> {
        let output_path = output_path_for(source, output_dir)?;
        let (sheet, table) = self.read_table(source)?;

        let temp_path = output_path.with_extension("csv.tmp");
        write_table(&table, &temp_path).map_err(|err| {
            let _ = fs::remove_file(&temp_path);
            ConversionError::Write {
                path: temp_path.clone(),
                source: err,
            }
        })?;
        fs::rename(&temp_path, &output_path).map_err(|err| ConversionError::Write {
            path: output_path.clone(),
            source: err,
        })?;

        tracing::debug!(
            "Wrote {} rows x {} columns from sheet '{}' to {}",
            table.row_count(),
            table.column_count(),
            sheet,
            output_path.display()
        );

        Ok(ExportedTable {
            source: source.to_path_buf(),
            path: output_path,
            sheet,
            rows: table.row_count(),
            columns: table.column_count(),
        })
    }
}

fn write_table(table: &Table, path: &Path) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    table.write_csv(&mut writer)?;
    writer.flush()?;
    writer.get_ref().sync_all()
}

/// `output_dir/<workbook stem>.csv`
pub fn output_path_for(source: &Path, output_dir: &Path) -> Result<PathBuf, ConversionError> {
    let stem = source
        .file_stem()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConversionError::NoFileName {
            path: source.to_path_buf(),
        })?;

    let mut file_name = stem.to_os_string();
    file_name.push(".");
    file_name.push(TABLE_EXTENSION);
    Ok(output_dir.join(file_name))
}
