//! Write functions - persist the enriched table

use crate::extraction::types::{LabelType, ResolvedRow};
use anyhow::{Context, Result};
use rust_xlsxwriter::Workbook;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const LOG_FILE: &str = "logging.log";

/// Output table format; spreadsheets unless the input was CSV
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Xlsx,
    Csv,
}

impl OutputFormat {
    pub fn for_input(input_path: &Path) -> Self {
        match input_path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => OutputFormat::Csv,
            _ => OutputFormat::Xlsx,
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            OutputFormat::Xlsx => "output.xlsx",
            OutputFormat::Csv => "output.csv",
        }
    }
}

/// Create the output directory if needed
pub fn prepare_output_dir(output_dir: &Path) -> Result<()> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Unable to create output directory {:?}", output_dir))
}

/// Input headers followed by one column per label type
pub fn output_headers(input_headers: &[String], label_types: &[LabelType]) -> Vec<String> {
    input_headers
        .iter()
        .cloned()
        .chain(label_types.iter().map(|lt| lt.column_name().to_string()))
        .collect()
}

/// Input cells followed by the label values; missing values become empty fields
pub fn output_record(row: &ResolvedRow, label_types: &[LabelType]) -> Vec<String> {
    row.cells
        .iter()
        .map(|cell| cell.clone().unwrap_or_default())
        .chain(
            label_types
                .iter()
                .map(|lt| row.labels.value(*lt).unwrap_or_default().to_string()),
        )
        .collect()
}

/// Write the resolved rows to `{output_dir}/output.{xlsx,csv}`, replacing any earlier output
pub fn write_output(
    output_dir: &Path,
    format: OutputFormat,
    input_headers: &[String],
    rows: &[ResolvedRow],
    label_types: &[LabelType],
) -> Result<PathBuf> {
    prepare_output_dir(output_dir)?;

    let path = output_dir.join(format.file_name());
    if path.exists() {
        fs::remove_file(&path)
            .with_context(|| format!("Unable to replace existing output {:?}", path))?;
        debug!("Removed previous output {:?}", path);
    }

    let headers = output_headers(input_headers, label_types);
    let records: Vec<Vec<String>> = rows
        .iter()
        .map(|row| output_record(row, label_types))
        .collect();

    match format {
        OutputFormat::Xlsx => write_xlsx(&path, &headers, &records)?,
        OutputFormat::Csv => write_csv(&path, &headers, &records)?,
    }

    info!("Wrote {} rows to {:?}", rows.len(), path);

    Ok(path)
}

fn write_csv(path: &Path, headers: &[String], records: &[Vec<String>]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Unable to create output file {:?}", path))?;

    writer.write_record(headers)?;
    for record in records {
        writer.write_record(record)?;
    }
    writer.flush()?;

    Ok(())
}

/// Single sheet, header row first; empty fields are left as blank cells
fn write_xlsx(path: &Path, headers: &[String], records: &[Vec<String>]) -> Result<()> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();

    let all_rows = std::iter::once(headers).chain(records.iter().map(Vec::as_slice));
    for (row_idx, record) in all_rows.enumerate() {
        for (col_idx, value) in record.iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            worksheet.write_string(row_idx as u32, col_idx as u16, value.as_str())?;
        }
    }

    workbook
        .save(path)
        .with_context(|| format!("Unable to create output file {:?}", path))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::parse::parse_workbook;
    use crate::extraction::types::{LabelSet, ResolvedLabel, RowStatus};
    use tempfile::tempdir;

    fn resolved_row(index: usize, flooding: Option<&str>) -> ResolvedRow {
        let mut labels = LabelSet::new(&LabelType::ALL);
        if let Some(value) = flooding {
            labels.resolve(
                LabelType::Flooding,
                ResolvedLabel {
                    value: value.to_string(),
                    building_id: 1,
                    rank: 0,
                    deprecated: false,
                },
            );
        }
        ResolvedRow {
            index,
            cells: vec![Some("10a".to_string()), Some("1234AB".to_string()), None],
            labels,
            status: RowStatus::Resolved,
        }
    }

    fn headers() -> Vec<String> {
        vec!["huisnummer".to_string(), "postcode".to_string(), "naam".to_string()]
    }

    #[test]
    fn test_output_headers() {
        assert_eq!(
            output_headers(&headers(), &LabelType::ALL),
            vec!["huisnummer", "postcode", "naam", "flooding", "heatstress", "drought", "pluvial"]
        );
    }

    #[test]
    fn test_output_record() {
        let record = output_record(&resolved_row(0, Some("A")), &LabelType::ALL);
        assert_eq!(record, vec!["10a", "1234AB", "", "A", "", "", ""]);
    }

    #[test]
    fn test_write_output_replaces_previous_file() {
        let temp = tempdir().unwrap();
        let output_dir = temp.path().join("output");

        let rows = vec![resolved_row(0, Some("A")), resolved_row(1, None)];
        write_output(&output_dir, OutputFormat::Csv, &headers(), &rows, &LabelType::ALL).unwrap();
        let path = write_output(
            &output_dir,
            OutputFormat::Csv,
            &headers(),
            &rows[..1],
            &LabelType::ALL,
        )
        .unwrap();

        assert_eq!(path, output_dir.join("output.csv"));
        let written = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(
            lines,
            vec![
                "huisnummer,postcode,naam,flooding,heatstress,drought,pluvial",
                "10a,1234AB,,A,,,",
            ]
        );
    }

    #[test]
    fn test_output_format_follows_input() {
        assert_eq!(
            OutputFormat::for_input(Path::new("input/input.xlsx")),
            OutputFormat::Xlsx
        );
        assert_eq!(
            OutputFormat::for_input(Path::new("input/adressen.CSV")),
            OutputFormat::Csv
        );
        assert_eq!(OutputFormat::for_input(Path::new("input/input.ods")), OutputFormat::Xlsx);
    }

    #[test]
    fn test_write_xlsx_reads_back() {
        let temp = tempdir().unwrap();
        let output_dir = temp.path().join("output");

        let rows = vec![resolved_row(0, Some("A")), resolved_row(1, None)];
        write_output(&output_dir, OutputFormat::Xlsx, &headers(), &rows, &LabelType::ALL).unwrap();
        let path = write_output(
            &output_dir,
            OutputFormat::Xlsx,
            &headers(),
            &rows,
            &LabelType::ALL,
        )
        .unwrap();
        assert_eq!(path, output_dir.join("output.xlsx"));

        let table = parse_workbook(&path).unwrap();
        assert_eq!(table.headers, output_headers(&headers(), &LabelType::ALL));
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0][0].as_deref(), Some("10a"));
        assert_eq!(table.rows[0][2], None);
        assert_eq!(table.rows[0][3].as_deref(), Some("A"));
        assert_eq!(table.rows[1][1].as_deref(), Some("1234AB"));
        assert_eq!(table.rows[1][3], None);
    }
}
