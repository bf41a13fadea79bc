//! Parse functions - input table into address rows, raw house numbers into HouseNumber

use crate::extraction::types::{AddressRow, AddressTable, HouseNumber};
use crate::extraction::utils::{cell_to_string, non_empty, strip_whitespace};
use anyhow::{Context, Result};
use calamine::{open_workbook_auto, Reader};
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

pub const HOUSE_NUMBER_COLUMN: &str = "huisnummer";
pub const POSTCODE_COLUMN: &str = "postcode";

/// A house number that cannot be split into number + letter
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HouseNumberError {
    #[error("house number is empty")]
    Empty,

    #[error("house number {0:?} has no leading number")]
    MissingNumber(String),

    #[error("house number {0:?} has an invalid letter suffix")]
    InvalidLetter(String),

    #[error("house number {0:?} is not numeric")]
    NotNumeric(String),
}

/// Split a raw house number into its numeric part and optional letter.
///
/// Whitespace is removed first and anything from the first hyphen on is
/// dropped, so "12 a-3" becomes number "12" with letter 'A'.
pub fn parse_house_number(raw: &str) -> Result<HouseNumber, HouseNumberError> {
    let cleaned = strip_whitespace(raw);
    let head = match cleaned.split_once('-') {
        Some((head, _)) => head,
        None => cleaned.as_str(),
    };

    if head.is_empty() {
        return Err(HouseNumberError::Empty);
    }

    let Some(pos) = head.find(|c: char| c.is_ascii_alphabetic()) else {
        if !head.chars().all(|c| c.is_ascii_digit()) {
            return Err(HouseNumberError::NotNumeric(raw.to_string()));
        }
        return Ok(HouseNumber {
            number: head.to_string(),
            letter: None,
        });
    };

    let (digits, rest) = head.split_at(pos);
    if digits.is_empty() {
        return Err(HouseNumberError::MissingNumber(raw.to_string()));
    }
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(HouseNumberError::NotNumeric(raw.to_string()));
    }

    let mut chars = rest.chars();
    match (chars.next(), chars.next()) {
        (Some(letter), None) => Ok(HouseNumber {
            number: digits.to_string(),
            letter: Some(letter.to_ascii_uppercase()),
        }),
        _ => Err(HouseNumberError::InvalidLetter(raw.to_string())),
    }
}

/// Postcodes are only stripped of whitespace, not validated
pub fn normalize_postcode(raw: &str) -> String {
    strip_whitespace(raw)
}

/// Read the input table, picking the format from the file extension
pub fn read_table(path: &Path) -> Result<AddressTable> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    let table = match extension.as_str() {
        "csv" => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("Unable to open input file {:?}", path))?;
            parse_csv_table(file)?
        }
        "xlsx" | "xlsm" | "xls" | "ods" => parse_workbook(path)?,
        other => {
            return Err(anyhow::anyhow!(
                "Unsupported input format {:?} for {:?}",
                other,
                path
            ))
        }
    };

    info!(
        "Read {} rows with columns {:?} from {:?}",
        table.rows.len(),
        table.headers,
        path
    );

    Ok(table)
}

/// Parse a CSV table with a header row
pub fn parse_csv_table<R: Read>(reader: R) -> Result<AddressTable> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();

    let mut rows = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read CSV row {}", idx))?;
        let mut row: Vec<Option<String>> = record.iter().map(non_empty).collect();
        row.resize(headers.len(), None);
        rows.push(row);
    }

    Ok(AddressTable { headers, rows })
}

/// Parse the first sheet of a spreadsheet; blank rows are skipped
pub fn parse_workbook(path: &Path) -> Result<AddressTable> {
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("Unable to open input file {:?}", path))?;

    let sheet_names = workbook.sheet_names();
    let Some(sheet_name) = sheet_names.first() else {
        return Err(anyhow::anyhow!("No sheets found in workbook"));
    };
    info!("Reading sheet: {}", sheet_name);

    let range = workbook.worksheet_range(sheet_name)?;
    let mut rows_iter = range.rows();

    let headers: Vec<String> = match rows_iter.next() {
        Some(header_row) => header_row
            .iter()
            .map(|cell| {
                cell_to_string(cell)
                    .unwrap_or_default()
                    .trim()
                    .to_lowercase()
            })
            .collect(),
        None => return Err(anyhow::anyhow!("Sheet {} is empty", sheet_name)),
    };

    let mut rows = Vec::new();
    for row in rows_iter {
        let mut cells: Vec<Option<String>> = row.iter().map(cell_to_string).collect();
        if cells.iter().all(Option::is_none) {
            continue;
        }
        cells.resize(headers.len(), None);
        rows.push(cells);
    }

    Ok(AddressTable { headers, rows })
}

/// Pick out the address columns for every row
pub fn extract_address_rows(table: &AddressTable) -> Result<Vec<AddressRow>> {
    let (house_number_idx, postcode_idx) = match (
        table.column(HOUSE_NUMBER_COLUMN),
        table.column(POSTCODE_COLUMN),
    ) {
        (Some(h), Some(p)) => (h, p),
        _ => {
            return Err(anyhow::anyhow!(
                "Missing column in input file (columns {}/{} needed)",
                HOUSE_NUMBER_COLUMN,
                POSTCODE_COLUMN
            ))
        }
    };

    let rows: Vec<AddressRow> = table
        .rows
        .iter()
        .enumerate()
        .map(|(index, cells)| AddressRow {
            index,
            postcode: cells.get(postcode_idx).cloned().flatten(),
            house_number: cells.get(house_number_idx).cloned().flatten(),
            cells: cells.clone(),
        })
        .collect();

    let incomplete = rows
        .iter()
        .filter(|r| r.postcode.is_none() || r.house_number.is_none())
        .count();
    if incomplete > 0 {
        warn!("{} rows are missing a postcode or house number", incomplete);
    }

    Ok(rows)
}
