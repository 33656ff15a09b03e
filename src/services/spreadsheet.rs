//! Spreadsheet parsing for uploaded resident files
//!
//! Row 1 of the first sheet is the header. Fully blank rows are dropped.

use std::io::Cursor;

use anyhow::{bail, Context, Result};
use calamine::{open_workbook_auto_from_rs, Data, Reader};

use crate::types::{CellValue, RawRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetFormat {
    /// xlsx / xls / ods, read with calamine
    Workbook,
    Csv,
}

impl SheetFormat {
    pub fn from_filename(filename: &str) -> Result<Self> {
        let extension = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "xlsx" | "xlsm" | "xls" | "ods" => Ok(SheetFormat::Workbook),
            "csv" => Ok(SheetFormat::Csv),
            _ => bail!("Format file tidak didukung: {}", filename),
        }
    }
}

/// Parse file content into rows keyed by header
pub fn parse_rows(filename: &str, content: Vec<u8>) -> Result<Vec<RawRow>> {
    let rows = match SheetFormat::from_filename(filename)? {
        SheetFormat::Workbook => parse_workbook(content)?,
        SheetFormat::Csv => parse_csv(&content)?,
    };
    Ok(rows.into_iter().filter(|row| !row.is_empty_row()).collect())
}

fn normalize_header(header: &str) -> String {
    header.trim().to_uppercase()
}

fn cell_value(cell: &Data) -> CellValue {
    match cell {
        Data::Empty | Data::Error(_) => CellValue::Empty,
        Data::Int(i) => CellValue::Integer(*i),
        Data::Float(f) => CellValue::Number(*f),
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Bool(b) => CellValue::Text(b.to_string()),
        // Excel serial; turned into a date where a date is expected
        Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
        Data::DateTimeIso(s) => CellValue::Text(s.get(..10).unwrap_or(s.as_str()).to_string()),
        Data::DurationIso(s) => CellValue::Text(s.clone()),
    }
}

fn parse_workbook(content: Vec<u8>) -> Result<Vec<RawRow>> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(content)).context("Gagal membuka file Excel")?;

    let sheet_names = workbook.sheet_names().to_vec();
    let Some(sheet_name) = sheet_names.first() else {
        bail!("File Excel tidak memiliki sheet");
    };

    let range = workbook
        .worksheet_range(sheet_name)
        .with_context(|| format!("Gagal membaca sheet '{}'", sheet_name))?;

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(header_row) => header_row
            .iter()
            .map(|cell| match cell {
                Data::String(s) => normalize_header(s),
                Data::Empty => String::new(),
                other => normalize_header(&other.to_string()),
            })
            .collect(),
        None => return Ok(Vec::new()),
    };

    Ok(rows
        .map(|cells| {
            let mut row = RawRow::new();
            for (header, cell) in headers.iter().zip(cells) {
                if !header.is_empty() {
                    row.insert(header.clone(), cell_value(cell));
                }
            }
            row
        })
        .collect())
}

fn detect_delimiter(content: &[u8]) -> u8 {
    let header = content.split(|b| *b == b'\n').next().unwrap_or_default();
    let semicolons = header.iter().filter(|b| **b == b';').count();
    let commas = header.iter().filter(|b| **b == b',').count();
    if semicolons > commas {
        b';'
    } else {
        b','
    }
}

fn parse_csv(content: &[u8]) -> Result<Vec<RawRow>> {
    let content = content.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(content);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(detect_delimiter(content))
        .has_headers(true)
        .flexible(true)
        .from_reader(content);

    let headers: Vec<String> = reader
        .headers()
        .context("Gagal membaca header CSV")?
        .iter()
        .map(normalize_header)
        .collect();

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Baris CSV {} tidak valid", index + 2))?;
        let mut row = RawRow::new();
        for (header, value) in headers.iter().zip(record.iter()) {
            if !header.is_empty() {
                row.insert(header.clone(), CellValue::Text(value.to_string()));
            }
        }
        rows.push(row);
    }
    Ok(rows)
}
