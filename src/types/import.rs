//! Spreadsheet row and import result types for the resident bulk import

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Column headers of the civil-registry export spreadsheet
pub mod columns {
    pub const NIK: &str = "NIK";
    pub const NAMA: &str = "NAMA";
    pub const TMPT_LHR: &str = "TMPT_LHR";
    pub const TGL_LHR: &str = "TGL_LHR";
    pub const JK: &str = "JK";
    pub const AGAMA: &str = "AGAMA";
    pub const STATUS: &str = "STATUS";
    pub const PDDK_AKHR: &str = "PDDK_AKHR";
    pub const PEKERJAAN: &str = "PEKERJAAN";
    pub const SHDK: &str = "SHDK";
    pub const NO_KK: &str = "NO_KK";
    pub const ALAMAT: &str = "ALAMAT";
    pub const NO_RW: &str = "NO_RW";
    pub const NO_RT: &str = "NO_RT";
}

// =============================================================================
// RAW ROWS
// =============================================================================

/// A single spreadsheet cell as produced by the file parser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Empty,
    Integer(i64),
    Number(f64),
    Date(NaiveDate),
    Text(String),
}

impl CellValue {
    /// True for missing cells and whitespace-only text
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Stringified cell value, `None` when blank.
    ///
    /// Integral floats are rendered without a fractional part so that
    /// numeric NIK / KK cells keep their digits.
    pub fn to_text(&self) -> Option<String> {
        match self {
            CellValue::Empty => None,
            CellValue::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
            CellValue::Integer(i) => Some(i.to_string()),
            CellValue::Number(f) => {
                if f.fract() == 0.0 && f.abs() < 1e17 {
                    Some(format!("{:.0}", f))
                } else {
                    Some(f.to_string())
                }
            }
            CellValue::Date(d) => Some(d.format("%d-%m-%Y").to_string()),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_text() {
            Some(text) => write!(f, "{}", text),
            None => write!(f, "(kosong)"),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

/// One parsed spreadsheet row keyed by column header
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRow(pub BTreeMap<String, CellValue>);

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: impl Into<String>, value: CellValue) {
        self.0.insert(column.into(), value);
    }

    /// Builder-style insert, handy for tests and fixtures
    pub fn with(mut self, column: &str, value: impl Into<CellValue>) -> Self {
        self.insert(column, value.into());
        self
    }

    pub fn get(&self, column: &str) -> &CellValue {
        static EMPTY: CellValue = CellValue::Empty;
        self.0.get(column).unwrap_or(&EMPTY)
    }

    pub fn text(&self, column: &str) -> Option<String> {
        self.get(column).to_text()
    }

    pub fn is_blank(&self, column: &str) -> bool {
        self.get(column).is_blank()
    }

    /// True when every cell is blank (trailing spreadsheet rows)
    pub fn is_empty_row(&self) -> bool {
        self.0.values().all(CellValue::is_blank)
    }
}

// =============================================================================
// IMPORT RESULT
// =============================================================================

/// A failed row in the import report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRowError {
    /// 1-based index within the whole input, 0 for job-level errors
    pub row: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nik: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nama: Option<String>,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<RawRow>,
}

impl ImportRowError {
    pub fn for_row(row_number: usize, raw: &RawRow, error: impl Into<String>) -> Self {
        Self {
            row: row_number,
            nik: raw.text(columns::NIK),
            nama: raw.text(columns::NAMA),
            error: error.into(),
            data: Some(raw.clone()),
        }
    }
}

/// Final report of one `import_rows` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportBatchResult {
    pub success: bool,
    pub total_records: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub errors: Vec<ImportRowError>,
    pub processed_at: DateTime<Utc>,
    /// Wall time in milliseconds
    pub duration: u64,
    /// Set when the job was cancelled between chunks
    #[serde(default)]
    pub cancelled: bool,
}

impl ImportBatchResult {
    pub fn new(total_records: usize) -> Self {
        Self {
            success: true,
            total_records,
            success_count: 0,
            failed_count: 0,
            errors: Vec::new(),
            processed_at: Utc::now(),
            duration: 0,
            cancelled: false,
        }
    }

    pub fn processed(&self) -> usize {
        self.success_count + self.failed_count
    }
}

/// Progress snapshot published while an import is running
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportProgress {
    pub processed: usize,
    pub total: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub percent: u8,
}

impl ImportProgress {
    pub fn of(result: &ImportBatchResult) -> Self {
        let processed = result.processed();
        let total = result.total_records;
        let percent = if total == 0 {
            100
        } else {
            ((processed * 100) / total).min(100) as u8
        };
        Self {
            processed,
            total,
            success_count: result.success_count,
            failed_count: result.failed_count,
            percent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integral_number_keeps_digits() {
        let cell = CellValue::Number(3509010101010099.0);
        assert_eq!(cell.to_text().as_deref(), Some("3509010101010099"));
        assert_eq!(CellValue::Number(1.5).to_text().as_deref(), Some("1.5"));
    }

    #[test]
    fn test_blank_cells() {
        assert!(CellValue::Empty.is_blank());
        assert!(CellValue::Text("   ".into()).is_blank());
        assert!(!CellValue::Integer(0).is_blank());
        assert_eq!(CellValue::Text(" Jati ".into()).to_text().as_deref(), Some("Jati"));
    }

    #[test]
    fn test_cell_value_deserializes_untagged() {
        let row: RawRow = serde_json::from_str(
            r#"{"NIK": "1234567890123456", "NO_RT": 2, "TGL_LHR": null, "X": 1.25}"#,
        )
        .unwrap();
        assert_eq!(row.get("NIK"), &CellValue::Text("1234567890123456".into()));
        assert_eq!(row.get("NO_RT"), &CellValue::Integer(2));
        assert_eq!(row.get("TGL_LHR"), &CellValue::Empty);
        assert_eq!(row.get("X"), &CellValue::Number(1.25));
        assert_eq!(row.get("MISSING"), &CellValue::Empty);
    }

    #[test]
    fn test_empty_row_detection() {
        let row = RawRow::new().with("NIK", "").with("NAMA", "  ");
        assert!(row.is_empty_row());
        assert!(!row.with("NAMA", "Budi").is_empty_row());
    }

    #[test]
    fn test_batch_result_serializes_camel_case() {
        let mut result = ImportBatchResult::new(3);
        result.errors.push(ImportRowError {
            row: 1,
            nik: None,
            nama: Some("Budi".into()),
            error: "NIK tidak boleh kosong".into(),
            data: None,
        });
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("totalRecords"));
        assert!(json.contains("successCount"));
        assert!(json.contains("processedAt"));
        assert!(json.contains("\"nama\":\"Budi\""));
        assert!(!json.contains("\"nik\""));
    }

    #[test]
    fn test_progress_percent() {
        let mut result = ImportBatchResult::new(4);
        result.success_count = 1;
        result.failed_count = 1;
        assert_eq!(ImportProgress::of(&result).percent, 50);
        assert_eq!(ImportProgress::of(&ImportBatchResult::new(0)).percent, 100);
    }
}
