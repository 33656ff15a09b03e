//! Row validation at the spreadsheet boundary
//!
//! Raw rows are string-keyed maps; nothing past this module sees them except
//! as the `raw` copy kept for error reporting.

use crate::types::{columns, CellValue, RawRow};

/// Required identity-number length (NIK)
pub const NIK_LENGTH: usize = 16;

/// A validated spreadsheet row
#[derive(Debug, Clone, PartialEq)]
pub struct ResidentRecord {
    /// 1-based position in the whole input
    pub row_number: usize,
    pub nik: String,
    pub name: String,
    pub family_card_number: String,
    /// Hamlet text as written in the ALAMAT column
    pub hamlet: String,
    pub group_number: String,
    pub unit_number: String,
    pub birth_place: Option<String>,
    /// Parsed per family group; an unparseable date fails the whole group
    pub birth_date: CellValue,
    pub sex_code: Option<String>,
    pub religion_code: Option<String>,
    pub marital_code: Option<String>,
    pub education_code: Option<String>,
    pub occupation: Option<String>,
    pub relation_code: Option<String>,
    pub raw: RawRow,
}

const REQUIRED: &[(&str, &str)] = &[
    (columns::NIK, "NIK tidak boleh kosong"),
    (columns::NAMA, "Nama tidak boleh kosong"),
    (columns::NO_KK, "No KK tidak boleh kosong"),
    (columns::ALAMAT, "Dukuh tidak boleh kosong"),
    (columns::NO_RW, "No RW tidak boleh kosong"),
    (columns::NO_RT, "No RT tidak boleh kosong"),
    (columns::TGL_LHR, "Tanggal lahir tidak boleh kosong"),
];

/// Check a raw row; every violated rule is reported, in a fixed order.
pub fn validate(row: &RawRow) -> Vec<String> {
    let mut errors: Vec<String> = REQUIRED
        .iter()
        .filter(|(column, _)| row.is_blank(column))
        .map(|(_, message)| message.to_string())
        .collect();

    if let Some(nik) = row.text(columns::NIK) {
        if nik.chars().count() != NIK_LENGTH {
            errors.push(format!("NIK harus {} digit", NIK_LENGTH));
        }
    }

    errors
}

/// Validate and convert a raw row into a typed record.
///
/// On failure returns the joined error message for the report.
pub fn validate_row(row_number: usize, raw: &RawRow) -> Result<ResidentRecord, String> {
    let errors = validate(raw);
    if !errors.is_empty() {
        return Err(errors.join(", "));
    }

    // Presence of the required columns was checked above
    let required = |column: &str| raw.text(column).unwrap_or_default();

    Ok(ResidentRecord {
        row_number,
        nik: required(columns::NIK),
        name: required(columns::NAMA),
        family_card_number: required(columns::NO_KK),
        hamlet: required(columns::ALAMAT),
        group_number: required(columns::NO_RW),
        unit_number: required(columns::NO_RT),
        birth_place: raw.text(columns::TMPT_LHR),
        birth_date: raw.get(columns::TGL_LHR).clone(),
        sex_code: raw.text(columns::JK),
        religion_code: raw.text(columns::AGAMA),
        marital_code: raw.text(columns::STATUS),
        education_code: raw.text(columns::PDDK_AKHR),
        occupation: raw.text(columns::PEKERJAAN),
        relation_code: raw.text(columns::SHDK),
        raw: raw.clone(),
    })
}
