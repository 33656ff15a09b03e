//! Source-code lookup tables for categorical resident attributes
//!
//! The civil-registry export uses its own abbreviations ("LK", "BLM.KAWIN",
//! "SLTA/SEDERAJAT", ...). Each canonical enum implements [`CodeTable`];
//! [`map_code`] reports whether the code was recognized so the caller decides
//! what to do with unknown values. The import passes them through verbatim,
//! except for the household relation which falls back to a role default.

use crate::types::{Education, FamilyRelation, MaritalStatus, Religion, Sex};

/// A mapped categorical value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Categorical<T> {
    Known(T),
    Raw(String),
}

impl<T: CodeTable> Categorical<T> {
    pub fn label(&self) -> &str {
        match self {
            Categorical::Known(value) => value.label(),
            Categorical::Raw(raw) => raw,
        }
    }

    pub fn into_label(self) -> String {
        match self {
            Categorical::Known(value) => value.label().to_string(),
            Categorical::Raw(raw) => raw,
        }
    }
}

/// Canonical enum with a fixed table of source codes
pub trait CodeTable: Sized + Copy {
    /// Look up an already normalized (trimmed, upper-cased) source code
    fn lookup(code: &str) -> Option<Self>;
    fn label(&self) -> &'static str;
}

/// Map a source code through `T`'s table; `matched` is false on pass-through
pub fn map_code<T: CodeTable>(code: &str) -> (Categorical<T>, bool) {
    let normalized = code.trim().to_uppercase();
    match T::lookup(&normalized) {
        Some(value) => (Categorical::Known(value), true),
        None => (Categorical::Raw(code.trim().to_string()), false),
    }
}

/// Lenient mapping of an optional cell: unknown codes are stored as-is
pub fn map_optional<T: CodeTable>(code: Option<&str>) -> Option<String> {
    code.map(|c| map_code::<T>(c).0.into_label())
}

/// Household relation with a role default for missing or unknown codes
pub fn map_relation(code: Option<&str>, default: FamilyRelation) -> FamilyRelation {
    match code.map(map_code::<FamilyRelation>) {
        Some((Categorical::Known(relation), _)) => relation,
        _ => default,
    }
}

impl CodeTable for Sex {
    fn lookup(code: &str) -> Option<Self> {
        match code {
            "LK" => Some(Sex::Male),
            "PR" => Some(Sex::Female),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        self.as_str()
    }
}

impl CodeTable for Religion {
    fn lookup(code: &str) -> Option<Self> {
        match code {
            "ISLAM" => Some(Religion::Islam),
            "KRISTEN" => Some(Religion::Kristen),
            "KATHOLIK" | "KATOLIK" => Some(Religion::Katolik),
            "HINDU" => Some(Religion::Hindu),
            "BUDHA" | "BUDDHA" => Some(Religion::Buddha),
            "KHONGHUCU" | "KONGHUCU" => Some(Religion::Khonghucu),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        self.as_str()
    }
}

impl CodeTable for MaritalStatus {
    fn lookup(code: &str) -> Option<Self> {
        match code {
            "KAWIN" => Some(MaritalStatus::Married),
            "BLM.KAWIN" => Some(MaritalStatus::Single),
            "CERAI MATI" => Some(MaritalStatus::Widowed),
            "CERAI HIDUP" => Some(MaritalStatus::Divorced),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        self.as_str()
    }
}

impl CodeTable for Education {
    fn lookup(code: &str) -> Option<Self> {
        match code {
            "SLTA/SEDERAJAT" => Some(Education::SeniorHigh),
            "SLTP/SEDERAJAT" => Some(Education::JuniorHigh),
            "TDK/BLM. SEKOLAH" | "BLM. TAMAT SD/SDRJT" => Some(Education::None),
            "TAMAT SD/SDRJT" => Some(Education::Elementary),
            "DIPL.IV/S1" => Some(Education::Bachelor),
            "AKDM/DIPL.III/SRJN, MUDA" => Some(Education::D3),
            "STRATA II" => Some(Education::Master),
            "STRATA III" => Some(Education::Doctorate),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        self.as_str()
    }
}

impl CodeTable for FamilyRelation {
    fn lookup(code: &str) -> Option<Self> {
        match code {
            "KEP. KELUARGA" => Some(FamilyRelation::Head),
            "ISTRI" => Some(FamilyRelation::Spouse),
            "ANAK" => Some(FamilyRelation::Child),
            "FAMILI LAIN" => Some(FamilyRelation::OtherRelative),
            "CUCU" => Some(FamilyRelation::Grandchild),
            "ORANG TUA" => Some(FamilyRelation::Parent),
            "MERTUA" => Some(FamilyRelation::ParentInLaw),
            "MENANTU" => Some(FamilyRelation::ChildInLaw),
            "LAINNYA" => Some(FamilyRelation::Other),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        self.as_str()
    }
}
