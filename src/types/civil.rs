//! Civil registry types: administrative hierarchy, family cards and residents

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// =============================================================================
// ADMINISTRATIVE HIERARCHY
// =============================================================================

/// Hamlet (dukuh), top of the village hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Hamlet {
    pub id: Uuid,
    #[sqlx(rename = "nama")]
    pub name: String,
}

/// Neighborhood group (RW), unique by number within a hamlet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct NeighborhoodGroup {
    pub id: Uuid,
    #[sqlx(rename = "nomor")]
    pub number: String,
    #[sqlx(rename = "dukuh_id")]
    pub hamlet_id: Uuid,
}

/// Neighborhood unit (RT), unique by number within a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct NeighborhoodUnit {
    pub id: Uuid,
    #[sqlx(rename = "nomor")]
    pub number: String,
    #[sqlx(rename = "rw_id")]
    pub group_id: Uuid,
}

/// Resolved placement of a family card in the hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub hamlet_id: Uuid,
    pub group_id: Uuid,
    pub unit_id: Uuid,
}

// =============================================================================
// FAMILY CARD / RESIDENT
// =============================================================================

/// Family card (kartu keluarga)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyCard {
    pub id: Uuid,
    pub family_card_number: String,
    pub address: String,
    pub hamlet_id: Uuid,
    pub group_id: Uuid,
    pub unit_id: Uuid,
    pub head_of_household_resident_id: Option<Uuid>,
}

/// Resident (penduduk)
///
/// Categorical columns hold the canonical label when the source code was
/// recognized, otherwise the raw source value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resident {
    pub id: Uuid,
    pub identity_number: String,
    pub name: String,
    pub birth_place: Option<String>,
    pub birth_date: NaiveDate,
    pub sex: Option<String>,
    pub religion: Option<String>,
    pub marital_status: Option<String>,
    pub education: Option<String>,
    pub occupation: Option<String>,
    pub relation_to_household: String,
    pub family_card_id: Uuid,
    pub linked_user_id: Option<Uuid>,
}

/// Write model for the family card upsert (keyed by `family_card_number`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyCardUpsert {
    pub family_card_number: String,
    pub address: String,
    pub placement: Placement,
}

/// Write model for the resident upsert (keyed by `identity_number`).
/// The family card id is supplied by the transaction that owns the card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResidentUpsert {
    pub identity_number: String,
    pub name: String,
    pub birth_place: Option<String>,
    pub birth_date: NaiveDate,
    pub sex: Option<String>,
    pub religion: Option<String>,
    pub marital_status: Option<String>,
    pub education: Option<String>,
    pub occupation: Option<String>,
    pub relation_to_household: String,
}

// =============================================================================
// CATEGORICAL VALUES
// =============================================================================

/// Sex (jenis kelamin)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sex {
    #[serde(rename = "Laki-laki")]
    Male,
    #[serde(rename = "Perempuan")]
    Female,
}

impl Sex {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sex::Male => "Laki-laki",
            Sex::Female => "Perempuan",
        }
    }
}

/// Religion (agama)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Religion {
    Islam,
    Kristen,
    Katolik,
    Hindu,
    Buddha,
    Khonghucu,
}

impl Religion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Religion::Islam => "Islam",
            Religion::Kristen => "Kristen",
            Religion::Katolik => "Katolik",
            Religion::Hindu => "Hindu",
            Religion::Buddha => "Buddha",
            Religion::Khonghucu => "Khonghucu",
        }
    }
}

/// Marital status (status perkawinan)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaritalStatus {
    #[serde(rename = "Belum Kawin")]
    Single,
    #[serde(rename = "Kawin")]
    Married,
    #[serde(rename = "Cerai Hidup")]
    Divorced,
    #[serde(rename = "Cerai Mati")]
    Widowed,
}

impl MaritalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaritalStatus::Single => "Belum Kawin",
            MaritalStatus::Married => "Kawin",
            MaritalStatus::Divorced => "Cerai Hidup",
            MaritalStatus::Widowed => "Cerai Mati",
        }
    }
}

/// Highest completed education (pendidikan)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Education {
    #[serde(rename = "Tidak/Belum Sekolah")]
    None,
    #[serde(rename = "SD")]
    Elementary,
    #[serde(rename = "SMP")]
    JuniorHigh,
    #[serde(rename = "SMA/SMK")]
    SeniorHigh,
    D1,
    D2,
    D3,
    #[serde(rename = "D4/S1")]
    Bachelor,
    #[serde(rename = "S2")]
    Master,
    #[serde(rename = "S3")]
    Doctorate,
}

impl Education {
    pub fn as_str(&self) -> &'static str {
        match self {
            Education::None => "Tidak/Belum Sekolah",
            Education::Elementary => "SD",
            Education::JuniorHigh => "SMP",
            Education::SeniorHigh => "SMA/SMK",
            Education::D1 => "D1",
            Education::D2 => "D2",
            Education::D3 => "D3",
            Education::Bachelor => "D4/S1",
            Education::Master => "S2",
            Education::Doctorate => "S3",
        }
    }
}

/// Relation to the head of household (SHDK)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FamilyRelation {
    #[serde(rename = "Kepala Keluarga")]
    Head,
    #[serde(rename = "Istri")]
    Spouse,
    #[serde(rename = "Anak")]
    Child,
    #[serde(rename = "Famili Lain")]
    OtherRelative,
    #[serde(rename = "Cucu")]
    Grandchild,
    #[serde(rename = "Orang Tua")]
    Parent,
    #[serde(rename = "Mertua")]
    ParentInLaw,
    #[serde(rename = "Menantu")]
    ChildInLaw,
    #[serde(rename = "Lainnya")]
    Other,
}

impl FamilyRelation {
    pub fn as_str(&self) -> &'static str {
        match self {
            FamilyRelation::Head => "Kepala Keluarga",
            FamilyRelation::Spouse => "Istri",
            FamilyRelation::Child => "Anak",
            FamilyRelation::OtherRelative => "Famili Lain",
            FamilyRelation::Grandchild => "Cucu",
            FamilyRelation::Parent => "Orang Tua",
            FamilyRelation::ParentInLaw => "Mertua",
            FamilyRelation::ChildInLaw => "Menantu",
            FamilyRelation::Other => "Lainnya",
        }
    }
}

impl Default for FamilyRelation {
    fn default() -> Self {
        FamilyRelation::OtherRelative
    }
}
