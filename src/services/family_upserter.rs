//! Family-unit upserter
//!
//! Writes one family group (all rows sharing a family card number) inside a
//! single transaction. The first row of a new group is the head of household.

use std::collections::HashMap;
use std::time::Duration;

use chrono::NaiveDate;
use tracing::debug;
use uuid::Uuid;

use super::civil_store::{with_family_transaction, CivilStore};
use super::code_mapping::{map_optional, map_relation};
use super::import_error::{bounded, ImportError, ImportResult};
use super::reference_resolver::{normalize_hamlet_name, pad_number, ReferenceCache};
use super::row_validator::ResidentRecord;
use crate::types::{
    CellValue, Education, FamilyCardUpsert, FamilyRelation, MaritalStatus, Religion, ResidentUpsert, Sex,
};

/// Largest Excel serial that is still a valid date (9999-12-31)
const MAX_EXCEL_SERIAL: f64 = 2_958_465.0;

fn from_excel_serial(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || !(1.0..=MAX_EXCEL_SERIAL).contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(chrono::Duration::days(serial.floor() as i64))
}

/// Parse a birth date cell: native date, Excel serial, or dd-mm-yyyy text
/// (yyyy-mm-dd and dd/mm/yyyy are accepted as well).
pub fn parse_birth_date(cell: &CellValue) -> Option<NaiveDate> {
    match cell {
        CellValue::Empty => None,
        CellValue::Date(date) => Some(*date),
        CellValue::Integer(serial) => from_excel_serial(*serial as f64),
        CellValue::Number(serial) => from_excel_serial(*serial),
        CellValue::Text(text) => {
            let text = text.trim();
            ["%d-%m-%Y", "%Y-%m-%d", "%d/%m/%Y"]
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
                .or_else(|| text.parse::<f64>().ok().and_then(from_excel_serial))
        }
    }
}

/// Postal address of a family card
pub fn compose_address(unit: &str, group: &str, hamlet: &str, locality: &str) -> String {
    format!("RT {} RW {} Dukuh {} Desa {}", unit, group, hamlet, locality)
}

fn resident_upsert(record: &ResidentRecord, default_relation: FamilyRelation) -> ImportResult<ResidentUpsert> {
    let birth_date = parse_birth_date(&record.birth_date).ok_or_else(|| ImportError::InvalidBirthDate {
        nik: record.nik.clone(),
        value: record.birth_date.to_string(),
    })?;

    Ok(ResidentUpsert {
        identity_number: record.nik.clone(),
        name: record.name.clone(),
        birth_place: record.birth_place.clone(),
        birth_date,
        sex: map_optional::<Sex>(record.sex_code.as_deref()),
        religion: map_optional::<Religion>(record.religion_code.as_deref()),
        marital_status: map_optional::<MaritalStatus>(record.marital_code.as_deref()),
        education: map_optional::<Education>(record.education_code.as_deref()),
        occupation: record.occupation.clone(),
        relation_to_household: map_relation(record.relation_code.as_deref(), default_relation)
            .as_str()
            .to_string(),
    })
}

/// Family card already written by this job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FamilyEntry {
    pub card_id: Uuid,
    pub head_id: Option<Uuid>,
}

/// Family card number → card written earlier in the same job
#[derive(Debug, Default)]
pub struct FamilyCache {
    entries: HashMap<String, FamilyEntry>,
}

impl FamilyCache {
    pub fn get(&self, family_card_number: &str) -> Option<FamilyEntry> {
        self.entries.get(family_card_number).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// How the family card is obtained inside the transaction
#[derive(Debug)]
enum CardStep {
    Upsert(FamilyCardUpsert),
    /// Written by an earlier chunk of the same job
    Existing(Uuid),
}

/// Everything one family transaction writes, built before it opens
#[derive(Debug)]
struct FamilyPlan {
    card: CardStep,
    head: Option<ResidentUpsert>,
    members: Vec<ResidentUpsert>,
}

/// Outcome of one family group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FamilyWrite {
    pub card_id: Uuid,
    pub head_id: Option<Uuid>,
    pub residents: usize,
    /// A different resident was head before and has been demoted
    pub demoted_head: Option<Uuid>,
}

async fn apply_plan(
    tx: &mut dyn super::civil_store::FamilyTransaction,
    plan: FamilyPlan,
    limit: Duration,
) -> ImportResult<FamilyWrite> {
    let card_id = match &plan.card {
        CardStep::Upsert(card) => bounded("upsert_family_card", limit, tx.upsert_family_card(card)).await?,
        CardStep::Existing(id) => *id,
    };

    let mut residents = 0;
    let mut head_id = None;
    let mut demoted_head = None;

    if let Some(head) = &plan.head {
        let id = bounded("upsert_resident", limit, tx.upsert_resident(card_id, head)).await?;
        residents += 1;

        let previous = bounded("family_head", limit, tx.family_head(card_id)).await?;
        if let Some(previous) = previous.filter(|p| *p != id) {
            let changed = bounded(
                "set_relation",
                limit,
                tx.set_relation(card_id, previous, FamilyRelation::Head, FamilyRelation::OtherRelative),
            )
            .await?;
            if changed {
                demoted_head = Some(previous);
            }
        }

        bounded("set_family_head", limit, tx.set_family_head(card_id, id)).await?;
        head_id = Some(id);
    }

    for member in &plan.members {
        bounded("upsert_resident", limit, tx.upsert_resident(card_id, member)).await?;
        residents += 1;
    }

    Ok(FamilyWrite {
        card_id,
        head_id,
        residents,
        demoted_head,
    })
}

fn names_head(record: &ResidentRecord) -> bool {
    map_relation(record.relation_code.as_deref(), FamilyRelation::OtherRelative) == FamilyRelation::Head
}

/// Rows for a card written by an earlier chunk. The first row is not
/// promoted; a row explicitly coded Kepala Keluarga takes over as head.
fn continuation_plan(card_id: Uuid, members: &[ResidentRecord]) -> ImportResult<FamilyPlan> {
    let head_index = members.iter().position(names_head);

    let mut head = None;
    let mut others = Vec::with_capacity(members.len());
    for (index, record) in members.iter().enumerate() {
        if Some(index) == head_index {
            head = Some(resident_upsert(record, FamilyRelation::Head)?);
        } else {
            let mut resident = resident_upsert(record, FamilyRelation::OtherRelative)?;
            // one head per card
            if names_head(record) {
                resident.relation_to_household = FamilyRelation::OtherRelative.as_str().to_string();
            }
            others.push(resident);
        }
    }

    Ok(FamilyPlan {
        card: CardStep::Existing(card_id),
        head,
        members: others,
    })
}

/// Writes family groups for one import job, owning the job's caches
pub struct FamilyUpserter<'a> {
    store: &'a dyn CivilStore,
    references: ReferenceCache,
    families: FamilyCache,
    locality: String,
    limit: Duration,
}

impl<'a> FamilyUpserter<'a> {
    pub fn new(store: &'a dyn CivilStore, locality: impl Into<String>, limit: Duration) -> Self {
        Self {
            store,
            references: ReferenceCache::new(),
            families: FamilyCache::default(),
            locality: locality.into(),
            limit,
        }
    }

    /// Preload the hierarchy; a failure here is fatal for the job
    pub async fn prepare(&mut self) -> ImportResult<()> {
        self.references.preload(self.store, self.limit).await
    }

    pub fn families(&self) -> &FamilyCache {
        &self.families
    }

    /// Write one family group. `members` must be non-empty and share
    /// `family_card_number`; nothing persists when this returns an error.
    pub async fn upsert_family(
        &mut self,
        family_card_number: &str,
        members: &[ResidentRecord],
    ) -> ImportResult<FamilyWrite> {
        let Some(first) = members.first() else {
            return Err(ImportError::Store(anyhow::anyhow!(
                "Keluarga {} tidak memiliki anggota",
                family_card_number
            )));
        };

        let plan = match self.families.get(family_card_number) {
            Some(entry) => {
                debug!(
                    "Family {} continues from an earlier chunk, adding {} member(s)",
                    family_card_number,
                    members.len()
                );
                continuation_plan(entry.card_id, members)?
            }
            None => self.new_family_plan(family_card_number, first, &members[1..]).await?,
        };

        let limit = self.limit;
        let previous_head = self.families.get(family_card_number).and_then(|e| e.head_id);
        let write = with_family_transaction(self.store, limit, move |tx| {
            Box::pin(async move { apply_plan(tx, plan, limit).await })
        })
        .await?;

        if let Some(demoted) = write.demoted_head {
            debug!("Family {}: previous head {} demoted", family_card_number, demoted);
        }

        self.families.entries.insert(
            family_card_number.to_string(),
            FamilyEntry {
                card_id: write.card_id,
                head_id: write.head_id.or(previous_head),
            },
        );
        Ok(write)
    }

    async fn new_family_plan(
        &mut self,
        family_card_number: &str,
        head: &ResidentRecord,
        others: &[ResidentRecord],
    ) -> ImportResult<FamilyPlan> {
        let hamlet = normalize_hamlet_name(&head.hamlet);
        let group = pad_number(&head.group_number);
        let unit = pad_number(&head.unit_number);

        let placement = self
            .references
            .resolve_placement(self.store, self.limit, &hamlet, &group, &unit)
            .await?;
        let address = compose_address(&unit, &group, &hamlet, &self.locality);

        Ok(FamilyPlan {
            card: CardStep::Upsert(FamilyCardUpsert {
                family_card_number: family_card_number.to_string(),
                address,
                placement,
            }),
            head: Some(resident_upsert(head, FamilyRelation::Head)?),
            members: others
                .iter()
                .map(|m| resident_upsert(m, FamilyRelation::OtherRelative))
                .collect::<ImportResult<_>>()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::civil_store::MemoryCivilStore;
    use crate::services::row_validator::validate_row;
    use crate::types::{columns, RawRow};

    const LIMIT: Duration = Duration::from_secs(1);
    const KK: &str = "3509010101010099";

    fn record(row: usize, nik: &str, shdk: &str) -> ResidentRecord {
        let raw = RawRow::new()
            .with(columns::NIK, nik)
            .with(columns::NAMA, "Warga")
            .with(columns::NO_KK, KK)
            .with(columns::ALAMAT, "Jati")
            .with(columns::NO_RW, "1")
            .with(columns::NO_RT, "2")
            .with(columns::TGL_LHR, "17-08-1975")
            .with(columns::JK, "LK")
            .with(columns::STATUS, "KAWIN")
            .with(columns::SHDK, shdk);
        validate_row(row, &raw).unwrap()
    }

    #[test]
    fn test_parse_birth_date_formats() {
        let expected = NaiveDate::from_ymd_opt(1975, 8, 17);
        assert_eq!(parse_birth_date(&CellValue::Text("17-08-1975".into())), expected);
        assert_eq!(parse_birth_date(&CellValue::Text("1975-08-17".into())), expected);
        assert_eq!(parse_birth_date(&CellValue::Text("17/08/1975".into())), expected);
        assert_eq!(parse_birth_date(&CellValue::Date(expected.unwrap())), expected);
        // 27623 days after 1899-12-30
        assert_eq!(parse_birth_date(&CellValue::Number(27623.0)), expected);
        assert_eq!(parse_birth_date(&CellValue::Integer(27623)), expected);
    }

    #[test]
    fn test_parse_birth_date_rejects_garbage() {
        assert_eq!(parse_birth_date(&CellValue::Text("31-02-1975".into())), None);
        assert_eq!(parse_birth_date(&CellValue::Text("kemarin".into())), None);
        assert_eq!(parse_birth_date(&CellValue::Number(-4.0)), None);
        assert_eq!(parse_birth_date(&CellValue::Empty), None);
    }

    #[test]
    fn test_compose_address() {
        assert_eq!(compose_address("02", "01", "JATI", "Cepoko"), "RT 02 RW 01 Dukuh JATI Desa Cepoko");
    }

    #[tokio::test]
    async fn test_head_and_member_written_together() {
        let store = MemoryCivilStore::new();
        let mut upserter = FamilyUpserter::new(&store, "Cepoko", LIMIT);

        let members = vec![record(1, "1234567890123456", "KEP. KELUARGA"), record(2, "1234567890123457", "ANAK")];
        let write = upserter.upsert_family(KK, &members).await.unwrap();

        let card = store.family_card(KK).unwrap();
        let head = store.resident("1234567890123456").unwrap();
        let child = store.resident("1234567890123457").unwrap();
        assert_eq!(card.head_of_household_resident_id, Some(head.id));
        assert_eq!(write.head_id, Some(head.id));
        assert_eq!(head.relation_to_household, "Kepala Keluarga");
        assert_eq!(head.sex.as_deref(), Some("Laki-laki"));
        assert_eq!(head.marital_status.as_deref(), Some("Kawin"));
        assert_eq!(child.relation_to_household, "Anak");
        assert_eq!(child.family_card_id, card.id);
        assert!(card.address.contains("RT 02 RW 01"));
        assert_eq!(upserter.families().get(KK).map(|e| e.card_id), Some(card.id));
    }

    #[tokio::test]
    async fn test_missing_relation_uses_role_default() {
        let store = MemoryCivilStore::new();
        let mut upserter = FamilyUpserter::new(&store, "Cepoko", LIMIT);

        let members = vec![record(1, "1234567890123456", ""), record(2, "1234567890123457", "")];
        upserter.upsert_family(KK, &members).await.unwrap();

        assert_eq!(store.resident("1234567890123456").unwrap().relation_to_household, "Kepala Keluarga");
        assert_eq!(store.resident("1234567890123457").unwrap().relation_to_household, "Famili Lain");
    }

    #[tokio::test]
    async fn test_invalid_birth_date_fails_group_before_writing() {
        let store = MemoryCivilStore::new();
        let mut upserter = FamilyUpserter::new(&store, "Cepoko", LIMIT);

        let mut child = record(2, "1234567890123457", "ANAK");
        child.birth_date = CellValue::Text("bukan tanggal".into());
        let err = upserter
            .upsert_family(KK, &[record(1, "1234567890123456", "KEP. KELUARGA"), child])
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Tanggal lahir tidak valid untuk NIK 1234567890123457: bukan tanggal");
        assert_eq!(store.resident_count(), 0);
        assert_eq!(store.family_card_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_member_rolls_back_whole_family() {
        let store = MemoryCivilStore::new();
        store.fail_resident_upsert("1234567890123457");
        let mut upserter = FamilyUpserter::new(&store, "Cepoko", LIMIT);

        let members = vec![record(1, "1234567890123456", "KEP. KELUARGA"), record(2, "1234567890123457", "ANAK")];
        assert!(upserter.upsert_family(KK, &members).await.is_err());

        assert_eq!(store.family_card_count(), 0);
        assert_eq!(store.resident_count(), 0);
        assert_eq!(store.calls().rollbacks, 1);
        assert!(upserter.families().is_empty());
    }

    #[tokio::test]
    async fn test_new_head_demotes_previous_head() {
        let store = MemoryCivilStore::new();

        let mut first = FamilyUpserter::new(&store, "Cepoko", LIMIT);
        first.upsert_family(KK, &[record(1, "1234567890123456", "KEP. KELUARGA")]).await.unwrap();

        let mut second = FamilyUpserter::new(&store, "Cepoko", LIMIT);
        let write = second
            .upsert_family(KK, &[record(1, "1234567890123457", "KEP. KELUARGA")])
            .await
            .unwrap();

        let old_head = store.resident("1234567890123456").unwrap();
        let new_head = store.resident("1234567890123457").unwrap();
        assert_eq!(old_head.relation_to_household, "Famili Lain");
        assert_eq!(write.demoted_head, Some(old_head.id));
        assert_eq!(store.family_card(KK).unwrap().head_of_household_resident_id, Some(new_head.id));
    }

    #[tokio::test]
    async fn test_continuation_keeps_head() {
        let store = MemoryCivilStore::new();
        let mut upserter = FamilyUpserter::new(&store, "Cepoko", LIMIT);

        upserter.upsert_family(KK, &[record(1, "1234567890123456", "KEP. KELUARGA")]).await.unwrap();
        let write = upserter.upsert_family(KK, &[record(2, "1234567890123457", "")]).await.unwrap();

        let head = store.resident("1234567890123456").unwrap();
        let member = store.resident("1234567890123457").unwrap();
        assert_eq!(write.head_id, None);
        assert_eq!(store.family_card(KK).unwrap().head_of_household_resident_id, Some(head.id));
        assert_eq!(member.relation_to_household, "Famili Lain");
        assert_eq!(upserter.families().get(KK).and_then(|e| e.head_id), Some(head.id));
        assert_eq!(store.calls().card_upserts, 1);
    }

    #[tokio::test]
    async fn test_continuation_promotes_explicit_head() {
        let store = MemoryCivilStore::new();
        let mut upserter = FamilyUpserter::new(&store, "Cepoko", LIMIT);

        upserter.upsert_family(KK, &[record(1, "1234567890123457", "ANAK")]).await.unwrap();
        let child = store.resident("1234567890123457").unwrap();
        assert_eq!(store.family_card(KK).unwrap().head_of_household_resident_id, Some(child.id));

        let write = upserter
            .upsert_family(
                KK,
                &[record(2, "1234567890123458", "ISTRI"), record(3, "1234567890123456", "KEP. KELUARGA")],
            )
            .await
            .unwrap();

        let head = store.resident("1234567890123456").unwrap();
        assert_eq!(write.head_id, Some(head.id));
        assert_eq!(write.residents, 2);
        assert_eq!(head.relation_to_household, "Kepala Keluarga");
        assert_eq!(store.family_card(KK).unwrap().head_of_household_resident_id, Some(head.id));
        assert_eq!(store.resident("1234567890123457").unwrap().relation_to_household, "Anak");
        assert_eq!(store.resident("1234567890123458").unwrap().relation_to_household, "Istri");
        assert_eq!(upserter.families().get(KK).and_then(|e| e.head_id), Some(head.id));
    }

    #[tokio::test]
    async fn test_continuation_keeps_one_explicit_head() {
        let store = MemoryCivilStore::new();
        let mut upserter = FamilyUpserter::new(&store, "Cepoko", LIMIT);

        upserter.upsert_family(KK, &[record(1, "1234567890123456", "KEP. KELUARGA")]).await.unwrap();
        upserter
            .upsert_family(
                KK,
                &[
                    record(2, "1234567890123457", "KEP. KELUARGA"),
                    record(3, "1234567890123458", "KEP. KELUARGA"),
                ],
            )
            .await
            .unwrap();

        let heads: Vec<String> = ["1234567890123456", "1234567890123457", "1234567890123458"]
            .iter()
            .map(|nik| store.resident(nik).unwrap())
            .filter(|r| r.relation_to_household == "Kepala Keluarga")
            .map(|r| r.identity_number)
            .collect();
        assert_eq!(heads, vec!["1234567890123457".to_string()]);
        let new_head = store.resident("1234567890123457").unwrap();
        assert_eq!(store.family_card(KK).unwrap().head_of_household_resident_id, Some(new_head.id));
    }
}
