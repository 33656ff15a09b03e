//! In-memory civil store
//!
//! Same natural-key rules as the database. A transaction works on a copy of
//! the state and swaps it in on commit, so only one family transaction may be
//! open at a time (the import runs family groups sequentially).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{CivilStore, FamilyTransaction, GROUP_OUTSIDE_HAMLET, UNIT_OUTSIDE_GROUP};
use crate::types::{
    FamilyCard, FamilyCardUpsert, FamilyRelation, Hamlet, NeighborhoodGroup, NeighborhoodUnit, Resident,
    ResidentUpsert,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    hamlets: HashMap<String, Hamlet>,
    groups: HashMap<(String, Uuid), NeighborhoodGroup>,
    units: HashMap<(String, Uuid), NeighborhoodUnit>,
    cards: HashMap<String, FamilyCard>,
    residents: HashMap<String, Resident>,
}

impl MemoryState {
    fn check_placement(&self, card: &FamilyCardUpsert) -> Result<()> {
        let placement = &card.placement;
        let unit_in_group = self
            .units
            .values()
            .any(|u| u.id == placement.unit_id && u.group_id == placement.group_id);
        if !unit_in_group {
            bail!(UNIT_OUTSIDE_GROUP);
        }
        let group_in_hamlet = self
            .groups
            .values()
            .any(|g| g.id == placement.group_id && g.hamlet_id == placement.hamlet_id);
        if !group_in_hamlet {
            bail!(GROUP_OUTSIDE_HAMLET);
        }
        Ok(())
    }

    fn card_by_id_mut(&mut self, id: Uuid) -> Option<&mut FamilyCard> {
        self.cards.values_mut().find(|c| c.id == id)
    }
}

#[derive(Debug, Default)]
struct StoreCalls {
    loads: AtomicUsize,
    hamlet_upserts: AtomicUsize,
    group_upserts: AtomicUsize,
    unit_upserts: AtomicUsize,
    card_upserts: AtomicUsize,
    resident_upserts: AtomicUsize,
    begins: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

/// Snapshot of the per-operation call counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub loads: usize,
    pub hamlet_upserts: usize,
    pub group_upserts: usize,
    pub unit_upserts: usize,
    pub card_upserts: usize,
    pub resident_upserts: usize,
    pub begins: usize,
    pub commits: usize,
    pub rollbacks: usize,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Civil store kept in process memory, with call counting
#[derive(Debug, Clone, Default)]
pub struct MemoryCivilStore {
    state: Arc<Mutex<MemoryState>>,
    calls: Arc<StoreCalls>,
    failing_niks: Arc<Mutex<HashSet<String>>>,
    slow_niks: Arc<Mutex<HashMap<String, Duration>>>,
    loads_unavailable: Arc<AtomicBool>,
}

impl MemoryCivilStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> CallCounts {
        let c = &self.calls;
        let load = |counter: &AtomicUsize| counter.load(Ordering::Relaxed);
        CallCounts {
            loads: load(&c.loads),
            hamlet_upserts: load(&c.hamlet_upserts),
            group_upserts: load(&c.group_upserts),
            unit_upserts: load(&c.unit_upserts),
            card_upserts: load(&c.card_upserts),
            resident_upserts: load(&c.resident_upserts),
            begins: load(&c.begins),
            commits: load(&c.commits),
            rollbacks: load(&c.rollbacks),
        }
    }

    /// Make every resident upsert for `nik` fail, to exercise rollback
    pub fn fail_resident_upsert(&self, nik: &str) {
        self.failing_niks.lock().insert(nik.to_string());
    }

    /// Make every resident upsert for `nik` take `delay`, to exercise timeouts
    pub fn delay_resident_upsert(&self, nik: &str, delay: Duration) {
        self.slow_niks.lock().insert(nik.to_string(), delay);
    }

    /// Make reference loading fail, as when the database is unreachable
    pub fn fail_reference_loads(&self) {
        self.loads_unavailable.store(true, Ordering::Relaxed);
    }

    fn check_available(&self) -> Result<()> {
        if self.loads_unavailable.load(Ordering::Relaxed) {
            bail!("store unavailable");
        }
        Ok(())
    }

    pub fn family_card(&self, family_card_number: &str) -> Option<FamilyCard> {
        self.state.lock().cards.get(family_card_number).cloned()
    }

    pub fn resident(&self, nik: &str) -> Option<Resident> {
        self.state.lock().residents.get(nik).cloned()
    }

    pub fn hamlet_count(&self) -> usize {
        self.state.lock().hamlets.len()
    }

    pub fn group_count(&self) -> usize {
        self.state.lock().groups.len()
    }

    pub fn unit_count(&self) -> usize {
        self.state.lock().units.len()
    }

    pub fn family_card_count(&self) -> usize {
        self.state.lock().cards.len()
    }

    pub fn resident_count(&self) -> usize {
        self.state.lock().residents.len()
    }
}

#[async_trait]
impl CivilStore for MemoryCivilStore {
    async fn load_hamlets(&self) -> Result<Vec<Hamlet>> {
        bump(&self.calls.loads);
        self.check_available()?;
        Ok(self.state.lock().hamlets.values().cloned().collect())
    }

    async fn load_groups(&self) -> Result<Vec<NeighborhoodGroup>> {
        bump(&self.calls.loads);
        self.check_available()?;
        Ok(self.state.lock().groups.values().cloned().collect())
    }

    async fn load_units(&self) -> Result<Vec<NeighborhoodUnit>> {
        bump(&self.calls.loads);
        self.check_available()?;
        Ok(self.state.lock().units.values().cloned().collect())
    }

    async fn upsert_hamlet(&self, name: &str) -> Result<Uuid> {
        bump(&self.calls.hamlet_upserts);
        let mut state = self.state.lock();
        let hamlet = state.hamlets.entry(name.to_string()).or_insert_with(|| Hamlet {
            id: Uuid::new_v4(),
            name: name.to_string(),
        });
        Ok(hamlet.id)
    }

    async fn upsert_group(&self, number: &str, hamlet_id: Uuid) -> Result<Uuid> {
        bump(&self.calls.group_upserts);
        let mut state = self.state.lock();
        if !state.hamlets.values().any(|h| h.id == hamlet_id) {
            bail!("Dukuh {} tidak ditemukan", hamlet_id);
        }
        let group = state
            .groups
            .entry((number.to_string(), hamlet_id))
            .or_insert_with(|| NeighborhoodGroup {
                id: Uuid::new_v4(),
                number: number.to_string(),
                hamlet_id,
            });
        Ok(group.id)
    }

    async fn upsert_unit(&self, number: &str, group_id: Uuid) -> Result<Uuid> {
        bump(&self.calls.unit_upserts);
        let mut state = self.state.lock();
        if !state.groups.values().any(|g| g.id == group_id) {
            bail!("RW {} tidak ditemukan", group_id);
        }
        let unit = state
            .units
            .entry((number.to_string(), group_id))
            .or_insert_with(|| NeighborhoodUnit {
                id: Uuid::new_v4(),
                number: number.to_string(),
                group_id,
            });
        Ok(unit.id)
    }

    async fn begin(&self) -> Result<Box<dyn FamilyTransaction>> {
        bump(&self.calls.begins);
        let working = self.state.lock().clone();
        Ok(Box::new(MemoryTransaction {
            working,
            store: self.clone(),
        }))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryTransaction {
    working: MemoryState,
    store: MemoryCivilStore,
}

#[async_trait]
impl FamilyTransaction for MemoryTransaction {
    async fn upsert_family_card(&mut self, card: &FamilyCardUpsert) -> Result<Uuid> {
        bump(&self.store.calls.card_upserts);
        self.working.check_placement(card)?;

        let placement = card.placement;
        let entry = self
            .working
            .cards
            .entry(card.family_card_number.clone())
            .or_insert_with(|| FamilyCard {
                id: Uuid::new_v4(),
                family_card_number: card.family_card_number.clone(),
                address: String::new(),
                hamlet_id: placement.hamlet_id,
                group_id: placement.group_id,
                unit_id: placement.unit_id,
                head_of_household_resident_id: None,
            });
        entry.address = card.address.clone();
        entry.hamlet_id = placement.hamlet_id;
        entry.group_id = placement.group_id;
        entry.unit_id = placement.unit_id;
        Ok(entry.id)
    }

    async fn upsert_resident(&mut self, family_card_id: Uuid, resident: &ResidentUpsert) -> Result<Uuid> {
        bump(&self.store.calls.resident_upserts);
        let delay = self.store.slow_niks.lock().get(&resident.identity_number).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.store.failing_niks.lock().contains(&resident.identity_number) {
            bail!("simulated failure for NIK {}", resident.identity_number);
        }
        if !self.working.cards.values().any(|c| c.id == family_card_id) {
            bail!("Kartu keluarga {} tidak ditemukan", family_card_id);
        }

        let entry = self
            .working
            .residents
            .entry(resident.identity_number.clone())
            .or_insert_with(|| Resident {
                id: Uuid::new_v4(),
                identity_number: resident.identity_number.clone(),
                name: String::new(),
                birth_place: None,
                birth_date: resident.birth_date,
                sex: None,
                religion: None,
                marital_status: None,
                education: None,
                occupation: None,
                relation_to_household: String::new(),
                family_card_id,
                linked_user_id: None,
            });
        entry.name = resident.name.clone();
        entry.birth_place = resident.birth_place.clone();
        entry.birth_date = resident.birth_date;
        entry.sex = resident.sex.clone();
        entry.religion = resident.religion.clone();
        entry.marital_status = resident.marital_status.clone();
        entry.education = resident.education.clone();
        entry.occupation = resident.occupation.clone();
        entry.relation_to_household = resident.relation_to_household.clone();
        entry.family_card_id = family_card_id;
        Ok(entry.id)
    }

    async fn family_head(&mut self, family_card_id: Uuid) -> Result<Option<Uuid>> {
        Ok(self
            .working
            .cards
            .values()
            .find(|c| c.id == family_card_id)
            .and_then(|c| c.head_of_household_resident_id))
    }

    async fn set_family_head(&mut self, family_card_id: Uuid, resident_id: Uuid) -> Result<()> {
        match self.working.card_by_id_mut(family_card_id) {
            Some(card) => {
                card.head_of_household_resident_id = Some(resident_id);
                Ok(())
            }
            None => bail!("Kartu keluarga {} tidak ditemukan", family_card_id),
        }
    }

    async fn set_relation(
        &mut self,
        family_card_id: Uuid,
        resident_id: Uuid,
        from: FamilyRelation,
        to: FamilyRelation,
    ) -> Result<bool> {
        let member = self.working.residents.values_mut().find(|r| {
            r.id == resident_id && r.family_card_id == family_card_id && r.relation_to_household == from.as_str()
        });
        match member {
            Some(resident) => {
                resident.relation_to_household = to.as_str().to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        bump(&self.store.calls.commits);
        let MemoryTransaction { working, store } = *self;
        *store.state.lock() = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        bump(&self.store.calls.rollbacks);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Placement;

    #[tokio::test]
    async fn test_hierarchy_upsert_is_idempotent() {
        let store = MemoryCivilStore::new();
        let a = store.upsert_hamlet("JATI").await.unwrap();
        let b = store.upsert_hamlet("JATI").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.hamlet_count(), 1);
        assert_eq!(store.calls().hamlet_upserts, 2);
    }

    #[tokio::test]
    async fn test_same_group_number_in_two_hamlets() {
        let store = MemoryCivilStore::new();
        let jati = store.upsert_hamlet("JATI").await.unwrap();
        let krajan = store.upsert_hamlet("KRAJAN").await.unwrap();
        let g1 = store.upsert_group("01", jati).await.unwrap();
        let g2 = store.upsert_group("01", krajan).await.unwrap();
        assert_ne!(g1, g2);
        assert_eq!(store.group_count(), 2);
    }

    #[tokio::test]
    async fn test_group_requires_existing_hamlet() {
        let store = MemoryCivilStore::new();
        assert!(store.upsert_group("01", Uuid::new_v4()).await.is_err());
    }

    #[tokio::test]
    async fn test_card_rejects_foreign_unit() {
        let store = MemoryCivilStore::new();
        let jati = store.upsert_hamlet("JATI").await.unwrap();
        let g1 = store.upsert_group("01", jati).await.unwrap();
        let g2 = store.upsert_group("02", jati).await.unwrap();
        let unit_of_g2 = store.upsert_unit("01", g2).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let err = tx
            .upsert_family_card(&FamilyCardUpsert {
                family_card_number: "3509010101010099".into(),
                address: String::new(),
                placement: Placement { hamlet_id: jati, group_id: g1, unit_id: unit_of_g2 },
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), UNIT_OUTSIDE_GROUP);
    }

    #[tokio::test]
    async fn test_uncommitted_transaction_is_invisible() {
        let store = MemoryCivilStore::new();
        let hamlet_id = store.upsert_hamlet("JATI").await.unwrap();
        let group_id = store.upsert_group("01", hamlet_id).await.unwrap();
        let unit_id = store.upsert_unit("02", group_id).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.upsert_family_card(&FamilyCardUpsert {
            family_card_number: "3509010101010099".into(),
            address: String::new(),
            placement: Placement { hamlet_id, group_id, unit_id },
        })
        .await
        .unwrap();
        assert_eq!(store.family_card_count(), 0);
        tx.rollback().await.unwrap();
        assert_eq!(store.family_card_count(), 0);
    }
}
