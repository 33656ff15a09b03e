//! Reference resolver for the dukuh / RW / RT hierarchy
//!
//! One [`ReferenceCache`] is owned by one import job. The first resolve call
//! preloads every known row; misses are upserted and remembered, so each
//! distinct natural key reaches the store at most once per job.

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;
use uuid::Uuid;

use super::civil_store::CivilStore;
use super::import_error::{bounded, ImportResult};
use crate::types::Placement;

const HAMLET_PREFIXES: &[&str] = &["DUKUH ", "DUSUN ", "DUKU "];

/// Trim, upper-case and strip a leading "DUKUH " / "DUSUN " prefix
pub fn normalize_hamlet_name(raw: &str) -> String {
    let upper = raw.trim().to_uppercase();
    for prefix in HAMLET_PREFIXES {
        if let Some(rest) = upper.strip_prefix(prefix) {
            return rest.trim().to_string();
        }
    }
    upper
}

/// Zero-pad an RW / RT number to two digits ("1" → "01")
pub fn pad_number(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.chars().all(|c| c.is_ascii_digit()) && !trimmed.is_empty() {
        format!("{:0>2}", trimmed)
    } else {
        trimmed.to_string()
    }
}

fn group_key(number: &str, hamlet_id: Uuid) -> String {
    format!("{}-{}", number, hamlet_id)
}

fn unit_key(number: &str, group_id: Uuid) -> String {
    format!("{}-{}", number, group_id)
}

/// Per-job lookup maps keyed by natural key
#[derive(Debug, Default)]
pub struct ReferenceCache {
    loaded: bool,
    hamlets: HashMap<String, Uuid>,
    groups: HashMap<String, Uuid>,
    units: HashMap<String, Uuid>,
}

impl ReferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Load all existing rows once. Errors here are outside any family group.
    pub async fn preload(&mut self, store: &dyn CivilStore, limit: Duration) -> ImportResult<()> {
        if self.loaded {
            return Ok(());
        }

        let hamlets = bounded("load_hamlets", limit, store.load_hamlets()).await?;
        let groups = bounded("load_groups", limit, store.load_groups()).await?;
        let units = bounded("load_units", limit, store.load_units()).await?;

        self.hamlets = hamlets.into_iter().map(|h| (h.name, h.id)).collect();
        self.groups = groups.into_iter().map(|g| (group_key(&g.number, g.hamlet_id), g.id)).collect();
        self.units = units.into_iter().map(|u| (unit_key(&u.number, u.group_id), u.id)).collect();
        self.loaded = true;

        debug!(
            "Reference cache loaded: {} dukuh, {} RW, {} RT",
            self.hamlets.len(),
            self.groups.len(),
            self.units.len()
        );
        Ok(())
    }

    /// `name` must already be normalized
    pub async fn resolve_hamlet(&mut self, store: &dyn CivilStore, limit: Duration, name: &str) -> ImportResult<Uuid> {
        self.preload(store, limit).await?;
        if let Some(id) = self.hamlets.get(name) {
            return Ok(*id);
        }
        let id = bounded("upsert_hamlet", limit, store.upsert_hamlet(name)).await?;
        self.hamlets.insert(name.to_string(), id);
        Ok(id)
    }

    /// `number` must already be padded
    pub async fn resolve_group(
        &mut self,
        store: &dyn CivilStore,
        limit: Duration,
        number: &str,
        hamlet_id: Uuid,
    ) -> ImportResult<Uuid> {
        self.preload(store, limit).await?;
        let key = group_key(number, hamlet_id);
        if let Some(id) = self.groups.get(&key) {
            return Ok(*id);
        }
        let id = bounded("upsert_group", limit, store.upsert_group(number, hamlet_id)).await?;
        self.groups.insert(key, id);
        Ok(id)
    }

    /// `number` must already be padded
    pub async fn resolve_unit(
        &mut self,
        store: &dyn CivilStore,
        limit: Duration,
        number: &str,
        group_id: Uuid,
    ) -> ImportResult<Uuid> {
        self.preload(store, limit).await?;
        let key = unit_key(number, group_id);
        if let Some(id) = self.units.get(&key) {
            return Ok(*id);
        }
        let id = bounded("upsert_unit", limit, store.upsert_unit(number, group_id)).await?;
        self.units.insert(key, id);
        Ok(id)
    }

    /// Resolve a full placement from normalized hamlet and padded numbers
    pub async fn resolve_placement(
        &mut self,
        store: &dyn CivilStore,
        limit: Duration,
        hamlet: &str,
        group_number: &str,
        unit_number: &str,
    ) -> ImportResult<Placement> {
        let hamlet_id = self.resolve_hamlet(store, limit, hamlet).await?;
        let group_id = self.resolve_group(store, limit, group_number, hamlet_id).await?;
        let unit_id = self.resolve_unit(store, limit, unit_number, group_id).await?;
        Ok(Placement { hamlet_id, group_id, unit_id })
    }
}
