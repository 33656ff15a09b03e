//! Civil registry store abstraction
//!
//! Hierarchy upserts are autocommitted. Family card and resident writes go
//! through a [`FamilyTransaction`] opened by [`with_family_transaction`], the
//! only transaction boundary of the import.
//!
//! Configuration via STORE_BACKEND env variable:
//! - "postgres" → PgCivilStore (production)
//! - "memory" → MemoryCivilStore (dry runs, tests)

mod memory;
mod postgres;

pub use memory::{CallCounts, MemoryCivilStore};
pub use postgres::PgCivilStore;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::warn;
use uuid::Uuid;

use crate::services::import_error::{bounded, ImportResult};
use crate::types::{FamilyCardUpsert, FamilyRelation, Hamlet, NeighborhoodGroup, NeighborhoodUnit, ResidentUpsert};

/// Rejected when an RT is placed under a foreign RW
pub const UNIT_OUTSIDE_GROUP: &str = "RT tidak termasuk dalam RW yang dipilih";
/// Rejected when an RW is placed under a foreign dukuh
pub const GROUP_OUTSIDE_HAMLET: &str = "RW tidak termasuk dalam Dukuh yang dipilih";

/// Store trait - persistence for the civil registry
#[async_trait]
pub trait CivilStore: Send + Sync {
    async fn load_hamlets(&self) -> Result<Vec<Hamlet>>;
    async fn load_groups(&self) -> Result<Vec<NeighborhoodGroup>>;
    async fn load_units(&self) -> Result<Vec<NeighborhoodUnit>>;

    /// Upsert by name; an existing row is returned unchanged
    async fn upsert_hamlet(&self, name: &str) -> Result<Uuid>;
    /// Upsert by (number, hamlet)
    async fn upsert_group(&self, number: &str, hamlet_id: Uuid) -> Result<Uuid>;
    /// Upsert by (number, group)
    async fn upsert_unit(&self, number: &str, group_id: Uuid) -> Result<Uuid>;

    /// Open a transaction for one family group
    async fn begin(&self) -> Result<Box<dyn FamilyTransaction>>;

    /// Get the name of this store implementation
    fn name(&self) -> &'static str;
}

/// Writes of one family group. Dropped without commit means rolled back.
#[async_trait]
pub trait FamilyTransaction: Send {
    async fn upsert_family_card(&mut self, card: &FamilyCardUpsert) -> Result<Uuid>;
    async fn upsert_resident(&mut self, family_card_id: Uuid, resident: &ResidentUpsert) -> Result<Uuid>;
    async fn family_head(&mut self, family_card_id: Uuid) -> Result<Option<Uuid>>;
    async fn set_family_head(&mut self, family_card_id: Uuid, resident_id: Uuid) -> Result<()>;

    /// Change the relation of a card member that currently holds `from`.
    /// Returns false when the resident left the card or holds another relation.
    async fn set_relation(
        &mut self,
        family_card_id: Uuid,
        resident_id: Uuid,
        from: FamilyRelation,
        to: FamilyRelation,
    ) -> Result<bool>;

    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Run `work` inside one family transaction.
///
/// Commits when `work` succeeds, rolls back otherwise. Every boundary call is
/// bounded by `limit`.
pub async fn with_family_transaction<T, F>(store: &dyn CivilStore, limit: Duration, work: F) -> ImportResult<T>
where
    T: Send,
    F: for<'t> FnOnce(&'t mut dyn FamilyTransaction) -> BoxFuture<'t, ImportResult<T>> + Send,
{
    let mut tx = bounded("begin", limit, store.begin()).await?;

    match work(tx.as_mut()).await {
        Ok(value) => {
            bounded("commit", limit, tx.commit()).await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = bounded("rollback", limit, tx.rollback()).await {
                warn!("Rollback failed after '{}': {}", err, rollback_err);
            }
            Err(err)
        }
    }
}

/// Create the store selected by `backend`
pub fn create_store(backend: &str, pool: Option<sqlx::PgPool>) -> Result<Box<dyn CivilStore>> {
    match (backend, pool) {
        ("memory", _) => Ok(Box::new(MemoryCivilStore::new())),
        ("postgres", Some(pool)) => Ok(Box::new(PgCivilStore::new(pool))),
        ("postgres", None) => anyhow::bail!("STORE_BACKEND=postgres requires DATABASE_URL"),
        (other, _) => anyhow::bail!("Unknown STORE_BACKEND '{}'", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::import_error::ImportError;
    use crate::types::Placement;
    use chrono::NaiveDate;

    async fn placement(store: &MemoryCivilStore) -> Placement {
        let hamlet_id = store.upsert_hamlet("JATI").await.unwrap();
        let group_id = store.upsert_group("01", hamlet_id).await.unwrap();
        let unit_id = store.upsert_unit("02", group_id).await.unwrap();
        Placement { hamlet_id, group_id, unit_id }
    }

    fn card(placement: Placement) -> FamilyCardUpsert {
        FamilyCardUpsert {
            family_card_number: "3509010101010099".into(),
            address: "RT 02 RW 01 Dukuh JATI Desa Cepoko".into(),
            placement,
        }
    }

    fn resident(nik: &str) -> ResidentUpsert {
        ResidentUpsert {
            identity_number: nik.into(),
            name: "Sutrisno".into(),
            birth_place: None,
            birth_date: NaiveDate::from_ymd_opt(1975, 8, 17).unwrap(),
            sex: None,
            religion: None,
            marital_status: None,
            education: None,
            occupation: None,
            relation_to_household: FamilyRelation::Head.as_str().into(),
        }
    }

    #[tokio::test]
    async fn test_transaction_commits_on_success() {
        let store = MemoryCivilStore::new();
        let placement = placement(&store).await;
        let card = card(placement);

        let card_id = with_family_transaction(&store, Duration::from_secs(1), move |tx| {
            Box::pin(async move {
                let card_id = tx.upsert_family_card(&card).await?;
                tx.upsert_resident(card_id, &resident("1234567890123456")).await?;
                Ok(card_id)
            })
        })
        .await
        .unwrap();

        assert_eq!(store.family_card_count(), 1);
        assert_eq!(store.resident_count(), 1);
        assert_eq!(store.family_card("3509010101010099").map(|c| c.id), Some(card_id));
        assert_eq!(store.calls().commits, 1);
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_on_error() {
        let store = MemoryCivilStore::new();
        let placement = placement(&store).await;
        let card = card(placement);

        let result: ImportResult<()> = with_family_transaction(&store, Duration::from_secs(1), move |tx| {
            Box::pin(async move {
                let card_id = tx.upsert_family_card(&card).await?;
                tx.upsert_resident(card_id, &resident("1234567890123456")).await?;
                Err(ImportError::Store(anyhow::anyhow!("boom")))
            })
        })
        .await;

        assert!(result.is_err());
        assert_eq!(store.family_card_count(), 0);
        assert_eq!(store.resident_count(), 0);
        assert_eq!(store.calls().rollbacks, 1);
    }

    #[test]
    fn test_create_store_selects_backend() {
        assert_eq!(create_store("memory", None).unwrap().name(), "memory");
        assert!(create_store("postgres", None).is_err());
        assert!(create_store("mysql", None).is_err());
    }
}
