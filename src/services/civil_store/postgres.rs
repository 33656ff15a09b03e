//! PostgreSQL civil store

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{CivilStore, FamilyTransaction, GROUP_OUTSIDE_HAMLET, UNIT_OUTSIDE_GROUP};
use crate::db::queries::{family, hierarchy};
use crate::types::{FamilyCardUpsert, FamilyRelation, Hamlet, NeighborhoodGroup, NeighborhoodUnit, ResidentUpsert};

/// Civil store backed by the connection pool
#[derive(Clone)]
pub struct PgCivilStore {
    pool: PgPool,
}

impl PgCivilStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CivilStore for PgCivilStore {
    async fn load_hamlets(&self) -> Result<Vec<Hamlet>> {
        hierarchy::list_hamlets(&self.pool).await
    }

    async fn load_groups(&self) -> Result<Vec<NeighborhoodGroup>> {
        hierarchy::list_groups(&self.pool).await
    }

    async fn load_units(&self) -> Result<Vec<NeighborhoodUnit>> {
        hierarchy::list_units(&self.pool).await
    }

    async fn upsert_hamlet(&self, name: &str) -> Result<Uuid> {
        hierarchy::upsert_hamlet(&self.pool, name).await
    }

    async fn upsert_group(&self, number: &str, hamlet_id: Uuid) -> Result<Uuid> {
        hierarchy::upsert_group(&self.pool, number, hamlet_id).await
    }

    async fn upsert_unit(&self, number: &str, group_id: Uuid) -> Result<Uuid> {
        hierarchy::upsert_unit(&self.pool, number, group_id).await
    }

    async fn begin(&self) -> Result<Box<dyn FamilyTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgFamilyTransaction { tx }))
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}

struct PgFamilyTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl FamilyTransaction for PgFamilyTransaction {
    async fn upsert_family_card(&mut self, card: &FamilyCardUpsert) -> Result<Uuid> {
        let (unit_in_group, group_in_hamlet) = family::placement_links(&mut *self.tx, &card.placement).await?;
        if !unit_in_group {
            bail!(UNIT_OUTSIDE_GROUP);
        }
        if !group_in_hamlet {
            bail!(GROUP_OUTSIDE_HAMLET);
        }
        family::upsert_family_card(&mut *self.tx, card).await
    }

    async fn upsert_resident(&mut self, family_card_id: Uuid, resident: &ResidentUpsert) -> Result<Uuid> {
        family::upsert_resident(&mut *self.tx, family_card_id, resident).await
    }

    async fn family_head(&mut self, family_card_id: Uuid) -> Result<Option<Uuid>> {
        family::get_family_head(&mut *self.tx, family_card_id).await
    }

    async fn set_family_head(&mut self, family_card_id: Uuid, resident_id: Uuid) -> Result<()> {
        family::set_family_head(&mut *self.tx, family_card_id, resident_id).await
    }

    async fn set_relation(
        &mut self,
        family_card_id: Uuid,
        resident_id: Uuid,
        from: FamilyRelation,
        to: FamilyRelation,
    ) -> Result<bool> {
        family::update_relation_if(&mut *self.tx, family_card_id, resident_id, from.as_str(), to.as_str()).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
