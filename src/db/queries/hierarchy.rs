//! Administrative hierarchy queries (dukuh / RW / RT)
//!
//! Upserts are keyed by natural key and never change an existing row: the
//! `DO UPDATE` only rewrites the key column so that `RETURNING` yields the id.

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use crate::types::{Hamlet, NeighborhoodGroup, NeighborhoodUnit};

pub async fn list_hamlets(pool: &PgPool) -> Result<Vec<Hamlet>> {
    let rows = sqlx::query_as::<_, Hamlet>("SELECT id, nama FROM dukuh")
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn list_groups(pool: &PgPool) -> Result<Vec<NeighborhoodGroup>> {
    let rows = sqlx::query_as::<_, NeighborhoodGroup>("SELECT id, nomor, dukuh_id FROM rw")
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn list_units(pool: &PgPool) -> Result<Vec<NeighborhoodUnit>> {
    let rows = sqlx::query_as::<_, NeighborhoodUnit>("SELECT id, nomor, rw_id FROM rt")
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Upsert a hamlet by name
pub async fn upsert_hamlet(pool: &PgPool, name: &str) -> Result<Uuid> {
    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO dukuh (id, nama)
        VALUES ($1, $2)
        ON CONFLICT (nama) DO UPDATE SET nama = EXCLUDED.nama
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Upsert an RW by (number, hamlet)
pub async fn upsert_group(pool: &PgPool, number: &str, hamlet_id: Uuid) -> Result<Uuid> {
    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO rw (id, nomor, dukuh_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (nomor, dukuh_id) DO UPDATE SET nomor = EXCLUDED.nomor
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(number)
    .bind(hamlet_id)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Upsert an RT by (number, group)
pub async fn upsert_unit(pool: &PgPool, number: &str, group_id: Uuid) -> Result<Uuid> {
    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO rt (id, nomor, rw_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (nomor, rw_id) DO UPDATE SET nomor = EXCLUDED.nomor
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(number)
    .bind(group_id)
    .fetch_one(pool)
    .await?;
    Ok(id)
}
