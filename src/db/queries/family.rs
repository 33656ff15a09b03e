//! Family card and resident queries
//!
//! Writes run on a connection borrowed from an open transaction.

use anyhow::{Context, Result};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::types::{FamilyCardUpsert, Placement, ResidentUpsert};

/// Placement consistency as (RT belongs to RW, RW belongs to dukuh)
pub async fn placement_links(conn: &mut PgConnection, placement: &Placement) -> Result<(bool, bool)> {
    let links: (bool, bool) = sqlx::query_as(
        r#"
        SELECT
            EXISTS (SELECT 1 FROM rt WHERE id = $1 AND rw_id = $2),
            EXISTS (SELECT 1 FROM rw WHERE id = $2 AND dukuh_id = $3)
        "#,
    )
    .bind(placement.unit_id)
    .bind(placement.group_id)
    .bind(placement.hamlet_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(links)
}

/// Create or update a family card by number, refreshing address and placement
pub async fn upsert_family_card(conn: &mut PgConnection, card: &FamilyCardUpsert) -> Result<Uuid> {
    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO kartu_keluarga (id, no_kk, alamat, dukuh_id, rw_id, rt_id, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
        ON CONFLICT (no_kk) DO UPDATE
        SET alamat = EXCLUDED.alamat,
            dukuh_id = EXCLUDED.dukuh_id,
            rw_id = EXCLUDED.rw_id,
            rt_id = EXCLUDED.rt_id,
            updated_at = NOW()
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&card.family_card_number)
    .bind(&card.address)
    .bind(card.placement.hamlet_id)
    .bind(card.placement.group_id)
    .bind(card.placement.unit_id)
    .fetch_one(&mut *conn)
    .await
    .with_context(|| format!("upsert kartu keluarga {}", card.family_card_number))?;
    Ok(id)
}

/// Create or update a resident by NIK and attach it to the family card
pub async fn upsert_resident(
    conn: &mut PgConnection,
    family_card_id: Uuid,
    resident: &ResidentUpsert,
) -> Result<Uuid> {
    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO penduduk (id, nik, nama, tempat_lahir, tanggal_lahir, jenis_kelamin,
            agama, status_perkawinan, pendidikan, pekerjaan, hubungan_dalam_keluarga,
            kartu_keluarga_id, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW(), NOW())
        ON CONFLICT (nik) DO UPDATE
        SET nama = EXCLUDED.nama,
            tempat_lahir = EXCLUDED.tempat_lahir,
            tanggal_lahir = EXCLUDED.tanggal_lahir,
            jenis_kelamin = EXCLUDED.jenis_kelamin,
            agama = EXCLUDED.agama,
            status_perkawinan = EXCLUDED.status_perkawinan,
            pendidikan = EXCLUDED.pendidikan,
            pekerjaan = EXCLUDED.pekerjaan,
            hubungan_dalam_keluarga = EXCLUDED.hubungan_dalam_keluarga,
            kartu_keluarga_id = EXCLUDED.kartu_keluarga_id,
            updated_at = NOW()
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&resident.identity_number)
    .bind(&resident.name)
    .bind(&resident.birth_place)
    .bind(resident.birth_date)
    .bind(&resident.sex)
    .bind(&resident.religion)
    .bind(&resident.marital_status)
    .bind(&resident.education)
    .bind(&resident.occupation)
    .bind(&resident.relation_to_household)
    .bind(family_card_id)
    .fetch_one(&mut *conn)
    .await
    .with_context(|| format!("upsert penduduk NIK {}", resident.identity_number))?;
    Ok(id)
}

/// Current head of household of a family card
pub async fn get_family_head(conn: &mut PgConnection, family_card_id: Uuid) -> Result<Option<Uuid>> {
    let head: Option<Option<Uuid>> = sqlx::query_scalar(
        "SELECT kepala_penduduk_id FROM kartu_keluarga WHERE id = $1",
    )
    .bind(family_card_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(head.flatten())
}

pub async fn set_family_head(conn: &mut PgConnection, family_card_id: Uuid, resident_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE kartu_keluarga SET kepala_penduduk_id = $2, updated_at = NOW() WHERE id = $1")
        .bind(family_card_id)
        .bind(resident_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Change a resident's relation if it still belongs to the card with relation `from`.
/// Returns whether a row was updated.
pub async fn update_relation_if(
    conn: &mut PgConnection,
    family_card_id: Uuid,
    resident_id: Uuid,
    from: &str,
    to: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE penduduk
        SET hubungan_dalam_keluarga = $4, updated_at = NOW()
        WHERE id = $1 AND kartu_keluarga_id = $2 AND hubungan_dalam_keluarga = $3
        "#,
    )
    .bind(resident_id)
    .bind(family_card_id)
    .bind(from)
    .bind(to)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}
