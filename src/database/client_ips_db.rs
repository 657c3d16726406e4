//! Queries on the `inbound_client_ips` snapshot table.

use std::collections::BTreeMap;

use sqlx::SqlitePool;

use super::model::InboundClientIps;

/// Replace the whole snapshot collection with `snapshots` in one transaction.
///
/// Readers see either the previous run's rows or this run's rows, never a mix.
/// Returns the number of rows written.
pub async fn replace_all(
    pool: &SqlitePool,
    snapshots: &BTreeMap<String, Vec<String>>,
) -> Result<usize, sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM `inbound_client_ips`")
        .execute(&mut *tx)
        .await?;

    for (email, ips) in snapshots {
        let ips = serde_json::to_string(ips).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        sqlx::query("INSERT INTO `inbound_client_ips` (`client_email`, `ips`) VALUES (?, ?)")
            .bind(email)
            .bind(ips)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(snapshots.len())
}

pub async fn all(pool: &SqlitePool) -> Result<Vec<InboundClientIps>, sqlx::Error> {
    sqlx::query_as::<_, InboundClientIps>(
        "SELECT `id`, `client_email`, `ips` FROM `inbound_client_ips` ORDER BY `client_email`",
    )
    .fetch_all(pool)
    .await
}

pub async fn get_by_email(
    pool: &SqlitePool,
    email: &str,
) -> Result<Option<InboundClientIps>, sqlx::Error> {
    sqlx::query_as::<_, InboundClientIps>(
        "SELECT `id`, `client_email`, `ips` FROM `inbound_client_ips` WHERE `client_email` = ?",
    )
    .bind(email)
    .fetch_optional(pool)
    .await
}
