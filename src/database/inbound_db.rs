//! Queries on the `inbounds` table.
//!
//! The dashboard shares this table and may flip `enable` at any time, so every
//! state transition issued by the job is conditional on the state it read. The
//! `bool` results report whether the row still matched and was changed.

use sqlx::SqlitePool;

use super::model::{Inbound, PENALTY_BASELINE, PENALTY_EXEMPT};

const SELECT_INBOUND: &str =
    "SELECT `id`, `remark`, `enable`, `port`, `protocol`, `settings`, `tag`, `penalty` FROM `inbounds`";

/// Create an enabled inbound with a baseline counter. Returns its id.
pub async fn insert(
    pool: &SqlitePool,
    remark: &str,
    protocol: &str,
    port: i64,
    settings: &str,
) -> Result<i64, sqlx::Error> {
    let res = sqlx::query(
        "INSERT INTO `inbounds` (`remark`, `enable`, `port`, `protocol`, `settings`, `tag`, `penalty`)
         VALUES (?, 1, ?, ?, ?, ?, ?)",
    )
    .bind(remark)
    .bind(port)
    .bind(protocol)
    .bind(settings)
    .bind(format!("inbound-{port}"))
    .bind(PENALTY_BASELINE)
    .execute(pool)
    .await?;
    Ok(res.last_insert_rowid())
}

/// Unconditional write of `enable` and `penalty`, as an operator edit does.
pub async fn set_state(
    pool: &SqlitePool,
    id: i64,
    enable: bool,
    penalty: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE `inbounds` SET `enable` = ?, `penalty` = ? WHERE `id` = ?")
        .bind(enable)
        .bind(penalty)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get(pool: &SqlitePool, id: i64) -> Result<Option<Inbound>, sqlx::Error> {
    sqlx::query_as::<_, Inbound>(&format!("{} WHERE `id` = ?", SELECT_INBOUND))
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Every inbound, oldest first.
pub async fn all(pool: &SqlitePool) -> Result<Vec<Inbound>, sqlx::Error> {
    sqlx::query_as::<_, Inbound>(&format!("{} ORDER BY `id`", SELECT_INBOUND))
        .fetch_all(pool)
        .await
}

/// Disabled inbounds under automatic control (counter ≥ 0), oldest first.
pub async fn penalized(pool: &SqlitePool) -> Result<Vec<Inbound>, sqlx::Error> {
    sqlx::query_as::<_, Inbound>(&format!(
        "{} WHERE `enable` = 0 AND `penalty` > ? ORDER BY `id`",
        SELECT_INBOUND
    ))
    .bind(PENALTY_EXEMPT)
    .fetch_all(pool)
    .await
}

/// Reset the counter of every enabled inbound to baseline. Returns rows changed.
pub async fn restore_baseline(pool: &SqlitePool) -> Result<u64, sqlx::Error> {
    let res = sqlx::query("UPDATE `inbounds` SET `penalty` = ? WHERE `enable` = 1 AND `penalty` <> ?")
        .bind(PENALTY_BASELINE)
        .bind(PENALTY_BASELINE)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

/// One grace tick: `penalty := expected + 1` while still disabled at `expected`.
pub async fn increment_penalty(
    pool: &SqlitePool,
    id: i64,
    expected: i64,
) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(
        "UPDATE `inbounds` SET `penalty` = ? WHERE `id` = ? AND `enable` = 0 AND `penalty` = ?",
    )
    .bind(expected + 1)
    .bind(id)
    .bind(expected)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Re-enable after the full penalty; the counter is parked at -1 for the rest
/// of the run.
pub async fn reactivate(pool: &SqlitePool, id: i64, expected: i64) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(
        "UPDATE `inbounds` SET `enable` = 1, `penalty` = ?
         WHERE `id` = ? AND `enable` = 0 AND `penalty` = ?",
    )
    .bind(PENALTY_EXEMPT)
    .bind(id)
    .bind(expected)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Disable after a breach, starting a fresh penalty at 0.
pub async fn disable(pool: &SqlitePool, id: i64, expected: i64) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(
        "UPDATE `inbounds` SET `enable` = 0, `penalty` = ?
         WHERE `id` = ? AND `enable` = 1 AND `penalty` = ?",
    )
    .bind(PENALTY_BASELINE)
    .bind(id)
    .bind(expected)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_pool;

    #[tokio::test]
    async fn test_insert_and_get() {
        let pool = test_pool().await;
        let id = insert(&pool, "main", "vless", 443, "{}").await.unwrap();

        let inbound = get(&pool, id).await.unwrap().unwrap();
        assert_eq!(inbound.remark, "main");
        assert!(inbound.enable);
        assert_eq!(inbound.penalty, 0);
        assert_eq!(inbound.tag, "inbound-443");
        assert!(get(&pool, id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_penalized_excludes_enabled_and_exempt() {
        let pool = test_pool().await;
        let active = insert(&pool, "a", "vless", 1, "").await.unwrap();
        let exempt = insert(&pool, "b", "vless", 2, "").await.unwrap();
        let penalized_id = insert(&pool, "c", "vless", 3, "").await.unwrap();
        set_state(&pool, exempt, false, PENALTY_EXEMPT).await.unwrap();
        set_state(&pool, penalized_id, false, 4).await.unwrap();

        let rows = penalized(&pool).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![penalized_id]);
        assert!(!ids.contains(&active));
    }

    #[tokio::test]
    async fn test_increment_is_conditional() {
        let pool = test_pool().await;
        let id = insert(&pool, "a", "vless", 1, "").await.unwrap();
        set_state(&pool, id, false, 2).await.unwrap();

        assert!(increment_penalty(&pool, id, 2).await.unwrap());
        assert_eq!(get(&pool, id).await.unwrap().unwrap().penalty, 3);

        // stale expectation
        assert!(!increment_penalty(&pool, id, 2).await.unwrap());
        assert_eq!(get(&pool, id).await.unwrap().unwrap().penalty, 3);

        // operator re-enabled it meanwhile
        set_state(&pool, id, true, 3).await.unwrap();
        assert!(!increment_penalty(&pool, id, 3).await.unwrap());
    }

    #[tokio::test]
    async fn test_reactivate_parks_counter() {
        let pool = test_pool().await;
        let id = insert(&pool, "a", "vless", 1, "").await.unwrap();
        set_state(&pool, id, false, 10).await.unwrap();

        assert!(reactivate(&pool, id, 10).await.unwrap());
        let inbound = get(&pool, id).await.unwrap().unwrap();
        assert!(inbound.enable);
        assert_eq!(inbound.penalty, PENALTY_EXEMPT);

        assert!(!reactivate(&pool, id, 10).await.unwrap());
    }

    #[tokio::test]
    async fn test_disable_only_when_enabled() {
        let pool = test_pool().await;
        let id = insert(&pool, "a", "vless", 1, "").await.unwrap();

        assert!(disable(&pool, id, 0).await.unwrap());
        let inbound = get(&pool, id).await.unwrap().unwrap();
        assert!(!inbound.enable);
        assert_eq!(inbound.penalty, 0);

        assert!(!disable(&pool, id, 0).await.unwrap());
    }

    #[tokio::test]
    async fn test_restore_baseline_touches_enabled_only() {
        let pool = test_pool().await;
        let reactivated = insert(&pool, "a", "vless", 1, "").await.unwrap();
        let exempt = insert(&pool, "b", "vless", 2, "").await.unwrap();
        let fresh = insert(&pool, "c", "vless", 3, "").await.unwrap();
        set_state(&pool, reactivated, true, PENALTY_EXEMPT).await.unwrap();
        set_state(&pool, exempt, false, PENALTY_EXEMPT).await.unwrap();

        assert_eq!(restore_baseline(&pool).await.unwrap(), 1);
        assert_eq!(get(&pool, reactivated).await.unwrap().unwrap().penalty, 0);
        assert_eq!(get(&pool, exempt).await.unwrap().unwrap().penalty, PENALTY_EXEMPT);
        assert_eq!(get(&pool, fresh).await.unwrap().unwrap().penalty, 0);
    }
}
