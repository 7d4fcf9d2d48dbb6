//! Advisory locks over PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferrite_core::ids::LockId;
use ferrite_core::ports::LockStore;
use ferrite_core::{Error, Result};
use sqlx::PgPool;

/// `LockStore` over `pg_try_advisory_lock`.
///
/// Locks are scoped to the holder's session: when the holding connection is
/// lost, the database reclaims the lock, so a crashed process cannot wedge a
/// pipeline. The deadline is not enforced here.
pub struct PgLockStore {
    pool: PgPool,
}

impl PgLockStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LockStore for PgLockStore {
    async fn try_acquire(&self, lock: LockId, _deadline: DateTime<Utc>) -> Result<bool> {
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(lock.as_i64())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::Lock(e.to_string()))?;

        Ok(acquired)
    }

    async fn release(&self, lock: LockId) -> Result<()> {
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(lock.as_i64())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Lock(e.to_string()))?;

        Ok(())
    }
}
