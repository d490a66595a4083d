use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::db::{
    helpers::{parse_datetime, to_limit, to_u64},
    models::PendingDelivery,
    Ledger, LedgerEvent,
};

impl Ledger {
    pub async fn enqueue_pending(&self, payload: &str, created_at: DateTime<Utc>) -> Result<i64> {
        let payload = payload.to_string();
        let id = self
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO pending (payload, created_at) VALUES (?1, ?2)",
                    params![payload, created_at.to_rfc3339()],
                )
                .with_context(|| "failed to enqueue pending delivery")?;
                Ok(conn.last_insert_rowid())
            })
            .await?;

        self.notify(LedgerEvent::PendingEnqueued { id });
        Ok(id)
    }

    /// Oldest rows first, never more than `limit`.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<PendingDelivery>> {
        let limit = to_limit(limit)?;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, payload, created_at
                 FROM pending
                 ORDER BY id ASC
                 LIMIT ?1",
            )?;

            let mut rows = stmt.query(params![limit])?;
            let mut pending = Vec::new();
            while let Some(row) = rows.next()? {
                let created_at: String = row.get(2)?;
                pending.push(PendingDelivery {
                    id: row.get(0)?,
                    payload: row.get(1)?,
                    created_at: parse_datetime(&created_at, "created_at")?,
                });
            }

            Ok(pending)
        })
        .await
    }

    /// Returns whether a row was actually deleted. Removing an id that is
    /// already gone is not an error.
    pub async fn remove_pending(&self, id: i64) -> Result<bool> {
        let removed = self
            .execute(move |conn| {
                let affected = conn
                    .execute("DELETE FROM pending WHERE id = ?1", params![id])
                    .with_context(|| format!("failed to remove pending delivery {id}"))?;
                Ok(affected > 0)
            })
            .await?;

        if removed {
            self.notify(LedgerEvent::PendingRemoved { id });
        }
        Ok(removed)
    }

    pub async fn count_pending(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM pending", [], |row| row.get(0))?;
            to_u64(count, "pending count")
        })
        .await
    }
}
