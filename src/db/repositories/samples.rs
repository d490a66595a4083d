use anyhow::{Context, Result};
use rusqlite::{params, Row};

use crate::db::{
    helpers::{flag_to_int, int_to_flag, parse_datetime, to_i64, to_u64},
    models::{LocationSample, NewSample},
    Ledger, LedgerEvent,
};

fn row_to_sample(row: &Row) -> Result<LocationSample> {
    let owner_id: i64 = row.get("owner_id")?;
    let timestamp: String = row.get("timestamp")?;
    let context_flag: i64 = row.get("context_flag")?;

    Ok(LocationSample {
        id: row.get("id")?,
        owner_id: to_u64(owner_id, "owner_id")?,
        latitude: row.get("latitude")?,
        longitude: row.get("longitude")?,
        timestamp: parse_datetime(&timestamp, "timestamp")?,
        context_flag: int_to_flag(context_flag),
    })
}

impl Ledger {
    /// Validates and stores a sample, returning its storage-assigned id.
    pub async fn append(&self, sample: &NewSample) -> Result<i64> {
        sample.validate().context("refusing to store invalid sample")?;
        #[cfg(test)]
        if self.take_append_fault() {
            anyhow::bail!("simulated write failure");
        }
        let record = sample.clone();
        let id = self
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO samples (owner_id, latitude, longitude, timestamp, context_flag)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        to_i64(record.owner_id)?,
                        record.latitude,
                        record.longitude,
                        record.timestamp.to_rfc3339(),
                        flag_to_int(record.context_flag),
                    ],
                )
                .with_context(|| "failed to insert sample")?;
                Ok(conn.last_insert_rowid())
            })
            .await?;

        self.notify(LedgerEvent::SampleAppended { id });
        Ok(id)
    }

    /// Full history in capture order, optionally restricted to one owner.
    pub async fn list_samples(&self, owner_id: Option<u64>) -> Result<Vec<LocationSample>> {
        let owner_id = owner_id.map(to_i64).transpose()?;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, owner_id, latitude, longitude, timestamp, context_flag
                 FROM samples
                 WHERE ?1 IS NULL OR owner_id = ?1
                 ORDER BY id ASC",
            )?;

            let mut rows = stmt.query(params![owner_id])?;
            let mut samples = Vec::new();
            while let Some(row) = rows.next()? {
                samples.push(row_to_sample(row)?);
            }

            Ok(samples)
        })
        .await
    }

    pub async fn count_samples(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM samples", [], |row| row.get(0))?;
            to_u64(count, "sample count")
        })
        .await
    }

    /// Empties the history and the pending queue in one transaction.
    pub async fn clear_all(&self) -> Result<()> {
        self.execute(|conn| {
            let tx = conn
                .transaction()
                .context("failed to open clear transaction")?;
            tx.execute("DELETE FROM samples", [])
                .context("failed to clear samples")?;
            tx.execute("DELETE FROM pending", [])
                .context("failed to clear pending queue")?;
            tx.commit().context("failed to commit clear")?;
            Ok(())
        })
        .await?;

        self.notify(LedgerEvent::Cleared);
        Ok(())
    }
}
