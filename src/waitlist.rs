//! Waitlist: patients queued for a bed, served by descending priority
//! and FIFO within a priority tier.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use crate::error::IcuError;
use crate::models::{StoredSignal, WaitlistEntry, WaitlistStatus};

const ORDERED_WAITING: &str =
    "SELECT * FROM icu_waitlist WHERE status = 'waiting'
     ORDER BY priority DESC, added_at ASC, seq ASC";

pub struct Waitlist {
    pool: SqlitePool,
}

impl Waitlist {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Queue a patient on the strength of an admission signal.
    ///
    /// The insert only applies while the patient has no open entry, so a
    /// concurrent duplicate loses atomically and surfaces as
    /// `AlreadyWaiting`.
    pub async fn enqueue(
        &self,
        signal: &StoredSignal,
        now: DateTime<Utc>,
    ) -> Result<WaitlistEntry, IcuError> {
        if !signal.signal.icu_needed {
            return Err(IcuError::NotNeeded(signal.patient_id));
        }

        let entry_id = Uuid::new_v4();
        let result = sqlx::query(
            "INSERT INTO icu_waitlist (entry_id, patient_id, signal_id, priority, status, added_at)
             SELECT ?, ?, ?, ?, 'waiting', ?
             WHERE NOT EXISTS (
                 SELECT 1 FROM icu_waitlist WHERE patient_id = ? AND status = 'waiting'
             )",
        )
        .bind(entry_id.to_string())
        .bind(signal.patient_id)
        .bind(signal.signal_id)
        .bind(signal.signal.priority())
        .bind(now)
        .bind(signal.patient_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(IcuError::AlreadyWaiting(signal.patient_id));
        }

        info!(patient_id = signal.patient_id, priority = signal.signal.priority(), "patient waitlisted");
        self.entry(entry_id).await
    }

    pub async fn entry(&self, entry_id: Uuid) -> Result<WaitlistEntry, IcuError> {
        let row = sqlx::query("SELECT * FROM icu_waitlist WHERE entry_id = ?")
            .bind(entry_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(IcuError::EntryNotFound(entry_id))?;
        entry_from_row(&row)
    }

    /// The patient's open entry, if one exists.
    pub async fn open_entry(&self, patient_id: i64) -> Result<Option<WaitlistEntry>, IcuError> {
        let row = sqlx::query(
            "SELECT * FROM icu_waitlist WHERE patient_id = ? AND status = 'waiting'",
        )
        .bind(patient_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(entry_from_row).transpose()
    }

    /// Waiting entries in service order. Re-queried on every call, so the
    /// sequence restarts from the current queue state.
    pub async fn waiting(&self) -> Result<Vec<WaitlistEntry>, IcuError> {
        let rows = sqlx::query(ORDERED_WAITING).fetch_all(&self.pool).await?;
        rows.iter().map(entry_from_row).collect()
    }

    /// Highest-priority waiting entry, if any.
    pub async fn peek(&self) -> Result<Option<WaitlistEntry>, IcuError> {
        let row = sqlx::query(&format!("{ORDERED_WAITING} LIMIT 1"))
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(entry_from_row).transpose()
    }

    pub async fn mark_allocated(
        &self,
        entry_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), IcuError> {
        self.close(entry_id, WaitlistStatus::Allocated, Some(now)).await
    }

    pub async fn cancel(&self, entry_id: Uuid) -> Result<(), IcuError> {
        self.close(entry_id, WaitlistStatus::Cancelled, None).await
    }

    /// Close a waiting entry; anything not `waiting` is rejected.
    async fn close(
        &self,
        entry_id: Uuid,
        to: WaitlistStatus,
        allocated_at: Option<DateTime<Utc>>,
    ) -> Result<(), IcuError> {
        let result = sqlx::query(
            "UPDATE icu_waitlist SET status = ?, allocated_at = ?
             WHERE entry_id = ? AND status = 'waiting'",
        )
        .bind(to.as_str())
        .bind(allocated_at)
        .bind(entry_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let entry = self.entry(entry_id).await?;
            return Err(IcuError::InvalidState { entry_id, status: entry.status });
        }
        Ok(())
    }
}

fn entry_from_row(row: &SqliteRow) -> Result<WaitlistEntry, IcuError> {
    let id_text: String = row.try_get("entry_id")?;
    let entry_id = Uuid::parse_str(&id_text).map_err(|_| IcuError::Decode {
        field: "icu_waitlist.entry_id",
        value: id_text,
    })?;
    let status_text: String = row.try_get("status")?;
    let status = WaitlistStatus::parse(&status_text).ok_or(IcuError::Decode {
        field: "icu_waitlist.status",
        value: status_text,
    })?;

    Ok(WaitlistEntry {
        entry_id,
        patient_id: row.try_get("patient_id")?,
        signal_id: row.try_get("signal_id")?,
        priority: row.try_get("priority")?,
        status,
        added_at: row.try_get("added_at")?,
        allocated_at: row.try_get("allocated_at")?,
    })
}
