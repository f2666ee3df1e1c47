//! Occupancy Lifecycle Manager: admission bookkeeping is owned by the
//! engine; this side owns discharge, the cleaning turnaround, and the
//! allocation audit trail.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::db::allocation_from_row;
use crate::error::IcuError;
use crate::models::{AllocationRecord, BedStatus};
use crate::registry::BedRegistry;

pub struct OccupancyManager {
    registry: Arc<BedRegistry>,
    pool: SqlitePool,
}

impl OccupancyManager {
    pub fn new(registry: Arc<BedRegistry>, pool: SqlitePool) -> Self {
        Self { registry, pool }
    }

    /// Close an open allocation: stamp the discharge, derive duration and
    /// cost, and send the bed to cleaning.
    ///
    /// Closing is guarded on the record still being open, so a repeat
    /// discharge of the same allocation reports not-found instead of
    /// charging twice.
    pub async fn discharge(
        &self,
        allocation_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<AllocationRecord, IcuError> {
        let open = self.allocation(allocation_id).await?;
        if !open.is_open() {
            return Err(IcuError::AllocationNotFound(allocation_id));
        }

        let bed = self.registry.get(open.bed_id).await?;
        let duration_days =
            ((now - open.allocated_at).num_seconds() as f64 / 86_400.0).max(0.0);
        let total_cost = duration_days * bed.daily_cost;

        let result = sqlx::query(
            "UPDATE bed_allocations
             SET discharged_at = ?, duration_days = ?, discharge_reason = ?, total_cost = ?
             WHERE allocation_id = ? AND discharged_at IS NULL",
        )
        .bind(now)
        .bind(duration_days)
        .bind(reason)
        .bind(total_cost)
        .bind(allocation_id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(IcuError::AllocationNotFound(allocation_id));
        }

        self.registry
            .transition(open.bed_id, BedStatus::Occupied, BedStatus::Cleaning, None)
            .await?;

        info!(
            %allocation_id,
            patient_id = open.patient_id,
            bed_id = open.bed_id,
            duration_days,
            total_cost,
            "patient discharged"
        );
        self.allocation(allocation_id).await
    }

    /// Discharge whichever allocation currently holds the bed open.
    pub async fn release_bed(
        &self,
        bed_id: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<AllocationRecord, IcuError> {
        let open = self
            .open_allocation_for_bed(bed_id)
            .await?
            .ok_or(IcuError::NoOpenAllocation(bed_id))?;
        self.discharge(open.allocation_id, reason, now).await
    }

    /// Housekeeping has finished; the bed may take patients again. Never
    /// automatic: cleaning ends only on this explicit call.
    pub async fn mark_available(&self, bed_id: i64) -> Result<(), IcuError> {
        self.registry
            .transition(bed_id, BedStatus::Cleaning, BedStatus::Available, None)
            .await
    }

    /// Operator-facing status change for non-occupancy states
    /// (maintenance in and out, cleaning turnaround). Occupation and
    /// discharge keep their dedicated flows.
    pub async fn set_status(&self, bed_id: i64, to: BedStatus) -> Result<(), IcuError> {
        let bed = self.registry.get(bed_id).await?;
        self.registry.transition(bed_id, bed.status, to, None).await
    }

    pub async fn allocation(&self, allocation_id: Uuid) -> Result<AllocationRecord, IcuError> {
        let row = sqlx::query("SELECT * FROM bed_allocations WHERE allocation_id = ?")
            .bind(allocation_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(IcuError::AllocationNotFound(allocation_id))?;
        allocation_from_row(&row)
    }

    pub async fn open_allocation_for_bed(
        &self,
        bed_id: i64,
    ) -> Result<Option<AllocationRecord>, IcuError> {
        let row = sqlx::query(
            "SELECT * FROM bed_allocations WHERE bed_id = ? AND discharged_at IS NULL",
        )
        .bind(bed_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(allocation_from_row).transpose()
    }

    /// Recent allocation events, newest first.
    pub async fn audit_log(&self, limit: i64) -> Result<Vec<AllocationRecord>, IcuError> {
        let rows = sqlx::query(
            "SELECT * FROM bed_allocations ORDER BY allocated_at DESC, allocation_id LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(allocation_from_row).collect()
    }
}
