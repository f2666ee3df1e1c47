//! Bed Registry: owns the physical bed pool and is the single mutation
//! point for bed status. All occupancy changes go through `transition`,
//! which compare-and-swaps on the expected current status so concurrent
//! callers cannot both win the same bed.

use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use tracing::info;

use crate::error::IcuError;
use crate::models::{Bed, BedStatus, EquipmentNeeds, NewBed, Occupant};

pub struct BedRegistry {
    pool: SqlitePool,
}

impl BedRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Provision a new bed, initially available.
    pub async fn create(&self, bed: NewBed) -> Result<Bed, IcuError> {
        let result = sqlx::query(
            "INSERT INTO icu_beds (
                room_number, floor_number, status, proximity_rank,
                has_ventilator, has_dialysis, has_ecmo, isolation_room, daily_cost
            ) VALUES (?, ?, 'available', ?, ?, ?, ?, ?, ?)",
        )
        .bind(&bed.room_number)
        .bind(bed.floor_number)
        .bind(bed.proximity_rank)
        .bind(bed.has_ventilator)
        .bind(bed.has_dialysis)
        .bind(bed.has_ecmo)
        .bind(bed.isolation_room)
        .bind(bed.daily_cost)
        .execute(&self.pool)
        .await?;

        let bed = self.get(result.last_insert_rowid()).await?;
        info!(bed_id = bed.bed_id, room = %bed.room_number, "bed provisioned");
        Ok(bed)
    }

    pub async fn get(&self, bed_id: i64) -> Result<Bed, IcuError> {
        let row = sqlx::query("SELECT * FROM icu_beds WHERE bed_id = ?")
            .bind(bed_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(IcuError::BedNotFound(bed_id))?;
        bed_from_row(&row)
    }

    /// Every bed, in ward walking order.
    pub async fn list_all(&self) -> Result<Vec<Bed>, IcuError> {
        let rows = sqlx::query("SELECT * FROM icu_beds ORDER BY floor_number, room_number")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(bed_from_row).collect()
    }

    /// Available beds satisfying the equipment needs, closest to the
    /// nursing station first.
    pub async fn available(&self, needs: EquipmentNeeds) -> Result<Vec<Bed>, IcuError> {
        let mut query = String::from("SELECT * FROM icu_beds WHERE status = 'available'");
        if needs.ventilator {
            query.push_str(" AND has_ventilator = 1");
        }
        if needs.dialysis {
            query.push_str(" AND has_dialysis = 1");
        }
        if needs.ecmo {
            query.push_str(" AND has_ecmo = 1");
        }
        if needs.isolation {
            query.push_str(" AND isolation_room = 1");
        }
        query.push_str(" ORDER BY proximity_rank, bed_id");

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(bed_from_row).collect()
    }

    /// Atomically move a bed from `from` to `to`.
    ///
    /// The update only applies while the stored status still equals
    /// `from`; a lost race surfaces as `InvalidTransition` carrying the
    /// status actually observed. Occupation requires an occupant, which
    /// is stamped onto the bed; every other target clears it.
    pub async fn transition(
        &self,
        bed_id: i64,
        from: BedStatus,
        to: BedStatus,
        occupant: Option<Occupant>,
    ) -> Result<(), IcuError> {
        if !from.can_transition(to) || (to == BedStatus::Occupied) != occupant.is_some() {
            return Err(IcuError::InvalidTransition { bed_id, from, to });
        }

        let result = match occupant {
            Some(occupant) => {
                sqlx::query(
                    "UPDATE icu_beds
                     SET status = ?, patient_id = ?, admitted_at = ?, expected_discharge = ?
                     WHERE bed_id = ? AND status = ?",
                )
                .bind(to.as_str())
                .bind(occupant.patient_id)
                .bind(occupant.admitted_at)
                .bind(occupant.expected_discharge)
                .bind(bed_id)
                .bind(from.as_str())
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "UPDATE icu_beds
                     SET status = ?, patient_id = NULL, admitted_at = NULL, expected_discharge = NULL
                     WHERE bed_id = ? AND status = ?",
                )
                .bind(to.as_str())
                .bind(bed_id)
                .bind(from.as_str())
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            // Either the bed is unknown or someone else moved it first.
            let current = self.get(bed_id).await?;
            return Err(IcuError::InvalidTransition { bed_id, from: current.status, to });
        }

        info!(bed_id, %from, %to, "bed transition");
        Ok(())
    }
}

fn bed_from_row(row: &SqliteRow) -> Result<Bed, IcuError> {
    let status_text: String = row.try_get("status")?;
    let status = BedStatus::parse(&status_text).ok_or(IcuError::Decode {
        field: "icu_beds.status",
        value: status_text,
    })?;

    Ok(Bed {
        bed_id: row.try_get("bed_id")?,
        room_number: row.try_get("room_number")?,
        floor_number: row.try_get("floor_number")?,
        status,
        patient_id: row.try_get("patient_id")?,
        admitted_at: row.try_get("admitted_at")?,
        expected_discharge: row.try_get("expected_discharge")?,
        proximity_rank: row.try_get("proximity_rank")?,
        has_ventilator: row.try_get("has_ventilator")?,
        has_dialysis: row.try_get("has_dialysis")?,
        has_ecmo: row.try_get("has_ecmo")?,
        isolation_room: row.try_get("isolation_room")?,
        daily_cost: row.try_get("daily_cost")?,
    })
}
