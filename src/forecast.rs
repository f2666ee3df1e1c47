//! Forecast & Analytics: read-only aggregations over bed state,
//! allocation history and scheduled cases. Advisory output only; nothing
//! here mutates state.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use sqlx::Row;
use uuid::Uuid;

use crate::db::{allocation_from_row, Database};
use crate::error::IcuError;
use crate::models::{BedStatus, RiskLevel};

/// Utilization share, in percent, above which capacity counts as tight.
const TIGHT_UTILIZATION_PCT: f64 = 80.0;
/// Elective cases inside this many days are postponement candidates.
const POSTPONE_WINDOW_DAYS: i64 = 7;
/// Admission probability below which a case counts as safely electable.
const POSTPONE_PROBABILITY_CUTOFF: f64 = 30.0;
/// Stays at least this long make a patient a step-down candidate.
const STEP_DOWN_MIN_STAY_DAYS: i64 = 3;

#[derive(Debug, Clone, Serialize)]
pub struct CapacitySnapshot {
    pub total: i64,
    pub available: i64,
    pub occupied: i64,
    pub maintenance: i64,
    pub cleaning: i64,
    /// occupied / total, percent, one decimal.
    pub utilization_pct: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StayAnalytics {
    pub window_days: i64,
    pub total_admissions: i64,
    pub avg_stay_days: f64,
    pub min_stay_days: f64,
    pub max_stay_days: f64,
    pub total_cost: f64,
    pub readmissions: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DemandPoint {
    pub day: NaiveDate,
    pub expected_admissions: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExpectedDischarge {
    pub bed_id: i64,
    pub room_number: String,
    pub patient_id: i64,
    pub expected_discharge: DateTime<Utc>,
    pub current_stay_days: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostponeCandidate {
    pub patient_id: i64,
    pub full_name: String,
    pub surgery_date: NaiveDate,
    pub risk_level: RiskLevel,
    pub icu_probability: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepDownCandidate {
    pub patient_id: i64,
    pub bed_id: i64,
    pub room_number: String,
    pub allocation_id: Uuid,
    pub current_stay_days: i64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CapacityRecommendations {
    pub utilization_pct: f64,
    pub postpone_elective: Vec<PostponeCandidate>,
    pub step_down: Vec<StepDownCandidate>,
}

pub struct CapacityAnalytics {
    db: Arc<Database>,
}

impl CapacityAnalytics {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Bed counts by status and the resulting utilization rate.
    pub async fn capacity_snapshot(&self) -> Result<CapacitySnapshot, IcuError> {
        let rows = sqlx::query("SELECT status FROM icu_beds")
            .fetch_all(self.db.pool())
            .await?;

        let mut snapshot = CapacitySnapshot {
            total: rows.len() as i64,
            available: 0,
            occupied: 0,
            maintenance: 0,
            cleaning: 0,
            utilization_pct: 0.0,
        };
        for row in &rows {
            let status_text: String = row.try_get("status")?;
            match BedStatus::parse(&status_text) {
                Some(BedStatus::Available) => snapshot.available += 1,
                Some(BedStatus::Occupied) => snapshot.occupied += 1,
                Some(BedStatus::Maintenance) => snapshot.maintenance += 1,
                Some(BedStatus::Cleaning) => snapshot.cleaning += 1,
                None => {
                    return Err(IcuError::Decode { field: "icu_beds.status", value: status_text })
                }
            }
        }
        if snapshot.total > 0 {
            let rate = snapshot.occupied as f64 / snapshot.total as f64 * 100.0;
            snapshot.utilization_pct = (rate * 10.0).round() / 10.0;
        }
        Ok(snapshot)
    }

    /// Stay statistics over allocations discharged in the trailing window.
    pub async fn analytics(
        &self,
        window_days: i64,
        now: DateTime<Utc>,
    ) -> Result<StayAnalytics, IcuError> {
        let rows = sqlx::query("SELECT * FROM bed_allocations WHERE discharged_at IS NOT NULL")
            .fetch_all(self.db.pool())
            .await?;

        let cutoff = now - Duration::days(window_days);
        let mut summary = StayAnalytics { window_days, ..Default::default() };
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut duration_sum = 0.0;

        for row in &rows {
            let record = allocation_from_row(row)?;
            match record.discharged_at {
                Some(at) if at >= cutoff && at <= now => {}
                _ => continue,
            }
            let duration = record.duration_days.unwrap_or(0.0);

            summary.total_admissions += 1;
            summary.total_cost += record.total_cost.unwrap_or(0.0);
            if record.readmitted {
                summary.readmissions += 1;
            }
            duration_sum += duration;
            min = min.min(duration);
            max = max.max(duration);
        }

        if summary.total_admissions > 0 {
            summary.avg_stay_days = duration_sum / summary.total_admissions as f64;
            summary.min_stay_days = min;
            summary.max_stay_days = max;
        }
        Ok(summary)
    }

    /// Expected admissions per future day: scheduled cases whose latest
    /// signal indicates ICU need, inside the horizon. A demand count, not
    /// a statistical model.
    pub async fn forecast(
        &self,
        horizon_days: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<DemandPoint>, IcuError> {
        let today = now.date_naive();
        let horizon_end = today + Duration::days(horizon_days);
        let signals = self.db.latest_signals().await?;

        let mut per_day: BTreeMap<NaiveDate, i64> = BTreeMap::new();
        for case in self.db.scheduled_cases().await? {
            if case.surgery_date < today || case.surgery_date > horizon_end {
                continue;
            }
            let needs_icu = signals
                .get(&case.patient_id)
                .map(|signal| signal.signal.icu_needed)
                .unwrap_or(false);
            if needs_icu {
                *per_day.entry(case.surgery_date).or_insert(0) += 1;
            }
        }

        Ok(per_day
            .into_iter()
            .map(|(day, expected_admissions)| DemandPoint { day, expected_admissions })
            .collect())
    }

    /// Occupied beds whose expected discharge falls on the current day.
    pub async fn expected_discharges_today(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExpectedDischarge>, IcuError> {
        let rows = sqlx::query(
            "SELECT bed_id, room_number, patient_id, admitted_at, expected_discharge
             FROM icu_beds
             WHERE status = 'occupied' AND expected_discharge IS NOT NULL
             ORDER BY expected_discharge",
        )
        .fetch_all(self.db.pool())
        .await?;

        let today = now.date_naive();
        let mut due = Vec::new();
        for row in &rows {
            let expected: DateTime<Utc> = row.try_get("expected_discharge")?;
            if expected.date_naive() != today {
                continue;
            }
            let admitted: DateTime<Utc> = row.try_get("admitted_at")?;
            due.push(ExpectedDischarge {
                bed_id: row.try_get("bed_id")?,
                room_number: row.try_get("room_number")?,
                patient_id: row.try_get("patient_id")?,
                expected_discharge: expected,
                current_stay_days: (now - admitted).num_seconds() as f64 / 86_400.0,
            });
        }
        Ok(due)
    }

    /// Advisory relief options when the unit runs tight: near-term
    /// low-acuity electives that could be postponed, and long-stay
    /// occupants that may step down. Empty below the tightness threshold.
    pub async fn recommendations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<CapacityRecommendations, IcuError> {
        let snapshot = self.capacity_snapshot().await?;
        let mut recommendations = CapacityRecommendations {
            utilization_pct: snapshot.utilization_pct,
            postpone_elective: Vec::new(),
            step_down: Vec::new(),
        };
        if snapshot.utilization_pct <= TIGHT_UTILIZATION_PCT {
            return Ok(recommendations);
        }

        let today = now.date_naive();
        let signals = self.db.latest_signals().await?;
        for case in self.db.scheduled_cases().await? {
            let days_until = (case.surgery_date - today).num_days();
            if !(0..=POSTPONE_WINDOW_DAYS).contains(&days_until) {
                continue;
            }
            let Some(signal) = signals.get(&case.patient_id) else { continue };
            let low_acuity = matches!(signal.signal.risk_level, RiskLevel::Low | RiskLevel::Moderate);
            if low_acuity && signal.signal.probability < POSTPONE_PROBABILITY_CUTOFF {
                recommendations.postpone_elective.push(PostponeCandidate {
                    patient_id: case.patient_id,
                    full_name: case.full_name.clone(),
                    surgery_date: case.surgery_date,
                    risk_level: signal.signal.risk_level,
                    icu_probability: signal.signal.probability,
                    reason: "Low ICU risk, can be safely rescheduled".into(),
                });
            }
        }

        let rows = sqlx::query(
            "SELECT a.allocation_id, a.patient_id, a.bed_id, a.allocated_at, b.room_number
             FROM bed_allocations a
             JOIN icu_beds b ON b.bed_id = a.bed_id
             WHERE a.discharged_at IS NULL
             ORDER BY a.allocated_at",
        )
        .fetch_all(self.db.pool())
        .await?;
        for row in &rows {
            let allocated_at: DateTime<Utc> = row.try_get("allocated_at")?;
            let stay_days = (now - allocated_at).num_days();
            if stay_days < STEP_DOWN_MIN_STAY_DAYS {
                continue;
            }
            let id_text: String = row.try_get("allocation_id")?;
            let allocation_id = Uuid::parse_str(&id_text).map_err(|_| IcuError::Decode {
                field: "bed_allocations.allocation_id",
                value: id_text,
            })?;
            recommendations.step_down.push(StepDownCandidate {
                patient_id: row.try_get("patient_id")?,
                bed_id: row.try_get("bed_id")?,
                room_number: row.try_get("room_number")?,
                allocation_id,
                current_stay_days: stay_days,
                reason: "Extended stay, candidate for step-down care".into(),
            });
        }

        Ok(recommendations)
    }
}
