//! Allocation Engine: matches patients needing intensive care to
//! available beds.
//!
//! Candidate beds are filtered by the patient's predicted equipment
//! needs, scored, and claimed through the registry's compare-and-swap
//! transition; a caller that loses a bed race falls through to the next
//! candidate and ultimately to the waitlist. Batch assignment is greedy
//! by queue order and never backtracks: a bed granted earlier in a pass
//! is not reclaimed for a later entry, and an entry with no matching
//! equipment stays waiting.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::Row;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::error::IcuError;
use crate::models::{
    AdmissionSignal, AllocationMode, AllocationRecord, Bed, BedStatus, EquipmentNeeds, Occupant,
    RiskLevel, StoredSignal, WaitlistEntry,
};
use crate::registry::BedRegistry;
use crate::waitlist::Waitlist;

/// Identity recorded for engine-driven allocations.
pub const SYSTEM_ALLOCATOR: &str = "system";

/// Result of a single allocation attempt. Running out of capacity is an
/// outcome, not an error.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AllocationOutcome {
    Allocated { record: AllocationRecord },
    Waitlisted { entry: WaitlistEntry },
}

/// One assignment made by a batch pass.
#[derive(Debug, Clone, Serialize)]
pub struct Assignment {
    pub entry_id: Uuid,
    pub patient_id: i64,
    pub bed_id: i64,
    pub room_number: String,
    pub allocation_id: Uuid,
}

pub struct AllocationEngine {
    registry: Arc<BedRegistry>,
    waitlist: Arc<Waitlist>,
    db: Arc<Database>,
    /// Serializes the pick-an-entry/try-to-assign sequence so one batch
    /// or single allocation at a time consumes the queue.
    assign_lock: Mutex<()>,
}

impl AllocationEngine {
    pub fn new(registry: Arc<BedRegistry>, waitlist: Arc<Waitlist>, db: Arc<Database>) -> Self {
        Self { registry, waitlist, db, assign_lock: Mutex::new(()) }
    }

    /// Allocate the best matching bed for one patient, or queue them.
    ///
    /// An existing open waitlist entry counts as the waitlisted outcome
    /// rather than a conflict.
    pub async fn allocate_one(
        &self,
        signal: &StoredSignal,
        allocated_by: &str,
        mode: AllocationMode,
        now: DateTime<Utc>,
    ) -> Result<AllocationOutcome, IcuError> {
        if !signal.signal.icu_needed {
            return Err(IcuError::NotNeeded(signal.patient_id));
        }

        let _guard = self.assign_lock.lock().await;

        let candidates = self.registry.available(signal.signal.equipment_needs()).await?;
        for bed in ranked(&candidates, &signal.signal) {
            match self.claim(bed, signal, allocated_by, mode, now).await {
                Ok(record) => {
                    if let Some(entry) = self.waitlist.open_entry(signal.patient_id).await? {
                        self.waitlist.mark_allocated(entry.entry_id, now).await?;
                    }
                    return Ok(AllocationOutcome::Allocated { record });
                }
                // Lost the bed to a concurrent claim; try the next one.
                Err(IcuError::InvalidTransition { .. }) => {
                    warn!(bed_id = bed.bed_id, patient_id = signal.patient_id, "bed race lost");
                    continue;
                }
                Err(error) => return Err(error),
            }
        }

        let entry = match self.waitlist.enqueue(signal, now).await {
            Ok(entry) => entry,
            Err(IcuError::AlreadyWaiting(patient_id)) => self
                .waitlist
                .open_entry(patient_id)
                .await?
                .ok_or(IcuError::AlreadyWaiting(patient_id))?,
            Err(error) => return Err(error),
        };
        Ok(AllocationOutcome::Waitlisted { entry })
    }

    /// Operator override: put a specific patient in a specific bed.
    ///
    /// The latest signal on record, when present, supplies the expected
    /// discharge; the assignment itself does not depend on one.
    pub async fn assign_manual(
        &self,
        patient_id: i64,
        bed_id: i64,
        allocated_by: &str,
        now: DateTime<Utc>,
    ) -> Result<AllocationRecord, IcuError> {
        let _guard = self.assign_lock.lock().await;

        let bed = self.registry.get(bed_id).await?;
        let signal = self.db.latest_signal(patient_id).await?;
        let expected_discharge =
            signal.as_ref().map(|s| expected_discharge(now, s.signal.predicted_days));

        let record = self
            .open_record(&bed, patient_id, expected_discharge, allocated_by, AllocationMode::Manual, now)
            .await?;

        if let Some(entry) = self.waitlist.open_entry(patient_id).await? {
            self.waitlist.mark_allocated(entry.entry_id, now).await?;
        }
        Ok(record)
    }

    /// Greedily drain the waitlist into the available bed pool.
    ///
    /// Entries are visited in service order; candidates are re-queried
    /// for every entry since each assignment consumes a bed. Ends when
    /// the queue is drained or no beds remain at all.
    pub async fn auto_assign_batch(&self, now: DateTime<Utc>) -> Result<Vec<Assignment>, IcuError> {
        let _guard = self.assign_lock.lock().await;
        let mut assignments = Vec::new();

        for entry in self.waitlist.waiting().await? {
            if self.registry.available(EquipmentNeeds::default()).await?.is_empty() {
                break;
            }

            let signal = self.db.signal(entry.signal_id).await?;
            let candidates = self.registry.available(signal.signal.equipment_needs()).await?;
            if candidates.is_empty() {
                // Equipment mismatch: leave the entry waiting.
                continue;
            }

            for bed in ranked(&candidates, &signal.signal) {
                match self.claim(bed, &signal, SYSTEM_ALLOCATOR, AllocationMode::Automatic, now).await {
                    Ok(record) => {
                        self.waitlist.mark_allocated(entry.entry_id, now).await?;
                        assignments.push(Assignment {
                            entry_id: entry.entry_id,
                            patient_id: entry.patient_id,
                            bed_id: bed.bed_id,
                            room_number: bed.room_number.clone(),
                            allocation_id: record.allocation_id,
                        });
                        break;
                    }
                    Err(IcuError::InvalidTransition { .. }) => continue,
                    Err(error) => return Err(error),
                }
            }
        }

        info!(assigned = assignments.len(), "batch assignment pass complete");
        Ok(assignments)
    }

    /// Claim one bed for the signal's patient: CAS occupy, then open the
    /// allocation record. Only the transition winner reaches the insert,
    /// which keeps a single open record per occupied bed.
    async fn claim(
        &self,
        bed: &Bed,
        signal: &StoredSignal,
        allocated_by: &str,
        mode: AllocationMode,
        now: DateTime<Utc>,
    ) -> Result<AllocationRecord, IcuError> {
        let expected = Some(expected_discharge(now, signal.signal.predicted_days));
        self.open_record(bed, signal.patient_id, expected, allocated_by, mode, now).await
    }

    async fn open_record(
        &self,
        bed: &Bed,
        patient_id: i64,
        expected_discharge: Option<DateTime<Utc>>,
        allocated_by: &str,
        mode: AllocationMode,
        now: DateTime<Utc>,
    ) -> Result<AllocationRecord, IcuError> {
        self.registry
            .transition(
                bed.bed_id,
                BedStatus::Available,
                BedStatus::Occupied,
                Some(Occupant { patient_id, admitted_at: now, expected_discharge }),
            )
            .await?;

        let readmitted = self.was_discharged_before(patient_id).await?;
        let record = AllocationRecord {
            allocation_id: Uuid::new_v4(),
            patient_id,
            bed_id: bed.bed_id,
            allocated_by: allocated_by.to_string(),
            mode,
            allocated_at: now,
            discharged_at: None,
            duration_days: None,
            discharge_reason: None,
            total_cost: None,
            readmitted,
        };

        sqlx::query(
            "INSERT INTO bed_allocations (
                allocation_id, patient_id, bed_id, allocated_by, allocation_mode,
                allocated_at, readmitted
            ) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.allocation_id.to_string())
        .bind(record.patient_id)
        .bind(record.bed_id)
        .bind(&record.allocated_by)
        .bind(record.mode.as_str())
        .bind(record.allocated_at)
        .bind(record.readmitted)
        .execute(self.db.pool())
        .await?;

        info!(
            patient_id,
            bed_id = bed.bed_id,
            room = %bed.room_number,
            mode = mode.as_str(),
            "bed allocated"
        );
        Ok(record)
    }

    async fn was_discharged_before(&self, patient_id: i64) -> Result<bool, IcuError> {
        let row = sqlx::query(
            "SELECT EXISTS(
                SELECT 1 FROM bed_allocations
                WHERE patient_id = ? AND discharged_at IS NOT NULL
            ) AS prior",
        )
        .bind(patient_id)
        .fetch_one(self.db.pool())
        .await?;
        Ok(row.try_get::<bool, _>("prior")?)
    }
}

fn expected_discharge(now: DateTime<Utc>, predicted_days: f64) -> DateTime<Utc> {
    now + Duration::seconds((predicted_days * 86_400.0) as i64)
}

/// Score one candidate bed for a signal; higher is better.
///
/// Critical and high-risk patients pull toward the nursing station;
/// everyone else is pushed outward to conserve close beds. Matching
/// equipment earns a flat bonus per device, and moderate-risk patients
/// prefer cheaper beds.
pub(crate) fn score_bed(bed: &Bed, signal: &AdmissionSignal) -> f64 {
    let mut score = match signal.risk_level {
        RiskLevel::Critical | RiskLevel::High => (10 - bed.proximity_rank) as f64 * 10.0,
        _ => bed.proximity_rank as f64 * 5.0,
    };

    if signal.ventilator_needed && bed.has_ventilator {
        score += 30.0;
    }
    if signal.dialysis_needed && bed.has_dialysis {
        score += 30.0;
    }
    if signal.risk_level == RiskLevel::Moderate {
        score += (5000.0 - bed.daily_cost) / 100.0;
    }
    score
}

/// Candidates by descending score; ties go to the lowest bed id.
fn ranked<'a>(beds: &'a [Bed], signal: &AdmissionSignal) -> Vec<&'a Bed> {
    let mut scored: Vec<(&Bed, f64)> =
        beds.iter().map(|bed| (bed, score_bed(bed, signal))).collect();
    scored.sort_by(|a, b| match b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal) {
        Ordering::Equal => a.0.bed_id.cmp(&b.0.bed_id),
        other => other,
    });
    scored.into_iter().map(|(bed, _)| bed).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewBed;

    struct Fixture {
        db: Arc<Database>,
        registry: Arc<BedRegistry>,
        waitlist: Arc<Waitlist>,
        engine: AllocationEngine,
    }

    async fn fixture() -> Fixture {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let registry = Arc::new(BedRegistry::new(db.pool().clone()));
        let waitlist = Arc::new(Waitlist::new(db.pool().clone()));
        let engine = AllocationEngine::new(registry.clone(), waitlist.clone(), db.clone());
        Fixture { db, registry, waitlist, engine }
    }

    fn signal(risk_level: RiskLevel, ventilator: bool, priority_score: f64) -> AdmissionSignal {
        AdmissionSignal {
            icu_needed: true,
            probability: 80.0,
            risk_level,
            predicted_days: 3.0,
            ventilator_needed: ventilator,
            dialysis_needed: false,
            priority_score,
        }
    }

    async fn stored(fx: &Fixture, patient_id: i64, signal: &AdmissionSignal) -> StoredSignal {
        fx.db.save_signal(patient_id, signal, Utc::now()).await.unwrap()
    }

    fn bed(bed_id: i64, proximity: i64, ventilator: bool, cost: f64) -> Bed {
        Bed {
            bed_id,
            room_number: format!("ICU-{bed_id}"),
            floor_number: 1,
            status: BedStatus::Available,
            patient_id: None,
            admitted_at: None,
            expected_discharge: None,
            proximity_rank: proximity,
            has_ventilator: ventilator,
            has_dialysis: false,
            has_ecmo: false,
            isolation_room: false,
            daily_cost: cost,
        }
    }

    #[test]
    fn critical_patients_pull_toward_the_nursing_station() {
        let signal = signal(RiskLevel::Critical, false, 90.0);
        let near = bed(1, 1, false, 2500.0);
        let far = bed(2, 9, false, 2500.0);
        assert!(score_bed(&near, &signal) > score_bed(&far, &signal));

        let stable = AdmissionSignal { risk_level: RiskLevel::Low, ..signal };
        assert!(score_bed(&far, &stable) > score_bed(&near, &stable));
    }

    #[test]
    fn equipment_match_earns_bonus_and_moderate_prefers_cheap() {
        let vent_signal = signal(RiskLevel::High, true, 80.0);
        let plain = bed(1, 5, false, 2500.0);
        let vented = bed(2, 5, true, 2500.0);
        assert!((score_bed(&vented, &vent_signal) - score_bed(&plain, &vent_signal) - 30.0).abs() < f64::EPSILON);

        let moderate = signal(RiskLevel::Moderate, false, 40.0);
        let cheap = bed(3, 5, false, 1500.0);
        let pricey = bed(4, 5, false, 4500.0);
        assert!(score_bed(&cheap, &moderate) > score_bed(&pricey, &moderate));
    }

    #[test]
    fn score_ties_break_on_lowest_bed_id() {
        let signal = signal(RiskLevel::High, false, 80.0);
        let twins = [bed(7, 4, false, 2500.0), bed(3, 4, false, 2500.0)];
        let order = ranked(&twins, &signal);
        assert_eq!(order[0].bed_id, 3);
    }

    #[tokio::test]
    async fn allocate_one_picks_best_bed_and_opens_record() {
        let fx = fixture().await;
        let mut near = NewBed::new("ICU-1");
        near.proximity_rank = 1;
        let mut far = NewBed::new("ICU-2");
        far.proximity_rank = 9;
        let near = fx.registry.create(near).await.unwrap();
        fx.registry.create(far).await.unwrap();

        let stored = stored(&fx, 1, &signal(RiskLevel::Critical, false, 90.0)).await;
        let outcome = fx
            .engine
            .allocate_one(&stored, SYSTEM_ALLOCATOR, AllocationMode::Automatic, Utc::now())
            .await
            .unwrap();

        match outcome {
            AllocationOutcome::Allocated { record } => {
                assert_eq!(record.bed_id, near.bed_id);
                assert!(record.is_open());
                assert!(!record.readmitted);
            }
            other => panic!("expected allocation, got {other:?}"),
        }

        let occupied = fx.registry.get(near.bed_id).await.unwrap();
        assert_eq!(occupied.status, BedStatus::Occupied);
        assert_eq!(occupied.patient_id, Some(1));
        assert!(occupied.expected_discharge.is_some());
    }

    #[tokio::test]
    async fn allocate_one_waitlists_when_no_equipment_match() {
        let fx = fixture().await;
        fx.registry.create(NewBed::new("ICU-1")).await.unwrap();

        let stored = stored(&fx, 2, &signal(RiskLevel::High, true, 80.0)).await;
        let outcome = fx
            .engine
            .allocate_one(&stored, SYSTEM_ALLOCATOR, AllocationMode::Automatic, Utc::now())
            .await
            .unwrap();

        match outcome {
            AllocationOutcome::Waitlisted { entry } => assert_eq!(entry.patient_id, 2),
            other => panic!("expected waitlisted, got {other:?}"),
        }
        // The plain bed stays free.
        assert_eq!(fx.registry.available(EquipmentNeeds::default()).await.unwrap().len(), 1);

        // Retrying while queued is a no-op waitlisted outcome.
        let again = fx
            .engine
            .allocate_one(&stored, SYSTEM_ALLOCATOR, AllocationMode::Automatic, Utc::now())
            .await
            .unwrap();
        assert!(matches!(again, AllocationOutcome::Waitlisted { .. }));
        assert_eq!(fx.waitlist.waiting().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn allocate_one_rejects_patients_without_need() {
        let fx = fixture().await;
        let mut no_need = signal(RiskLevel::Low, false, 20.0);
        no_need.icu_needed = false;
        let stored = stored(&fx, 3, &no_need).await;

        let result = fx
            .engine
            .allocate_one(&stored, SYSTEM_ALLOCATOR, AllocationMode::Automatic, Utc::now())
            .await;
        assert!(matches!(result, Err(IcuError::NotNeeded(3))));
    }

    #[tokio::test]
    async fn batch_serves_highest_priority_first() {
        // One ventilator bed, two ventilator patients: priority 80 wins,
        // priority 60 keeps waiting.
        let fx = fixture().await;
        let mut vent = NewBed::new("ICU-1");
        vent.has_ventilator = true;
        let vent = fx.registry.create(vent).await.unwrap();

        let now = Utc::now();
        let high = stored(&fx, 1, &signal(RiskLevel::High, true, 80.0)).await;
        let low = stored(&fx, 2, &signal(RiskLevel::High, true, 60.0)).await;
        fx.waitlist.enqueue(&high, now).await.unwrap();
        fx.waitlist.enqueue(&low, now + Duration::minutes(1)).await.unwrap();

        let assignments = fx.engine.auto_assign_batch(now + Duration::minutes(5)).await.unwrap();
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].patient_id, 1);
        assert_eq!(assignments[0].bed_id, vent.bed_id);

        let still_waiting = fx.waitlist.waiting().await.unwrap();
        assert_eq!(still_waiting.len(), 1);
        assert_eq!(still_waiting[0].patient_id, 2);
    }

    #[tokio::test]
    async fn batch_skips_equipment_mismatch_without_backtracking() {
        // The top-priority patient needs a ventilator no bed offers; the
        // pass leaves them waiting and still serves the next entry.
        let fx = fixture().await;
        fx.registry.create(NewBed::new("ICU-1")).await.unwrap();

        let now = Utc::now();
        let vent_patient = stored(&fx, 1, &signal(RiskLevel::Critical, true, 95.0)).await;
        let plain_patient = stored(&fx, 2, &signal(RiskLevel::Moderate, false, 40.0)).await;
        fx.waitlist.enqueue(&vent_patient, now).await.unwrap();
        fx.waitlist.enqueue(&plain_patient, now + Duration::minutes(1)).await.unwrap();

        let assignments = fx.engine.auto_assign_batch(now + Duration::minutes(2)).await.unwrap();
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].patient_id, 2);

        let waiting = fx.waitlist.waiting().await.unwrap();
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].patient_id, 1);
    }

    #[tokio::test]
    async fn concurrent_allocations_never_share_a_bed() {
        let fx = fixture().await;
        fx.registry.create(NewBed::new("ICU-1")).await.unwrap();

        let now = Utc::now();
        let first = stored(&fx, 1, &signal(RiskLevel::High, false, 80.0)).await;
        let second = stored(&fx, 2, &signal(RiskLevel::High, false, 70.0)).await;

        let (a, b) = tokio::join!(
            fx.engine.allocate_one(&first, SYSTEM_ALLOCATOR, AllocationMode::Automatic, now),
            fx.engine.allocate_one(&second, SYSTEM_ALLOCATOR, AllocationMode::Automatic, now),
        );
        let outcomes = [a.unwrap(), b.unwrap()];

        let allocated = outcomes
            .iter()
            .filter(|o| matches!(o, AllocationOutcome::Allocated { .. }))
            .count();
        assert_eq!(allocated, 1);
        assert_eq!(fx.waitlist.waiting().await.unwrap().len(), 1);

        // Occupied iff patient set, for every bed.
        for bed in fx.registry.list_all().await.unwrap() {
            assert_eq!(bed.status == BedStatus::Occupied, bed.patient_id.is_some());
        }
    }

    #[tokio::test]
    async fn manual_assignment_targets_the_requested_bed() {
        let fx = fixture().await;
        fx.registry.create(NewBed::new("ICU-1")).await.unwrap();
        let target = fx.registry.create(NewBed::new("ICU-2")).await.unwrap();

        let record = fx
            .engine
            .assign_manual(9, target.bed_id, "dr.adams", Utc::now())
            .await
            .unwrap();
        assert_eq!(record.bed_id, target.bed_id);
        assert_eq!(record.mode, AllocationMode::Manual);
        assert_eq!(record.allocated_by, "dr.adams");

        // Occupying the same bed twice conflicts.
        let again = fx.engine.assign_manual(10, target.bed_id, "dr.adams", Utc::now()).await;
        assert!(matches!(again, Err(IcuError::InvalidTransition { .. })));
    }
}
