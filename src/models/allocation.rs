use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How an allocation was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationMode {
    Manual,
    Automatic,
    Emergency,
}

impl AllocationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AllocationMode::Manual => "manual",
            AllocationMode::Automatic => "automatic",
            AllocationMode::Emergency => "emergency",
        }
    }

    pub fn parse(s: &str) -> Option<AllocationMode> {
        match s {
            "manual" => Some(AllocationMode::Manual),
            "automatic" => Some(AllocationMode::Automatic),
            "emergency" => Some(AllocationMode::Emergency),
            _ => None,
        }
    }
}

/// Audit record of one bed occupation.
///
/// Opened atomically with the bed turning occupied; closed exactly once
/// on discharge. At most one open record exists per occupied bed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationRecord {
    pub allocation_id: Uuid,
    pub patient_id: i64,
    pub bed_id: i64,
    /// System or human operator identity.
    pub allocated_by: String,
    pub mode: AllocationMode,
    pub allocated_at: DateTime<Utc>,
    pub discharged_at: Option<DateTime<Utc>>,
    /// Stay length in fractional days, derived from the timestamps.
    pub duration_days: Option<f64>,
    pub discharge_reason: Option<String>,
    /// duration_days x the bed's daily cost.
    pub total_cost: Option<f64>,
    pub readmitted: bool,
}

impl AllocationRecord {
    pub fn is_open(&self) -> bool {
        self.discharged_at.is_none()
    }
}

/// Lifecycle state of a waitlist entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitlistStatus {
    Waiting,
    Allocated,
    Cancelled,
}

impl WaitlistStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WaitlistStatus::Waiting => "waiting",
            WaitlistStatus::Allocated => "allocated",
            WaitlistStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<WaitlistStatus> {
        match s {
            "waiting" => Some(WaitlistStatus::Waiting),
            "allocated" => Some(WaitlistStatus::Allocated),
            "cancelled" => Some(WaitlistStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for WaitlistStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A patient queued for a bed, ranked by priority then arrival.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub entry_id: Uuid,
    pub patient_id: i64,
    pub signal_id: i64,
    /// 1-100, higher serves first.
    pub priority: i64,
    pub status: WaitlistStatus,
    pub added_at: DateTime<Utc>,
    pub allocated_at: Option<DateTime<Utc>>,
}

impl WaitlistEntry {
    /// Time spent waiting; derived, never stored.
    pub fn wait_time(&self, now: DateTime<Utc>) -> Duration {
        now - self.added_at
    }

    /// Waiting time in hours, rounded to one decimal for queue views.
    pub fn wait_hours(&self, now: DateTime<Utc>) -> f64 {
        let hours = self.wait_time(now).num_seconds() as f64 / 3600.0;
        (hours * 10.0).round() / 10.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn wait_hours_is_derived_and_rounded() {
        let added = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        let entry = WaitlistEntry {
            entry_id: Uuid::new_v4(),
            patient_id: 7,
            signal_id: 1,
            priority: 80,
            status: WaitlistStatus::Waiting,
            added_at: added,
            allocated_at: None,
        };

        let now = added + Duration::minutes(90);
        assert_eq!(entry.wait_time(now), Duration::minutes(90));
        assert!((entry.wait_hours(now) - 1.5).abs() < f64::EPSILON);
    }
}
