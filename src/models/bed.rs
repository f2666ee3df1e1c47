use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Occupancy state of a physical ICU bed.
///
/// Legal moves are `available -> occupied -> cleaning -> available` and
/// `available <-> maintenance`; everything else is rejected by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BedStatus {
    Available,
    Occupied,
    Maintenance,
    Cleaning,
}

impl BedStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BedStatus::Available => "available",
            BedStatus::Occupied => "occupied",
            BedStatus::Maintenance => "maintenance",
            BedStatus::Cleaning => "cleaning",
        }
    }

    pub fn parse(s: &str) -> Option<BedStatus> {
        match s {
            "available" => Some(BedStatus::Available),
            "occupied" => Some(BedStatus::Occupied),
            "maintenance" => Some(BedStatus::Maintenance),
            "cleaning" => Some(BedStatus::Cleaning),
            _ => None,
        }
    }

    /// Whether `self -> to` is one of the legal bed state transitions.
    pub fn can_transition(self, to: BedStatus) -> bool {
        matches!(
            (self, to),
            (BedStatus::Available, BedStatus::Occupied)
                | (BedStatus::Occupied, BedStatus::Cleaning)
                | (BedStatus::Cleaning, BedStatus::Available)
                | (BedStatus::Available, BedStatus::Maintenance)
                | (BedStatus::Maintenance, BedStatus::Available)
        )
    }
}

impl fmt::Display for BedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A physical ICU bed and its current occupancy.
///
/// Invariant: `patient_id` is set if and only if `status` is `occupied`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bed {
    pub bed_id: i64,
    pub room_number: String,
    pub floor_number: i64,
    pub status: BedStatus,
    pub patient_id: Option<i64>,
    pub admitted_at: Option<DateTime<Utc>>,
    pub expected_discharge: Option<DateTime<Utc>>,
    /// 1 = closest to the nursing station, 10 = farthest.
    pub proximity_rank: i64,
    pub has_ventilator: bool,
    pub has_dialysis: bool,
    pub has_ecmo: bool,
    pub isolation_room: bool,
    pub daily_cost: f64,
}

/// Provisioning request for a new bed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBed {
    pub room_number: String,
    pub floor_number: i64,
    pub proximity_rank: i64,
    pub has_ventilator: bool,
    pub has_dialysis: bool,
    pub has_ecmo: bool,
    pub isolation_room: bool,
    pub daily_cost: f64,
}

impl NewBed {
    pub fn new(room_number: impl Into<String>) -> Self {
        Self {
            room_number: room_number.into(),
            floor_number: 1,
            proximity_rank: 5,
            has_ventilator: false,
            has_dialysis: false,
            has_ecmo: false,
            isolation_room: false,
            daily_cost: 2500.0,
        }
    }
}

/// Equipment a candidate bed must provide.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EquipmentNeeds {
    pub ventilator: bool,
    pub dialysis: bool,
    pub ecmo: bool,
    pub isolation: bool,
}

impl EquipmentNeeds {
    pub fn satisfied_by(&self, bed: &Bed) -> bool {
        (!self.ventilator || bed.has_ventilator)
            && (!self.dialysis || bed.has_dialysis)
            && (!self.ecmo || bed.has_ecmo)
            && (!self.isolation || bed.isolation_room)
    }
}

/// Patient reference stamped onto a bed when it becomes occupied.
#[derive(Debug, Clone, Copy)]
pub struct Occupant {
    pub patient_id: i64,
    pub admitted_at: DateTime<Utc>,
    pub expected_discharge: Option<DateTime<Utc>>,
}
