use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bed::EquipmentNeeds;
use super::patient::RiskLevel;

/// ICU admission signal derived from a risk assessment.
///
/// Immutable once computed; recomputed only when the underlying
/// assessment changes. Same inputs always produce the same signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionSignal {
    pub icu_needed: bool,
    /// Admission probability in percentage points, 0-99.
    pub probability: f64,
    pub risk_level: RiskLevel,
    /// Predicted stay duration in days.
    pub predicted_days: f64,
    pub ventilator_needed: bool,
    pub dialysis_needed: bool,
    /// Urgency score, 0-100, one decimal.
    pub priority_score: f64,
}

impl AdmissionSignal {
    /// Integer waitlist priority: the score rounded to the nearest
    /// integer, kept inside the 1-100 range the queue stores.
    pub fn priority(&self) -> i64 {
        (self.priority_score.round() as i64).clamp(1, 100)
    }

    pub fn equipment_needs(&self) -> EquipmentNeeds {
        EquipmentNeeds {
            ventilator: self.ventilator_needed,
            dialysis: self.dialysis_needed,
            ..Default::default()
        }
    }
}

/// An admission signal persisted against the patient it was derived for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSignal {
    pub signal_id: i64,
    pub patient_id: i64,
    pub derived_at: DateTime<Utc>,
    #[serde(flatten)]
    pub signal: AdmissionSignal,
}
