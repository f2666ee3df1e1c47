use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Risk category produced by the external surgical risk model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Moderate => "MODERATE",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }

    pub fn parse(s: &str) -> Option<RiskLevel> {
        match s {
            "LOW" => Some(RiskLevel::Low),
            "MODERATE" => Some(RiskLevel::Moderate),
            "HIGH" => Some(RiskLevel::High),
            "CRITICAL" => Some(RiskLevel::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Component risk percentages (0-100) from the external model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ComponentRisks {
    pub aki: f64,
    pub cardiovascular: f64,
    pub transfusion: f64,
    pub mortality: f64,
}

/// Output contract of the external risk prediction component.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub overall_risk: RiskLevel,
    pub risks: ComponentRisks,
}

/// Patient features consumed from the external patient record store,
/// validated at the boundary before they reach the allocation logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientFeatures {
    pub age: u32,
    /// ASA physical status class, 1-5.
    pub asa_class: u8,
    pub emergency_surgery: bool,
    pub diabetes: bool,
    pub hypertension: bool,
    pub heart_disease: bool,
    pub kidney_disease: bool,
    pub copd: bool,
    pub liver_disease: bool,
    /// Serum creatinine in mg/dL.
    pub creatinine: f64,
}

impl PatientFeatures {
    pub fn comorbidity_count(&self) -> u32 {
        [
            self.diabetes,
            self.hypertension,
            self.heart_disease,
            self.kidney_disease,
            self.copd,
            self.liver_disease,
        ]
        .iter()
        .filter(|&&flag| flag)
        .count() as u32
    }
}

/// Scheduling state of a surgical case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Scheduled,
    Completed,
    Cancelled,
}

impl CaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CaseStatus::Scheduled => "scheduled",
            CaseStatus::Completed => "completed",
            CaseStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<CaseStatus> {
        match s {
            "scheduled" => Some(CaseStatus::Scheduled),
            "completed" => Some(CaseStatus::Completed),
            "cancelled" => Some(CaseStatus::Cancelled),
            _ => None,
        }
    }
}

/// A surgical case mirrored from the patient record store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientCase {
    pub patient_id: i64,
    pub full_name: String,
    pub surgery_date: NaiveDate,
    pub status: CaseStatus,
    pub features: PatientFeatures,
}
