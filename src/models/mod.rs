//! Domain data model: beds, patient cases, admission signals,
//! waitlist entries and allocation records.

pub mod admission;
pub mod allocation;
pub mod bed;
pub mod patient;

pub use admission::{AdmissionSignal, StoredSignal};
pub use allocation::{AllocationMode, AllocationRecord, WaitlistEntry, WaitlistStatus};
pub use bed::{Bed, BedStatus, EquipmentNeeds, NewBed, Occupant};
pub use patient::{CaseStatus, ComponentRisks, PatientCase, PatientFeatures, RiskAssessment, RiskLevel};
