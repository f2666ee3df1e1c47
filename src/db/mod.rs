//! SQLite persistence: connection pool, schema initialization, and the
//! boundary stores for externally-owned data (patient cases, admission
//! signals) that the allocation core only mirrors.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use crate::error::IcuError;
use crate::models::{
    AdmissionSignal, AllocationMode, AllocationRecord, CaseStatus, PatientCase, PatientFeatures,
    RiskLevel, StoredSignal,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS patients (
        patient_id INTEGER PRIMARY KEY,
        full_name TEXT NOT NULL,
        surgery_date TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'scheduled'
            CHECK(status IN ('scheduled', 'completed', 'cancelled')),
        age INTEGER NOT NULL,
        asa_class INTEGER NOT NULL CHECK(asa_class BETWEEN 1 AND 5),
        emergency_surgery INTEGER NOT NULL DEFAULT 0,
        diabetes INTEGER NOT NULL DEFAULT 0,
        hypertension INTEGER NOT NULL DEFAULT 0,
        heart_disease INTEGER NOT NULL DEFAULT 0,
        kidney_disease INTEGER NOT NULL DEFAULT 0,
        copd INTEGER NOT NULL DEFAULT 0,
        liver_disease INTEGER NOT NULL DEFAULT 0,
        creatinine REAL NOT NULL DEFAULT 1.0
    )",
    "CREATE TABLE IF NOT EXISTS admission_signals (
        signal_id INTEGER PRIMARY KEY AUTOINCREMENT,
        patient_id INTEGER NOT NULL,
        icu_needed INTEGER NOT NULL,
        probability REAL NOT NULL,
        risk_level TEXT NOT NULL
            CHECK(risk_level IN ('LOW', 'MODERATE', 'HIGH', 'CRITICAL')),
        predicted_days REAL NOT NULL,
        ventilator_needed INTEGER NOT NULL DEFAULT 0,
        dialysis_needed INTEGER NOT NULL DEFAULT 0,
        priority_score REAL NOT NULL,
        derived_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS icu_beds (
        bed_id INTEGER PRIMARY KEY AUTOINCREMENT,
        room_number TEXT NOT NULL UNIQUE,
        floor_number INTEGER NOT NULL DEFAULT 1,
        status TEXT NOT NULL DEFAULT 'available'
            CHECK(status IN ('available', 'occupied', 'maintenance', 'cleaning')),
        patient_id INTEGER,
        admitted_at TEXT,
        expected_discharge TEXT,
        proximity_rank INTEGER NOT NULL DEFAULT 5 CHECK(proximity_rank BETWEEN 1 AND 10),
        has_ventilator INTEGER NOT NULL DEFAULT 0,
        has_dialysis INTEGER NOT NULL DEFAULT 0,
        has_ecmo INTEGER NOT NULL DEFAULT 0,
        isolation_room INTEGER NOT NULL DEFAULT 0,
        daily_cost REAL NOT NULL DEFAULT 2500.0
    )",
    "CREATE TABLE IF NOT EXISTS icu_waitlist (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        entry_id TEXT NOT NULL UNIQUE,
        patient_id INTEGER NOT NULL,
        signal_id INTEGER NOT NULL,
        priority INTEGER NOT NULL CHECK(priority BETWEEN 1 AND 100),
        status TEXT NOT NULL DEFAULT 'waiting'
            CHECK(status IN ('waiting', 'allocated', 'cancelled')),
        added_at TEXT NOT NULL,
        allocated_at TEXT
    )",
    "CREATE TABLE IF NOT EXISTS bed_allocations (
        allocation_id TEXT PRIMARY KEY,
        patient_id INTEGER NOT NULL,
        bed_id INTEGER NOT NULL,
        allocated_by TEXT NOT NULL,
        allocation_mode TEXT NOT NULL
            CHECK(allocation_mode IN ('manual', 'automatic', 'emergency')),
        allocated_at TEXT NOT NULL,
        discharged_at TEXT,
        duration_days REAL,
        discharge_reason TEXT,
        total_cost REAL,
        readmitted INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_waitlist_status ON icu_waitlist(status, priority)",
    "CREATE INDEX IF NOT EXISTS idx_allocations_bed ON bed_allocations(bed_id, discharged_at)",
];

/// Database connection pool plus schema management.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect to the given SQLite URL and create missing tables.
    pub async fn connect(url: &str) -> Result<Self, IcuError> {
        let pool = SqlitePoolOptions::new().max_connections(5).connect(url).await?;
        Self::init_schema(&pool).await?;
        info!(url, "database ready");
        Ok(Self { pool })
    }

    /// In-memory database on a single connection. Each in-memory
    /// connection is its own database, so the pool must not grow.
    pub async fn in_memory() -> Result<Self, IcuError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(pool).await?;
        }
        Ok(())
    }

    // ===== Patient cases (boundary mirror) =====

    pub async fn upsert_case(&self, case: &PatientCase) -> Result<(), IcuError> {
        sqlx::query(
            "INSERT OR REPLACE INTO patients (
                patient_id, full_name, surgery_date, status, age, asa_class,
                emergency_surgery, diabetes, hypertension, heart_disease,
                kidney_disease, copd, liver_disease, creatinine
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(case.patient_id)
        .bind(&case.full_name)
        .bind(case.surgery_date)
        .bind(case.status.as_str())
        .bind(case.features.age as i64)
        .bind(case.features.asa_class as i64)
        .bind(case.features.emergency_surgery)
        .bind(case.features.diabetes)
        .bind(case.features.hypertension)
        .bind(case.features.heart_disease)
        .bind(case.features.kidney_disease)
        .bind(case.features.copd)
        .bind(case.features.liver_disease)
        .bind(case.features.creatinine)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn case(&self, patient_id: i64) -> Result<PatientCase, IcuError> {
        let row = sqlx::query("SELECT * FROM patients WHERE patient_id = ?")
            .bind(patient_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(IcuError::PatientNotFound(patient_id))?;
        case_from_row(&row)
    }

    pub async fn scheduled_cases(&self) -> Result<Vec<PatientCase>, IcuError> {
        let rows = sqlx::query(
            "SELECT * FROM patients WHERE status = 'scheduled'
             ORDER BY surgery_date, patient_id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(case_from_row).collect()
    }

    // ===== Admission signals =====

    pub async fn save_signal(
        &self,
        patient_id: i64,
        signal: &AdmissionSignal,
        now: DateTime<Utc>,
    ) -> Result<StoredSignal, IcuError> {
        let result = sqlx::query(
            "INSERT INTO admission_signals (
                patient_id, icu_needed, probability, risk_level, predicted_days,
                ventilator_needed, dialysis_needed, priority_score, derived_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(patient_id)
        .bind(signal.icu_needed)
        .bind(signal.probability)
        .bind(signal.risk_level.as_str())
        .bind(signal.predicted_days)
        .bind(signal.ventilator_needed)
        .bind(signal.dialysis_needed)
        .bind(signal.priority_score)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(StoredSignal {
            signal_id: result.last_insert_rowid(),
            patient_id,
            derived_at: now,
            signal: signal.clone(),
        })
    }

    pub async fn signal(&self, signal_id: i64) -> Result<StoredSignal, IcuError> {
        let row = sqlx::query("SELECT * FROM admission_signals WHERE signal_id = ?")
            .bind(signal_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(IcuError::SignalNotFound(signal_id))?;
        signal_from_row(&row)
    }

    /// Most recent signal derived for the patient, if any.
    pub async fn latest_signal(&self, patient_id: i64) -> Result<Option<StoredSignal>, IcuError> {
        let row = sqlx::query(
            "SELECT * FROM admission_signals WHERE patient_id = ?
             ORDER BY signal_id DESC LIMIT 1",
        )
        .bind(patient_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(signal_from_row).transpose()
    }

    /// Latest signal per patient, keyed by patient id.
    pub async fn latest_signals(&self) -> Result<HashMap<i64, StoredSignal>, IcuError> {
        let rows = sqlx::query("SELECT * FROM admission_signals ORDER BY signal_id ASC")
            .fetch_all(&self.pool)
            .await?;
        let mut latest = HashMap::new();
        for row in &rows {
            let signal = signal_from_row(row)?;
            latest.insert(signal.patient_id, signal);
        }
        Ok(latest)
    }
}

// ===== Row mappers =====

fn case_from_row(row: &SqliteRow) -> Result<PatientCase, IcuError> {
    let status_text: String = row.try_get("status")?;
    let status = CaseStatus::parse(&status_text).ok_or(IcuError::Decode {
        field: "patients.status",
        value: status_text,
    })?;

    Ok(PatientCase {
        patient_id: row.try_get("patient_id")?,
        full_name: row.try_get("full_name")?,
        surgery_date: row.try_get("surgery_date")?,
        status,
        features: PatientFeatures {
            age: row.try_get::<i64, _>("age")? as u32,
            asa_class: row.try_get::<i64, _>("asa_class")? as u8,
            emergency_surgery: row.try_get("emergency_surgery")?,
            diabetes: row.try_get("diabetes")?,
            hypertension: row.try_get("hypertension")?,
            heart_disease: row.try_get("heart_disease")?,
            kidney_disease: row.try_get("kidney_disease")?,
            copd: row.try_get("copd")?,
            liver_disease: row.try_get("liver_disease")?,
            creatinine: row.try_get("creatinine")?,
        },
    })
}

fn signal_from_row(row: &SqliteRow) -> Result<StoredSignal, IcuError> {
    let level_text: String = row.try_get("risk_level")?;
    let risk_level = RiskLevel::parse(&level_text).ok_or(IcuError::Decode {
        field: "admission_signals.risk_level",
        value: level_text,
    })?;

    Ok(StoredSignal {
        signal_id: row.try_get("signal_id")?,
        patient_id: row.try_get("patient_id")?,
        derived_at: row.try_get("derived_at")?,
        signal: AdmissionSignal {
            icu_needed: row.try_get("icu_needed")?,
            probability: row.try_get("probability")?,
            risk_level,
            predicted_days: row.try_get("predicted_days")?,
            ventilator_needed: row.try_get("ventilator_needed")?,
            dialysis_needed: row.try_get("dialysis_needed")?,
            priority_score: row.try_get("priority_score")?,
        },
    })
}

pub(crate) fn allocation_from_row(row: &SqliteRow) -> Result<AllocationRecord, IcuError> {
    let id_text: String = row.try_get("allocation_id")?;
    let allocation_id = Uuid::parse_str(&id_text).map_err(|_| IcuError::Decode {
        field: "bed_allocations.allocation_id",
        value: id_text,
    })?;
    let mode_text: String = row.try_get("allocation_mode")?;
    let mode = AllocationMode::parse(&mode_text).ok_or(IcuError::Decode {
        field: "bed_allocations.allocation_mode",
        value: mode_text,
    })?;

    Ok(AllocationRecord {
        allocation_id,
        patient_id: row.try_get("patient_id")?,
        bed_id: row.try_get("bed_id")?,
        allocated_by: row.try_get("allocated_by")?,
        mode,
        allocated_at: row.try_get("allocated_at")?,
        discharged_at: row.try_get("discharged_at")?,
        duration_days: row.try_get("duration_days")?,
        discharge_reason: row.try_get("discharge_reason")?,
        total_cost: row.try_get("total_cost")?,
        readmitted: row.try_get("readmitted")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RiskLevel;

    fn sample_case(patient_id: i64) -> PatientCase {
        PatientCase {
            patient_id,
            full_name: "Dana Whitfield".into(),
            surgery_date: chrono::NaiveDate::from_ymd_opt(2025, 6, 10).unwrap(),
            status: CaseStatus::Scheduled,
            features: PatientFeatures {
                age: 68,
                asa_class: 3,
                emergency_surgery: false,
                diabetes: true,
                hypertension: true,
                heart_disease: false,
                kidney_disease: false,
                copd: false,
                liver_disease: false,
                creatinine: 1.2,
            },
        }
    }

    fn sample_signal() -> AdmissionSignal {
        AdmissionSignal {
            icu_needed: true,
            probability: 75.0,
            risk_level: RiskLevel::High,
            predicted_days: 5.0,
            ventilator_needed: true,
            dialysis_needed: false,
            priority_score: 62.5,
        }
    }

    #[tokio::test]
    async fn case_round_trips_through_store() {
        let db = Database::in_memory().await.unwrap();
        let case = sample_case(42);
        db.upsert_case(&case).await.unwrap();

        let loaded = db.case(42).await.unwrap();
        assert_eq!(loaded.full_name, case.full_name);
        assert_eq!(loaded.surgery_date, case.surgery_date);
        assert_eq!(loaded.features.asa_class, 3);
        assert!(loaded.features.diabetes);

        assert!(matches!(db.case(99).await, Err(IcuError::PatientNotFound(99))));
    }

    #[tokio::test]
    async fn latest_signal_wins_per_patient() {
        let db = Database::in_memory().await.unwrap();
        db.upsert_case(&sample_case(1)).await.unwrap();

        let now = Utc::now();
        let first = db.save_signal(1, &sample_signal(), now).await.unwrap();
        let mut newer = sample_signal();
        newer.probability = 90.0;
        let second = db.save_signal(1, &newer, now).await.unwrap();
        assert!(second.signal_id > first.signal_id);

        let latest = db.latest_signal(1).await.unwrap().unwrap();
        assert_eq!(latest.signal_id, second.signal_id);
        assert!((latest.signal.probability - 90.0).abs() < f64::EPSILON);

        let map = db.latest_signals().await.unwrap();
        assert_eq!(map[&1].signal_id, second.signal_id);
    }
}
