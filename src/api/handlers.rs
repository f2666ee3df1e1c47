//! Request handlers: thin translations between HTTP payloads and the
//! allocation components. Payloads are validated here, before anything
//! reaches the engine.

use actix_web::{web, HttpResponse};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use super::AppState;
use crate::engine::SYSTEM_ALLOCATOR;
use crate::error::IcuError;
use crate::models::{
    AllocationMode, AllocationRecord, Bed, BedStatus, CaseStatus, ComponentRisks, NewBed,
    PatientCase, PatientFeatures, RiskAssessment, RiskLevel, WaitlistEntry,
};

// ===== Request payloads =====

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterCaseRequest {
    pub patient_id: i64,
    #[validate(length(min = 1))]
    pub full_name: String,
    pub surgery_date: NaiveDate,
    pub status: CaseStatus,
    #[validate(range(min = 0, max = 130))]
    pub age: u32,
    #[validate(range(min = 1, max = 5))]
    pub asa_class: u8,
    #[serde(default)]
    pub emergency_surgery: bool,
    #[serde(default)]
    pub diabetes: bool,
    #[serde(default)]
    pub hypertension: bool,
    #[serde(default)]
    pub heart_disease: bool,
    #[serde(default)]
    pub kidney_disease: bool,
    #[serde(default)]
    pub copd: bool,
    #[serde(default)]
    pub liver_disease: bool,
    #[validate(range(min = 0.0, max = 50.0))]
    #[serde(default = "default_creatinine")]
    pub creatinine: f64,
}

fn default_creatinine() -> f64 {
    1.0
}

#[derive(Debug, Deserialize, Validate)]
pub struct IntakeRequest {
    pub patient_id: i64,
    pub overall_risk: RiskLevel,
    #[validate]
    pub risks: RisksPayload,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RisksPayload {
    #[validate(range(min = 0.0, max = 100.0))]
    pub aki: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub cardiovascular: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub transfusion: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub mortality: f64,
}

#[derive(Debug, Deserialize)]
pub struct PatientRef {
    pub patient_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct ManualAssignRequest {
    pub patient_id: i64,
    pub bed_id: i64,
    pub allocated_by: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct DischargeRequest {
    pub discharge_reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateBedRequest {
    #[validate(length(min = 1))]
    pub room_number: String,
    #[serde(default = "default_floor")]
    pub floor_number: i64,
    #[validate(range(min = 1, max = 10))]
    #[serde(default = "default_proximity")]
    pub proximity_rank: i64,
    #[serde(default)]
    pub has_ventilator: bool,
    #[serde(default)]
    pub has_dialysis: bool,
    #[serde(default)]
    pub has_ecmo: bool,
    #[serde(default)]
    pub isolation_room: bool,
    #[validate(range(min = 0.0))]
    #[serde(default = "default_daily_cost")]
    pub daily_cost: f64,
}

fn default_floor() -> i64 {
    1
}

fn default_proximity() -> i64 {
    5
}

fn default_daily_cost() -> f64 {
    2500.0
}

#[derive(Debug, Deserialize)]
pub struct BedStatusRequest {
    pub status: BedStatus,
}

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    pub days: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

// ===== View models =====

#[derive(Debug, Serialize)]
struct QueueItem {
    #[serde(flatten)]
    entry: WaitlistEntry,
    patient_name: Option<String>,
    wait_hours: f64,
}

#[derive(Debug, Serialize)]
struct LogItem {
    #[serde(flatten)]
    record: AllocationRecord,
    time_ago: String,
}

// ===== Patient boundary =====

pub async fn register_case(
    state: web::Data<AppState>,
    body: web::Json<RegisterCaseRequest>,
) -> Result<HttpResponse, IcuError> {
    body.validate()?;
    let body = body.into_inner();

    let case = PatientCase {
        patient_id: body.patient_id,
        full_name: body.full_name,
        surgery_date: body.surgery_date,
        status: body.status,
        features: PatientFeatures {
            age: body.age,
            asa_class: body.asa_class,
            emergency_surgery: body.emergency_surgery,
            diabetes: body.diabetes,
            hypertension: body.hypertension,
            heart_disease: body.heart_disease,
            kidney_disease: body.kidney_disease,
            copd: body.copd,
            liver_disease: body.liver_disease,
            creatinine: body.creatinine,
        },
    };
    state.db.upsert_case(&case).await?;

    Ok(HttpResponse::Created().json(json!({ "patient_id": case.patient_id })))
}

/// Accept an externally produced risk assessment, derive and persist the
/// admission signal, and queue HIGH/CRITICAL cases that need a bed.
pub async fn intake(
    state: web::Data<AppState>,
    body: web::Json<IntakeRequest>,
) -> Result<HttpResponse, IcuError> {
    body.validate()?;
    let now = Utc::now();

    let case = state.db.case(body.patient_id).await?;
    let assessment = RiskAssessment {
        overall_risk: body.overall_risk,
        risks: ComponentRisks {
            aki: body.risks.aki,
            cardiovascular: body.risks.cardiovascular,
            transfusion: body.risks.transfusion,
            mortality: body.risks.mortality,
        },
    };

    let signal = state.predictor.derive_signal(&case.features, &assessment);
    let stored = state.db.save_signal(body.patient_id, &signal, now).await?;

    let mut enqueued = None;
    if stored.signal.icu_needed
        && matches!(assessment.overall_risk, RiskLevel::High | RiskLevel::Critical)
    {
        match state.waitlist.enqueue(&stored, now).await {
            Ok(entry) => enqueued = Some(entry),
            // Already queued from an earlier assessment: nothing to do.
            Err(IcuError::AlreadyWaiting(_)) => {}
            Err(error) => return Err(error),
        }
    }

    Ok(HttpResponse::Ok().json(json!({ "signal": stored, "enqueued": enqueued })))
}

// ===== Waitlist =====

pub async fn enqueue(
    state: web::Data<AppState>,
    body: web::Json<PatientRef>,
) -> Result<HttpResponse, IcuError> {
    let signal = state
        .db
        .latest_signal(body.patient_id)
        .await?
        .ok_or(IcuError::SignalNotFound(body.patient_id))?;

    let entry = state.waitlist.enqueue(&signal, Utc::now()).await?;
    let priority = entry.priority;
    Ok(HttpResponse::Created().json(json!({
        "status": "enqueued",
        "entry": entry,
        "priority": priority,
    })))
}

pub async fn queue(state: web::Data<AppState>) -> Result<HttpResponse, IcuError> {
    let now = Utc::now();
    let waiting = state.waitlist.waiting().await?;

    let mut items = Vec::with_capacity(waiting.len());
    for entry in waiting {
        let patient_name = state.db.case(entry.patient_id).await.ok().map(|c| c.full_name);
        let wait_hours = entry.wait_hours(now);
        items.push(QueueItem { entry, patient_name, wait_hours });
    }

    let total = items.len();
    Ok(HttpResponse::Ok().json(json!({ "queue": items, "total_waiting": total })))
}

// ===== Allocation =====

pub async fn auto_allocate(
    state: web::Data<AppState>,
    body: web::Json<PatientRef>,
) -> Result<HttpResponse, IcuError> {
    let signal = state
        .db
        .latest_signal(body.patient_id)
        .await?
        .ok_or(IcuError::SignalNotFound(body.patient_id))?;

    let outcome = state
        .engine
        .allocate_one(&signal, SYSTEM_ALLOCATOR, AllocationMode::Automatic, Utc::now())
        .await?;
    Ok(HttpResponse::Ok().json(outcome))
}

pub async fn auto_assign(state: web::Data<AppState>) -> Result<HttpResponse, IcuError> {
    let assigned = state.engine.auto_assign_batch(Utc::now()).await?;
    let count = assigned.len();
    Ok(HttpResponse::Ok().json(json!({
        "status": "completed",
        "assigned": assigned,
        "count": count,
    })))
}

pub async fn assign_manual(
    state: web::Data<AppState>,
    body: web::Json<ManualAssignRequest>,
) -> Result<HttpResponse, IcuError> {
    let allocated_by = body.allocated_by.as_deref().unwrap_or("admin");
    let record = state
        .engine
        .assign_manual(body.patient_id, body.bed_id, allocated_by, Utc::now())
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "status": "allocated", "record": record })))
}

// ===== Occupancy lifecycle =====

pub async fn release_bed(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    body: web::Json<DischargeRequest>,
) -> Result<HttpResponse, IcuError> {
    let reason = body.discharge_reason.as_deref().unwrap_or("Discharged");
    let record = state.occupancy.release_bed(path.into_inner(), reason, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(json!({
        "status": "released",
        "message": "Patient discharged, bed now cleaning",
        "record": record,
    })))
}

pub async fn discharge(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<DischargeRequest>,
) -> Result<HttpResponse, IcuError> {
    let reason = body.discharge_reason.as_deref().unwrap_or("Discharged");
    let record = state.occupancy.discharge(path.into_inner(), reason, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(json!({ "status": "discharged", "record": record })))
}

// ===== Bed administration =====

pub async fn create_bed(
    state: web::Data<AppState>,
    body: web::Json<CreateBedRequest>,
) -> Result<HttpResponse, IcuError> {
    body.validate()?;
    let body = body.into_inner();

    let bed = state
        .registry
        .create(NewBed {
            room_number: body.room_number,
            floor_number: body.floor_number,
            proximity_rank: body.proximity_rank,
            has_ventilator: body.has_ventilator,
            has_dialysis: body.has_dialysis,
            has_ecmo: body.has_ecmo,
            isolation_room: body.isolation_room,
            daily_cost: body.daily_cost,
        })
        .await?;
    Ok(HttpResponse::Created().json(&bed))
}

pub async fn update_bed_status(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    body: web::Json<BedStatusRequest>,
) -> Result<HttpResponse, IcuError> {
    let bed_id = path.into_inner();
    state.occupancy.set_status(bed_id, body.status).await?;
    Ok(HttpResponse::Ok().json(json!({ "bed_id": bed_id, "status": body.status })))
}

// ===== Views =====

pub async fn icu_status(state: web::Data<AppState>) -> Result<HttpResponse, IcuError> {
    let capacity = state.analytics.capacity_snapshot().await?;
    let beds: Vec<Bed> = state.registry.list_all().await?;
    Ok(HttpResponse::Ok().json(json!({ "capacity": capacity, "beds": beds })))
}

pub async fn allocation_logs(
    state: web::Data<AppState>,
    query: web::Query<LimitQuery>,
) -> Result<HttpResponse, IcuError> {
    let now = Utc::now();
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let records = state.occupancy.audit_log(limit).await?;

    let logs: Vec<LogItem> = records
        .into_iter()
        .map(|record| {
            let time_ago = time_ago(record.allocated_at, now);
            LogItem { record, time_ago }
        })
        .collect();
    let total = logs.len();
    Ok(HttpResponse::Ok().json(json!({ "logs": logs, "total": total })))
}

pub async fn forecast(
    state: web::Data<AppState>,
    query: web::Query<WindowQuery>,
) -> Result<HttpResponse, IcuError> {
    let now = Utc::now();
    let days = query.days.unwrap_or(7).clamp(1, 30);

    let forecast = state.analytics.forecast(days, now).await?;
    let discharges_today = state.analytics.expected_discharges_today(now).await?;
    Ok(HttpResponse::Ok().json(json!({
        "forecast": forecast,
        "expected_discharges_today": discharges_today,
    })))
}

pub async fn analytics(
    state: web::Data<AppState>,
    query: web::Query<WindowQuery>,
) -> Result<HttpResponse, IcuError> {
    let days = query.days.unwrap_or(30).clamp(1, 365);
    let summary = state.analytics.analytics(days, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(json!({ "analytics": summary })))
}

pub async fn recommendations(state: web::Data<AppState>) -> Result<HttpResponse, IcuError> {
    let recommendations = state.analytics.recommendations(Utc::now()).await?;
    Ok(HttpResponse::Ok().json(json!({ "recommendations": recommendations })))
}

/// Human-readable elapsed time for audit views.
fn time_ago(from: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - from).num_seconds().max(0);
    if seconds < 60 {
        format!("{seconds} seconds ago")
    } else if seconds < 3_600 {
        format!("{} minutes ago", seconds / 60)
    } else if seconds < 86_400 {
        format!("{} hours ago", seconds / 3_600)
    } else {
        format!("{} days ago", seconds / 86_400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::configure;
    use crate::db::Database;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use std::sync::Arc;

    async fn state() -> web::Data<AppState> {
        let db = Arc::new(Database::in_memory().await.unwrap());
        web::Data::new(AppState::new(db))
    }

    #[actix_rt::test]
    async fn bed_creation_and_status_view() {
        let state = state().await;
        let app =
            test::init_service(App::new().app_data(state.clone()).configure(configure)).await;

        let request = test::TestRequest::post()
            .uri("/api/admin/beds")
            .set_json(json!({ "room_number": "ICU-101", "has_ventilator": true }))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let body: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/api/icu/status").to_request(),
        )
        .await;
        assert_eq!(body["capacity"]["total"], 1);
        assert_eq!(body["capacity"]["available"], 1);
        assert_eq!(body["beds"][0]["room_number"], "ICU-101");
    }

    #[actix_rt::test]
    async fn invalid_bed_payload_is_rejected() {
        let state = state().await;
        let app =
            test::init_service(App::new().app_data(state.clone()).configure(configure)).await;

        let request = test::TestRequest::post()
            .uri("/api/admin/beds")
            .set_json(json!({ "room_number": "ICU-1", "proximity_rank": 22 }))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_rt::test]
    async fn intake_derives_signal_and_queues_critical_cases() {
        let state = state().await;
        let app =
            test::init_service(App::new().app_data(state.clone()).configure(configure)).await;

        let request = test::TestRequest::post()
            .uri("/api/patients")
            .set_json(json!({
                "patient_id": 1,
                "full_name": "Rosa Delgado",
                "surgery_date": "2025-06-01",
                "status": "scheduled",
                "age": 78,
                "asa_class": 4,
                "emergency_surgery": true,
            }))
            .to_request();
        assert_eq!(test::call_service(&app, request).await.status(), StatusCode::CREATED);

        let body: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::post()
                .uri("/api/risk/intake")
                .set_json(json!({
                    "patient_id": 1,
                    "overall_risk": "CRITICAL",
                    "risks": { "aki": 10.0, "cardiovascular": 75.0, "transfusion": 20.0, "mortality": 55.0 },
                }))
                .to_request(),
        )
        .await;

        assert_eq!(body["signal"]["icu_needed"], true);
        assert_eq!(body["signal"]["probability"], 99.0);
        assert_eq!(body["signal"]["ventilator_needed"], true);
        assert!(body["enqueued"].is_object());

        // A repeat assessment does not duplicate the queue entry.
        let repeat: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::post()
                .uri("/api/risk/intake")
                .set_json(json!({
                    "patient_id": 1,
                    "overall_risk": "CRITICAL",
                    "risks": { "aki": 10.0, "cardiovascular": 75.0, "transfusion": 20.0, "mortality": 55.0 },
                }))
                .to_request(),
        )
        .await;
        assert!(repeat["enqueued"].is_null());

        let queue: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/api/icu/queue").to_request(),
        )
        .await;
        assert_eq!(queue["total_waiting"], 1);
        assert_eq!(queue["queue"][0]["patient_name"], "Rosa Delgado");
    }

    #[actix_rt::test]
    async fn auto_assign_fills_beds_from_the_queue() {
        let state = state().await;
        let app =
            test::init_service(App::new().app_data(state.clone()).configure(configure)).await;

        // A ventilator bed and a critical ventilator-bound patient.
        let request = test::TestRequest::post()
            .uri("/api/admin/beds")
            .set_json(json!({ "room_number": "ICU-1", "has_ventilator": true }))
            .to_request();
        test::call_service(&app, request).await;

        test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/patients")
                .set_json(json!({
                    "patient_id": 7,
                    "full_name": "Miles Ferry",
                    "surgery_date": "2025-06-02",
                    "status": "scheduled",
                    "age": 81,
                    "asa_class": 4,
                    "emergency_surgery": true,
                    "copd": true,
                }))
                .to_request(),
        )
        .await;
        test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/risk/intake")
                .set_json(json!({
                    "patient_id": 7,
                    "overall_risk": "CRITICAL",
                    "risks": { "aki": 20.0, "cardiovascular": 80.0, "transfusion": 10.0, "mortality": 70.0 },
                }))
                .to_request(),
        )
        .await;

        let body: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::post().uri("/api/icu/auto-assign").to_request(),
        )
        .await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["assigned"][0]["patient_id"], 7);

        let logs: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/api/icu/logs").to_request(),
        )
        .await;
        assert_eq!(logs["total"], 1);
        assert!(logs["logs"][0]["time_ago"].as_str().unwrap().contains("ago"));
    }

    #[actix_rt::test]
    async fn release_unknown_bed_is_not_found() {
        let state = state().await;
        let app =
            test::init_service(App::new().app_data(state.clone()).configure(configure)).await;

        let response = test::call_service(
            &app,
            test::TestRequest::put()
                .uri("/api/icu/release/99")
                .set_json(json!({}))
                .to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
