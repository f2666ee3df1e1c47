//! Domain error taxonomy.
//!
//! Every variant here is a recoverable application-level outcome; only
//! storage faults are fatal to the current request.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{BedStatus, WaitlistStatus};

#[derive(Debug, Error)]
pub enum IcuError {
    #[error("bed {0} not found")]
    BedNotFound(i64),

    #[error("patient {0} not found")]
    PatientNotFound(i64),

    #[error("allocation {0} not found or already closed")]
    AllocationNotFound(Uuid),

    #[error("no open allocation for bed {0}")]
    NoOpenAllocation(i64),

    #[error("waitlist entry {0} not found")]
    EntryNotFound(Uuid),

    #[error("no admission signal on record for patient {0}")]
    SignalNotFound(i64),

    #[error("bed {bed_id}: illegal transition {from} -> {to}")]
    InvalidTransition {
        bed_id: i64,
        from: BedStatus,
        to: BedStatus,
    },

    #[error("patient {0} already has a waiting entry")]
    AlreadyWaiting(i64),

    #[error("patient {0} does not need intensive care")]
    NotNeeded(i64),

    #[error("waitlist entry {entry_id} is {status}, expected waiting")]
    InvalidState {
        entry_id: Uuid,
        status: WaitlistStatus,
    },

    #[error("stored {field} holds unexpected value {value:?}")]
    Decode { field: &'static str, value: String },

    #[error("invalid request: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl ResponseError for IcuError {
    fn status_code(&self) -> StatusCode {
        match self {
            IcuError::BedNotFound(_)
            | IcuError::PatientNotFound(_)
            | IcuError::AllocationNotFound(_)
            | IcuError::NoOpenAllocation(_)
            | IcuError::EntryNotFound(_)
            | IcuError::SignalNotFound(_) => StatusCode::NOT_FOUND,
            IcuError::InvalidTransition { .. }
            | IcuError::AlreadyWaiting(_)
            | IcuError::InvalidState { .. } => StatusCode::CONFLICT,
            IcuError::NotNeeded(_) => StatusCode::UNPROCESSABLE_ENTITY,
            IcuError::Validation(_) => StatusCode::BAD_REQUEST,
            IcuError::Decode { .. } | IcuError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}
