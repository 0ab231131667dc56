// libs/doctor-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{DoctorApplication, DoctorError, SlotError, Weekday};
use crate::services::profile::DoctorProfileService;
use crate::services::slots::SlotRegistryService;

#[derive(Debug, Deserialize)]
pub struct AvailableSlotQuery {
    pub day: Weekday,
    pub start_time: String,
}

fn map_doctor_error(e: DoctorError) -> AppError {
    match e {
        DoctorError::UserNotFound => AppError::NotFound("User not found".to_string()),
        DoctorError::NoPendingApplication => {
            AppError::NotFound("User not found or no pending request".to_string())
        }
        DoctorError::AlreadyApplied => {
            AppError::BadRequest("Already a doctor or request pending".to_string())
        }
        DoctorError::Forbidden => AppError::Forbidden("Not authorized".to_string()),
        DoctorError::ValidationError(msg) => AppError::ValidationError(msg),
        DoctorError::Database(msg) => AppError::Database(msg),
    }
}

#[axum::debug_handler]
pub async fn apply_for_doctor(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(application): Json<DoctorApplication>,
) -> Result<Json<Value>, AppError> {
    let service = DoctorProfileService::new(&state);

    let profile = service
        .apply(&user, application, auth.token())
        .await
        .map_err(map_doctor_error)?;

    Ok(Json(json!({
        "msg": "Application submitted successfully",
        "profile_id": profile.id,
    })))
}

#[axum::debug_handler]
pub async fn approve_doctor(
    State(state): State<Arc<AppConfig>>,
    Path(user_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let service = DoctorProfileService::new(&state);

    service
        .approve(&user, user_id, auth.token())
        .await
        .map_err(map_doctor_error)?;

    Ok(Json(json!({ "msg": "Doctor application approved" })))
}

/// Read-only probe of the slot registry: is the keyed slot currently free?
#[axum::debug_handler]
pub async fn find_available_slot(
    State(state): State<Arc<AppConfig>>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<AvailableSlotQuery>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let registry = SlotRegistryService::new(&state);

    let slot = registry
        .find_available(doctor_id, query.day, &query.start_time, auth.token())
        .await
        .map_err(|e| match e {
            SlotError::DoctorNotFound => AppError::NotFound("Doctor not found".to_string()),
            SlotError::ValidationError(msg) => AppError::ValidationError(msg),
            SlotError::SlotUnavailable => {
                AppError::Conflict("Time slot not available".to_string())
            }
            SlotError::Database(msg) => AppError::Database(msg),
        })?;

    Ok(Json(json!({
        "available": slot.is_some(),
        "slot": slot,
    })))
}
