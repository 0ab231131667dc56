// libs/appointment-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use doctor_cell::models::{is_valid_wall_clock, SlotError, Weekday};

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

/// The slot key and bounds an appointment holds: a copy of the doctor's slot
/// at booking time, not a reference into the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppointmentSlot {
    pub day: Weekday,
    pub start_time: String,
    pub end_time: String,
}

impl AppointmentSlot {
    pub fn validate(&self) -> Result<(), AppointmentError> {
        if !is_valid_wall_clock(&self.start_time) {
            return Err(AppointmentError::ValidationError(format!(
                "Invalid start_time '{}', expected HH:MM",
                self.start_time
            )));
        }
        if !is_valid_wall_clock(&self.end_time) {
            return Err(AppointmentError::ValidationError(format!(
                "Invalid end_time '{}', expected HH:MM",
                self.end_time
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    #[serde(flatten)]
    pub time_slot: AppointmentSlot,
    pub status: AppointmentStatus,
    pub payment_status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Rejected,
    Canceled,
}

impl AppointmentStatus {
    /// Rejected and Canceled are resting states kept for history; nothing
    /// transitions out of them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AppointmentStatus::Rejected | AppointmentStatus::Canceled)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "pending"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Rejected => write!(f, "rejected"),
            AppointmentStatus::Canceled => write!(f, "canceled"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Live,
    Failed,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Paid => write!(f, "paid"),
            PaymentStatus::Live => write!(f, "live"),
            PaymentStatus::Failed => write!(f, "failed"),
        }
    }
}

/// How the patient intends to pay: online up front, or in person ("live").
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Online,
    Live,
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub doctor_id: Uuid,
    pub time_slot: AppointmentSlot,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub time_slot: AppointmentSlot,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Doctor not found")]
    DoctorNotFound,

    #[error("Time slot not available")]
    SlotUnavailable,

    #[error("Appointment cannot be modified in current status: {0}")]
    InvalidState(AppointmentStatus),

    #[error("Not authorized for this appointment")]
    Forbidden,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<SlotError> for AppointmentError {
    fn from(e: SlotError) -> Self {
        match e {
            SlotError::DoctorNotFound => AppointmentError::DoctorNotFound,
            SlotError::SlotUnavailable => AppointmentError::SlotUnavailable,
            SlotError::ValidationError(msg) => AppointmentError::ValidationError(msg),
            SlotError::Database(msg) => AppointmentError::Database(msg),
        }
    }
}
