// libs/doctor-cell/src/models.rs
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==============================================================================
// TIME SLOT MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let day = match self {
            Weekday::Monday => "monday",
            Weekday::Tuesday => "tuesday",
            Weekday::Wednesday => "wednesday",
            Weekday::Thursday => "thursday",
            Weekday::Friday => "friday",
            Weekday::Saturday => "saturday",
            Weekday::Sunday => "sunday",
        };
        write!(f, "{}", day)
    }
}

/// One declared weekly slot of a doctor. Identity within the doctor's slot
/// set is `(day, start_time)`; `end_time` is descriptive only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSlot {
    pub day: Weekday,
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub is_booked: bool,
}

/// Strict `HH:MM` wall-clock check: exactly five characters and parseable.
pub fn is_valid_wall_clock(value: &str) -> bool {
    value.len() == 5 && NaiveTime::parse_from_str(value, "%H:%M").is_ok()
}

impl TimeSlot {
    pub fn validate(&self) -> Result<(), SlotError> {
        if !is_valid_wall_clock(&self.start_time) {
            return Err(SlotError::ValidationError(format!(
                "Invalid start_time '{}', expected HH:MM",
                self.start_time
            )));
        }
        if !is_valid_wall_clock(&self.end_time) {
            return Err(SlotError::ValidationError(format!(
                "Invalid end_time '{}', expected HH:MM",
                self.end_time
            )));
        }
        if self.end_time <= self.start_time {
            return Err(SlotError::ValidationError(format!(
                "Slot end {} must be after start {}",
                self.end_time, self.start_time
            )));
        }
        Ok(())
    }

    pub fn key(&self) -> (Weekday, &str) {
        (self.day, self.start_time.as_str())
    }
}

// ==============================================================================
// DOCTOR PROFILE MODELS
// ==============================================================================

/// Doctor-only attributes held separately from the user record, keyed by the
/// doctor's user id. A row exists only for users going through the doctor
/// application flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorProfile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub qualification: String,
    pub experience_years: i32,
    pub price_per_appointment: f64,
    pub description: String,
    pub city: String,
    pub country: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorApplication {
    pub qualification: String,
    pub experience_years: i32,
    pub price_per_appointment: f64,
    pub description: String,
    pub city: String,
    pub country: String,
    pub available_time_slots: Vec<TimeSlot>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum SlotError {
    #[error("Doctor not found")]
    DoctorNotFound,

    #[error("Time slot not available")]
    SlotUnavailable,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    Database(String),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum DoctorError {
    #[error("User not found")]
    UserNotFound,

    #[error("No pending doctor application for this user")]
    NoPendingApplication,

    #[error("Already a doctor or request pending")]
    AlreadyApplied,

    #[error("Not authorized")]
    Forbidden,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    Database(String),
}
