// libs/doctor-cell/src/services/slots.rs
use std::sync::Arc;

use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::{return_representation, SupabaseClient};

use crate::models::{is_valid_wall_clock, DoctorProfile, SlotError, TimeSlot, Weekday};

/// Tracks, per doctor, which declared weekly slots are currently booked.
///
/// The registry knows nothing about appointments: it matches slots by exact
/// `(day, start_time)` equality only. Two slots with different start times
/// never conflict even if their ranges overlap.
pub struct SlotRegistryService {
    supabase: Arc<SupabaseClient>,
}

impl SlotRegistryService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    pub fn from_client(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Fetch the doctor profile for a user id, or `DoctorNotFound`.
    pub async fn doctor_profile(
        &self,
        doctor_id: Uuid,
        auth_token: &str,
    ) -> Result<DoctorProfile, SlotError> {
        let path = format!("/rest/v1/doctor_profiles?user_id=eq.{}", doctor_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SlotError::Database(e.to_string()))?;

        if result.is_empty() {
            return Err(SlotError::DoctorNotFound);
        }

        serde_json::from_value(result[0].clone())
            .map_err(|e| SlotError::Database(format!("Failed to parse doctor profile: {}", e)))
    }

    /// Returns the free slot matching the key, or `None` when the slot is
    /// absent or already booked. Unknown doctor is an error, not `None`.
    pub async fn find_available(
        &self,
        doctor_id: Uuid,
        day: Weekday,
        start_time: &str,
        auth_token: &str,
    ) -> Result<Option<TimeSlot>, SlotError> {
        validate_start_time(start_time)?;
        self.doctor_profile(doctor_id, auth_token).await?;

        let path = format!(
            "/rest/v1/doctor_slots?doctor_id=eq.{}&day=eq.{}&start_time=eq.{}&is_booked=eq.false",
            doctor_id,
            day,
            urlencoding::encode(start_time),
        );
        let result: Vec<TimeSlot> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SlotError::Database(e.to_string()))?;

        Ok(result.into_iter().next())
    }

    /// Marks the matching free slot as booked.
    ///
    /// The free check and the write are one conditional PATCH keyed on
    /// `is_booked=eq.false`, so the database applies check-and-set
    /// atomically; when two callers race for the same key, exactly one
    /// update matches and the other gets `SlotUnavailable`.
    pub async fn reserve(
        &self,
        doctor_id: Uuid,
        day: Weekday,
        start_time: &str,
        auth_token: &str,
    ) -> Result<TimeSlot, SlotError> {
        validate_start_time(start_time)?;
        debug!("Reserving slot {} {} for doctor {}", day, start_time, doctor_id);

        let path = format!(
            "/rest/v1/doctor_slots?doctor_id=eq.{}&day=eq.{}&start_time=eq.{}&is_booked=eq.false",
            doctor_id,
            day,
            urlencoding::encode(start_time),
        );

        let result: Vec<TimeSlot> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(json!({ "is_booked": true })),
                Some(return_representation()),
            )
            .await
            .map_err(|e| SlotError::Database(e.to_string()))?;

        match result.into_iter().next() {
            Some(slot) => {
                info!("Reserved slot {} {} for doctor {}", day, start_time, doctor_id);
                Ok(slot)
            }
            // Zero rows matched: the slot is absent or was booked by the
            // time the update ran.
            None => Err(SlotError::SlotUnavailable),
        }
    }

    /// Marks the matching slot as free again. Releasing an already-free slot
    /// is a no-op, so duplicate release attempts are harmless.
    pub async fn release(
        &self,
        doctor_id: Uuid,
        day: Weekday,
        start_time: &str,
        auth_token: &str,
    ) -> Result<(), SlotError> {
        validate_start_time(start_time)?;
        debug!("Releasing slot {} {} for doctor {}", day, start_time, doctor_id);

        let path = format!(
            "/rest/v1/doctor_slots?doctor_id=eq.{}&day=eq.{}&start_time=eq.{}&is_booked=eq.true",
            doctor_id,
            day,
            urlencoding::encode(start_time),
        );

        let _released: Vec<TimeSlot> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(json!({ "is_booked": false })),
                Some(return_representation()),
            )
            .await
            .map_err(|e| SlotError::Database(e.to_string()))?;

        Ok(())
    }
}

fn validate_start_time(start_time: &str) -> Result<(), SlotError> {
    if !is_valid_wall_clock(start_time) {
        return Err(SlotError::ValidationError(format!(
            "Invalid start_time '{}', expected HH:MM",
            start_time
        )));
    }
    Ok(())
}
