// libs/doctor-cell/src/services/profile.rs
use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::{return_representation, SupabaseClient};
use shared_models::auth::User;

use crate::models::{DoctorApplication, DoctorError, DoctorProfile};

/// Doctor application and approval flow: a user submits a profile with a
/// declared weekly slot set, an admin later flips the user's role to doctor.
pub struct DoctorProfileService {
    supabase: Arc<SupabaseClient>,
    mail_api_url: String,
    mail_from_address: String,
    admin_email: String,
}

impl DoctorProfileService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            mail_api_url: config.mail_api_url.clone(),
            mail_from_address: config.mail_from_address.clone(),
            admin_email: config.admin_email.clone(),
        }
    }

    /// Submit a doctor application for the calling user. Creates the doctor
    /// profile and its slot rows, then marks the application pending on the
    /// user record.
    pub async fn apply(
        &self,
        applicant: &User,
        application: DoctorApplication,
        auth_token: &str,
    ) -> Result<DoctorProfile, DoctorError> {
        let user_id = Uuid::parse_str(&applicant.id)
            .map_err(|_| DoctorError::ValidationError("Invalid user id format".to_string()))?;

        self.validate_slot_set(&application)?;

        let user_row = self.fetch_user(user_id, auth_token).await?;
        let role = user_row["role"].as_str().unwrap_or("patient");
        let pending = user_row["doctor_request_pending"].as_bool().unwrap_or(false);
        if role == "doctor" || pending {
            return Err(DoctorError::AlreadyApplied);
        }

        let profile_data = json!({
            "user_id": user_id,
            "qualification": application.qualification,
            "experience_years": application.experience_years,
            "price_per_appointment": application.price_per_appointment,
            "description": application.description,
            "city": application.city,
            "country": application.country,
            "created_at": Utc::now().to_rfc3339(),
        });

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/doctor_profiles",
                Some(auth_token),
                Some(profile_data),
                Some(return_representation()),
            )
            .await
            .map_err(|e| DoctorError::Database(e.to_string()))?;

        let profile: DoctorProfile = result
            .into_iter()
            .next()
            .ok_or_else(|| DoctorError::Database("Failed to create doctor profile".to_string()))
            .and_then(|row| {
                serde_json::from_value(row)
                    .map_err(|e| DoctorError::Database(format!("Failed to parse profile: {}", e)))
            })?;

        let slot_rows: Vec<Value> = application
            .available_time_slots
            .iter()
            .map(|slot| {
                json!({
                    "doctor_id": user_id,
                    "day": slot.day,
                    "start_time": slot.start_time,
                    "end_time": slot.end_time,
                    "is_booked": false,
                    "created_at": Utc::now().to_rfc3339(),
                })
            })
            .collect();

        let _created: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/doctor_slots",
                Some(auth_token),
                Some(Value::Array(slot_rows)),
                Some(return_representation()),
            )
            .await
            .map_err(|e| DoctorError::Database(e.to_string()))?;

        let path = format!("/rest/v1/users?id=eq.{}", user_id);
        let _updated: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(json!({ "doctor_request_pending": true })),
                Some(return_representation()),
            )
            .await
            .map_err(|e| DoctorError::Database(e.to_string()))?;

        info!("Doctor application submitted for user {}", user_id);

        // Admin notice is fire-and-forget: a failed send never fails the
        // application.
        self.send_admin_notice(applicant).await;

        Ok(profile)
    }

    /// Approve a pending doctor application. Admin only; the update is
    /// conditional on `doctor_request_pending` so a request approved twice
    /// (or never submitted) comes back NotFound.
    pub async fn approve(
        &self,
        admin: &User,
        user_id: Uuid,
        auth_token: &str,
    ) -> Result<(), DoctorError> {
        if !admin.is_admin() {
            return Err(DoctorError::Forbidden);
        }

        let path = format!(
            "/rest/v1/users?id=eq.{}&doctor_request_pending=eq.true",
            user_id
        );
        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(json!({ "role": "doctor", "doctor_request_pending": false })),
                Some(return_representation()),
            )
            .await
            .map_err(|e| DoctorError::Database(e.to_string()))?;

        if result.is_empty() {
            return Err(DoctorError::NoPendingApplication);
        }

        info!("Doctor application approved for user {}", user_id);
        Ok(())
    }

    fn validate_slot_set(&self, application: &DoctorApplication) -> Result<(), DoctorError> {
        if application.available_time_slots.is_empty() {
            return Err(DoctorError::ValidationError(
                "At least one time slot is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for slot in &application.available_time_slots {
            slot.validate()
                .map_err(|e| DoctorError::ValidationError(e.to_string()))?;
            if !seen.insert(slot.key()) {
                return Err(DoctorError::ValidationError(format!(
                    "Duplicate slot {} {}",
                    slot.day, slot.start_time
                )));
            }
        }

        Ok(())
    }

    async fn fetch_user(&self, user_id: Uuid, auth_token: &str) -> Result<Value, DoctorError> {
        let path = format!("/rest/v1/users?id=eq.{}", user_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| DoctorError::Database(e.to_string()))?;

        result.into_iter().next().ok_or(DoctorError::UserNotFound)
    }

    async fn send_admin_notice(&self, applicant: &User) {
        if self.mail_api_url.is_empty() || self.admin_email.is_empty() {
            debug!("Mail relay not configured, skipping admin notice");
            return;
        }

        let body = json!({
            "from": self.mail_from_address,
            "to": self.admin_email,
            "subject": "New doctor application",
            "body": format!(
                "User {} ({}) applied to become a doctor",
                applicant.id,
                applicant.email.as_deref().unwrap_or("unknown")
            ),
        });

        let url = format!("{}/send", self.mail_api_url);
        match reqwest::Client::new().post(&url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Admin notified of doctor application");
            }
            Ok(response) => {
                warn!("Admin notice rejected by mail relay: {}", response.status());
            }
            Err(e) => {
                warn!("Failed to send admin notice: {}", e);
            }
        }
    }
}
