// libs/appointment-cell/src/services/booking.rs
use std::sync::Arc;

use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::{return_representation, SupabaseClient};
use shared_models::auth::User;

use doctor_cell::services::slots::SlotRegistryService;

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, BookAppointmentRequest, PaymentMethod,
    PaymentStatus, RescheduleAppointmentRequest,
};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::notifications::{MailRelayNotifier, Notifier};
use crate::services::payments::{PaymentGateway, StripeGateway};

/// Owns appointment records and their status. Every state-changing operation
/// re-validates the persisted status at write time (guarded PATCH) and moves
/// the slot registry in step with the appointment write; payment and
/// notification side effects run only after the write is durable.
pub struct AppointmentBookingService {
    supabase: Arc<SupabaseClient>,
    slots: SlotRegistryService,
    lifecycle: AppointmentLifecycleService,
    payments: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
}

impl AppointmentBookingService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_collaborators(
            config,
            Arc::new(StripeGateway::new(config)),
            Arc::new(MailRelayNotifier::new(config)),
        )
    }

    pub fn with_collaborators(
        config: &AppConfig,
        payments: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        let slots = SlotRegistryService::from_client(Arc::clone(&supabase));

        Self {
            supabase,
            slots,
            lifecycle: AppointmentLifecycleService::new(),
            payments,
            notifier,
        }
    }

    /// Book a slot with a doctor. The slot reservation is the atomic
    /// check-and-set; the appointment does not exist until the reservation
    /// has succeeded, and a failed insert releases the slot again.
    pub async fn book_appointment(
        &self,
        actor: &User,
        request: BookAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        if !actor.is_patient() {
            return Err(AppointmentError::Forbidden);
        }
        let patient_id = parse_user_id(&actor.id)?;

        request.time_slot.validate()?;

        // The target must be an approved doctor with a slot configuration
        // before anything is reserved. Applicants get profile and slot rows
        // at application time, so the role check cannot be skipped. The
        // profile also carries the consultation price.
        self.ensure_doctor(request.doctor_id, auth_token).await?;
        let profile = self.slots.doctor_profile(request.doctor_id, auth_token).await?;

        let slot = &request.time_slot;
        self.slots
            .reserve(request.doctor_id, slot.day, &slot.start_time, auth_token)
            .await?;

        let payment_status = match request.payment_method {
            PaymentMethod::Online => PaymentStatus::Pending,
            PaymentMethod::Live => PaymentStatus::Live,
        };

        let appointment = match self
            .insert_appointment(patient_id, &request, payment_status, auth_token)
            .await
        {
            Ok(appointment) => appointment,
            Err(e) => {
                // The appointment never came into being; hand the slot back.
                if let Err(release_err) = self
                    .slots
                    .release(request.doctor_id, slot.day, &slot.start_time, auth_token)
                    .await
                {
                    warn!(
                        "Failed to release slot after aborted booking for doctor {}: {}",
                        request.doctor_id, release_err
                    );
                }
                return Err(e);
            }
        };

        if request.payment_method == PaymentMethod::Online {
            let amount_cents = (profile.price_per_appointment * 100.0).round() as i64;
            match self
                .payments
                .create_intent(amount_cents, "usd", appointment.id)
                .await
            {
                Ok(intent_id) => {
                    info!(
                        "Payment intent {} created for appointment {}",
                        intent_id, appointment.id
                    );
                }
                Err(e) => {
                    // Booked regardless; payment_status stays pending for
                    // later reconciliation.
                    warn!(
                        "Payment intent creation failed for appointment {}: {}",
                        appointment.id, e
                    );
                }
            }
        }

        info!(
            "Appointment {} booked: doctor {}, {} {}",
            appointment.id, appointment.doctor_id, slot.day, slot.start_time
        );
        Ok(appointment)
    }

    /// Doctor confirms a pending appointment.
    pub async fn confirm_appointment(
        &self,
        actor: &User,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let appointment = self.fetch_appointment(appointment_id, auth_token).await?;
        require_doctor_owner(actor, &appointment)?;

        self.lifecycle
            .validate_transition(&appointment.status, &AppointmentStatus::Confirmed)?;

        let updated = self
            .update_status_guarded(
                appointment_id,
                "status=eq.pending",
                AppointmentStatus::Confirmed,
                None,
                auth_token,
            )
            .await?
            .ok_or(AppointmentError::InvalidState(appointment.status))?;

        self.notify_parties(
            &updated,
            "Appointment Confirmed by Doctor",
            "Appointment Confirmed",
            auth_token,
        )
        .await;

        info!("Appointment {} confirmed", appointment_id);
        Ok(updated)
    }

    /// Doctor rejects a pending appointment; the held slot goes back to the
    /// registry.
    pub async fn reject_appointment(
        &self,
        actor: &User,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let appointment = self.fetch_appointment(appointment_id, auth_token).await?;
        require_doctor_owner(actor, &appointment)?;

        self.lifecycle
            .validate_transition(&appointment.status, &AppointmentStatus::Rejected)?;

        let updated = self
            .update_status_guarded(
                appointment_id,
                "status=eq.pending",
                AppointmentStatus::Rejected,
                None,
                auth_token,
            )
            .await?
            .ok_or(AppointmentError::InvalidState(appointment.status))?;

        self.slots
            .release(
                updated.doctor_id,
                updated.time_slot.day,
                &updated.time_slot.start_time,
                auth_token,
            )
            .await?;

        self.notify_parties(
            &updated,
            "Appointment Rejected by Doctor",
            "Appointment Rejected",
            auth_token,
        )
        .await;

        info!("Appointment {} rejected, slot released", appointment_id);
        Ok(updated)
    }

    /// Patient cancels a pending or confirmed appointment; the held slot
    /// goes back to the registry.
    pub async fn cancel_appointment(
        &self,
        actor: &User,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let appointment = self.fetch_appointment(appointment_id, auth_token).await?;
        require_patient_owner(actor, &appointment)?;

        self.lifecycle
            .validate_transition(&appointment.status, &AppointmentStatus::Canceled)?;

        let updated = self
            .update_status_guarded(
                appointment_id,
                "status=in.(pending,confirmed)",
                AppointmentStatus::Canceled,
                None,
                auth_token,
            )
            .await?
            .ok_or(AppointmentError::InvalidState(appointment.status))?;

        self.slots
            .release(
                updated.doctor_id,
                updated.time_slot.day,
                &updated.time_slot.start_time,
                auth_token,
            )
            .await?;

        self.notify_parties(
            &updated,
            "Appointment Canceled",
            "Appointment Canceled by Patient",
            auth_token,
        )
        .await;

        info!("Appointment {} canceled, slot released", appointment_id);
        Ok(updated)
    }

    /// Patient moves the appointment to a different slot. The new slot is
    /// reserved first; only once the appointment row has moved over is the
    /// old slot released, so a conflict on the new slot leaves everything
    /// untouched.
    pub async fn reschedule_appointment(
        &self,
        actor: &User,
        appointment_id: Uuid,
        request: RescheduleAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let appointment = self.fetch_appointment(appointment_id, auth_token).await?;
        require_patient_owner(actor, &appointment)?;

        if !self.lifecycle.can_reschedule(&appointment.status) {
            return Err(AppointmentError::InvalidState(appointment.status));
        }

        let new_slot = &request.time_slot;
        new_slot.validate()?;

        self.slots
            .reserve(appointment.doctor_id, new_slot.day, &new_slot.start_time, auth_token)
            .await?;

        let old_slot = appointment.time_slot.clone();
        let slot_patch = json!({
            "day": new_slot.day,
            "start_time": new_slot.start_time,
            "end_time": new_slot.end_time,
        });

        // Doctor must re-confirm the new time, so the status resets to
        // pending in the same guarded write that swaps the slot copy.
        let updated = match self
            .update_status_guarded(
                appointment_id,
                "status=in.(pending,confirmed)",
                AppointmentStatus::Pending,
                Some(slot_patch),
                auth_token,
            )
            .await?
        {
            Some(updated) => updated,
            None => {
                // Status moved underneath us; hand the new slot back.
                if let Err(release_err) = self
                    .slots
                    .release(appointment.doctor_id, new_slot.day, &new_slot.start_time, auth_token)
                    .await
                {
                    warn!(
                        "Failed to release slot after aborted reschedule of {}: {}",
                        appointment_id, release_err
                    );
                }
                return Err(AppointmentError::InvalidState(appointment.status));
            }
        };

        self.slots
            .release(appointment.doctor_id, old_slot.day, &old_slot.start_time, auth_token)
            .await?;

        self.notify_parties(
            &updated,
            "Appointment Rescheduled",
            "Appointment Rescheduled by Patient",
            auth_token,
        )
        .await;

        info!(
            "Appointment {} rescheduled from {} {} to {} {}",
            appointment_id, old_slot.day, old_slot.start_time, new_slot.day, new_slot.start_time
        );
        Ok(updated)
    }

    /// Get appointment by ID. Visible to the appointment's patient, its
    /// doctor, or an admin; anyone else gets Forbidden.
    pub async fn get_appointment(
        &self,
        actor: &User,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let appointment = self.fetch_appointment(appointment_id, auth_token).await?;
        if !can_view(actor, &appointment) {
            return Err(AppointmentError::Forbidden);
        }
        Ok(appointment)
    }

    // ==============================================================================
    // PRIVATE HELPERS
    // ==============================================================================

    async fn fetch_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        debug!("Fetching appointment: {}", appointment_id);

        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| AppointmentError::Database(e.to_string()))?;

        if result.is_empty() {
            return Err(AppointmentError::NotFound);
        }

        serde_json::from_value(result[0].clone())
            .map_err(|e| AppointmentError::Database(format!("Failed to parse appointment: {}", e)))
    }

    /// The target of a booking must currently hold the doctor role. Profile
    /// and slot rows exist from application time onward, so they prove
    /// nothing about approval.
    async fn ensure_doctor(
        &self,
        doctor_id: Uuid,
        auth_token: &str,
    ) -> Result<(), AppointmentError> {
        let path = format!("/rest/v1/users?id=eq.{}&select=role", doctor_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| AppointmentError::Database(e.to_string()))?;

        match result.into_iter().next() {
            Some(row) if row["role"].as_str() == Some("doctor") => Ok(()),
            _ => Err(AppointmentError::DoctorNotFound),
        }
    }

    async fn insert_appointment(
        &self,
        patient_id: Uuid,
        request: &BookAppointmentRequest,
        payment_status: PaymentStatus,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let now = Utc::now();
        let appointment_data = json!({
            "patient_id": patient_id,
            "doctor_id": request.doctor_id,
            "day": request.time_slot.day,
            "start_time": request.time_slot.start_time,
            "end_time": request.time_slot.end_time,
            "status": AppointmentStatus::Pending.to_string(),
            "payment_status": payment_status.to_string(),
            "created_at": now.to_rfc3339(),
            "updated_at": now.to_rfc3339(),
        });

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/appointments",
                Some(auth_token),
                Some(appointment_data),
                Some(return_representation()),
            )
            .await
            .map_err(|e| AppointmentError::Database(e.to_string()))?;

        result
            .into_iter()
            .next()
            .ok_or_else(|| AppointmentError::Database("Failed to create appointment".to_string()))
            .and_then(|row| {
                serde_json::from_value(row).map_err(|e| {
                    AppointmentError::Database(format!("Failed to parse created appointment: {}", e))
                })
            })
    }

    /// Conditional status update: the PATCH carries the expected current
    /// status as a filter, so the precondition is checked against the
    /// persisted row at write time, not against the earlier read. `None`
    /// means the guard matched nothing.
    async fn update_status_guarded(
        &self,
        appointment_id: Uuid,
        status_guard: &str,
        new_status: AppointmentStatus,
        extra_fields: Option<Value>,
        auth_token: &str,
    ) -> Result<Option<Appointment>, AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?id=eq.{}&{}",
            appointment_id, status_guard
        );

        let mut update_data = serde_json::Map::new();
        update_data.insert("status".to_string(), json!(new_status.to_string()));
        update_data.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));
        if let Some(Value::Object(extra)) = extra_fields {
            update_data.extend(extra);
        }

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(Value::Object(update_data)),
                Some(return_representation()),
            )
            .await
            .map_err(|e| AppointmentError::Database(e.to_string()))?;

        match result.into_iter().next() {
            Some(row) => {
                let appointment = serde_json::from_value(row).map_err(|e| {
                    AppointmentError::Database(format!("Failed to parse updated appointment: {}", e))
                })?;
                Ok(Some(appointment))
            }
            None => Ok(None),
        }
    }

    /// Notify patient and doctor about a committed transition. Every failure
    /// is logged and swallowed: the state change already happened.
    async fn notify_parties(
        &self,
        appointment: &Appointment,
        patient_subject: &str,
        doctor_subject: &str,
        auth_token: &str,
    ) {
        let recipients = [
            (appointment.patient_id, patient_subject),
            (appointment.doctor_id, doctor_subject),
        ];

        for (user_id, subject) in recipients {
            let email = match self.fetch_user_email(user_id, auth_token).await {
                Ok(Some(email)) => email,
                Ok(None) => {
                    warn!("No email on record for user {}, skipping notification", user_id);
                    continue;
                }
                Err(e) => {
                    warn!("Failed to look up email for user {}: {}", user_id, e);
                    continue;
                }
            };

            if let Err(e) = self.notifier.notify(&email, subject, appointment).await {
                warn!(
                    "Failed to notify {} about appointment {}: {}",
                    email, appointment.id, e
                );
            }
        }
    }

    async fn fetch_user_email(
        &self,
        user_id: Uuid,
        auth_token: &str,
    ) -> Result<Option<String>, AppointmentError> {
        let path = format!("/rest/v1/users?id=eq.{}&select=email", user_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| AppointmentError::Database(e.to_string()))?;

        Ok(result
            .into_iter()
            .next()
            .and_then(|row| row["email"].as_str().map(str::to_string)))
    }
}

fn parse_user_id(id: &str) -> Result<Uuid, AppointmentError> {
    Uuid::parse_str(id)
        .map_err(|_| AppointmentError::ValidationError("Invalid user id format".to_string()))
}

fn can_view(actor: &User, appointment: &Appointment) -> bool {
    actor.is_admin()
        || appointment.patient_id.to_string() == actor.id
        || appointment.doctor_id.to_string() == actor.id
}

fn require_patient_owner(actor: &User, appointment: &Appointment) -> Result<(), AppointmentError> {
    if !actor.is_patient() || appointment.patient_id.to_string() != actor.id {
        return Err(AppointmentError::Forbidden);
    }
    Ok(())
}

fn require_doctor_owner(actor: &User, appointment: &Appointment) -> Result<(), AppointmentError> {
    if !actor.is_doctor() || appointment.doctor_id.to_string() != actor.id {
        return Err(AppointmentError::Forbidden);
    }
    Ok(())
}
