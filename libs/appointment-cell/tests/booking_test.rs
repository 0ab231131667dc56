use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::models::{
    Appointment, AppointmentError, AppointmentSlot, AppointmentStatus, BookAppointmentRequest,
    PaymentMethod, PaymentStatus, RescheduleAppointmentRequest,
};
use appointment_cell::services::booking::AppointmentBookingService;
use appointment_cell::services::notifications::Notifier;
use appointment_cell::services::payments::PaymentGateway;
use doctor_cell::models::Weekday;
use shared_models::auth::User;
use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};

#[derive(Default)]
struct RecordingGateway {
    calls: Mutex<Vec<(i64, String)>>,
    fail: bool,
}

impl RecordingGateway {
    fn failing() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    fn charges(&self) -> Vec<(i64, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for RecordingGateway {
    async fn create_intent(
        &self,
        amount_cents: i64,
        currency: &str,
        _appointment_id: Uuid,
    ) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((amount_cents, currency.to_string()));
        if self.fail {
            return Err(anyhow!("gateway unavailable"));
        }
        Ok("pi_test_123".to_string())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    notices: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingNotifier {
    fn failing() -> Self {
        Self {
            notices: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    fn sent(&self) -> Vec<(String, String)> {
        self.notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        recipient_email: &str,
        subject: &str,
        _appointment: &Appointment,
    ) -> Result<()> {
        self.notices
            .lock()
            .unwrap()
            .push((recipient_email.to_string(), subject.to_string()));
        if self.fail {
            return Err(anyhow!("relay down"));
        }
        Ok(())
    }
}

struct Harness {
    service: AppointmentBookingService,
    gateway: Arc<RecordingGateway>,
    notifier: Arc<RecordingNotifier>,
}

fn harness(mock_server: &MockServer) -> Harness {
    harness_with(mock_server, RecordingGateway::default(), RecordingNotifier::default())
}

fn harness_with(
    mock_server: &MockServer,
    gateway: RecordingGateway,
    notifier: RecordingNotifier,
) -> Harness {
    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let gateway = Arc::new(gateway);
    let notifier = Arc::new(notifier);
    let service = AppointmentBookingService::with_collaborators(
        &config,
        Arc::clone(&gateway) as Arc<dyn PaymentGateway>,
        Arc::clone(&notifier) as Arc<dyn Notifier>,
    );
    Harness {
        service,
        gateway,
        notifier,
    }
}

fn user_with_id(id: Uuid, role: &str) -> User {
    User {
        id: id.to_string(),
        email: Some(format!("{}@example.com", role)),
        role: Some(role.to_string()),
        created_at: Some(Utc::now()),
    }
}

fn slot(day: Weekday, start: &str, end: &str) -> AppointmentSlot {
    AppointmentSlot {
        day,
        start_time: start.to_string(),
        end_time: end.to_string(),
    }
}

fn book_request(doctor_id: Uuid, payment_method: PaymentMethod) -> BookAppointmentRequest {
    BookAppointmentRequest {
        doctor_id,
        time_slot: slot(Weekday::Monday, "09:00", "09:30"),
        payment_method,
    }
}

async fn mock_doctor_profile(mock_server: &MockServer, doctor_id: &Uuid, price: f64) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_profiles"))
        .and(query_param("user_id", format!("eq.{}", doctor_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::doctor_profile_row(&doctor_id.to_string(), price)
        ])))
        .mount(mock_server)
        .await;
}

async fn mock_user_role(mock_server: &MockServer, user_id: &Uuid, role: &str) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/users"))
        .and(query_param("id", format!("eq.{}", user_id)))
        .and(query_param("select", "role"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "role": role }])))
        .mount(mock_server)
        .await;
}

async fn mock_appointment_fetch(
    mock_server: &MockServer,
    appointment_id: Uuid,
    patient_id: &Uuid,
    doctor_id: &Uuid,
    status: &str,
) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_row(
                appointment_id,
                &patient_id.to_string(),
                &doctor_id.to_string(),
                "monday",
                "09:00",
                status,
                "pending"
            )
        ])))
        .mount(mock_server)
        .await;
}

async fn mock_user_email(mock_server: &MockServer, user_id: &Uuid, email: &str) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/users"))
        .and(query_param("id", format!("eq.{}", user_id)))
        .and(query_param("select", "email"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "email": email }])))
        .mount(mock_server)
        .await;
}

// ==============================================================================
// BOOKING
// ==============================================================================

#[tokio::test]
async fn book_reserves_slot_creates_record_and_charges() {
    let mock_server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();

    mock_user_role(&mock_server, &doctor_id, "doctor").await;
    mock_doctor_profile(&mock_server, &doctor_id, 50.0).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/doctor_slots"))
        .and(query_param("is_booked", "eq.false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_row(&doctor_id.to_string(), "monday", "09:00", "09:30", true)
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::appointment_row(
                appointment_id,
                &patient_id.to_string(),
                &doctor_id.to_string(),
                "monday",
                "09:00",
                "pending",
                "pending"
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server);
    let patient = user_with_id(patient_id, "patient");

    let appointment = h
        .service
        .book_appointment(&patient, book_request(doctor_id, PaymentMethod::Online), "token")
        .await
        .unwrap();

    assert_eq!(appointment.status, AppointmentStatus::Pending);
    assert_eq!(appointment.payment_status, PaymentStatus::Pending);
    assert_eq!(h.gateway.charges(), vec![(5000, "usd".to_string())]);
    // Nobody is notified until the doctor acts on the request.
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn book_conflict_creates_no_appointment() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    mock_user_role(&mock_server, &doctor_id, "doctor").await;
    mock_doctor_profile(&mock_server, &doctor_id, 50.0).await;

    // The conditional update matched nothing: a concurrent booking won.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/doctor_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server);
    let patient = user_with_id(Uuid::new_v4(), "patient");

    let result = h
        .service
        .book_appointment(&patient, book_request(doctor_id, PaymentMethod::Online), "token")
        .await;

    assert_matches!(result, Err(AppointmentError::SlotUnavailable));
    assert!(h.gateway.charges().is_empty());
}

#[tokio::test]
async fn book_requires_patient_role() {
    let mock_server = MockServer::start().await;
    let h = harness(&mock_server);
    let doctor = user_with_id(Uuid::new_v4(), "doctor");

    let result = h
        .service
        .book_appointment(&doctor, book_request(Uuid::new_v4(), PaymentMethod::Online), "token")
        .await;

    assert_matches!(result, Err(AppointmentError::Forbidden));
}

#[tokio::test]
async fn book_unknown_doctor_reserves_nothing() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/doctor_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server);
    let patient = user_with_id(Uuid::new_v4(), "patient");

    let result = h
        .service
        .book_appointment(&patient, book_request(Uuid::new_v4(), PaymentMethod::Online), "token")
        .await;

    assert_matches!(result, Err(AppointmentError::DoctorNotFound));
}

#[tokio::test]
async fn book_rejects_target_without_doctor_role() {
    let mock_server = MockServer::start().await;
    let applicant_id = Uuid::new_v4();

    // An applicant already has profile and slot rows, but the role flips to
    // doctor only on admin approval.
    mock_user_role(&mock_server, &applicant_id, "patient").await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_profiles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::doctor_profile_row(&applicant_id.to_string(), 50.0)
        ])))
        .expect(0)
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/doctor_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server);
    let patient = user_with_id(Uuid::new_v4(), "patient");

    let result = h
        .service
        .book_appointment(&patient, book_request(applicant_id, PaymentMethod::Online), "token")
        .await;

    assert_matches!(result, Err(AppointmentError::DoctorNotFound));
    assert!(h.gateway.charges().is_empty());
}

#[tokio::test]
async fn book_with_live_payment_skips_gateway() {
    let mock_server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();

    mock_user_role(&mock_server, &doctor_id, "doctor").await;
    mock_doctor_profile(&mock_server, &doctor_id, 50.0).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/doctor_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_row(&doctor_id.to_string(), "monday", "09:00", "09:30", true)
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::appointment_row(
                Uuid::new_v4(),
                &patient_id.to_string(),
                &doctor_id.to_string(),
                "monday",
                "09:00",
                "pending",
                "live"
            )
        ])))
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server);
    let patient = user_with_id(patient_id, "patient");

    let appointment = h
        .service
        .book_appointment(&patient, book_request(doctor_id, PaymentMethod::Live), "token")
        .await
        .unwrap();

    assert_eq!(appointment.payment_status, PaymentStatus::Live);
    assert!(h.gateway.charges().is_empty());
}

#[tokio::test]
async fn failed_insert_releases_the_reserved_slot() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    mock_user_role(&mock_server, &doctor_id, "doctor").await;
    mock_doctor_profile(&mock_server, &doctor_id, 50.0).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/doctor_slots"))
        .and(query_param("is_booked", "eq.false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_row(&doctor_id.to_string(), "monday", "09:00", "09:30", true)
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(500).set_body_string("insert failed"))
        .mount(&mock_server)
        .await;

    // Compensating release after the failed insert.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/doctor_slots"))
        .and(query_param("is_booked", "eq.true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_row(&doctor_id.to_string(), "monday", "09:00", "09:30", false)
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server);
    let patient = user_with_id(Uuid::new_v4(), "patient");

    let result = h
        .service
        .book_appointment(&patient, book_request(doctor_id, PaymentMethod::Online), "token")
        .await;

    assert_matches!(result, Err(AppointmentError::Database(_)));
}

#[tokio::test]
async fn gateway_failure_does_not_fail_the_booking() {
    let mock_server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();

    mock_user_role(&mock_server, &doctor_id, "doctor").await;
    mock_doctor_profile(&mock_server, &doctor_id, 50.0).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/doctor_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_row(&doctor_id.to_string(), "monday", "09:00", "09:30", true)
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::appointment_row(
                Uuid::new_v4(),
                &patient_id.to_string(),
                &doctor_id.to_string(),
                "monday",
                "09:00",
                "pending",
                "pending"
            )
        ])))
        .mount(&mock_server)
        .await;

    let h = harness_with(&mock_server, RecordingGateway::failing(), RecordingNotifier::default());
    let patient = user_with_id(patient_id, "patient");

    let appointment = h
        .service
        .book_appointment(&patient, book_request(doctor_id, PaymentMethod::Online), "token")
        .await
        .unwrap();

    // Payment reconciliation happens out of band; the record stays pending.
    assert_eq!(appointment.payment_status, PaymentStatus::Pending);
}

// ==============================================================================
// CONFIRM / REJECT
// ==============================================================================

#[tokio::test]
async fn confirm_updates_status_and_notifies_both_parties() {
    let mock_server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();

    mock_appointment_fetch(&mock_server, appointment_id, &patient_id, &doctor_id, "pending").await;
    mock_user_email(&mock_server, &patient_id, "pat@example.com").await;
    mock_user_email(&mock_server, &doctor_id, "doc@example.com").await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .and(query_param("status", "eq.pending"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_row(
                appointment_id,
                &patient_id.to_string(),
                &doctor_id.to_string(),
                "monday",
                "09:00",
                "confirmed",
                "pending"
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server);
    let doctor = user_with_id(doctor_id, "doctor");

    let appointment = h
        .service
        .confirm_appointment(&doctor, appointment_id, "token")
        .await
        .unwrap();

    assert_eq!(appointment.status, AppointmentStatus::Confirmed);
    assert_eq!(
        h.notifier.sent(),
        vec![
            ("pat@example.com".to_string(), "Appointment Confirmed by Doctor".to_string()),
            ("doc@example.com".to_string(), "Appointment Confirmed".to_string()),
        ]
    );
}

#[tokio::test]
async fn confirm_forbidden_for_a_different_doctor() {
    let mock_server = MockServer::start().await;
    let appointment_id = Uuid::new_v4();

    mock_appointment_fetch(
        &mock_server,
        appointment_id,
        &Uuid::new_v4(),
        &Uuid::new_v4(),
        "pending",
    )
    .await;

    let h = harness(&mock_server);
    let other_doctor = user_with_id(Uuid::new_v4(), "doctor");

    let result = h
        .service
        .confirm_appointment(&other_doctor, appointment_id, "token")
        .await;

    assert_matches!(result, Err(AppointmentError::Forbidden));
}

#[tokio::test]
async fn confirm_rejected_when_appointment_is_not_pending() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();

    mock_appointment_fetch(
        &mock_server,
        appointment_id,
        &Uuid::new_v4(),
        &doctor_id,
        "confirmed",
    )
    .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server);
    let doctor = user_with_id(doctor_id, "doctor");

    let result = h
        .service
        .confirm_appointment(&doctor, appointment_id, "token")
        .await;

    assert_matches!(
        result,
        Err(AppointmentError::InvalidState(AppointmentStatus::Confirmed))
    );
}

#[tokio::test]
async fn confirm_guard_miss_is_invalid_state() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();

    mock_appointment_fetch(
        &mock_server,
        appointment_id,
        &Uuid::new_v4(),
        &doctor_id,
        "pending",
    )
    .await;

    // The status moved between the read and the write; the guarded update
    // matches nothing.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "eq.pending"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server);
    let doctor = user_with_id(doctor_id, "doctor");

    let result = h
        .service
        .confirm_appointment(&doctor, appointment_id, "token")
        .await;

    assert_matches!(result, Err(AppointmentError::InvalidState(_)));
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn reject_releases_the_held_slot() {
    let mock_server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();

    mock_appointment_fetch(&mock_server, appointment_id, &patient_id, &doctor_id, "pending").await;
    mock_user_email(&mock_server, &patient_id, "pat@example.com").await;
    mock_user_email(&mock_server, &doctor_id, "doc@example.com").await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "eq.pending"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_row(
                appointment_id,
                &patient_id.to_string(),
                &doctor_id.to_string(),
                "monday",
                "09:00",
                "rejected",
                "pending"
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/doctor_slots"))
        .and(query_param("is_booked", "eq.true"))
        .and(query_param("start_time", "eq.09:00"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_row(&doctor_id.to_string(), "monday", "09:00", "09:30", false)
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server);
    let doctor = user_with_id(doctor_id, "doctor");

    let appointment = h
        .service
        .reject_appointment(&doctor, appointment_id, "token")
        .await
        .unwrap();

    assert_eq!(appointment.status, AppointmentStatus::Rejected);
    assert_eq!(
        h.notifier.sent(),
        vec![
            ("pat@example.com".to_string(), "Appointment Rejected by Doctor".to_string()),
            ("doc@example.com".to_string(), "Appointment Rejected".to_string()),
        ]
    );
}

#[tokio::test]
async fn reject_of_confirmed_appointment_leaves_slot_untouched() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();

    mock_appointment_fetch(
        &mock_server,
        appointment_id,
        &Uuid::new_v4(),
        &doctor_id,
        "confirmed",
    )
    .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/doctor_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server);
    let doctor = user_with_id(doctor_id, "doctor");

    let result = h
        .service
        .reject_appointment(&doctor, appointment_id, "token")
        .await;

    assert_matches!(
        result,
        Err(AppointmentError::InvalidState(AppointmentStatus::Confirmed))
    );
    assert!(h.notifier.sent().is_empty());
}

// ==============================================================================
// READ VISIBILITY
// ==============================================================================

#[tokio::test]
async fn get_appointment_forbidden_for_unrelated_user() {
    let mock_server = MockServer::start().await;
    let appointment_id = Uuid::new_v4();

    mock_appointment_fetch(
        &mock_server,
        appointment_id,
        &Uuid::new_v4(),
        &Uuid::new_v4(),
        "pending",
    )
    .await;

    let h = harness(&mock_server);
    let bystander = user_with_id(Uuid::new_v4(), "patient");

    let result = h
        .service
        .get_appointment(&bystander, appointment_id, "token")
        .await;

    assert_matches!(result, Err(AppointmentError::Forbidden));
}

#[tokio::test]
async fn get_appointment_visible_to_parties_and_admin() {
    let mock_server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();

    mock_appointment_fetch(&mock_server, appointment_id, &patient_id, &doctor_id, "pending").await;

    let h = harness(&mock_server);

    for viewer in [
        user_with_id(patient_id, "patient"),
        user_with_id(doctor_id, "doctor"),
        user_with_id(Uuid::new_v4(), "admin"),
    ] {
        let appointment = h
            .service
            .get_appointment(&viewer, appointment_id, "token")
            .await
            .unwrap();
        assert_eq!(appointment.id, appointment_id);
    }
}

// ==============================================================================
// CANCEL
// ==============================================================================

#[tokio::test]
async fn cancel_by_owner_releases_the_slot() {
    let mock_server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();

    mock_appointment_fetch(&mock_server, appointment_id, &patient_id, &doctor_id, "confirmed").await;
    mock_user_email(&mock_server, &patient_id, "pat@example.com").await;
    mock_user_email(&mock_server, &doctor_id, "doc@example.com").await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "in.(pending,confirmed)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_row(
                appointment_id,
                &patient_id.to_string(),
                &doctor_id.to_string(),
                "monday",
                "09:00",
                "canceled",
                "pending"
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/doctor_slots"))
        .and(query_param("is_booked", "eq.true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_row(&doctor_id.to_string(), "monday", "09:00", "09:30", false)
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server);
    let patient = user_with_id(patient_id, "patient");

    let appointment = h
        .service
        .cancel_appointment(&patient, appointment_id, "token")
        .await
        .unwrap();

    assert_eq!(appointment.status, AppointmentStatus::Canceled);
    assert_eq!(h.notifier.sent().len(), 2);
}

#[tokio::test]
async fn cancel_twice_is_invalid_state() {
    let mock_server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();

    mock_appointment_fetch(
        &mock_server,
        appointment_id,
        &patient_id,
        &Uuid::new_v4(),
        "canceled",
    )
    .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server);
    let patient = user_with_id(patient_id, "patient");

    let result = h
        .service
        .cancel_appointment(&patient, appointment_id, "token")
        .await;

    assert_matches!(
        result,
        Err(AppointmentError::InvalidState(AppointmentStatus::Canceled))
    );
}

#[tokio::test]
async fn cancel_forbidden_for_a_different_patient() {
    let mock_server = MockServer::start().await;
    let appointment_id = Uuid::new_v4();

    mock_appointment_fetch(
        &mock_server,
        appointment_id,
        &Uuid::new_v4(),
        &Uuid::new_v4(),
        "pending",
    )
    .await;

    let h = harness(&mock_server);
    let other_patient = user_with_id(Uuid::new_v4(), "patient");

    let result = h
        .service
        .cancel_appointment(&other_patient, appointment_id, "token")
        .await;

    assert_matches!(result, Err(AppointmentError::Forbidden));
}

// ==============================================================================
// RESCHEDULE
// ==============================================================================

#[tokio::test]
async fn reschedule_moves_the_slot_hold_and_resets_to_pending() {
    let mock_server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();

    mock_appointment_fetch(&mock_server, appointment_id, &patient_id, &doctor_id, "confirmed").await;
    mock_user_email(&mock_server, &patient_id, "pat@example.com").await;
    mock_user_email(&mock_server, &doctor_id, "doc@example.com").await;

    // New slot reserved first.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/doctor_slots"))
        .and(query_param("start_time", "eq.10:00"))
        .and(query_param("is_booked", "eq.false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_row(&doctor_id.to_string(), "tuesday", "10:00", "10:30", true)
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "in.(pending,confirmed)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_row(
                appointment_id,
                &patient_id.to_string(),
                &doctor_id.to_string(),
                "tuesday",
                "10:00",
                "pending",
                "pending"
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    // Old slot released only after the record moved over.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/doctor_slots"))
        .and(query_param("start_time", "eq.09:00"))
        .and(query_param("is_booked", "eq.true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_row(&doctor_id.to_string(), "monday", "09:00", "09:30", false)
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server);
    let patient = user_with_id(patient_id, "patient");
    let request = RescheduleAppointmentRequest {
        time_slot: slot(Weekday::Tuesday, "10:00", "10:30"),
    };

    let appointment = h
        .service
        .reschedule_appointment(&patient, appointment_id, request, "token")
        .await
        .unwrap();

    assert_eq!(appointment.status, AppointmentStatus::Pending);
    assert_eq!(appointment.time_slot.start_time, "10:00");
    assert_eq!(h.notifier.sent().len(), 2);
}

#[tokio::test]
async fn reschedule_conflict_leaves_the_old_hold_untouched() {
    let mock_server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();

    mock_appointment_fetch(&mock_server, appointment_id, &patient_id, &doctor_id, "pending").await;

    // The target slot is already booked.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/doctor_slots"))
        .and(query_param("is_booked", "eq.false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/doctor_slots"))
        .and(query_param("is_booked", "eq.true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server);
    let patient = user_with_id(patient_id, "patient");
    let request = RescheduleAppointmentRequest {
        time_slot: slot(Weekday::Tuesday, "10:00", "10:30"),
    };

    let result = h
        .service
        .reschedule_appointment(&patient, appointment_id, request, "token")
        .await;

    assert_matches!(result, Err(AppointmentError::SlotUnavailable));
}

#[tokio::test]
async fn reschedule_guard_miss_releases_the_new_slot() {
    let mock_server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();

    mock_appointment_fetch(&mock_server, appointment_id, &patient_id, &doctor_id, "pending").await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/doctor_slots"))
        .and(query_param("start_time", "eq.10:00"))
        .and(query_param("is_booked", "eq.false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_row(&doctor_id.to_string(), "tuesday", "10:00", "10:30", true)
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    // The appointment left the reschedulable statuses concurrently.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    // Only the new slot is handed back; the old hold belongs to whatever
    // state the appointment ended up in.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/doctor_slots"))
        .and(query_param("start_time", "eq.10:00"))
        .and(query_param("is_booked", "eq.true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_row(&doctor_id.to_string(), "tuesday", "10:00", "10:30", false)
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/doctor_slots"))
        .and(query_param("start_time", "eq.09:00"))
        .and(query_param("is_booked", "eq.true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server);
    let patient = user_with_id(patient_id, "patient");
    let request = RescheduleAppointmentRequest {
        time_slot: slot(Weekday::Tuesday, "10:00", "10:30"),
    };

    let result = h
        .service
        .reschedule_appointment(&patient, appointment_id, request, "token")
        .await;

    assert_matches!(result, Err(AppointmentError::InvalidState(_)));
    assert!(h.notifier.sent().is_empty());
}

// ==============================================================================
// NOTIFICATION FAILURES
// ==============================================================================

#[tokio::test]
async fn notifier_failure_does_not_fail_the_operation() {
    let mock_server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();

    mock_appointment_fetch(&mock_server, appointment_id, &patient_id, &doctor_id, "pending").await;
    mock_user_email(&mock_server, &patient_id, "pat@example.com").await;
    mock_user_email(&mock_server, &doctor_id, "doc@example.com").await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_row(
                appointment_id,
                &patient_id.to_string(),
                &doctor_id.to_string(),
                "monday",
                "09:00",
                "confirmed",
                "pending"
            )
        ])))
        .mount(&mock_server)
        .await;

    let h = harness_with(&mock_server, RecordingGateway::default(), RecordingNotifier::failing());
    let doctor = user_with_id(doctor_id, "doctor");

    let appointment = h
        .service
        .confirm_appointment(&doctor, appointment_id, "token")
        .await
        .unwrap();

    assert_eq!(appointment.status, AppointmentStatus::Confirmed);
    // Both sends were attempted even though each failed.
    assert_eq!(h.notifier.sent().len(), 2);
}
