//! Shared fixtures for nubcheck-pl integration tests
//!
//! Every collaborator except the image store is an in-memory fake that
//! records what it was asked to do. Images go through the real
//! `LocalImageStore` in a temp directory, and the database is a real SQLite
//! file so concurrent tests exercise real locking.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, Response},
};
use nubcheck_common::config::AppConfig;
use nubcheck_common::db::init_database;
use nubcheck_common::signing::compute_webhook_signature;
use nubcheck_common::ReviewMessageRef;
use nubcheck_pl::classifier::{Classifier, ClassifierError};
use nubcheck_pl::images::LocalImageStore;
use nubcheck_pl::notify::{EmailMessage, EmailSender, NotifyError, ReviewAction, ReviewChannel};
use nubcheck_pl::payments::{CheckoutSession, PaymentError, PaymentProvider};
use nubcheck_pl::store::Store;
use nubcheck_pl::{build_router, AppState, Collaborators};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::util::ServiceExt;

pub const TELEGRAM_SECRET: &str = "tg-secret";
pub const STRIPE_SECRET: &str = "whsec_test";
pub const BASE_URL: &str = "https://nub.example";
pub const JPEG: &[u8] = b"\xFF\xD8\xFF\xE0fake-jpeg-bytes";

// =============================================================================
// Fakes
// =============================================================================

/// Classifier returning a canned reply (or failing)
pub struct FakeClassifier {
    reply: Mutex<Option<String>>,
    pub calls: AtomicUsize,
}

impl FakeClassifier {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Mutex::new(Some(text.to_string())),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_reply(&self, text: Option<&str>) {
        *self.reply.lock().unwrap() = text.map(str::to_string);
    }
}

#[async_trait]
impl Classifier for FakeClassifier {
    async fn classify(&self, image: &[u8], _content_type: &str, _prompt: &str) -> Result<String, ClassifierError> {
        assert!(!image.is_empty(), "classifier got an empty image");
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ClassifierError::Network("connection refused".to_string()))
    }
}

/// Payment provider with scripted sessions and a refund log
#[derive(Default)]
pub struct FakePayments {
    pub sessions: Mutex<HashMap<String, CheckoutSession>>,
    pub refunds: Mutex<Vec<(String, String)>>,
    pub fail_refunds: AtomicBool,
}

impl FakePayments {
    pub fn add_session(&self, id: &str, paid: bool, payment_intent: Option<&str>, referral: Option<&str>) {
        self.sessions.lock().unwrap().insert(
            id.to_string(),
            CheckoutSession {
                id: id.to_string(),
                payment_status: if paid { "paid" } else { "unpaid" }.to_string(),
                payment_intent: payment_intent.map(str::to_string),
                customer_email: Some("parent@example.com".to_string()),
                referral_code: referral.map(str::to_string),
                amount_total: Some(1999),
            },
        );
    }

    pub fn refund_count(&self) -> usize {
        self.refunds.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentProvider for FakePayments {
    async fn retrieve_session(&self, session_id: &str) -> Result<CheckoutSession, PaymentError> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| PaymentError::NotFound(format!("No such checkout.session: {}", session_id)))
    }

    async fn refund(&self, payment_intent_id: &str, idempotency_key: &str) -> Result<(), PaymentError> {
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(PaymentError::Api(502, "upstream unavailable".to_string()));
        }
        let mut refunds = self.refunds.lock().unwrap();
        // Provider-side idempotency
        if !refunds.iter().any(|(_, key)| key == idempotency_key) {
            refunds.push((payment_intent_id.to_string(), idempotency_key.to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingEmail {
    pub sent: Mutex<Vec<EmailMessage>>,
    pub fail: AtomicBool,
}

impl RecordingEmail {
    pub fn subjects(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|m| m.subject.clone()).collect()
    }
}

#[async_trait]
impl EmailSender for RecordingEmail {
    async fn send(&self, message: &EmailMessage) -> Result<(), NotifyError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError::Api(503, "email provider down".to_string()));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SentPhoto {
    pub photo_url: String,
    pub caption: String,
    pub actions: Vec<ReviewAction>,
    pub message: ReviewMessageRef,
}

#[derive(Default)]
pub struct RecordingReview {
    pub photos: Mutex<Vec<SentPhoto>>,
    pub edits: Mutex<Vec<(ReviewMessageRef, String)>>,
    pub answers: Mutex<Vec<(String, String)>>,
    pub texts: Mutex<Vec<String>>,
    next_message_id: AtomicI64,
}

impl RecordingReview {
    pub fn texts_containing(&self, needle: &str) -> usize {
        self.texts.lock().unwrap().iter().filter(|t| t.contains(needle)).count()
    }

    pub fn last_answer(&self) -> Option<String> {
        self.answers.lock().unwrap().last().map(|(_, text)| text.clone())
    }
}

#[async_trait]
impl ReviewChannel for RecordingReview {
    async fn send_photo_with_actions(
        &self,
        photo_url: &str,
        caption: &str,
        actions: &[ReviewAction],
    ) -> Result<ReviewMessageRef, NotifyError> {
        let message = ReviewMessageRef {
            chat_id: -1001,
            message_id: self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1,
        };
        self.photos.lock().unwrap().push(SentPhoto {
            photo_url: photo_url.to_string(),
            caption: caption.to_string(),
            actions: actions.to_vec(),
            message,
        });
        Ok(message)
    }

    async fn edit_message(&self, message: ReviewMessageRef, caption: &str) -> Result<(), NotifyError> {
        self.edits.lock().unwrap().push((message, caption.to_string()));
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str, text: &str) -> Result<(), NotifyError> {
        self.answers
            .lock()
            .unwrap()
            .push((callback_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn send_text(&self, text: &str) -> Result<(), NotifyError> {
        self.texts.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

// =============================================================================
// Test application
// =============================================================================

pub struct TestApp {
    pub state: AppState,
    pub classifier: Arc<FakeClassifier>,
    pub payments: Arc<FakePayments>,
    pub email: Arc<RecordingEmail>,
    pub review: Arc<RecordingReview>,
    _dir: TempDir,
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.server.public_base_url = BASE_URL.to_string();
    config.payments.stripe_webhook_secret = Some(STRIPE_SECRET.to_string());
    config.review.telegram_webhook_secret = Some(TELEGRAM_SECRET.to_string());
    config.jobs.max_attempts = 3;
    // Failed jobs are retried within the same drain
    config.jobs.backoff_base_ms = 0;
    config.jobs.backoff_max_ms = 0;
    config.polling.max_wait_secs = 2;
    config
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_database(&dir.path().join("nubcheck.db")).await.unwrap();
        let store = Store::new(pool, config.database.max_lock_wait_ms);

        let classifier = Arc::new(FakeClassifier::replying("BOY\n82\nClear nub visible"));
        let payments = Arc::new(FakePayments::default());
        let email = Arc::new(RecordingEmail::default());
        let review = Arc::new(RecordingReview::default());
        let images = Arc::new(LocalImageStore::new(
            dir.path().join("images"),
            &config.server.public_base_url,
            "img-secret".to_string(),
            3600,
            config.images.max_bytes,
        ));

        let state = AppState::new(
            Arc::new(config),
            store,
            Collaborators {
                classifier: classifier.clone(),
                payments: payments.clone(),
                email: email.clone(),
                review: review.clone(),
                images,
            },
        );

        Self {
            state,
            classifier,
            payments,
            email,
            review,
            _dir: dir,
        }
    }

    pub fn router(&self) -> axum::Router {
        build_router(self.state.clone())
    }

    pub fn store(&self) -> &Store {
        &self.state.store
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router().oneshot(request).await.unwrap()
    }

    /// Run every due outbox job
    pub async fn drain(&self) -> usize {
        self.state.dispatcher().drain().await.unwrap()
    }

    /// Paid session plus upload; returns the prediction id
    pub async fn submit(&self, session_id: &str, payment_intent: Option<&str>) -> String {
        self.payments.add_session(session_id, true, payment_intent, None);
        let response = self.send(upload_request(session_id, "image/jpeg", JPEG)).await;
        assert_eq!(response.status(), 200, "upload failed");
        let body = extract_json(response.into_body()).await;
        body["prediction_id"].as_str().unwrap().to_string()
    }
}

// =============================================================================
// Request helpers
// =============================================================================

pub async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
}

const BOUNDARY: &str = "nubcheck-test-boundary";

pub fn multipart_request(fields: &[(&str, Option<&str>, &[u8])]) -> Request<Body> {
    let mut body = Vec::new();
    for (name, content_type, data) in fields {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match content_type {
            Some(ct) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"scan\"\r\nContent-Type: {}\r\n\r\n",
                    name, ct
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
            ),
        }
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/upload")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

pub fn upload_request(session_id: &str, content_type: &str, image: &[u8]) -> Request<Body> {
    multipart_request(&[
        ("session_id", None, session_id.as_bytes()),
        ("image", Some(content_type), image),
    ])
}

/// Payment webhook delivery signed with the test secret
pub fn stripe_request(event_id: &str, event_type: &str, object: Value) -> Request<Body> {
    let body = serde_json::json!({
        "id": event_id,
        "type": event_type,
        "data": { "object": object }
    })
    .to_string();
    let timestamp = chrono::Utc::now().timestamp();
    let signature = compute_webhook_signature(body.as_bytes(), STRIPE_SECRET, timestamp);

    Request::builder()
        .method("POST")
        .uri("/api/webhooks/stripe")
        .header("Stripe-Signature", format!("t={},v1={}", timestamp, signature))
        .body(Body::from(body))
        .unwrap()
}

/// Bot button press carrying `data`
pub fn telegram_callback(callback_id: &str, data: &str, secret: Option<&str>) -> Request<Body> {
    let body = serde_json::json!({
        "update_id": 1,
        "callback_query": {
            "id": callback_id,
            "data": data,
            "message": {
                "message_id": 77,
                "chat": { "id": -1001 },
                "caption": "🔍 New scan to review"
            }
        }
    });

    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/telegram/webhook")
        .header("content-type", "application/json");
    if let Some(secret) = secret {
        builder = builder.header("X-Telegram-Bot-Api-Secret-Token", secret);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}
