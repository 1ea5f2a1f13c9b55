//! nubcheck-pl library - Prediction Lifecycle service
//!
//! Paid scan submissions move through classification, human review and
//! settlement here. Payment webhooks, the classifier and reviewers acting
//! through the bot are independent triggers; the SQLite store is the only
//! point where they meet.

use axum::extract::DefaultBodyLimit;
use axum::Router;
use nubcheck_common::config::AppConfig;
use std::sync::Arc;
use tokio::sync::Notify;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod classifier;
pub mod error;
pub mod images;
pub mod jobs;
pub mod lifecycle;
pub mod notify;
pub mod payments;
pub mod review;
pub mod store;

pub use error::{ApiError, ApiResult};

use classifier::{Classifier, ClassifierGateway};
use images::ImageStore;
use jobs::JobDispatcher;
use lifecycle::Lifecycle;
use notify::{EmailSender, Notifier, ReviewChannel};
use payments::{PaymentProvider, Reconciler};
use review::ReviewArbiter;
use store::Store;

/// External services the lifecycle depends on
#[derive(Clone)]
pub struct Collaborators {
    pub classifier: Arc<dyn Classifier>,
    pub payments: Arc<dyn PaymentProvider>,
    pub email: Arc<dyn EmailSender>,
    pub review: Arc<dyn ReviewChannel>,
    pub images: Arc<dyn ImageStore>,
}

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Store,
    pub lifecycle: Lifecycle,
    pub reconciler: Reconciler,
    pub arbiter: ReviewArbiter,
    pub notifier: Notifier,
    pub images: Arc<dyn ImageStore>,
    /// Wakes the job dispatcher after a transition enqueues work
    pub wake: Arc<Notify>,
}

impl AppState {
    /// Wire the lifecycle components around one store and configuration
    pub fn new(config: Arc<AppConfig>, store: Store, collaborators: Collaborators) -> Self {
        let wake = Arc::new(Notify::new());
        let gateway = ClassifierGateway::new(collaborators.classifier, collaborators.images.clone());
        let notifier = Notifier::new(
            collaborators.email,
            collaborators.review,
            collaborators.images.clone(),
            &config.server.public_base_url,
        );
        let reconciler = Reconciler::new(store.clone(), collaborators.payments.clone());
        let lifecycle = Lifecycle::new(
            store.clone(),
            gateway,
            collaborators.payments,
            collaborators.images.clone(),
            config.clone(),
            wake.clone(),
        );
        let arbiter = ReviewArbiter::new(lifecycle.clone(), notifier.clone());

        Self {
            config,
            store,
            lifecycle,
            reconciler,
            arbiter,
            notifier,
            images: collaborators.images,
            wake,
        }
    }

    /// Job dispatcher sharing this state's store and wake signal
    pub fn dispatcher(&self) -> JobDispatcher {
        JobDispatcher::new(
            self.store.clone(),
            self.lifecycle.clone(),
            self.reconciler.clone(),
            self.notifier.clone(),
            self.config.jobs.clone(),
            self.wake.clone(),
        )
    }
}

/// Build application router
///
/// Admin routes sit behind bearer-token auth; webhooks authenticate
/// themselves (signature header, shared-secret header).
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;

    // Multipart framing on top of the largest accepted image
    let upload_limit = state.config.images.max_bytes.saturating_add(1024 * 1024);

    let protected = api::admin_routes().layer(middleware::from_fn_with_state(
        state.clone(),
        api::admin_auth_middleware,
    ));

    let public = Router::new()
        .merge(api::upload_routes().layer(DefaultBodyLimit::max(upload_limit)))
        .merge(api::analyze_routes())
        .merge(api::prediction_routes())
        .merge(api::refund_routes())
        .merge(api::telegram_routes())
        .merge(api::stripe_routes())
        .merge(api::image_routes())
        .merge(api::health_routes());

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
