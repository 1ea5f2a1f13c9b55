//! HTTP API handlers for nubcheck-pl

pub mod admin;
pub mod analyze;
pub mod auth;
pub mod health;
pub mod images;
pub mod predictions;
pub mod refund;
pub mod stripe;
pub mod telegram;
pub mod upload;

pub use admin::admin_routes;
pub use analyze::analyze_routes;
pub use auth::admin_auth_middleware;
pub use health::health_routes;
pub use images::image_routes;
pub use predictions::{prediction_routes, PredictionView};
pub use refund::refund_routes;
pub use stripe::stripe_routes;
pub use telegram::telegram_routes;
pub use upload::upload_routes;
