//! # nubcheck common library
//!
//! Shared code for the nubcheck services:
//! - Domain models (Prediction, ReferralCode, verdicts, statuses)
//! - Database initialization and lock-retry helper
//! - Configuration loading (CLI > ENV > TOML > defaults)
//! - HMAC signing helpers for webhooks and signed image URLs

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod signing;

pub use error::{Error, Result};
pub use models::{
    Prediction, PredictionStatus, ReferralCode, ResolutionResult, ReviewMessageRef, Verdict,
};
