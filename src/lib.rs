//! Video frame scoring service
//!
//! Accepts uploaded videos, samples frames with ffmpeg, scores each frame with
//! a hosted detection model and reports progress and the aggregated score
//! over server-sent events.

pub mod app_state;
pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
