//! Document OCR service
//!
//! Runs a text recognition engine and a barcode/QR decoder side by side on an
//! uploaded page image, merges their output into reading-order words and codes,
//! and reports the result by server-sent events, webhook or polling.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
