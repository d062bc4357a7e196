//! HTTP host for the crop advisor
//!
//! Serves predictions, prediction history and model metrics alongside
//! health and Prometheus endpoints.

pub mod api;
pub mod config;
