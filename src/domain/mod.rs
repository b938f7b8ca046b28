//! Core domain types and logic.

pub mod candle;
pub mod position;
pub mod portfolio;
pub mod signal;
pub mod execution;
pub mod indicator;
pub mod strategy;
pub mod engine;
pub mod metrics;
pub mod sweep;
pub mod config_validation;
pub mod error;
