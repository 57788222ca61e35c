//! Exposure classification and aggregation
//!
//! This module contains the health/risk model:
//! - Zone classification of instantaneous levels ([`classifier`])
//! - Time-weighted exposure aggregation over a session ([`aggregator`])

pub mod aggregator;
pub mod classifier;
