//! Provisioner Metrics
//!
//! Prometheus counters kept in a per-process registry and exposed by the
//! executor's `/metrics` endpoint.

use crate::error::{Error, Result};
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

/// Outcome label values
pub const OUTCOME_SUCCESS: &str = "success";
pub const OUTCOME_FAILURE: &str = "failure";
pub const OUTCOME_SKIPPED: &str = "skipped";

/// Admission outcome label values
pub const REVIEW_MUTATED: &str = "mutated";
pub const REVIEW_PASSED: &str = "passed";
pub const REVIEW_DENIED: &str = "denied";

/// Counters for the three reconcilers
pub struct Metrics {
    registry: Registry,
    admission_reviews: IntCounterVec,
    allocations: IntCounterVec,
    deallocations: IntCounterVec,
    capacity_adjustments: IntCounterVec,
}

fn counter(registry: &Registry, name: &str, help: &str, label: &str) -> Result<IntCounterVec> {
    let vec = IntCounterVec::new(Opts::new(name, help), &[label])
        .map_err(|e| Error::Internal(format!("Invalid metric {}: {}", name, e)))?;
    registry
        .register(Box::new(vec.clone()))
        .map_err(|e| Error::Internal(format!("Cannot register metric {}: {}", name, e)))?;
    Ok(vec)
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("localpv".to_string()), None)
            .map_err(|e| Error::Internal(format!("Cannot create metrics registry: {}", e)))?;

        Ok(Self {
            admission_reviews: counter(
                &registry,
                "admission_reviews_total",
                "Admission reviews by outcome",
                "result",
            )?,
            allocations: counter(
                &registry,
                "allocations_total",
                "Volume allocations by outcome",
                "result",
            )?,
            deallocations: counter(
                &registry,
                "deallocations_total",
                "Volume teardowns by outcome",
                "result",
            )?,
            capacity_adjustments: counter(
                &registry,
                "capacity_adjustments_total",
                "Advertised capacity adjustments by direction",
                "direction",
            )?,
            registry,
        })
    }

    pub fn record_review(&self, outcome: &str) {
        self.admission_reviews.with_label_values(&[outcome]).inc();
    }

    pub fn record_allocation(&self, outcome: &str) {
        self.allocations.with_label_values(&[outcome]).inc();
    }

    pub fn record_deallocation(&self, outcome: &str) {
        self.deallocations.with_label_values(&[outcome]).inc();
    }

    /// `direction` is `decrement` or `increment`
    pub fn record_capacity_adjustment(&self, direction: &str) {
        self.capacity_adjustments.with_label_values(&[direction]).inc();
    }

    /// Current value of one counter, for assertions and diagnostics
    pub fn count(&self, family: &str, label: &str) -> u64 {
        let vec = match family {
            "admission_reviews" => &self.admission_reviews,
            "allocations" => &self.allocations,
            "deallocations" => &self.deallocations,
            "capacity_adjustments" => &self.capacity_adjustments,
            _ => return 0,
        };
        vec.with_label_values(&[label]).get()
    }

    /// Render the registry in the text exposition format
    pub fn render(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| Error::Internal(format!("Cannot encode metrics: {}", e)))?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_render() {
        let metrics = Metrics::new().unwrap();
        metrics.record_review(REVIEW_MUTATED);
        metrics.record_review(REVIEW_MUTATED);
        metrics.record_capacity_adjustment("decrement");

        assert_eq!(metrics.count("admission_reviews", REVIEW_MUTATED), 2);
        assert_eq!(metrics.count("admission_reviews", REVIEW_DENIED), 0);

        let (content_type, body) = metrics.render().unwrap();
        let body = String::from_utf8(body).unwrap();
        assert!(content_type.starts_with("text/plain"));
        assert!(body.contains("localpv_admission_reviews_total{result=\"mutated\"} 2"));
        assert!(body.contains("localpv_capacity_adjustments_total{direction=\"decrement\"} 1"));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_allocation(OUTCOME_SUCCESS);
        assert_eq!(b.count("allocations", OUTCOME_SUCCESS), 0);
    }
}
