//! Metrics for scenario calculations
//!
//! ## Table of Contents
//! - **ScenarioMetrics**: Prometheus registry with phase timings and work counters
//! - **export_text**: Text exposition of the registry

use prometheus::{Counter, CounterVec, Encoder, Opts, Registry, TextEncoder};
use std::time::Duration;

use crate::error::{Result, ScenarioError};

/// Core metrics for scenario calculations
pub struct ScenarioMetrics {
    registry: Registry,

    // Phase metrics (fed by monitors)
    /// Seconds per phase
    pub phase_seconds: CounterVec,
    /// Measured sections per phase
    pub phase_calls: CounterVec,

    // Map-reduce metrics
    /// Finished partitions by status
    pub partitions: CounterVec,
    /// Risk inputs entering a calculator
    pub risk_inputs: Counter,
    /// Total weight of those inputs
    pub risk_input_weight: Counter,

    // Simulation metrics
    /// Realizations by GMF mode
    pub realizations: CounterVec,
}

impl ScenarioMetrics {
    /// Create a new metrics instance
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let phase_seconds = CounterVec::new(
            Opts::new("scenario_phase_seconds_total", "Wall time spent per phase"),
            &["phase"],
        )?;
        let phase_calls = CounterVec::new(
            Opts::new("scenario_phase_calls_total", "Measured sections per phase"),
            &["phase"],
        )?;

        let partitions = CounterVec::new(
            Opts::new("scenario_partitions_total", "Map-reduce partitions by outcome"),
            &["status"],
        )?;
        let risk_inputs = Counter::new("scenario_risk_inputs_total", "Risk inputs processed")?;
        let risk_input_weight = Counter::new(
            "scenario_risk_input_weight_total",
            "Total weight of risk inputs processed",
        )?;

        let realizations = CounterVec::new(
            Opts::new("scenario_gmf_realizations_total", "Ground motion realizations computed"),
            &["mode"],
        )?;

        registry.register(Box::new(phase_seconds.clone()))?;
        registry.register(Box::new(phase_calls.clone()))?;
        registry.register(Box::new(partitions.clone()))?;
        registry.register(Box::new(risk_inputs.clone()))?;
        registry.register(Box::new(risk_input_weight.clone()))?;
        registry.register(Box::new(realizations.clone()))?;

        Ok(Self {
            registry,
            phase_seconds,
            phase_calls,
            partitions,
            risk_inputs,
            risk_input_weight,
            realizations,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record time spent in a phase
    pub fn record_phase(&self, phase: &str, elapsed: Duration, calls: u64) {
        self.phase_seconds
            .with_label_values(&[phase])
            .inc_by(elapsed.as_secs_f64());
        self.phase_calls
            .with_label_values(&[phase])
            .inc_by(calls as f64);
    }

    /// Record a finished partition
    pub fn record_partition(&self, ok: bool) {
        let status = if ok { "ok" } else { "failed" };
        self.partitions.with_label_values(&[status]).inc();
    }

    /// Record a batch of risk inputs entering a calculator
    pub fn record_risk_inputs(&self, count: usize, weight: f64) {
        self.risk_inputs.inc_by(count as f64);
        self.risk_input_weight.inc_by(weight.max(0.0));
    }

    /// Record computed realizations
    pub fn record_realizations(&self, mode: &str, count: usize) {
        self.realizations
            .with_label_values(&[mode])
            .inc_by(count as f64);
    }

    /// Seconds accumulated for a phase
    pub fn phase_total(&self, phase: &str) -> f64 {
        self.phase_seconds.with_label_values(&[phase]).get()
    }

    /// Render the registry in the Prometheus text format
    pub fn export_text(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| ScenarioError::internal(e.to_string()))
    }
}
