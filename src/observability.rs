use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

use crate::pipeline::GateStage;

#[derive(Debug, Default, Serialize, Clone)]
pub struct MetricsSnapshot {
    pub steps: BTreeMap<String, StepMetrics>,
    pub stages: BTreeMap<String, StageMetrics>,
}

#[derive(Debug, Default, Serialize, Clone)]
pub struct StepMetrics {
    pub calls: u64,
    pub passes: u64,
    pub failures: u64,
    pub skips: u64,
    pub total_duration_ms: f64,
    pub max_duration_ms: f64,
}

#[derive(Debug, Default, Serialize, Clone)]
pub struct StageMetrics {
    pub passes: u64,
    pub failures: u64,
    pub bypasses: u64,
    pub last_duration_ms: f64,
}

#[derive(Debug, Default, Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsSnapshot>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsSnapshot::default())),
        }
    }

    pub fn start_step(&self, step_name: &str) -> StepTimer {
        StepTimer {
            step: step_name.to_string(),
            started_at: Instant::now(),
            collector: self.inner.clone(),
            recorded: false,
        }
    }

    pub fn record_step_pass(&self, step_name: &str) {
        self.with_step(step_name, |metrics| metrics.passes += 1);
    }

    pub fn record_step_failure(&self, step_name: &str) {
        self.with_step(step_name, |metrics| metrics.failures += 1);
    }

    pub fn record_step_skip(&self, step_name: &str) {
        self.with_step(step_name, |metrics| metrics.skips += 1);
    }

    pub fn record_stage_pass(&self, stage: GateStage, duration: Duration) {
        self.with_stage(stage, |metrics| {
            metrics.passes += 1;
            metrics.last_duration_ms = duration.as_secs_f64() * 1_000.0;
        });
    }

    pub fn record_stage_failure(&self, stage: GateStage) {
        self.with_stage(stage, |metrics| metrics.failures += 1);
    }

    pub fn record_bypass(&self, stage: GateStage) {
        self.with_stage(stage, |metrics| metrics.bypasses += 1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn reset(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = MetricsSnapshot::default();
        }
    }

    fn with_step(&self, step_name: &str, update: impl FnOnce(&mut StepMetrics)) {
        if let Ok(mut guard) = self.inner.lock() {
            update(guard.steps.entry(step_name.to_string()).or_default());
        }
    }

    fn with_stage(&self, stage: GateStage, update: impl FnOnce(&mut StageMetrics)) {
        if let Ok(mut guard) = self.inner.lock() {
            update(guard.stages.entry(stage.as_str().to_string()).or_default());
        }
    }
}

/// Records the step's wall time once, on `finish` or on drop.
pub struct StepTimer {
    step: String,
    started_at: Instant,
    collector: Arc<Mutex<MetricsSnapshot>>,
    recorded: bool,
}

impl StepTimer {
    pub fn finish(mut self) -> u64 {
        self.record().as_millis() as u64
    }

    fn record(&mut self) -> Duration {
        let duration = self.started_at.elapsed();
        if self.recorded {
            return duration;
        }
        if let Ok(mut guard) = self.collector.lock() {
            let metrics = guard.steps.entry(self.step.clone()).or_default();
            metrics.calls += 1;
            let duration_ms = duration.as_secs_f64() * 1_000.0;
            metrics.total_duration_ms += duration_ms;
            if duration_ms > metrics.max_duration_ms {
                metrics.max_duration_ms = duration_ms;
            }
        }
        debug!(
            step = self.step.as_str(),
            duration_ms = duration.as_secs_f64() * 1_000.0,
            "Step duration recorded"
        );
        self.recorded = true;
        duration
    }
}

impl Drop for StepTimer {
    fn drop(&mut self) {
        self.record();
    }
}

pub fn log_snapshot(snapshot: &MetricsSnapshot) {
    for (stage, metrics) in &snapshot.stages {
        info!(
            stage = stage.as_str(),
            passes = metrics.passes,
            failures = metrics.failures,
            bypasses = metrics.bypasses,
            duration_ms = metrics.last_duration_ms,
            "Stage metrics"
        );
    }
    for (step, metrics) in &snapshot.steps {
        info!(
            step = step.as_str(),
            calls = metrics.calls,
            passes = metrics.passes,
            failures = metrics.failures,
            skips = metrics.skips,
            total_ms = metrics.total_duration_ms,
            max_ms = metrics.max_duration_ms,
            "Step metrics"
        );
    }
}
