//! Observability for the advisor
//!
//! Provides:
//! - Prometheus metrics (prediction latency, outcomes, history size, model version)
//! - Structured logging of business events with tracing

use crate::models::{Prediction, SensorReading};
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_gauge, Encoder,
    GaugeVec, Histogram, IntCounter, IntGauge, TextEncoder,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Latency buckets in seconds
const LATENCY_BUCKETS: &[f64] = &[
    0.00005, 0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25,
];

/// Registered once per process; `None` if registration failed
static GLOBAL_METRICS: OnceLock<Option<AdvisorMetricsInner>> = OnceLock::new();

struct AdvisorMetricsInner {
    prediction_latency_seconds: Histogram,
    predictions_total: IntCounter,
    validation_failures_total: IntCounter,
    prediction_errors_total: IntCounter,
    history_appends_total: IntCounter,
    history_records: IntGauge,
    model_info: GaugeVec,
}

impl AdvisorMetricsInner {
    fn register() -> prometheus::Result<Self> {
        Ok(Self {
            prediction_latency_seconds: register_histogram!(
                "crop_advisor_prediction_latency_seconds",
                "Time spent validating, encoding and classifying one reading",
                LATENCY_BUCKETS.to_vec()
            )?,
            predictions_total: register_int_counter!(
                "crop_advisor_predictions_total",
                "Predictions returned to callers"
            )?,
            validation_failures_total: register_int_counter!(
                "crop_advisor_validation_failures_total",
                "Readings rejected for out-of-domain fields"
            )?,
            prediction_errors_total: register_int_counter!(
                "crop_advisor_prediction_errors_total",
                "Predict calls refused because the model is unavailable"
            )?,
            history_appends_total: register_int_counter!(
                "crop_advisor_history_appends_total",
                "Prediction records appended to the history"
            )?,
            history_records: register_int_gauge!(
                "crop_advisor_history_records",
                "Records in the prediction history at last read"
            )?,
            model_info: register_gauge_vec!(
                "crop_advisor_model_info",
                "Currently loaded model artifact",
                &["version", "classes"]
            )?,
        })
    }
}

/// Handle to the process-wide Prometheus metrics.
///
/// Clones share the same underlying metrics. If registration fails the
/// handle records nothing.
#[derive(Clone)]
pub struct AdvisorMetrics {
    inner: Option<&'static AdvisorMetricsInner>,
}

impl Default for AdvisorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AdvisorMetrics {
    pub fn new() -> Self {
        let inner = GLOBAL_METRICS.get_or_init(|| match AdvisorMetricsInner::register() {
            Ok(inner) => Some(inner),
            Err(e) => {
                warn!(error = %e, "Failed to register Prometheus metrics");
                None
            }
        });
        Self {
            inner: inner.as_ref(),
        }
    }

    pub fn is_registered(&self) -> bool {
        self.inner.is_some()
    }

    pub fn observe_prediction_latency(&self, duration_secs: f64) {
        if let Some(m) = self.inner {
            m.prediction_latency_seconds.observe(duration_secs);
        }
    }

    pub fn inc_predictions(&self) {
        if let Some(m) = self.inner {
            m.predictions_total.inc();
        }
    }

    pub fn inc_validation_failures(&self) {
        if let Some(m) = self.inner {
            m.validation_failures_total.inc();
        }
    }

    pub fn inc_prediction_errors(&self) {
        if let Some(m) = self.inner {
            m.prediction_errors_total.inc();
        }
    }

    pub fn inc_history_appends(&self) {
        if let Some(m) = self.inner {
            m.history_appends_total.inc();
        }
    }

    pub fn set_history_records(&self, count: usize) {
        if let Some(m) = self.inner {
            m.history_records.set(count as i64);
        }
    }

    /// Replace the model info series with the given version
    pub fn set_model(&self, version: &str, classes: &[String]) {
        if let Some(m) = self.inner {
            let classes = classes.join(",");
            m.model_info.reset();
            m.model_info
                .with_label_values(&[version, classes.as_str()])
                .set(1.0);
        }
    }

    pub fn clear_model(&self) {
        if let Some(m) = self.inner {
            m.model_info.reset();
        }
    }

    /// Everything in the default registry, in text exposition format
    pub fn render() -> prometheus::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        Ok(buffer)
    }
}

/// Emits the advisor's business events as structured log lines
#[derive(Clone)]
pub struct StructuredLogger {
    component: String,
}

impl StructuredLogger {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    pub fn log_startup(&self, version: &str, model_version: Option<&str>) {
        info!(
            event = "agent_started",
            component = %self.component,
            agent_version = %version,
            model_version = model_version.unwrap_or("none"),
            "Crop advisor started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            component = %self.component,
            reason = %reason,
            "Crop advisor shutting down"
        );
    }

    pub fn log_prediction(
        &self,
        reading: &SensorReading,
        prediction: &Prediction,
        confidence: f64,
    ) {
        info!(
            event = "prediction_generated",
            component = %self.component,
            crop_type = %reading.crop_type,
            soil_type = %reading.soil_type,
            action = %prediction.action,
            confidence = confidence,
            model_version = %prediction.model_version,
            "Generated action recommendation"
        );
    }

    pub fn log_rejection(&self, fields: &[&str]) {
        info!(
            event = "prediction_rejected",
            component = %self.component,
            fields = ?fields,
            "Rejected out-of-domain reading"
        );
    }

    pub fn log_history_append(&self, action: &str, total_records: Option<usize>) {
        info!(
            event = "history_appended",
            component = %self.component,
            action = %action,
            total_records = ?total_records,
            "Recorded prediction in history"
        );
    }

    pub fn log_model_loaded(&self, path: &str, version: &str, classes: &[String]) {
        info!(
            event = "model_loaded",
            component = %self.component,
            path = %path,
            version = %version,
            classes = ?classes,
            "Model artifact loaded"
        );
    }

    pub fn log_model_unavailable(&self, path: &str, kind: &str, error: &str) {
        warn!(
            event = "model_unavailable",
            component = %self.component,
            path = %path,
            kind = %kind,
            error = %error,
            "Model artifact unavailable, predictions will be refused"
        );
    }

    pub fn log_training_completed(&self, version: &str, accuracy: f64, examples: usize) {
        info!(
            event = "training_completed",
            component = %self.component,
            version = %version,
            accuracy = accuracy,
            examples = examples,
            "Model trained"
        );
    }

    pub fn log_training_aborted(&self, reason: &str) {
        warn!(
            event = "training_aborted",
            component = %self.component,
            reason = %reason,
            "Training aborted, no artifact written"
        );
    }
}
