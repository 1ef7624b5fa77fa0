use currant_core::handlers::{apply_hook, TestCaseHandler};
use currant_core::metrics_api::{Metric, MetricKind, MetricValue};
use currant_core::model::{TestCase, TestOutcome};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct DurationMetric;

impl Metric for DurationMetric {
    fn column_name(&self) -> &str {
        "duration"
    }

    fn display_name(&self) -> String {
        "Duration(ms)".to_string()
    }

    fn kind(&self) -> MetricKind {
        MetricKind::Integer
    }

    fn min_display_width(&self) -> usize {
        10
    }

    fn on_duration(&self, value: &mut MetricValue, duration: Duration) {
        let ms = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        *value = MetricValue::Integer(Some(ms));
    }
}

/// Records run time in milliseconds. A zero duration from the host is
/// replaced by the wall time since the matching `test_started`.
pub struct DurationHandler {
    metric: Arc<dyn Metric>,
    started: HashMap<String, Instant>,
}

impl DurationHandler {
    pub fn new() -> Self {
        Self {
            metric: Arc::new(DurationMetric),
            started: HashMap::new(),
        }
    }
}

impl Default for DurationHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl TestCaseHandler for DurationHandler {
    fn metrics(&self) -> Vec<Arc<dyn Metric>> {
        vec![Arc::clone(&self.metric)]
    }

    fn on_test_started(&mut self, tc: &mut TestCase) {
        self.started.insert(tc.name().to_string(), Instant::now());
    }

    fn on_test_finished(&mut self, tc: &mut TestCase, outcome: &TestOutcome) {
        let started = self.started.remove(tc.name());
        let duration = match started {
            Some(t0) if outcome.duration.is_zero() => t0.elapsed(),
            _ => outcome.duration,
        };
        apply_hook(tc, self.metric.as_ref(), |m, v| m.on_duration(v, duration));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use currant_core::model::TestResult;

    #[test]
    fn reported_duration_wins() {
        let mut h = DurationHandler::new();
        let mut tc = TestCase::new("t", &h.metrics());
        h.on_test_started(&mut tc);
        h.on_test_finished(
            &mut tc,
            &TestOutcome::new(TestResult::Passed, Duration::from_millis(1234)),
        );
        assert_eq!(tc.value("duration"), Some(&MetricValue::Integer(Some(1234))));
    }

    #[test]
    fn zero_duration_is_measured() {
        let mut h = DurationHandler::new();
        let mut tc = TestCase::new("t", &h.metrics());
        h.on_test_started(&mut tc);
        std::thread::sleep(Duration::from_millis(20));
        h.on_test_finished(&mut tc, &TestOutcome::new(TestResult::Passed, Duration::ZERO));
        let ms = tc.value("duration").and_then(|v| v.as_integer()).unwrap();
        assert!(ms >= 20);
    }

    #[test]
    fn zero_without_start_is_stored_as_zero() {
        let mut h = DurationHandler::new();
        let mut tc = TestCase::new("t", &h.metrics());
        h.on_test_finished(&mut tc, &TestOutcome::new(TestResult::Failed, Duration::ZERO));
        assert_eq!(tc.value("duration"), Some(&MetricValue::Integer(Some(0))));
    }
}
