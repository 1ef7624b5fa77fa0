//! Lifecycle observers that mutate metric cells.
//!
//! A handler owns the metrics it introduces and forwards each event to them
//! through the matching [`Metric`] hook. Handlers are supplied once, in order,
//! when the engine is opened.

use crate::config::DEFAULT_MAX_MISSING;
use crate::metrics_api::{Metric, MetricKind, MetricValue};
use crate::model::{TestCase, TestOutcome, TestResult, LAST_RESULT_COLUMN};
use std::sync::Arc;

pub const MISSING_COLUMN: &str = "missing";

/// Observer of single test executions.
pub trait TestCaseHandler: Send {
    /// Metrics this handler contributes, in registration order.
    fn metrics(&self) -> Vec<Arc<dyn Metric>>;

    fn on_test_started(&mut self, _tc: &mut TestCase) {}

    fn on_test_finished(&mut self, _tc: &mut TestCase, _outcome: &TestOutcome) {}
}

/// Observer of whole testsets. Per-test hooks return `true` when they changed
/// the test case and it must be written back.
pub trait TestsetHandler: Send {
    fn metrics(&self) -> Vec<Arc<dyn Metric>>;

    /// Called once per testset with the full roster, before any per-test hook.
    fn on_testset_started_batch(&mut self, _all: &[String]) {}

    fn on_testset_started(&mut self, _tc: &mut TestCase, _all: &[String]) -> bool {
        false
    }

    fn on_testset_finished(
        &mut self,
        _tc: &mut TestCase,
        _all: &[String],
        _executed: &[String],
    ) -> bool {
        false
    }
}

/// Ordered, caller-selected handler lists. The built-in last-result and
/// missing-counter handlers are added by the engine and do not belong here.
#[derive(Default)]
pub struct Handlers {
    pub test_case: Vec<Box<dyn TestCaseHandler>>,
    pub testset: Vec<Box<dyn TestsetHandler>>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_test_case(mut self, h: impl TestCaseHandler + 'static) -> Self {
        self.test_case.push(Box::new(h));
        self
    }

    pub fn with_testset(mut self, h: impl TestsetHandler + 'static) -> Self {
        self.testset.push(Box::new(h));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.test_case.is_empty() && self.testset.is_empty()
    }
}

/// Runs a hook of `metric` on its cell in `tc` and reports whether the value
/// changed.
pub fn apply_hook<F>(tc: &mut TestCase, metric: &dyn Metric, f: F) -> bool
where
    F: FnOnce(&dyn Metric, &mut MetricValue),
{
    let column = metric.column_name();
    let before = tc.value(column).cloned();
    if !tc.update(column, f) {
        return false;
    }
    before.as_ref() != tc.value(column)
}

// --- last result ---

/// `"0"` after a pass, `"1"` after a failure. Skips leave it untouched.
pub struct LastResultMetric;

impl Metric for LastResultMetric {
    fn column_name(&self) -> &str {
        LAST_RESULT_COLUMN
    }

    fn display_name(&self) -> String {
        "Last result".to_string()
    }

    fn kind(&self) -> MetricKind {
        MetricKind::Text
    }

    fn min_display_width(&self) -> usize {
        1
    }

    fn numeric_projection(&self, value: &MetricValue) -> f64 {
        if value.as_text() == Some("1") {
            1.0
        } else {
            0.0
        }
    }

    fn on_result(&self, value: &mut MetricValue, result: TestResult) {
        let code = match result {
            TestResult::Passed => "0",
            TestResult::Failed => "1",
            TestResult::Skipped => return,
        };
        *value = MetricValue::Text(Some(code.to_string()));
    }
}

pub struct LastResultHandler {
    metric: Arc<dyn Metric>,
}

impl LastResultHandler {
    pub fn new() -> Self {
        Self {
            metric: Arc::new(LastResultMetric),
        }
    }
}

impl Default for LastResultHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl TestCaseHandler for LastResultHandler {
    fn metrics(&self) -> Vec<Arc<dyn Metric>> {
        vec![Arc::clone(&self.metric)]
    }

    fn on_test_finished(&mut self, tc: &mut TestCase, outcome: &TestOutcome) {
        apply_hook(tc, self.metric.as_ref(), |m, v| m.on_result(v, outcome.result));
    }
}

// --- missing counter ---

/// Consecutive testsets a stored test was not executed in.
pub struct MissingCounterMetric {
    threshold: i64,
}

impl MissingCounterMetric {
    /// `threshold <= 0` disables deletion.
    pub fn new(threshold: i64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> i64 {
        self.threshold
    }
}

impl Metric for MissingCounterMetric {
    fn column_name(&self) -> &str {
        MISSING_COLUMN
    }

    fn display_name(&self) -> String {
        "Missing".to_string()
    }

    fn kind(&self) -> MetricKind {
        MetricKind::Integer
    }

    fn min_display_width(&self) -> usize {
        5
    }

    fn default_value(&self) -> MetricValue {
        MetricValue::Integer(Some(0))
    }

    fn eligible_for_deletion(&self, value: &MetricValue) -> bool {
        self.threshold > 0 && value.as_integer().unwrap_or(0) > self.threshold
    }

    fn on_execution_presence(&self, value: &mut MetricValue, was_executed: bool) {
        let next = if was_executed {
            0
        } else {
            value.as_integer().unwrap_or(0).saturating_add(1)
        };
        *value = MetricValue::Integer(Some(next));
    }
}

pub struct MissingCounterHandler {
    metric: Arc<dyn Metric>,
}

impl MissingCounterHandler {
    pub fn new(threshold: i64) -> Self {
        Self {
            metric: Arc::new(MissingCounterMetric::new(threshold)),
        }
    }
}

impl Default for MissingCounterHandler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MISSING)
    }
}

impl TestsetHandler for MissingCounterHandler {
    fn metrics(&self) -> Vec<Arc<dyn Metric>> {
        vec![Arc::clone(&self.metric)]
    }

    fn on_testset_finished(
        &mut self,
        tc: &mut TestCase,
        _all: &[String],
        executed: &[String],
    ) -> bool {
        let was_executed = executed.iter().any(|n| n == tc.name());
        apply_hook(tc, self.metric.as_ref(), |m, v| {
            m.on_execution_presence(v, was_executed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn case(handlers_metrics: Vec<Arc<dyn Metric>>) -> TestCase {
        TestCase::new("testAdd", &handlers_metrics)
    }

    #[test]
    fn last_result_records_pass_fail_and_ignores_skip() {
        let mut h = LastResultHandler::new();
        let mut tc = case(h.metrics());

        h.on_test_finished(&mut tc, &TestOutcome::new(TestResult::Failed, Duration::ZERO));
        assert_eq!(tc.last_result(), Some(TestResult::Failed));
        assert_eq!(tc.features(), vec![1.0]);

        h.on_test_finished(&mut tc, &TestOutcome::new(TestResult::Skipped, Duration::ZERO));
        assert_eq!(tc.last_result(), Some(TestResult::Failed));

        h.on_test_finished(&mut tc, &TestOutcome::new(TestResult::Passed, Duration::ZERO));
        assert_eq!(tc.value(LAST_RESULT_COLUMN).and_then(|v| v.as_text()), Some("0"));
        assert_eq!(tc.features(), vec![0.0]);
    }

    #[test]
    fn missing_counter_counts_and_resets() {
        let mut h = MissingCounterHandler::new(2);
        let mut tc = case(h.metrics());
        let all = vec!["testAdd".to_string()];

        assert!(h.on_testset_finished(&mut tc, &all, &[]));
        assert!(h.on_testset_finished(&mut tc, &all, &[]));
        assert!(!tc.eligible_for_deletion());
        assert!(h.on_testset_finished(&mut tc, &all, &[]));
        assert_eq!(tc.value(MISSING_COLUMN), Some(&MetricValue::Integer(Some(3))));
        assert!(tc.eligible_for_deletion());

        assert!(h.on_testset_finished(&mut tc, &all, &all));
        assert_eq!(tc.value(MISSING_COLUMN), Some(&MetricValue::Integer(Some(0))));
        // already zero: nothing to write
        assert!(!h.on_testset_finished(&mut tc, &all, &all));
    }

    #[test]
    fn non_positive_threshold_never_deletes() {
        let m = MissingCounterMetric::new(0);
        assert!(!m.eligible_for_deletion(&MetricValue::Integer(Some(1_000))));
        let m = MissingCounterMetric::new(-1);
        assert!(!m.eligible_for_deletion(&MetricValue::Integer(Some(1_000))));
    }

    #[test]
    fn apply_hook_on_unregistered_metric_is_noop() {
        let mut tc = case(vec![Arc::new(LastResultMetric)]);
        let other = MissingCounterMetric::new(1);
        assert!(!apply_hook(&mut tc, &other, |m, v| m.on_execution_presence(v, false)));
    }
}
