use crate::metrics_api::{Metric, MetricValue};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Column written by the built-in last-result metric.
pub const LAST_RESULT_COLUMN: &str = "lastresult";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TestResult {
    Passed,
    Failed,
    Skipped,
}

impl TestResult {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "passed" | "pass" | "success" => Some(TestResult::Passed),
            "failed" | "fail" | "failure" => Some(TestResult::Failed),
            "skipped" | "skip" => Some(TestResult::Skipped),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TestResult::Passed => "passed",
            TestResult::Failed => "failed",
            TestResult::Skipped => "skipped",
        }
    }
}

/// Raw counters reported by the coverage instrumentation for one test run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoverageCounters {
    pub instructions: i64,
    pub branches: i64,
    pub complexity: i64,
}

/// Everything the host reports when a test finishes.
#[derive(Debug, Clone, PartialEq)]
pub struct TestOutcome {
    pub result: TestResult,
    pub duration: Duration,
    pub coverage: Option<CoverageCounters>,
}

impl TestOutcome {
    pub fn new(result: TestResult, duration: Duration) -> Self {
        Self {
            result,
            duration,
            coverage: None,
        }
    }

    pub fn with_coverage(mut self, coverage: CoverageCounters) -> Self {
        self.coverage = Some(coverage);
        self
    }
}

/// Ranked entry produced by prioritization. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrioritizationResult {
    pub name: String,
    pub failure_probability: f64,
}

impl PrioritizationResult {
    pub fn new(name: impl Into<String>, failure_probability: f64) -> Self {
        Self {
            name: name.into(),
            failure_probability,
        }
    }

    pub fn format_percent(&self) -> String {
        format!("{:.2} %", self.failure_probability * 100.0)
    }
}

/// One metric value of a test case together with the metric describing it.
#[derive(Clone)]
pub struct MetricCell {
    pub metric: Arc<dyn Metric>,
    pub value: MetricValue,
}

impl MetricCell {
    pub fn is_default(&self) -> bool {
        self.value == self.metric.default_value()
    }
}

/// A uniquely named test with one value per registered metric, in
/// registration order.
#[derive(Clone)]
pub struct TestCase {
    name: String,
    cells: Vec<MetricCell>,
}

impl TestCase {
    /// New test case with every metric at its declared default.
    pub fn new(name: impl Into<String>, metrics: &[Arc<dyn Metric>]) -> Self {
        let cells = metrics
            .iter()
            .map(|m| MetricCell {
                metric: Arc::clone(m),
                value: m.default_value(),
            })
            .collect();
        Self {
            name: name.into(),
            cells,
        }
    }

    /// Rebuilds a test case from stored cells. Every cell's value must
    /// already be of its metric's kind.
    pub(crate) fn from_cells(name: impl Into<String>, cells: Vec<MetricCell>) -> Self {
        Self {
            name: name.into(),
            cells,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cells(&self) -> &[MetricCell] {
        &self.cells
    }

    pub fn value(&self, column: &str) -> Option<&MetricValue> {
        self.cells
            .iter()
            .find(|c| c.metric.column_name() == column)
            .map(|c| &c.value)
    }

    /// Overwrites a cell. The value must match the metric's kind.
    pub fn set_value(&mut self, column: &str, value: MetricValue) -> anyhow::Result<()> {
        let cell = self
            .cells
            .iter_mut()
            .find(|c| c.metric.column_name() == column)
            .ok_or_else(|| anyhow::anyhow!("unknown metric column '{}'", column))?;
        if value.kind() != cell.metric.kind() {
            anyhow::bail!(
                "metric '{}' holds {} values, got {}",
                column,
                cell.metric.kind().as_str(),
                value.kind().as_str()
            );
        }
        cell.value = value;
        Ok(())
    }

    /// Runs `f` on the cell of `column`. Returns false when the column is not
    /// registered. A hook that switches the variant is reverted.
    pub fn update<F>(&mut self, column: &str, f: F) -> bool
    where
        F: FnOnce(&dyn Metric, &mut MetricValue),
    {
        let Some(cell) = self
            .cells
            .iter_mut()
            .find(|c| c.metric.column_name() == column)
        else {
            return false;
        };
        let before = cell.value.clone();
        f(cell.metric.as_ref(), &mut cell.value);
        if cell.value.kind() != cell.metric.kind() {
            tracing::error!(
                event = "currant.metric.kind_violation",
                test = %self.name,
                column = %column,
                "metric hook changed value kind; reverting"
            );
            cell.value = before;
        }
        true
    }

    /// True once any metric holds something other than its default.
    pub fn has_history(&self) -> bool {
        self.cells.iter().any(|c| !c.is_default())
    }

    pub fn eligible_for_deletion(&self) -> bool {
        self.cells
            .iter()
            .any(|c| c.metric.eligible_for_deletion(&c.value))
    }

    /// Most recent recorded result, `None` if the test never ran to a
    /// pass/fail outcome.
    pub fn last_result(&self) -> Option<TestResult> {
        match self.value(LAST_RESULT_COLUMN)?.as_text() {
            Some("1") => Some(TestResult::Failed),
            Some(s) if !s.is_empty() => Some(TestResult::Passed),
            _ => None,
        }
    }

    /// Numeric projection of every training metric, in registration order.
    pub fn features(&self) -> Vec<f64> {
        self.cells
            .iter()
            .filter(|c| c.metric.participates_in_training())
            .map(|c| c.metric.numeric_projection(&c.value))
            .collect()
    }
}

impl PartialEq for TestCase {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.cells.len() == other.cells.len()
            && self
                .cells
                .iter()
                .zip(other.cells.iter())
                .all(|(a, b)| a.metric.column_name() == b.metric.column_name() && a.value == b.value)
    }
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut m = f.debug_map();
        m.entry(&"name", &self.name);
        for c in &self.cells {
            m.entry(&c.metric.column_name(), &c.value);
        }
        m.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics_api::MetricKind;

    struct Counter;

    impl Metric for Counter {
        fn column_name(&self) -> &str {
            "counter"
        }
        fn display_name(&self) -> String {
            "Counter".into()
        }
        fn kind(&self) -> MetricKind {
            MetricKind::Integer
        }
        fn min_display_width(&self) -> usize {
            3
        }
        fn default_value(&self) -> MetricValue {
            MetricValue::Integer(Some(0))
        }
        fn participates_in_training(&self) -> bool {
            false
        }
        fn on_execution_presence(&self, value: &mut MetricValue, was_executed: bool) {
            if let MetricValue::Integer(v) = value {
                *v = Some(if was_executed { 0 } else { v.unwrap_or(0) + 1 });
            }
        }
    }

    struct Rogue;

    impl Metric for Rogue {
        fn column_name(&self) -> &str {
            "rogue"
        }
        fn display_name(&self) -> String {
            "Rogue".into()
        }
        fn kind(&self) -> MetricKind {
            MetricKind::Double
        }
        fn min_display_width(&self) -> usize {
            1
        }
        fn on_uniqueness(&self, value: &mut MetricValue, _score: f64) {
            *value = MetricValue::Text(Some("oops".into()));
        }
    }

    fn metrics() -> Vec<Arc<dyn Metric>> {
        vec![Arc::new(Counter), Arc::new(Rogue)]
    }

    #[test]
    fn fresh_case_has_no_history() {
        let tc = TestCase::new("a", &metrics());
        assert!(!tc.has_history());
        assert_eq!(tc.value("counter"), Some(&MetricValue::Integer(Some(0))));
        assert_eq!(tc.last_result(), None);
    }

    #[test]
    fn update_marks_history() {
        let mut tc = TestCase::new("a", &metrics());
        assert!(tc.update("counter", |m, v| m.on_execution_presence(v, false)));
        assert!(tc.has_history());
        assert!(!tc.update("nope", |_, _| {}));
    }

    #[test]
    fn kind_changes_are_reverted() {
        let mut tc = TestCase::new("a", &metrics());
        tc.update("rogue", |m, v| m.on_uniqueness(v, 1.0));
        assert_eq!(tc.value("rogue"), Some(&MetricValue::Double(None)));
    }

    #[test]
    fn set_value_rejects_wrong_kind() {
        let mut tc = TestCase::new("a", &metrics());
        assert!(tc
            .set_value("counter", MetricValue::Text(Some("1".into())))
            .is_err());
        tc.set_value("counter", MetricValue::Integer(Some(3))).unwrap();
        assert_eq!(tc.value("counter").and_then(|v| v.as_integer()), Some(3));
    }

    #[test]
    fn features_skip_non_training_metrics() {
        let mut tc = TestCase::new("a", &metrics());
        tc.set_value("rogue", MetricValue::Double(Some(0.5))).unwrap();
        assert_eq!(tc.features(), vec![0.5]);
    }

    #[test]
    fn parse_result_names() {
        assert_eq!(TestResult::parse("Passed"), Some(TestResult::Passed));
        assert_eq!(TestResult::parse("fail"), Some(TestResult::Failed));
        assert_eq!(TestResult::parse("skip"), Some(TestResult::Skipped));
        assert_eq!(TestResult::parse("??"), None);
    }

    #[test]
    fn percent_formatting() {
        let r = PrioritizationResult::new("t", 0.4567);
        assert_eq!(r.format_percent(), "45.67 %");
    }
}
