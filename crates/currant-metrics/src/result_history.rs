use currant_core::handlers::{apply_hook, TestCaseHandler};
use currant_core::metrics_api::{Metric, MetricKind, MetricValue};
use currant_core::model::{TestCase, TestOutcome, TestResult};
use std::sync::Arc;

/// Weight of the newest result in the recency score.
pub const LEARNING_RATE: f64 = 0.7;

/// The last `depth` pass/fail results, oldest first, as `"0,1,1"`.
pub struct ResultHistoryMetric {
    depth: usize,
    column: String,
}

impl ResultHistoryMetric {
    pub fn new(depth: usize) -> Self {
        let depth = depth.max(1);
        Self {
            depth,
            column: format!("history_{}", depth),
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl Metric for ResultHistoryMetric {
    fn column_name(&self) -> &str {
        &self.column
    }

    fn display_name(&self) -> String {
        format!("Last {} results", self.depth)
    }

    fn kind(&self) -> MetricKind {
        MetricKind::Text
    }

    fn min_display_width(&self) -> usize {
        2 * self.depth - 1
    }

    fn numeric_projection(&self, value: &MetricValue) -> f64 {
        recency_score(&parse_history(value.as_text().unwrap_or_default()))
    }

    fn on_result(&self, value: &mut MetricValue, result: TestResult) {
        let bit = match result {
            TestResult::Passed => 0,
            TestResult::Failed => 1,
            TestResult::Skipped => return,
        };
        let mut history = parse_history(value.as_text().unwrap_or_default());
        history.push(bit);
        if history.len() > self.depth {
            history.drain(..history.len() - self.depth);
        }
        *value = MetricValue::Text(Some(format_history(&history)));
    }
}

/// Failure bits of a stored history string. Blank and unparsable entries are
/// dropped.
pub fn parse_history(s: &str) -> Vec<u8> {
    s.split(',')
        .filter_map(|t| match t.trim() {
            "0" => Some(0),
            "1" => Some(1),
            _ => None,
        })
        .collect()
}

pub fn format_history(bits: &[u8]) -> String {
    bits.iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// `r <- r + 0.7 * f - 0.3 * r` over the bits, oldest to newest. Recent
/// failures weigh more than old ones.
pub fn recency_score(bits: &[u8]) -> f64 {
    bits.iter().fold(0.0, |r, &f| {
        r + LEARNING_RATE * f64::from(f) - (1.0 - LEARNING_RATE) * r
    })
}

/// Keeps one history column per configured depth.
pub struct ResultHistoryHandler {
    metrics: Vec<Arc<dyn Metric>>,
}

impl ResultHistoryHandler {
    pub fn new(depths: &[usize]) -> Self {
        Self {
            metrics: depths
                .iter()
                .map(|d| Arc::new(ResultHistoryMetric::new(*d)) as Arc<dyn Metric>)
                .collect(),
        }
    }
}

impl Default for ResultHistoryHandler {
    fn default() -> Self {
        Self::new(&[3, 10])
    }
}

impl TestCaseHandler for ResultHistoryHandler {
    fn metrics(&self) -> Vec<Arc<dyn Metric>> {
        self.metrics.clone()
    }

    fn on_test_finished(&mut self, tc: &mut TestCase, outcome: &TestOutcome) {
        for m in &self.metrics {
            apply_hook(tc, m.as_ref(), |m, v| m.on_result(v, outcome.result));
        }
    }
}
