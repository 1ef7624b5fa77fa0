use currant_core::handlers::{apply_hook, TestCaseHandler};
use currant_core::metrics_api::{Metric, MetricKind, MetricValue};
use currant_core::model::{CoverageCounters, TestCase, TestOutcome};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageCounter {
    Instructions,
    Branches,
    Complexity,
}

/// One covered-item counter reported by the coverage instrumentation.
pub struct CoverageMetric {
    counter: CoverageCounter,
}

impl CoverageMetric {
    pub fn new(counter: CoverageCounter) -> Self {
        Self { counter }
    }
}

impl Metric for CoverageMetric {
    fn column_name(&self) -> &str {
        match self.counter {
            CoverageCounter::Instructions => "instructioncoverage",
            CoverageCounter::Branches => "branchcoverage",
            CoverageCounter::Complexity => "complexitycoverage",
        }
    }

    fn display_name(&self) -> String {
        match self.counter {
            CoverageCounter::Instructions => "covInstr.",
            CoverageCounter::Branches => "covBranch",
            CoverageCounter::Complexity => "covCmplx.",
        }
        .to_string()
    }

    fn kind(&self) -> MetricKind {
        MetricKind::Integer
    }

    fn min_display_width(&self) -> usize {
        10
    }

    fn on_coverage(&self, value: &mut MetricValue, coverage: &CoverageCounters) {
        let n = match self.counter {
            CoverageCounter::Instructions => coverage.instructions,
            CoverageCounter::Branches => coverage.branches,
            CoverageCounter::Complexity => coverage.complexity,
        };
        *value = MetricValue::Integer(Some(n));
    }
}

/// Copies the counters of a finished test into the three coverage columns.
/// Outcomes without counters leave the stored values alone.
pub struct CoverageHandler {
    metrics: Vec<Arc<dyn Metric>>,
}

impl CoverageHandler {
    pub fn new() -> Self {
        Self {
            metrics: vec![
                Arc::new(CoverageMetric::new(CoverageCounter::Instructions)),
                Arc::new(CoverageMetric::new(CoverageCounter::Branches)),
                Arc::new(CoverageMetric::new(CoverageCounter::Complexity)),
            ],
        }
    }
}

impl Default for CoverageHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl TestCaseHandler for CoverageHandler {
    fn metrics(&self) -> Vec<Arc<dyn Metric>> {
        self.metrics.clone()
    }

    fn on_test_finished(&mut self, tc: &mut TestCase, outcome: &TestOutcome) {
        let Some(coverage) = outcome.coverage else {
            return;
        };
        for m in &self.metrics {
            apply_hook(tc, m.as_ref(), |m, v| m.on_coverage(v, &coverage));
        }
    }
}
