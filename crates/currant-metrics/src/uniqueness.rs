use currant_core::handlers::{apply_hook, TestsetHandler};
use currant_core::metrics_api::{Metric, MetricKind, MetricValue};
use currant_core::model::TestCase;
use currant_core::uniqueness::uniqueness_scores;
use std::collections::HashMap;
use std::sync::Arc;

pub struct UniquenessMetric;

impl Metric for UniquenessMetric {
    fn column_name(&self) -> &str {
        "uniqueness"
    }

    fn display_name(&self) -> String {
        "Uniqueness".to_string()
    }

    fn kind(&self) -> MetricKind {
        MetricKind::Double
    }

    fn min_display_width(&self) -> usize {
        10
    }

    fn on_uniqueness(&self, value: &mut MetricValue, score: f64) {
        *value = MetricValue::Double(Some(score));
    }
}

/// Scores the roster once per testset and writes the score of every roster
/// member. Stored tests outside the roster keep their previous score.
pub struct UniquenessHandler {
    metric: Arc<dyn Metric>,
    scores: HashMap<String, f64>,
}

impl UniquenessHandler {
    pub fn new() -> Self {
        Self {
            metric: Arc::new(UniquenessMetric),
            scores: HashMap::new(),
        }
    }
}

impl Default for UniquenessHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl TestsetHandler for UniquenessHandler {
    fn metrics(&self) -> Vec<Arc<dyn Metric>> {
        vec![Arc::clone(&self.metric)]
    }

    fn on_testset_started_batch(&mut self, all: &[String]) {
        self.scores = uniqueness_scores(all);
        tracing::debug!(
            event = "currant.uniqueness.scored",
            names = self.scores.len(),
            "computed uniqueness scores"
        );
    }

    fn on_testset_started(&mut self, tc: &mut TestCase, _all: &[String]) -> bool {
        let Some(score) = self.scores.get(tc.name()).copied() else {
            return false;
        };
        apply_hook(tc, self.metric.as_ref(), |m, v| m.on_uniqueness(v, score))
    }
}
