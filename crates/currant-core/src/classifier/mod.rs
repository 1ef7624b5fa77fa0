//! Failure-probability model.
//!
//! Wraps a [`HoeffdingTree`] with the metric set it was trained on and
//! moves it in and out of the store as a versioned JSON blob.

use crate::metrics_api::{Metric, MetricKind};
use crate::model::{TestCase, TestResult};
use crate::storage::{Store, MODEL_TAG};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

pub mod gaussian;
pub mod hoeffding;

pub use hoeffding::{HoeffdingTree, TreeParams, CLASS_FAIL, CLASS_PASS};

pub const MODEL_FORMAT_VERSION: u32 = 1;
pub const MODEL_TYPE: &str = "hoeffding_tree";

/// Probability reported for a test the model cannot judge.
pub const UNKNOWN_PROBABILITY: f64 = 1.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ModelEnvelope {
    format_version: u32,
    model_type: String,
    engine_version: String,
    schema_fingerprint: String,
    attributes: Vec<String>,
    trained_at: DateTime<Utc>,
    samples_seen: u64,
    tree: HoeffdingTree,
}

/// Outcome of one [`FailurePredictor::train`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrainSummary {
    pub accepted: usize,
    pub rejected: usize,
    /// True when this call built the tree from scratch.
    pub fresh: bool,
}

pub struct FailurePredictor {
    attributes: Vec<(String, MetricKind)>,
    fingerprint: String,
    tree: Option<HoeffdingTree>,
    samples_seen: u64,
    trained_at: Option<DateTime<Utc>>,
}

impl FailurePredictor {
    /// Untrained predictor over the training metrics of `metrics`.
    pub fn new(metrics: &[Arc<dyn Metric>]) -> Self {
        let attributes: Vec<(String, MetricKind)> = metrics
            .iter()
            .filter(|m| m.participates_in_training())
            .map(|m| (m.training_attribute(), m.kind()))
            .collect();
        let fingerprint = schema_fingerprint(&attributes);
        Self {
            attributes,
            fingerprint,
            tree: None,
            samples_seen: 0,
            trained_at: None,
        }
    }

    /// Predictor restored from the store's model slot. Anything unreadable
    /// leaves it untrained.
    pub fn load(store: &Store) -> Self {
        let mut p = Self::new(store.metrics());
        match store.model_get(MODEL_TAG) {
            Ok(Some(bytes)) => {
                if let Err(e) = p.restore(&bytes) {
                    tracing::warn!(
                        event = "currant.model.load_failed",
                        error = %e,
                        "stored model is unusable; starting untrained"
                    );
                }
            }
            Ok(None) => {
                tracing::debug!(event = "currant.model.absent", "no stored model");
            }
            Err(e) => {
                tracing::warn!(
                    event = "currant.model.read_failed",
                    error = %e,
                    "could not read model from store"
                );
            }
        }
        p
    }

    /// Writes the current model to the store. An untrained predictor writes
    /// nothing.
    pub fn save(&self, store: &Store) -> anyhow::Result<()> {
        if let Some(bytes) = self.to_blob()? {
            store.model_put(MODEL_TAG, &bytes)?;
        }
        Ok(())
    }

    pub fn is_trained(&self) -> bool {
        self.tree.is_some()
    }

    pub fn samples_seen(&self) -> u64 {
        self.samples_seen
    }

    pub fn trained_at(&self) -> Option<DateTime<Utc>> {
        self.trained_at
    }

    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(|(a, _)| a.as_str())
    }

    pub fn to_blob(&self) -> anyhow::Result<Option<Vec<u8>>> {
        let (Some(tree), Some(trained_at)) = (&self.tree, self.trained_at) else {
            return Ok(None);
        };
        let env = ModelEnvelope {
            format_version: MODEL_FORMAT_VERSION,
            model_type: MODEL_TYPE.to_string(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            schema_fingerprint: self.fingerprint.clone(),
            attributes: self.attributes().map(str::to_string).collect(),
            trained_at,
            samples_seen: self.samples_seen,
            tree: tree.clone(),
        };
        Ok(Some(serde_json::to_vec(&env)?))
    }

    /// Replaces the model with the one in `bytes` after checking it was
    /// written for the same format and metric set.
    pub fn restore(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        let env: ModelEnvelope = serde_json::from_slice(bytes)?;
        if env.format_version != MODEL_FORMAT_VERSION {
            anyhow::bail!(
                "model format version {} (expected {})",
                env.format_version,
                MODEL_FORMAT_VERSION
            );
        }
        if env.model_type != MODEL_TYPE {
            anyhow::bail!("model type '{}' (expected '{}')", env.model_type, MODEL_TYPE);
        }
        if env.schema_fingerprint != self.fingerprint {
            anyhow::bail!(
                "model was trained on attributes {:?}; registered metrics changed",
                env.attributes
            );
        }
        if env.tree.num_attributes() != self.attributes.len() {
            anyhow::bail!(
                "model tree expects {} attributes, metric set has {}",
                env.tree.num_attributes(),
                self.attributes.len()
            );
        }
        env.tree.validate()?;
        self.tree = Some(env.tree);
        self.samples_seen = env.samples_seen;
        self.trained_at = Some(env.trained_at);
        Ok(())
    }

    /// Builds the tree from `cases` when untrained, otherwise feeds them to
    /// the existing tree one at a time. Samples that do not fit are logged
    /// and skipped.
    pub fn train(&mut self, cases: &[TestCase]) -> TrainSummary {
        let mut summary = TrainSummary::default();
        if cases.is_empty() {
            return summary;
        }
        let n = self.attributes.len();
        let tree = self.tree.get_or_insert_with(|| {
            summary.fresh = true;
            HoeffdingTree::new(n, TreeParams::default())
        });

        for tc in cases {
            match tree.learn(&tc.features(), label(tc)) {
                Ok(()) => summary.accepted += 1,
                Err(e) => {
                    summary.rejected += 1;
                    tracing::warn!(
                        event = "currant.model.sample_rejected",
                        test = %tc.name(),
                        error = %e,
                        "skipping training sample"
                    );
                }
            }
        }
        self.samples_seen += summary.accepted as u64;
        self.trained_at = Some(Utc::now());
        summary
    }

    /// Failure probability per test name. Every name maps to
    /// [`UNKNOWN_PROBABILITY`] while untrained or when its sample cannot be
    /// evaluated.
    pub fn predict(&self, cases: &[TestCase]) -> HashMap<String, f64> {
        let mut out: HashMap<String, f64> = cases
            .iter()
            .map(|tc| (tc.name().to_string(), UNKNOWN_PROBABILITY))
            .collect();
        if cases.is_empty() {
            return out;
        }
        let Some(tree) = &self.tree else {
            tracing::warn!(
                event = "currant.model.untrained",
                tests = cases.len(),
                "no trained model yet; every known test gets probability 1.0"
            );
            return out;
        };

        for tc in cases {
            match tree.predict_proba(&tc.features()) {
                Ok(dist) => {
                    out.insert(tc.name().to_string(), dist[CLASS_FAIL].clamp(0.0, 1.0));
                }
                Err(e) => {
                    tracing::warn!(
                        event = "currant.model.predict_failed",
                        test = %tc.name(),
                        error = %e,
                        "prediction failed; keeping probability 1.0"
                    );
                }
            }
        }
        out
    }
}

/// Training label: pass only when the last recorded result was a pass.
/// Never-executed tests count as failing.
pub fn label(tc: &TestCase) -> usize {
    match tc.last_result() {
        Some(TestResult::Passed) => CLASS_PASS,
        _ => CLASS_FAIL,
    }
}

fn schema_fingerprint(attributes: &[(String, MetricKind)]) -> String {
    let mut h = Sha256::new();
    for (name, kind) in attributes {
        h.update(name.as_bytes());
        h.update(b"\t");
        h.update(kind.as_str().as_bytes());
        h.update(b"\n");
    }
    format!("{:x}", h.finalize())
}
