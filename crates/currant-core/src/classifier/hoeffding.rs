//! Hoeffding tree for two classes over numeric attributes.
//!
//! Leaves collect class weights and one Gaussian observer per attribute and
//! class. Every `grace_period` samples a leaf compares its two best candidate
//! splits by information gain; it splits once the Hoeffding bound says the
//! leader will stay the leader. Leaves predict with naive Bayes unless the
//! plain majority class has been more accurate on the samples they saw.

use super::gaussian::GaussianEstimator;
use serde::{Deserialize, Serialize};

pub const NUM_CLASSES: usize = 2;
pub const CLASS_FAIL: usize = 0;
pub const CLASS_PASS: usize = 1;

/// A split is only considered when at least two branches receive more than
/// this fraction of the leaf's weight.
pub const MIN_BRANCH_FRACTION: f64 = 0.01;

type ClassDist = [f64; NUM_CLASSES];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    pub grace_period: f64,
    pub split_confidence: f64,
    pub tie_threshold: f64,
    pub num_split_points: usize,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            grace_period: 200.0,
            split_confidence: 1e-7,
            tie_threshold: 0.05,
            num_split_points: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoeffdingTree {
    params: TreeParams,
    num_attributes: usize,
    root: Node,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
enum Node {
    Split(Box<SplitNode>),
    Leaf(Leaf),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SplitNode {
    attribute: usize,
    threshold: f64,
    left: Node,
    right: Node,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Leaf {
    class_weights: ClassDist,
    observers: Vec<AttributeObserver>,
    weight_at_last_eval: f64,
    mc_correct: f64,
    nb_correct: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct AttributeObserver {
    classes: [ClassObserver; NUM_CLASSES],
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct ClassObserver {
    estimator: GaussianEstimator,
    min: Option<f64>,
    max: Option<f64>,
}

struct SplitCandidate {
    merit: f64,
    test: Option<(usize, f64)>,
    branches: [ClassDist; 2],
}

impl HoeffdingTree {
    pub fn new(num_attributes: usize, params: TreeParams) -> Self {
        Self {
            root: Node::Leaf(Leaf::new(num_attributes, [0.0; NUM_CLASSES])),
            params,
            num_attributes,
        }
    }

    pub fn num_attributes(&self) -> usize {
        self.num_attributes
    }

    pub fn params(&self) -> &TreeParams {
        &self.params
    }

    /// Updates the tree with one sample of weight 1.
    pub fn learn(&mut self, x: &[f64], class: usize) -> anyhow::Result<()> {
        self.check_input(x)?;
        if class >= NUM_CLASSES {
            anyhow::bail!("class index {} out of range", class);
        }
        learn_node(&mut self.root, x, class, &self.params);
        Ok(())
    }

    /// Class probabilities `[fail, pass]` for `x`.
    pub fn predict_proba(&self, x: &[f64]) -> anyhow::Result<[f64; NUM_CLASSES]> {
        self.check_input(x)?;
        let mut node = &self.root;
        loop {
            match node {
                Node::Split(s) => {
                    node = if x[s.attribute] <= s.threshold {
                        &s.left
                    } else {
                        &s.right
                    };
                }
                Node::Leaf(leaf) => return Ok(leaf.predict(x)),
            }
        }
    }

    pub fn num_leaves(&self) -> usize {
        count_leaves(&self.root)
    }

    /// Structural check for a tree read from outside: every split must
    /// address an existing attribute with a finite threshold and every leaf
    /// must carry one observer per attribute.
    pub fn validate(&self) -> anyhow::Result<()> {
        let p = &self.params;
        if !(p.grace_period.is_finite() && p.grace_period > 0.0) || p.num_split_points == 0 {
            anyhow::bail!("invalid tree parameters {:?}", p);
        }
        validate_node(&self.root, self.num_attributes)
    }

    fn check_input(&self, x: &[f64]) -> anyhow::Result<()> {
        if x.len() != self.num_attributes {
            anyhow::bail!(
                "feature vector has {} values, model expects {}",
                x.len(),
                self.num_attributes
            );
        }
        if let Some(i) = x.iter().position(|v| !v.is_finite()) {
            anyhow::bail!("feature {} is not finite", i);
        }
        Ok(())
    }
}

fn count_leaves(node: &Node) -> usize {
    match node {
        Node::Split(s) => count_leaves(&s.left) + count_leaves(&s.right),
        Node::Leaf(_) => 1,
    }
}

fn validate_node(node: &Node, num_attributes: usize) -> anyhow::Result<()> {
    match node {
        Node::Split(s) => {
            if s.attribute >= num_attributes {
                anyhow::bail!(
                    "split on attribute {} but tree has {} attributes",
                    s.attribute,
                    num_attributes
                );
            }
            if !s.threshold.is_finite() {
                anyhow::bail!("split threshold on attribute {} is not finite", s.attribute);
            }
            validate_node(&s.left, num_attributes)?;
            validate_node(&s.right, num_attributes)
        }
        Node::Leaf(leaf) => {
            if leaf.observers.len() != num_attributes {
                anyhow::bail!(
                    "leaf has {} observers, tree has {} attributes",
                    leaf.observers.len(),
                    num_attributes
                );
            }
            if leaf.class_weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
                anyhow::bail!("leaf class weights {:?} are invalid", leaf.class_weights);
            }
            Ok(())
        }
    }
}

fn learn_node(node: &mut Node, x: &[f64], class: usize, params: &TreeParams) {
    match node {
        Node::Split(s) => {
            let child = if x[s.attribute] <= s.threshold {
                &mut s.left
            } else {
                &mut s.right
            };
            learn_node(child, x, class, params);
        }
        Node::Leaf(leaf) => {
            leaf.learn(x, class);
            if let Some(replacement) = leaf.attempt_split(params) {
                *node = replacement;
            }
        }
    }
}

impl Leaf {
    fn new(num_attributes: usize, class_weights: ClassDist) -> Self {
        Self {
            class_weights,
            observers: vec![AttributeObserver::default(); num_attributes],
            weight_at_last_eval: class_weights.iter().sum(),
            mc_correct: 0.0,
            nb_correct: 0.0,
        }
    }

    fn total_weight(&self) -> f64 {
        self.class_weights.iter().sum()
    }

    fn learn(&mut self, x: &[f64], class: usize) {
        if argmax(&self.majority_class()) == class {
            self.mc_correct += 1.0;
        }
        if argmax(&self.naive_bayes(x)) == class {
            self.nb_correct += 1.0;
        }

        self.class_weights[class] += 1.0;
        for (obs, &v) in self.observers.iter_mut().zip(x) {
            obs.observe(v, class, 1.0);
        }
    }

    fn predict(&self, x: &[f64]) -> ClassDist {
        if self.mc_correct > self.nb_correct {
            self.majority_class()
        } else {
            self.naive_bayes(x)
        }
    }

    fn majority_class(&self) -> ClassDist {
        normalize(self.class_weights)
    }

    fn naive_bayes(&self, x: &[f64]) -> ClassDist {
        let total = self.total_weight();
        if total <= 0.0 {
            return [1.0 / NUM_CLASSES as f64; NUM_CLASSES];
        }
        let mut log_votes = [f64::NEG_INFINITY; NUM_CLASSES];
        for (c, vote) in log_votes.iter_mut().enumerate() {
            if self.class_weights[c] <= 0.0 {
                continue;
            }
            let mut lv = (self.class_weights[c] / total).ln();
            for (obs, &v) in self.observers.iter().zip(x) {
                let est = &obs.classes[c].estimator;
                if est.weight() > 0.0 {
                    lv += est.log_density(v);
                }
            }
            *vote = lv;
        }
        softmax(log_votes)
    }

    fn is_pure(&self) -> bool {
        self.class_weights.iter().filter(|w| **w > 0.0).count() < 2
    }

    fn attempt_split(&mut self, params: &TreeParams) -> Option<Node> {
        let total = self.total_weight();
        if total - self.weight_at_last_eval < params.grace_period {
            return None;
        }
        self.weight_at_last_eval = total;
        if self.is_pure() {
            return None;
        }

        let pre = self.class_weights;
        let mut candidates = vec![SplitCandidate {
            merit: 0.0,
            test: None,
            branches: [pre, [0.0; NUM_CLASSES]],
        }];
        for (i, obs) in self.observers.iter().enumerate() {
            if let Some(c) = obs.best_split(i, &pre, params.num_split_points) {
                candidates.push(c);
            }
        }
        if candidates.len() < 2 {
            return None;
        }
        candidates.sort_by(|a, b| a.merit.total_cmp(&b.merit));

        let best = &candidates[candidates.len() - 1];
        let second = &candidates[candidates.len() - 2];
        let bound = hoeffding_bound(1.0, params.split_confidence, total);
        let decided = best.merit - second.merit > bound || bound < params.tie_threshold;
        let (attribute, threshold) = best.test?;
        if !decided || best.merit <= 0.0 {
            return None;
        }

        tracing::debug!(
            event = "currant.model.split",
            attribute,
            threshold,
            merit = best.merit,
            weight = total,
            "leaf split"
        );
        let n = self.observers.len();
        Some(Node::Split(Box::new(SplitNode {
            attribute,
            threshold,
            left: Node::Leaf(Leaf::new(n, best.branches[0])),
            right: Node::Leaf(Leaf::new(n, best.branches[1])),
        })))
    }
}

impl AttributeObserver {
    fn observe(&mut self, value: f64, class: usize, weight: f64) {
        let co = &mut self.classes[class];
        co.estimator.add(value, weight);
        co.min = Some(co.min.map_or(value, |m| m.min(value)));
        co.max = Some(co.max.map_or(value, |m| m.max(value)));
    }

    fn range(&self) -> Option<(f64, f64)> {
        let min = self.classes.iter().filter_map(|c| c.min).reduce(f64::min)?;
        let max = self.classes.iter().filter_map(|c| c.max).reduce(f64::max)?;
        Some((min, max))
    }

    /// Class weights on each side of `threshold` (`<=` left, `>` right).
    fn branch_weights(&self, threshold: f64) -> [ClassDist; 2] {
        let mut left = [0.0; NUM_CLASSES];
        let mut right = [0.0; NUM_CLASSES];
        for (c, co) in self.classes.iter().enumerate() {
            let w = co.estimator.weight();
            if w <= 0.0 {
                continue;
            }
            let below = match (co.min, co.max) {
                (Some(min), _) if threshold < min => 0.0,
                (_, Some(max)) if threshold >= max => w,
                _ => co.estimator.weight_at_or_below(threshold),
            };
            left[c] = below;
            right[c] = w - below;
        }
        [left, right]
    }

    fn best_split(
        &self,
        attribute: usize,
        pre: &ClassDist,
        num_points: usize,
    ) -> Option<SplitCandidate> {
        let (min, max) = self.range()?;
        if max <= min {
            return None;
        }
        let mut best: Option<SplitCandidate> = None;
        for i in 1..=num_points {
            let threshold = min + (max - min) * i as f64 / (num_points + 1) as f64;
            let branches = self.branch_weights(threshold);
            let Some(merit) = info_gain(pre, &branches) else {
                continue;
            };
            if best.as_ref().map_or(true, |b| merit > b.merit) {
                best = Some(SplitCandidate {
                    merit,
                    test: Some((attribute, threshold)),
                    branches,
                });
            }
        }
        best
    }
}

pub fn hoeffding_bound(range: f64, confidence: f64, n: f64) -> f64 {
    ((range * range * (1.0 / confidence).ln()) / (2.0 * n)).sqrt()
}

fn entropy(dist: &[f64]) -> f64 {
    let total: f64 = dist.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    dist.iter()
        .filter(|w| **w > 0.0)
        .map(|w| {
            let p = w / total;
            -p * p.log2()
        })
        .sum()
}

/// Information gain of `post` over `pre`, `None` when fewer than two
/// branches carry a meaningful share of the weight.
fn info_gain(pre: &ClassDist, post: &[ClassDist]) -> Option<f64> {
    let weights: Vec<f64> = post.iter().map(|d| d.iter().sum()).collect();
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return None;
    }
    let populated = weights
        .iter()
        .filter(|w| **w / total > MIN_BRANCH_FRACTION)
        .count();
    if populated < 2 {
        return None;
    }
    let post_entropy: f64 = post
        .iter()
        .zip(&weights)
        .map(|(d, w)| (w / total) * entropy(d))
        .sum();
    Some(entropy(pre) - post_entropy)
}

fn normalize(dist: ClassDist) -> ClassDist {
    let total: f64 = dist.iter().sum();
    if total <= 0.0 {
        return [1.0 / NUM_CLASSES as f64; NUM_CLASSES];
    }
    dist.map(|w| w / total)
}

fn softmax(log_votes: ClassDist) -> ClassDist {
    let max = log_votes.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return [1.0 / NUM_CLASSES as f64; NUM_CLASSES];
    }
    normalize(log_votes.map(|lv| (lv - max).exp()))
}

/// Index of the largest entry; the first one wins ties.
fn argmax(dist: &ClassDist) -> usize {
    let mut best = 0;
    for (i, v) in dist.iter().enumerate() {
        if *v > dist[best] {
            best = i;
        }
    }
    best
}
