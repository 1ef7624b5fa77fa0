use crate::classifier::{FailurePredictor, TrainSummary, UNKNOWN_PROBABILITY};
use crate::config::EngineConfig;
use crate::handlers::{
    Handlers, LastResultHandler, MissingCounterHandler, TestCaseHandler, TestsetHandler,
};
use crate::metrics_api::Metric;
use crate::model::{PrioritizationResult, TestCase, TestOutcome, TestResult};
use crate::report::console::format_metrics_table;
use crate::storage::Store;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// One open prioritization session over one store.
///
/// Event methods never fail: store and model problems are logged and the
/// call degrades to doing less. Callers running tests concurrently must
/// serialize access (`&mut self` already enforces this within one process).
pub struct Engine {
    config: EngineConfig,
    store: Store,
    metrics: Vec<Arc<dyn Metric>>,
    test_case_handlers: Vec<Box<dyn TestCaseHandler>>,
    testset_handlers: Vec<Box<dyn TestsetHandler>>,
}

impl Engine {
    /// Opens (creating if needed) the store at `config.db_path`. The
    /// built-in last-result and missing-counter handlers run before
    /// `handlers`.
    pub fn open(config: EngineConfig, handlers: Handlers) -> anyhow::Result<Self> {
        let (tc_handlers, ts_handlers, metrics) = assemble(&config, handlers);
        let store = Store::open(&config.db_path, metrics.clone())?;
        Self::with_store(config, store, tc_handlers, ts_handlers, metrics)
    }

    /// Same as [`Engine::open`] over an in-memory store.
    pub fn open_in_memory(config: EngineConfig, handlers: Handlers) -> anyhow::Result<Self> {
        let (tc_handlers, ts_handlers, metrics) = assemble(&config, handlers);
        let store = Store::memory(metrics.clone())?;
        Self::with_store(config, store, tc_handlers, ts_handlers, metrics)
    }

    fn with_store(
        config: EngineConfig,
        store: Store,
        test_case_handlers: Vec<Box<dyn TestCaseHandler>>,
        testset_handlers: Vec<Box<dyn TestsetHandler>>,
        metrics: Vec<Arc<dyn Metric>>,
    ) -> anyhow::Result<Self> {
        store.init_schema()?;
        tracing::debug!(
            event = "currant.engine.open",
            db = %config.db_path.display(),
            metrics = metrics.len(),
            "engine opened"
        );
        Ok(Self {
            config,
            store,
            metrics,
            test_case_handlers,
            testset_handlers,
        })
    }

    /// Ends the session. Dropping the engine has the same effect.
    pub fn close(self) {
        tracing::debug!(event = "currant.engine.close", "engine closed");
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Registered metrics in column order.
    pub fn metrics(&self) -> &[Arc<dyn Metric>] {
        &self.metrics
    }

    pub fn test_started(&mut self, name: &str) {
        let Some(mut tc) = self.load(name) else {
            return;
        };
        for h in self.test_case_handlers.iter_mut() {
            h.on_test_started(&mut tc);
        }
        self.persist(&tc);
    }

    pub fn test_finished(&mut self, name: &str, result: TestResult, duration: Duration) {
        self.test_finished_with(name, &TestOutcome::new(result, duration));
    }

    pub fn test_finished_with(&mut self, name: &str, outcome: &TestOutcome) {
        let Some(mut tc) = self.load(name) else {
            return;
        };
        for h in self.test_case_handlers.iter_mut() {
            h.on_test_finished(&mut tc, outcome);
        }
        self.persist(&tc);
    }

    /// Registers every roster name, runs the batch hooks, then the per-test
    /// hooks over every stored test case.
    pub fn testset_started(&mut self, all: &[String]) {
        for name in all {
            self.load(name);
        }
        for h in self.testset_handlers.iter_mut() {
            h.on_testset_started_batch(all);
        }
        for mut tc in self.stored_cases() {
            let mut dirty = false;
            for h in self.testset_handlers.iter_mut() {
                dirty |= h.on_testset_started(&mut tc, all);
            }
            if dirty {
                self.persist(&tc);
            }
        }
    }

    pub fn testset_finished(&mut self, all: &[String], executed: &[String]) {
        for mut tc in self.stored_cases() {
            let mut dirty = false;
            for h in self.testset_handlers.iter_mut() {
                dirty |= h.on_testset_finished(&mut tc, all, executed);
            }
            if dirty {
                self.persist(&tc);
            }
        }
    }

    /// Orders `names` for execution: tests without history first in input
    /// order, then known tests by descending failure probability. Ties keep
    /// input order.
    pub fn prioritize<S: AsRef<str>>(&self, names: &[S]) -> Vec<PrioritizationResult> {
        let stored: HashMap<String, TestCase> = self
            .stored_cases()
            .into_iter()
            .map(|tc| (tc.name().to_string(), tc))
            .collect();

        let mut ordered = Vec::with_capacity(names.len());
        let mut known = Vec::new();
        for name in names {
            let name = name.as_ref();
            match stored.get(name) {
                Some(tc) if tc.has_history() => known.push(tc.clone()),
                _ => ordered.push(PrioritizationResult::new(name, UNKNOWN_PROBABILITY)),
            }
        }
        if known.is_empty() {
            return ordered;
        }

        let probs = FailurePredictor::load(&self.store).predict(&known);
        let mut ranked: Vec<PrioritizationResult> = known
            .iter()
            .map(|tc| {
                let p = probs
                    .get(tc.name())
                    .copied()
                    .unwrap_or(UNKNOWN_PROBABILITY);
                PrioritizationResult::new(tc.name(), p)
            })
            .collect();
        // stable: equal probabilities keep their input order
        ranked.sort_by(|a, b| b.failure_probability.total_cmp(&a.failure_probability));

        tracing::debug!(
            event = "currant.prioritize",
            new = ordered.len(),
            known = ranked.len(),
            "prioritized testset"
        );
        ordered.extend(ranked);
        ordered
    }

    /// Drops deletable test cases, then trains the model on everything left
    /// in the store and persists it.
    pub fn train(&mut self) -> TrainSummary {
        match self.store.delete_eligible() {
            Ok(removed) => {
                for name in removed {
                    tracing::info!(
                        event = "currant.store.deleted",
                        test = %name,
                        "removed stale test case"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    event = "currant.store.delete_failed",
                    error = %e,
                    "could not remove stale test cases"
                );
            }
        }

        let cases = self.stored_cases();
        let mut predictor = FailurePredictor::load(&self.store);
        let summary = predictor.train(&cases);
        if summary.accepted == 0 {
            return summary;
        }
        if let Err(e) = predictor.save(&self.store) {
            tracing::warn!(
                event = "currant.model.save_failed",
                error = %e,
                "trained model could not be stored"
            );
        }
        tracing::info!(
            event = "currant.model.trained",
            samples = summary.accepted,
            rejected = summary.rejected,
            fresh = summary.fresh,
            "model trained"
        );
        summary
    }

    /// Table of every stored test case and its metric values.
    pub fn dump_metrics(&self) -> String {
        format_metrics_table(&self.metrics, &self.stored_cases())
    }

    /// Wipes all test cases and the model.
    pub fn reset(&self) -> anyhow::Result<()> {
        self.store.reset()?;
        tracing::info!(event = "currant.store.reset", "store reset");
        Ok(())
    }

    fn load(&self, name: &str) -> Option<TestCase> {
        match self.store.get_or_create(name) {
            Ok(tc) => Some(tc),
            Err(e) => {
                tracing::warn!(
                    event = "currant.store.read_failed",
                    test = %name,
                    error = %e,
                    "could not load test case"
                );
                None
            }
        }
    }

    fn stored_cases(&self) -> Vec<TestCase> {
        self.store.list_all().unwrap_or_else(|e| {
            tracing::warn!(
                event = "currant.store.list_failed",
                error = %e,
                "could not list test cases"
            );
            Vec::new()
        })
    }

    fn persist(&self, tc: &TestCase) {
        if let Err(e) = self.store.update_all(tc) {
            tracing::warn!(
                event = "currant.store.write_failed",
                test = %tc.name(),
                error = %e,
                "could not write test case"
            );
        }
    }
}

type Assembled = (
    Vec<Box<dyn TestCaseHandler>>,
    Vec<Box<dyn TestsetHandler>>,
    Vec<Arc<dyn Metric>>,
);

fn assemble(config: &EngineConfig, handlers: Handlers) -> Assembled {
    let mut tc_handlers: Vec<Box<dyn TestCaseHandler>> = vec![Box::new(LastResultHandler::new())];
    tc_handlers.extend(handlers.test_case);
    let mut ts_handlers: Vec<Box<dyn TestsetHandler>> =
        vec![Box::new(MissingCounterHandler::new(config.max_missing))];
    ts_handlers.extend(handlers.testset);

    let mut metrics = Vec::new();
    for h in &tc_handlers {
        metrics.extend(h.metrics());
    }
    for h in &ts_handlers {
        metrics.extend(h.metrics());
    }
    (tc_handlers, ts_handlers, metrics)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        Engine::open_in_memory(EngineConfig::default(), Handlers::new()).unwrap()
    }

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn builtin_metrics_are_registered_in_order() {
        let e = engine();
        let cols: Vec<&str> = e.metrics().iter().map(|m| m.column_name()).collect();
        assert_eq!(cols, vec!["lastresult", "missing"]);
    }

    #[test]
    fn started_registers_without_history() {
        let mut e = engine();
        e.test_started("a");
        assert_eq!(e.store().names().unwrap(), vec!["a"]);
        let out = e.prioritize(&["a"]);
        assert_eq!(out, vec![PrioritizationResult::new("a", 1.0)]);
    }

    #[test]
    fn testset_finished_counts_missing_tests() {
        let mut e = engine();
        let all = names(&["a", "b"]);
        e.testset_started(&all);
        e.testset_finished(&all, &names(&["a"]));
        let b = e.store().get("b").unwrap().unwrap();
        assert_eq!(b.value("missing").and_then(|v| v.as_integer()), Some(1));
        let a = e.store().get("a").unwrap().unwrap();
        assert_eq!(a.value("missing").and_then(|v| v.as_integer()), Some(0));
    }

    #[test]
    fn known_untrained_tests_keep_input_order() {
        let mut e = engine();
        e.test_finished("b", TestResult::Passed, Duration::ZERO);
        e.test_finished("a", TestResult::Failed, Duration::ZERO);
        let out = e.prioritize(&["b", "a", "c"]);
        let order: Vec<&str> = out.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(order, vec!["c", "b", "a"]);
        assert!(out.iter().all(|r| r.failure_probability == 1.0));
    }

    #[test]
    fn train_on_empty_store_is_noop() {
        let mut e = engine();
        assert_eq!(e.train(), TrainSummary::default());
        assert!(!FailurePredictor::load(e.store()).is_trained());
    }

    #[test]
    fn dump_lists_stored_tests() {
        let mut e = engine();
        e.test_finished("testAdd", TestResult::Failed, Duration::ZERO);
        let dump = e.dump_metrics();
        assert!(dump.contains("Name of testcase"));
        assert!(dump.contains("testAdd"));
    }

    #[test]
    fn reset_forgets_everything() {
        let mut e = engine();
        e.test_finished("a", TestResult::Passed, Duration::ZERO);
        e.train();
        e.reset().unwrap();
        assert_eq!(e.store().count().unwrap(), 0);
        assert!(!FailurePredictor::load(e.store()).is_trained());
    }
}
