use currant_core::config::EngineConfig;
use currant_core::handlers::Handlers;
use currant_core::model::TestResult;
use currant_core::storage::MODEL_TAG;
use currant_core::Engine;
use std::time::Duration;
use tempfile::tempdir;

fn names(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

fn order(results: &[currant_core::model::PrioritizationResult]) -> Vec<&str> {
    results.iter().map(|r| r.name.as_str()).collect()
}

#[test]
fn add_subtract_login_scenario() -> anyhow::Result<()> {
    let mut engine = Engine::open_in_memory(EngineConfig::default(), Handlers::new())?;
    let roster = ["testAdd", "testSubtract", "testLogin"];

    let fresh = engine.prioritize(&roster);
    assert_eq!(order(&fresh), roster.to_vec());
    assert!(fresh.iter().all(|r| r.failure_probability == 1.0));

    for _ in 0..5 {
        engine.test_finished("testAdd", TestResult::Passed, Duration::from_millis(3));
        engine.test_finished("testSubtract", TestResult::Failed, Duration::from_millis(4));
        engine.train();
    }

    let ranked = engine.prioritize(&roster);
    assert_eq!(order(&ranked), vec!["testLogin", "testSubtract", "testAdd"]);
    assert_eq!(ranked[0].failure_probability, 1.0);
    assert!(ranked[1].failure_probability > ranked[2].failure_probability);
    Ok(())
}

#[test]
fn new_tests_keep_input_order_before_known_ones() -> anyhow::Result<()> {
    let mut engine = Engine::open_in_memory(EngineConfig::default(), Handlers::new())?;
    engine.test_finished("known", TestResult::Failed, Duration::ZERO);
    engine.train();
    // registered but never run: still new
    engine.test_started("registered");

    let out = engine.prioritize(&["z", "known", "registered", "a"]);
    assert_eq!(order(&out), vec!["z", "registered", "a", "known"]);
    Ok(())
}

#[test]
fn equal_probabilities_keep_input_order() -> anyhow::Result<()> {
    let mut engine = Engine::open_in_memory(EngineConfig::default(), Handlers::new())?;
    for _ in 0..3 {
        engine.test_finished("first", TestResult::Passed, Duration::ZERO);
        engine.test_finished("second", TestResult::Passed, Duration::ZERO);
        engine.train();
    }

    let ab = engine.prioritize(&["first", "second"]);
    let ba = engine.prioritize(&["second", "first"]);
    assert_eq!(ab[0].failure_probability, ab[1].failure_probability);
    assert_eq!(order(&ab), vec!["first", "second"]);
    assert_eq!(order(&ba), vec!["second", "first"]);
    Ok(())
}

#[test]
fn stale_tests_are_deleted_before_training() -> anyhow::Result<()> {
    let config = EngineConfig::default().with_max_missing(2);
    let mut engine = Engine::open_in_memory(config, Handlers::new())?;

    let both = names(&["kept", "gone"]);
    engine.testset_started(&both);
    engine.test_finished("kept", TestResult::Passed, Duration::ZERO);
    engine.test_finished("gone", TestResult::Failed, Duration::ZERO);
    engine.testset_finished(&both, &both);

    let only_kept = names(&["kept"]);
    for _ in 0..3 {
        engine.testset_started(&only_kept);
        engine.testset_finished(&only_kept, &only_kept);
    }

    let summary = engine.train();
    assert_eq!(summary.accepted, 1);
    assert_eq!(engine.store().names()?, vec!["kept"]);
    Ok(())
}

#[test]
fn disabled_deletion_keeps_everything() -> anyhow::Result<()> {
    let config = EngineConfig::default().with_max_missing(0);
    let mut engine = Engine::open_in_memory(config, Handlers::new())?;
    let all = names(&["a", "b"]);
    engine.testset_started(&all);
    for _ in 0..20 {
        engine.testset_finished(&all, &[]);
    }
    engine.train();
    assert_eq!(engine.store().count()?, 2);
    Ok(())
}

#[test]
fn model_survives_reopen() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let config = EngineConfig::default().with_db_path(dir.path().join("currant.db"));
    let roster = ["ok", "flaky", "broken"];

    let mut engine = Engine::open(config.clone(), Handlers::new())?;
    for i in 0..4 {
        engine.test_finished("ok", TestResult::Passed, Duration::ZERO);
        let flaky = if i % 2 == 0 { TestResult::Failed } else { TestResult::Passed };
        engine.test_finished("flaky", flaky, Duration::ZERO);
        engine.test_finished("broken", TestResult::Failed, Duration::ZERO);
        engine.train();
    }
    let before = engine.prioritize(&roster);
    engine.close();

    let reopened = Engine::open(config, Handlers::new())?;
    assert_eq!(reopened.prioritize(&roster), before);
    Ok(())
}

#[test]
fn malformed_stored_model_degrades_to_untrained() -> anyhow::Result<()> {
    let mut engine = Engine::open_in_memory(EngineConfig::default(), Handlers::new())?;
    engine.test_finished("a", TestResult::Passed, Duration::ZERO);
    engine.test_finished("b", TestResult::Failed, Duration::ZERO);
    engine.train();

    let blob = engine.store().model_get(MODEL_TAG)?.expect("model stored");
    let mut env: serde_json::Value = serde_json::from_slice(&blob)?;
    let leaf = env["tree"]["root"].clone();
    env["tree"]["root"] = serde_json::json!({
        "node": "split",
        "attribute": 99,
        "threshold": 0.5,
        "left": leaf.clone(),
        "right": leaf,
    });
    engine
        .store()
        .model_put(MODEL_TAG, &serde_json::to_vec(&env)?)?;

    let out = engine.prioritize(&["a", "b"]);
    assert_eq!(order(&out), vec!["a", "b"]);
    assert!(out.iter().all(|r| r.failure_probability == 1.0));

    let summary = engine.train();
    assert!(summary.fresh);
    assert_eq!(summary.accepted, 2);
    Ok(())
}
