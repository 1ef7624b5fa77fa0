use super::exit_codes;
use crate::cli::args::{FinishedArgs, StartedArgs, TestsetFinishArgs, TestsetStartArgs};
use currant_core::model::{CoverageCounters, TestOutcome};
use currant_core::Engine;
use std::time::Duration;

pub fn started(engine: &mut Engine, args: StartedArgs) -> i32 {
    engine.test_started(&args.name);
    exit_codes::OK
}

pub fn finished(engine: &mut Engine, args: FinishedArgs) -> i32 {
    let duration_ms = match args.duration_ms {
        Some(ms) => ms,
        None => {
            eprintln!(
                "warning: no --duration-ms for '{}'; storing 0 ms (run time is only measured in-process)",
                args.name
            );
            0
        }
    };
    let mut outcome = TestOutcome::new(args.result.into(), Duration::from_millis(duration_ms));
    if args.has_coverage() {
        outcome = outcome.with_coverage(CoverageCounters {
            instructions: args.instructions.unwrap_or(0),
            branches: args.branches.unwrap_or(0),
            complexity: args.complexity.unwrap_or(0),
        });
    }
    engine.test_finished_with(&args.name, &outcome);
    exit_codes::OK
}

pub fn testset_start(engine: &mut Engine, args: TestsetStartArgs) -> i32 {
    engine.testset_started(&args.names);
    exit_codes::OK
}

pub fn testset_finish(engine: &mut Engine, args: TestsetFinishArgs) -> i32 {
    let all = non_empty(args.all);
    let executed = non_empty(args.executed);
    engine.testset_finished(&all, &executed);
    exit_codes::OK
}

// `--all a,,b` and a trailing comma produce empty entries
fn non_empty(names: Vec<String>) -> Vec<String> {
    names
        .into_iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .collect()
}
