use super::exit_codes;
use currant_core::Engine;

pub fn train(engine: &mut Engine) -> i32 {
    let summary = engine.train();
    if summary.accepted == 0 {
        eprintln!("nothing to train on");
    } else {
        eprintln!(
            "trained on {} test cases ({} skipped{})",
            summary.accepted,
            summary.rejected,
            if summary.fresh { ", new model" } else { "" }
        );
    }
    exit_codes::OK
}

pub fn dump(engine: &Engine) -> i32 {
    print!("{}", engine.dump_metrics());
    exit_codes::OK
}

pub fn reset(engine: &Engine) -> anyhow::Result<i32> {
    engine.reset()?;
    eprintln!("store reset");
    Ok(exit_codes::OK)
}
