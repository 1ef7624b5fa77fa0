use super::exit_codes;
use crate::cli::args::{OutputFormat, PrioritizeArgs};
use currant_core::report::format_prioritized;
use currant_core::Engine;

pub fn run(engine: &Engine, args: PrioritizeArgs) -> anyhow::Result<i32> {
    let ranked = engine.prioritize(args.names.as_slice());
    match args.format {
        OutputFormat::Text => print!("{}", format_prioritized(&ranked)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&ranked)?),
    }
    Ok(exit_codes::OK)
}
