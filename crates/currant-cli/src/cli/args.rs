use clap::{Parser, Subcommand, ValueEnum};
use currant_core::model::TestResult;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "currant",
    version,
    about = "Adaptive test prioritization: rank tests by predicted failure probability"
)]
pub struct Cli {
    /// SQLite database holding test metrics and the model
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// YAML engine config (db_path, max_missing, log_level)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Testsets a known test may miss before it is deleted (<= 0 disables)
    #[arg(long, global = true, allow_negative_numbers = true)]
    pub max_missing: Option<i64>,

    /// Log filter; overrides `log_level` from the config file
    #[arg(long, global = true, env = "CURRANT_LOG")]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the given tests in the order they should run
    Prioritize(PrioritizeArgs),
    /// Report that a test started
    Started(StartedArgs),
    /// Report a test result
    Finished(FinishedArgs),
    /// Report the full roster of the testset about to run
    TestsetStart(TestsetStartArgs),
    /// Report the end of a testset
    TestsetFinish(TestsetFinishArgs),
    /// Train the model on all stored test cases
    Train,
    /// Print every stored test case with its metric values
    Dump,
    /// Delete all test cases and the model
    Reset,
    Version,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(clap::Args, Debug, Clone)]
pub struct PrioritizeArgs {
    #[arg(required = true)]
    pub names: Vec<String>,

    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(clap::Args, Debug, Clone)]
pub struct StartedArgs {
    pub name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ResultArg {
    Passed,
    Failed,
    Skipped,
}

impl From<ResultArg> for TestResult {
    fn from(r: ResultArg) -> Self {
        match r {
            ResultArg::Passed => TestResult::Passed,
            ResultArg::Failed => TestResult::Failed,
            ResultArg::Skipped => TestResult::Skipped,
        }
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct FinishedArgs {
    pub name: String,

    #[arg(long, value_enum)]
    pub result: ResultArg,

    /// Run time. Start times are not kept between invocations, so omitting
    /// this stores 0 ms
    #[arg(long)]
    pub duration_ms: Option<u64>,

    /// Covered instructions
    #[arg(long)]
    pub instructions: Option<i64>,

    #[arg(long)]
    pub branches: Option<i64>,

    /// Covered cyclomatic complexity
    #[arg(long)]
    pub complexity: Option<i64>,
}

impl FinishedArgs {
    pub fn has_coverage(&self) -> bool {
        self.instructions.is_some() || self.branches.is_some() || self.complexity.is_some()
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct TestsetStartArgs {
    #[arg(required = true)]
    pub names: Vec<String>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct TestsetFinishArgs {
    /// Comma-separated roster of the testset
    #[arg(long, value_delimiter = ',', required = true)]
    pub all: Vec<String>,

    /// Comma-separated tests that actually ran
    #[arg(long, value_delimiter = ',')]
    pub executed: Vec<String>,
}
