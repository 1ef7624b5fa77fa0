use currant_core::handlers::Handlers;

pub mod coverage;
pub mod duration;
pub mod result_history;
pub mod uniqueness;

pub use coverage::CoverageHandler;
pub use duration::DurationHandler;
pub use result_history::ResultHistoryHandler;
pub use uniqueness::UniquenessHandler;

/// Handler set used for unit-test runs: result history at depths 3 and 10,
/// code coverage, run duration and name uniqueness.
pub fn standard_handlers() -> Handlers {
    Handlers::new()
        .with_test_case(ResultHistoryHandler::new(&[3, 10]))
        .with_test_case(CoverageHandler::new())
        .with_test_case(DurationHandler::new())
        .with_testset(UniquenessHandler::new())
}
