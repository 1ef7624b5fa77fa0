pub mod classifier;
pub mod config;
pub mod engine;
pub mod errors;
pub mod handlers;
pub mod metrics_api;
pub mod model;
pub mod report;
pub mod storage;
pub mod uniqueness;

pub use engine::Engine;
