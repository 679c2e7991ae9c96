pub mod config;
pub mod job;
pub mod pool;
pub mod query;
pub mod report;
pub mod telemetry;
