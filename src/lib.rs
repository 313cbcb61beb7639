// Library for the binary and the integration tests

pub mod aggregator;
pub mod billing;
pub mod collector;
pub mod config;
pub mod host_repo;
pub mod models;
pub mod notifier;
pub mod probe;
pub mod query;
pub mod quota;
pub mod reconciler;
pub mod samplers;
pub mod sources;
pub mod store;
