pub mod client;
pub mod cluster_status;
pub mod config;
pub mod dynamic;
pub mod errors;
pub mod hash;
pub mod metrics;
pub mod properties;
pub mod secrets;
pub mod status;
pub mod telemetry;
