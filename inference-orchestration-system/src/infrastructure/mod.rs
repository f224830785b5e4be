pub mod config;
pub mod service;
pub mod service_provider;
pub mod telemetry;
