pub mod commands;
pub mod config;
pub mod k8s;
pub mod loader;
pub mod manifest;
pub mod order;
pub mod reconcile;
pub mod report;
pub mod telemetry;
