//! Admission experiments: generate tenant churn, replay it against the brain, and
//! report how many tenants got in and what the backups cost.

pub mod config;
pub mod experiment;
pub mod workload;
