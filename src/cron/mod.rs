// src/cron/mod.rs
pub mod scheduler;

pub use scheduler::{Registration, Scheduler};
