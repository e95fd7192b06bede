// src/bin/commands/mod.rs
mod qtask;
mod tasks;

pub use qtask::*;
