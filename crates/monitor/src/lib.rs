//! Process-level pieces of the task monitor binary

pub mod api;
pub mod config;
