//! Command handlers

pub mod config;
pub mod enqueue;
pub mod queue;
pub mod run;
pub mod shift;
pub mod status;
pub mod sync;
