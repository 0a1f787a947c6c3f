//! Common Utilities and Types Library
//!
//! This crate provides shared types and utilities used across the PDCP data plane.

pub mod timers;
pub mod types;
pub mod utils;

// Re-export commonly used items
pub use timers::{TimerId, TimerQueue};
pub use types::*;
pub use utils::*;
