//! Common Utilities and Types Library
//!
//! This crate provides the LTE numerology, cell identity types and small DSP
//! helpers shared by the downlink receiver crates.

pub mod types;
pub mod utils;

// Re-export commonly used items
pub use types::*;
pub use utils::*;
