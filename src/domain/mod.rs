//! Domain layer - Core types, well-known names and port definitions
//!
//! This module defines the core traits (ports) that adapters implement,
//! following hexagonal architecture principles.

pub mod constants;
pub mod ports;

pub use constants::*;
pub use ports::*;
