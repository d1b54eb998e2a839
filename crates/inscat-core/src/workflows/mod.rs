//! # Workflows Module
//!
//! High-level entry points that tie the engine and core layers together.
//!
//! - **Simulation Workflow** ([`simulate`]) - Powder tensors, structure factor, threshold
//!   diagnostics and kinematic masking for one instrument setting and temperature.

pub mod simulate;
