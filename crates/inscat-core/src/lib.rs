//! # INSCAT Core Library
//!
//! A semi-empirical engine that turns ab-initio vibrational data into simulated
//! inelastic neutron scattering spectra, S(Q, ω), for powder samples.
//!
//! ## Architectural Philosophy
//!
//! The library follows a strict three-layer architecture to keep data, numerics and
//! orchestration apart:
//!
//! - **[`core`]: The Foundation.** Immutable, validated data models (`AbinsData`,
//!   `PowderData`, `SData`), pure numerical building blocks (frequency combinations,
//!   closed-form structure factor terms, broadening, instrument models) and the
//!   structured cache used to persist expensive results.
//!
//! - **[`engine`]: The Logic Core.** The stateful calculators. `PowderCalculator` derives
//!   mean-square-displacement tensors, `SPowderSemiEmpiricalCalculator` drives the
//!   multi-phonon pipeline, chunking and cache validation. Configuration, progress
//!   reporting and error types live here as well.
//!
//! - **[`workflows`]: The Public API.** End-to-end procedures that tie the `engine` and
//!   `core` together, such as simulating a full spectrum for one instrument setting.

pub mod core;
pub mod engine;
pub mod workflows;
