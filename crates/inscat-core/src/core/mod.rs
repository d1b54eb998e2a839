//! # Core Module
//!
//! Fundamental building blocks of INSCAT: the validated vibrational data model,
//! the pure numerics used to build spectra, and persistence utilities.
//!
//! ## Architecture
//!
//! - **Data Model** ([`models`]) - Atoms, k-points, powder tensors and computed spectra
//! - **Spectral Numerics** ([`spectra`]) - Multi-phonon frequency combinations, closed-form
//!   structure factor terms, resolution broadening, instruments and autoconvolution
//! - **Persistence** ([`io`]) - Hash/parameter-keyed structured cache and JSON documents
//! - **Constants** ([`constants`]) - Physical constants and numerical thresholds
//! - **Utilities** ([`utils`]) - Bounded worker-pool helper shared by the calculators
//!
//! Everything in this module is free of global state. Data model types are immutable
//! once constructed, and the numerical functions are deterministic for identical inputs.

pub mod constants;
pub mod io;
pub mod models;
pub mod spectra;
pub mod utils;
