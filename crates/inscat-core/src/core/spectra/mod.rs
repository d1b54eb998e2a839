//! Pure numerical building blocks for multi-phonon spectra.
//!
//! - [`frequencies`] - Combinatorial generation of transition energies per quantum order
//! - [`structure_factor`] - Closed-form, powder-averaged S terms per quantum order
//! - [`broadening`] - Output energy grid and instrument resolution convolution
//! - [`instruments`] - Momentum transfer, resolution and kinematic limits per instrument
//! - [`autoconvolution`] - Convolution-based order extrapolation and histogram rebinning
//!
//! None of these functions touch the cache or global state; they are the parts of the
//! pipeline that can be tested in isolation.

pub mod autoconvolution;
pub mod broadening;
pub mod frequencies;
pub mod instruments;
pub mod structure_factor;
