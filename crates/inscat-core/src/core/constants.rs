//! Physical constants and numerical thresholds shared across the engine.
//!
//! Energies are expressed in wavenumbers (cm⁻¹), masses in atomic mass units,
//! lengths in Ångström and temperatures in Kelvin.

/// ħ / (2 · amu · 2πc) in Å²·cm⁻¹·amu. Converts `|u|² / (m ω)` into a mean-square
/// displacement in Å² when ω is given in cm⁻¹ and m in amu.
pub const MSD_CONSTANT: f64 = 16.857_55;

/// Boltzmann constant in cm⁻¹/K.
pub const K_B_WAVENUMBER: f64 = 0.695_034_8;

/// ħ²/(2 mₙ) in cm⁻¹·Å², i.e. the kinetic energy of a neutron with |k| = 1 Å⁻¹.
pub const NEUTRON_ENERGY_PER_K2: f64 = 16.712_68;

/// Modes at or below this frequency (cm⁻¹) are treated as acoustic and discarded.
pub const ACOUSTIC_PHONON_THRESHOLD: f64 = 10.0;

/// Tensor entries with a smaller magnitude are clamped to this value.
pub const NUMERICAL_ZERO: f64 = 1e-15;

/// The quantum order of fundamental (single-phonon) transitions.
pub const FUNDAMENTALS: usize = 1;

/// Highest quantum order computed by explicit frequency combination.
pub const MAX_QUANTUM_ORDER: usize = 4;

/// Two temperatures closer than this (K) are considered identical by the cache.
pub const TEMPERATURE_TOLERANCE: f64 = 1e-4;

/// Width (in standard deviations) at which truncated Gaussian kernels are cut.
pub const GAUSSIAN_TRUNCATION_SIGMAS: f64 = 3.0;

/// Relative tolerance for the `a = Σ b` powder tensor invariant.
pub const TENSOR_SUM_TOLERANCE: f64 = 1e-8;
