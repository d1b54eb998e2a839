use crate::core::constants::{ACOUSTIC_PHONON_THRESHOLD, FUNDAMENTALS, MAX_QUANTUM_ORDER};
use crate::core::io::cache::StructuredCache;
use crate::core::models::sdata::SampleForm;
use crate::core::spectra::broadening::{BroadeningScheme, EnergyGrid};
use crate::core::spectra::instruments::{
    Instrument, InstrumentError, InstrumentParameters, default_instruments,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid temperature {0} K: must be finite and non-negative")]
    InvalidTemperature(f64),

    #[error("Unsupported quantum order {order}: must be between 1 and {max_order}")]
    UnsupportedOrder { order: usize, max_order: usize },

    #[error("Instrument error: {0}")]
    Instrument(#[from] InstrumentError),

    #[error("Invalid parameter '{field}': {message}")]
    InvalidParameter { field: &'static str, message: String },
}

#[derive(Debug, Error)]
pub enum ParamLoadError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
    #[error("Invalid parameters in '{path}': {source}")]
    Invalid { path: String, source: ConfigError },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SamplingParameters {
    /// Lower edge of the output energy grid (cm⁻¹).
    pub min_wavenumber: f64,
    /// Upper edge of the output energy grid and cut-off for combined transitions (cm⁻¹).
    pub max_wavenumber: f64,
    pub bin_width: f64,
    pub acoustic_threshold: f64,
    /// Transitions with a smaller angle-averaged S are pruned before the next order.
    pub s_absolute_threshold: f64,
    pub s_relative_threshold: f64,
    pub min_retained_transitions: usize,
    /// Largest tolerated share of summed S lost to pruning before a warning.
    pub max_signal_loss: f64,
    pub broadening: BroadeningScheme,
}

impl Default for SamplingParameters {
    fn default() -> Self {
        Self {
            min_wavenumber: 0.0,
            max_wavenumber: 4100.0,
            bin_width: 1.0,
            acoustic_threshold: ACOUSTIC_PHONON_THRESHOLD,
            s_absolute_threshold: 1e-7,
            s_relative_threshold: 0.01,
            min_retained_transitions: 20,
            max_signal_loss: 0.05,
            broadening: BroadeningScheme::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PerformanceParameters {
    /// Largest number of combined transitions generated at once.
    pub optimal_size: usize,
    /// Per-order shrink factor for chunks of deeper combinatorial products.
    pub chunk_shrink_factor: usize,
    pub threads: usize,
}

impl Default for PerformanceParameters {
    fn default() -> Self {
        Self {
            optimal_size: 5_000_000,
            chunk_shrink_factor: 4,
            threads: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AutoconvolutionParameters {
    pub max_order: usize,
}

impl Default for AutoconvolutionParameters {
    fn default() -> Self {
        Self { max_order: 10 }
    }
}

/// The complete parameter set read by the calculators.
///
/// Calculators clone it at construction, so later changes never affect a running
/// calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Parameters {
    pub sampling: SamplingParameters,
    pub performance: PerformanceParameters,
    pub autoconvolution: AutoconvolutionParameters,
    pub instruments: BTreeMap<String, InstrumentParameters>,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            sampling: SamplingParameters::default(),
            performance: PerformanceParameters::default(),
            autoconvolution: AutoconvolutionParameters::default(),
            instruments: default_instruments(),
        }
    }
}

impl Parameters {
    /// Parses a (possibly partial) TOML document over the defaults.
    ///
    /// Instruments named in the document replace the built-in definition of the same
    /// name; the other built-in instruments stay available.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        let mut parameters: Parameters = toml::from_str(content)?;
        for (name, instrument) in default_instruments() {
            parameters.instruments.entry(name).or_insert(instrument);
        }
        Ok(parameters)
    }

    pub fn from_file(path: &Path) -> Result<Self, ParamLoadError> {
        let display = path.to_string_lossy().to_string();
        let content = std::fs::read_to_string(path).map_err(|e| ParamLoadError::Io {
            path: display.clone(),
            source: e,
        })?;
        let parameters = Self::from_toml_str(&content).map_err(|e| ParamLoadError::Toml {
            path: display.clone(),
            source: e,
        })?;
        parameters.validate().map_err(|e| ParamLoadError::Invalid {
            path: display,
            source: e,
        })?;
        Ok(parameters)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.sampling;
        let invalid = |field: &'static str, message: &str| ConfigError::InvalidParameter {
            field,
            message: message.to_string(),
        };
        self.energy_grid()?;
        if !(s.acoustic_threshold >= 0.0) {
            return Err(invalid("acoustic-threshold", "must be non-negative"));
        }
        if !(s.s_absolute_threshold >= 0.0) || !(s.s_relative_threshold >= 0.0) {
            return Err(invalid("s-absolute-threshold", "thresholds must be non-negative"));
        }
        if !(0.0..=1.0).contains(&s.max_signal_loss) {
            return Err(invalid("max-signal-loss", "must lie in [0, 1]"));
        }
        if self.performance.optimal_size == 0 {
            return Err(invalid("optimal-size", "must be positive"));
        }
        if self.performance.chunk_shrink_factor == 0 {
            return Err(invalid("chunk-shrink-factor", "must be positive"));
        }
        if self.performance.threads == 0 {
            return Err(invalid("threads", "must be at least 1"));
        }
        if self.autoconvolution.max_order < FUNDAMENTALS {
            return Err(invalid("max-order", "must be at least 1"));
        }
        Ok(())
    }

    /// The output energy grid described by the sampling parameters.
    pub fn energy_grid(&self) -> Result<EnergyGrid, ConfigError> {
        let s = &self.sampling;
        EnergyGrid::from_range(s.min_wavenumber, s.max_wavenumber, s.bin_width).map_err(|e| {
            ConfigError::InvalidParameter {
                field: "bin-width",
                message: e.to_string(),
            }
        })
    }

    /// JSON serialization of every parameter that can change a computed result.
    ///
    /// The worker count is excluded since results do not depend on it.
    pub fn fingerprint(&self) -> Result<String, ConfigError> {
        let mut snapshot = self.clone();
        snapshot.performance.threads = 1;
        serde_json::to_string(&snapshot).map_err(|e| ConfigError::InvalidParameter {
            field: "parameters",
            message: e.to_string(),
        })
    }
}

/// Where and under which key computed intermediates are cached.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    pub directory: PathBuf,
    pub input_name: String,
    /// Content hash of the input file.
    pub input_hash: String,
}

impl CacheSettings {
    pub fn cache(&self) -> StructuredCache {
        StructuredCache::for_input(&self.directory, &self.input_name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SCalculatorConfig {
    pub instrument: Instrument,
    pub temperature: f64,
    pub quantum_order: usize,
    pub autoconvolution: bool,
    pub sample_form: SampleForm,
    pub parameters: Parameters,
    pub cache: Option<CacheSettings>,
}

impl SCalculatorConfig {
    /// Number of orders the final data carries, including autoconvolved ones.
    pub fn target_orders(&self) -> usize {
        if self.autoconvolution {
            self.quantum_order
                .max(self.parameters.autoconvolution.max_order)
        } else {
            self.quantum_order
        }
    }
}

#[derive(Default)]
pub struct SCalculatorConfigBuilder {
    instrument: Option<String>,
    setting: Option<String>,
    temperature: Option<f64>,
    quantum_order: Option<usize>,
    autoconvolution: bool,
    sample_form: SampleForm,
    parameters: Option<Parameters>,
    cache: Option<CacheSettings>,
}

impl SCalculatorConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instrument(mut self, name: &str) -> Self {
        self.instrument = Some(name.to_string());
        self
    }
    pub fn setting(mut self, setting: &str) -> Self {
        self.setting = Some(setting.to_string());
        self
    }
    pub fn temperature(mut self, kelvin: f64) -> Self {
        self.temperature = Some(kelvin);
        self
    }
    pub fn quantum_order(mut self, order: usize) -> Self {
        self.quantum_order = Some(order);
        self
    }
    pub fn autoconvolution(mut self, enabled: bool) -> Self {
        self.autoconvolution = enabled;
        self
    }
    pub fn sample_form(mut self, form: SampleForm) -> Self {
        self.sample_form = form;
        self
    }
    pub fn parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = Some(parameters);
        self
    }
    pub fn cache(mut self, settings: CacheSettings) -> Self {
        self.cache = Some(settings);
        self
    }

    /// Validates every setting and resolves the instrument.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for missing fields, a negative or non-finite
    /// temperature, a quantum order outside `[1, MAX_QUANTUM_ORDER]`, invalid
    /// parameters, or an unknown instrument or setting.
    pub fn build(self) -> Result<SCalculatorConfig, ConfigError> {
        let name = self
            .instrument
            .ok_or(ConfigError::MissingParameter("instrument"))?;
        let temperature = self
            .temperature
            .ok_or(ConfigError::MissingParameter("temperature"))?;
        let quantum_order = self
            .quantum_order
            .ok_or(ConfigError::MissingParameter("quantum_order"))?;
        let parameters = self.parameters.unwrap_or_default();

        if !temperature.is_finite() || temperature < 0.0 {
            return Err(ConfigError::InvalidTemperature(temperature));
        }
        if !(FUNDAMENTALS..=MAX_QUANTUM_ORDER).contains(&quantum_order) {
            return Err(ConfigError::UnsupportedOrder {
                order: quantum_order,
                max_order: MAX_QUANTUM_ORDER,
            });
        }
        parameters.validate()?;
        let instrument =
            Instrument::from_parameters(&name, self.setting.as_deref(), &parameters.instruments)?;

        Ok(SCalculatorConfig {
            instrument,
            temperature,
            quantum_order,
            autoconvolution: self.autoconvolution,
            sample_form: self.sample_form,
            parameters,
            cache: self.cache,
        })
    }
}
