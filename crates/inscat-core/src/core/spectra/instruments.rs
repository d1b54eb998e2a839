use crate::core::constants::NEUTRON_ENERGY_PER_K2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum InstrumentError {
    #[error("Unknown instrument '{0}'")]
    UnknownInstrument(String),

    #[error("Unknown setting '{setting}' for instrument '{instrument}'")]
    UnknownSetting { instrument: String, setting: String },

    #[error("Invalid parameter for instrument '{instrument}': {message}")]
    InvalidParameter { instrument: String, message: String },
}

/// Whether an instrument produces an angle-averaged 1-D spectrum or a 2-D (|Q|, E) map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentKind {
    OneDimensional,
    TwoDimensional,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IndirectSetting {
    /// Scattering angles of the detector banks, in degrees.
    pub angles: Vec<f64>,
}

/// An indirect-geometry spectrometer with a fixed final neutron energy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IndirectParameters {
    /// Final neutron energy in cm⁻¹.
    pub final_energy: f64,
    pub default_setting: String,
    pub settings: BTreeMap<String, IndirectSetting>,
    /// Coefficients `[c0, c1, c2]` of σ(ω) = c0 + c1·ω + c2·ω² in cm⁻¹.
    pub resolution: [f64; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DirectSetting {
    /// Incident neutron energy in cm⁻¹.
    pub incident_energy: f64,
}

/// A direct-geometry spectrometer with a fixed incident energy per setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DirectParameters {
    pub default_setting: String,
    pub settings: BTreeMap<String, DirectSetting>,
    /// Smallest and largest detector angle in degrees.
    pub angle_range: [f64; 2],
    /// |Q| range of the output map in Å⁻¹.
    pub q_range: [f64; 2],
    pub q_bin_width: f64,
    /// Coefficients `[c0, c1, c2]` of σ(ω) = c0 + c1·ω + c2·ω² in cm⁻¹.
    pub resolution: [f64; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "geometry", rename_all = "kebab-case")]
pub enum InstrumentParameters {
    Indirect(IndirectParameters),
    Direct(DirectParameters),
}

/// Built-in instrument definitions used by the default parameters.
pub fn default_instruments() -> BTreeMap<String, InstrumentParameters> {
    const MEV_TO_WAVENUMBER: f64 = 8.065_544;

    let tosca = IndirectParameters {
        final_energy: 32.0,
        default_setting: "All detectors (TOSCA)".to_string(),
        settings: BTreeMap::from([
            (
                "Backward (TOSCA)".to_string(),
                IndirectSetting {
                    angles: vec![134.98],
                },
            ),
            (
                "Forward (TOSCA)".to_string(),
                IndirectSetting { angles: vec![45.0] },
            ),
            (
                "All detectors (TOSCA)".to_string(),
                IndirectSetting {
                    angles: vec![45.0, 134.98],
                },
            ),
        ]),
        resolution: [2.5, 0.005, 1e-7],
    };

    let maps = DirectParameters {
        default_setting: "400".to_string(),
        settings: BTreeMap::from([
            (
                "400".to_string(),
                DirectSetting {
                    incident_energy: 400.0 * MEV_TO_WAVENUMBER,
                },
            ),
            (
                "100".to_string(),
                DirectSetting {
                    incident_energy: 100.0 * MEV_TO_WAVENUMBER,
                },
            ),
        ]),
        angle_range: [3.0, 60.0],
        q_range: [0.0, 20.0],
        q_bin_width: 0.1,
        resolution: [8.0, 0.02, 0.0],
    };

    BTreeMap::from([
        ("TOSCA".to_string(), InstrumentParameters::Indirect(tosca)),
        ("MAPS".to_string(), InstrumentParameters::Direct(maps)),
    ])
}

#[derive(Debug, Clone, PartialEq)]
enum Geometry {
    Indirect {
        final_energy: f64,
        angles: Vec<f64>,
    },
    Direct {
        incident_energy: f64,
        angle_range: [f64; 2],
        q_points: Vec<f64>,
    },
}

/// A resolved instrument: one definition plus one of its settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Instrument {
    name: String,
    setting: String,
    geometry: Geometry,
    resolution: [f64; 3],
}

impl Instrument {
    /// Resolves `name` and `setting` (or the instrument's default setting) against the
    /// configured definitions.
    pub fn from_parameters(
        name: &str,
        setting: Option<&str>,
        instruments: &BTreeMap<String, InstrumentParameters>,
    ) -> Result<Self, InstrumentError> {
        let parameters = instruments
            .get(name)
            .ok_or_else(|| InstrumentError::UnknownInstrument(name.to_string()))?;
        let invalid = |message: &str| InstrumentError::InvalidParameter {
            instrument: name.to_string(),
            message: message.to_string(),
        };
        let unknown_setting = |setting: &str| InstrumentError::UnknownSetting {
            instrument: name.to_string(),
            setting: setting.to_string(),
        };

        match parameters {
            InstrumentParameters::Indirect(p) => {
                let setting = setting.unwrap_or(&p.default_setting);
                let chosen = p
                    .settings
                    .get(setting)
                    .ok_or_else(|| unknown_setting(setting))?;
                if chosen.angles.is_empty() {
                    return Err(invalid("setting defines no detector angles"));
                }
                if !(p.final_energy > 0.0) {
                    return Err(invalid("final energy must be positive"));
                }
                Ok(Self {
                    name: name.to_string(),
                    setting: setting.to_string(),
                    geometry: Geometry::Indirect {
                        final_energy: p.final_energy,
                        angles: chosen.angles.clone(),
                    },
                    resolution: p.resolution,
                })
            }
            InstrumentParameters::Direct(p) => {
                let setting = setting.unwrap_or(&p.default_setting);
                let chosen = p
                    .settings
                    .get(setting)
                    .ok_or_else(|| unknown_setting(setting))?;
                if !(chosen.incident_energy > 0.0) {
                    return Err(invalid("incident energy must be positive"));
                }
                let [q_min, q_max] = p.q_range;
                if !(p.q_bin_width > 0.0) || !(q_max > q_min) {
                    return Err(invalid("|Q| grid is empty"));
                }
                let bins = ((q_max - q_min) / p.q_bin_width + 1e-9).floor() as usize;
                let q_points = (0..bins)
                    .map(|i| q_min + (i as f64 + 0.5) * p.q_bin_width)
                    .collect::<Vec<_>>();
                if q_points.is_empty() {
                    return Err(invalid("|Q| grid is empty"));
                }
                Ok(Self {
                    name: name.to_string(),
                    setting: setting.to_string(),
                    geometry: Geometry::Direct {
                        incident_energy: chosen.incident_energy,
                        angle_range: p.angle_range,
                        q_points,
                    },
                    resolution: p.resolution,
                })
            }
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn setting(&self) -> &str {
        &self.setting
    }

    /// Identifies the instrument and setting in cache attributes.
    pub fn label(&self) -> String {
        format!("{}:{}", self.name, self.setting)
    }

    pub fn kind(&self) -> InstrumentKind {
        match self.geometry {
            Geometry::Indirect { .. } => InstrumentKind::OneDimensional,
            Geometry::Direct { .. } => InstrumentKind::TwoDimensional,
        }
    }

    /// Number of angles (1-D) or |Q| points (2-D) at which S is sampled.
    pub fn sample_points(&self) -> usize {
        match &self.geometry {
            Geometry::Indirect { angles, .. } => angles.len(),
            Geometry::Direct { q_points, .. } => q_points.len(),
        }
    }

    /// The |Q| axis of a 2-D instrument.
    pub fn q_points(&self) -> Option<&[f64]> {
        match &self.geometry {
            Geometry::Indirect { .. } => None,
            Geometry::Direct { q_points, .. } => Some(q_points),
        }
    }

    /// Momentum transfer squared (Å⁻²) at sample point `point` for energy transfer
    /// `frequency` (cm⁻¹).
    pub fn q2(&self, point: usize, frequency: f64) -> f64 {
        match &self.geometry {
            Geometry::Indirect {
                final_energy,
                angles,
            } => {
                let k2_i = (frequency + final_energy) / NEUTRON_ENERGY_PER_K2;
                let k2_f = final_energy / NEUTRON_ENERGY_PER_K2;
                let cos_angle = angles[point].to_radians().cos();
                k2_i + k2_f - 2.0 * (k2_i * k2_f).sqrt() * cos_angle
            }
            Geometry::Direct { q_points, .. } => q_points[point] * q_points[point],
        }
    }

    /// Standard deviation (cm⁻¹) of the Gaussian resolution at `frequency`.
    pub fn resolution_sigma(&self, frequency: f64) -> f64 {
        let [c0, c1, c2] = self.resolution;
        c0 + c1 * frequency + c2 * frequency * frequency
    }

    /// The accessible |Q| range at energy transfer `energy` for 2-D instruments.
    ///
    /// Returns `None` when the energy is kinematically inaccessible (larger than the
    /// incident energy) or the instrument has no kinematic model.
    pub fn q_limits(&self, energy: f64) -> Option<(f64, f64)> {
        let Geometry::Direct {
            incident_energy,
            angle_range,
            ..
        } = &self.geometry
        else {
            return None;
        };
        if energy > *incident_energy {
            return None;
        }
        let k_i = (incident_energy / NEUTRON_ENERGY_PER_K2).sqrt();
        let k_f = ((incident_energy - energy) / NEUTRON_ENERGY_PER_K2).sqrt();
        let q_at = |angle: f64| {
            (k_i * k_i + k_f * k_f - 2.0 * k_i * k_f * angle.to_radians().cos())
                .max(0.0)
                .sqrt()
        };
        Some((q_at(angle_range[0]), q_at(angle_range[1])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> BTreeMap<String, InstrumentParameters> {
        default_instruments()
    }

    #[test]
    fn tosca_resolves_default_and_named_settings() {
        let tosca = Instrument::from_parameters("TOSCA", None, &defaults()).unwrap();
        assert_eq!(tosca.setting(), "All detectors (TOSCA)");
        assert_eq!(tosca.kind(), InstrumentKind::OneDimensional);
        assert_eq!(tosca.sample_points(), 2);
        assert_eq!(tosca.label(), "TOSCA:All detectors (TOSCA)");

        let backward =
            Instrument::from_parameters("TOSCA", Some("Backward (TOSCA)"), &defaults()).unwrap();
        assert_eq!(backward.sample_points(), 1);
        assert!(backward.q_points().is_none());
    }

    #[test]
    fn unknown_instrument_and_setting_are_rejected() {
        assert_eq!(
            Instrument::from_parameters("NOPE", None, &defaults()),
            Err(InstrumentError::UnknownInstrument("NOPE".to_string()))
        );
        assert!(matches!(
            Instrument::from_parameters("TOSCA", Some("Sideways"), &defaults()),
            Err(InstrumentError::UnknownSetting { .. })
        ));
    }

    #[test]
    fn setting_without_angles_is_invalid() {
        let mut instruments = defaults();
        if let Some(InstrumentParameters::Indirect(p)) = instruments.get_mut("TOSCA") {
            p.settings
                .insert("Empty".to_string(), IndirectSetting { angles: vec![] });
        }
        assert!(matches!(
            Instrument::from_parameters("TOSCA", Some("Empty"), &instruments),
            Err(InstrumentError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn indirect_q2_follows_scattering_triangle() {
        let tosca =
            Instrument::from_parameters("TOSCA", Some("Forward (TOSCA)"), &defaults()).unwrap();
        let frequency = 500.0;
        let k2_i = (frequency + 32.0) / NEUTRON_ENERGY_PER_K2;
        let k2_f = 32.0 / NEUTRON_ENERGY_PER_K2;
        let expected = k2_i + k2_f - 2.0 * (k2_i * k2_f).sqrt() * 45.0_f64.to_radians().cos();
        assert!((tosca.q2(0, frequency) - expected).abs() < 1e-12);

        let backward =
            Instrument::from_parameters("TOSCA", Some("Backward (TOSCA)"), &defaults()).unwrap();
        assert!(backward.q2(0, frequency) > tosca.q2(0, frequency));
    }

    #[test]
    fn resolution_is_energy_dependent() {
        let tosca = Instrument::from_parameters("TOSCA", None, &defaults()).unwrap();
        assert!((tosca.resolution_sigma(0.0) - 2.5).abs() < 1e-12);
        assert!((tosca.resolution_sigma(1000.0) - (2.5 + 5.0 + 0.1)).abs() < 1e-12);
    }

    #[test]
    fn direct_instrument_samples_q_grid() {
        let maps = Instrument::from_parameters("MAPS", Some("100"), &defaults()).unwrap();
        assert_eq!(maps.kind(), InstrumentKind::TwoDimensional);
        assert_eq!(maps.sample_points(), 200);
        let q = maps.q_points().unwrap();
        assert!((q[0] - 0.05).abs() < 1e-12);
        assert!((maps.q2(3, 123.0) - q[3] * q[3]).abs() < 1e-12);
    }

    #[test]
    fn direct_q_limits_respect_kinematics() {
        let maps = Instrument::from_parameters("MAPS", Some("100"), &defaults()).unwrap();
        let (low, high) = maps.q_limits(100.0).unwrap();
        assert!(low < high);
        assert!(low > 0.0);
        assert!(maps.q_limits(1e6).is_none());

        let tosca = Instrument::from_parameters("TOSCA", None, &defaults()).unwrap();
        assert!(tosca.q_limits(100.0).is_none());
    }

    #[test]
    fn instrument_parameters_round_trip_through_toml() {
        let text = toml::to_string(&defaults()).unwrap();
        let parsed: BTreeMap<String, InstrumentParameters> = toml::from_str(&text).unwrap();
        assert_eq!(parsed, defaults());
    }
}
