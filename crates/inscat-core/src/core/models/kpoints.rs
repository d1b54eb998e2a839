use super::error::ValidationError;
use crate::core::constants::ACOUSTIC_PHONON_THRESHOLD;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Complex displacement vector of one atom in one normal mode.
pub type Displacement = [Complex64; 3];

/// Unvalidated k-point data as produced by a loader.
///
/// `atomic_displacements` is indexed `[atom][mode]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawKpoint {
    pub weight: f64,
    pub k_vector: [f64; 3],
    pub frequencies: Vec<f64>,
    pub atomic_displacements: Vec<Vec<Displacement>>,
}

/// One validated k-point with acoustic modes removed.
#[derive(Debug, Clone, PartialEq)]
pub struct KpointData {
    weight: f64,
    k_vector: [f64; 3],
    frequencies: Vec<f64>,
    atomic_displacements: Vec<Vec<Displacement>>,
}

impl KpointData {
    #[inline]
    pub fn weight(&self) -> f64 {
        self.weight
    }

    #[inline]
    pub fn k_vector(&self) -> [f64; 3] {
        self.k_vector
    }

    /// Frequencies (cm⁻¹) of the retained modes, all strictly above the acoustic threshold.
    #[inline]
    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    /// Displacements of `atom` for every retained mode.
    pub fn displacements(&self, atom: usize) -> Option<&[Displacement]> {
        self.atomic_displacements.get(atom).map(Vec::as_slice)
    }

    #[inline]
    pub fn num_modes(&self) -> usize {
        self.frequencies.len()
    }

    #[inline]
    pub fn num_atoms(&self) -> usize {
        self.atomic_displacements.len()
    }
}

/// Serialized form of [`KpointsData`]; deserialization re-runs validation and filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KpointsRepr {
    unit_cell: [[f64; 3]; 3],
    acoustic_threshold: f64,
    kpoints: Vec<RawKpoint>,
}

/// Validated vibrational data for every sampled k-point plus the shared unit cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "KpointsRepr", into = "KpointsRepr")]
pub struct KpointsData {
    unit_cell: [[f64; 3]; 3],
    acoustic_threshold: f64,
    kpoints: Vec<KpointData>,
    num_atoms: usize,
}

impl KpointsData {
    /// Validates k-points and filters out modes at or below the default acoustic threshold.
    pub fn new(
        unit_cell: [[f64; 3]; 3],
        kpoints: Vec<RawKpoint>,
    ) -> Result<Self, ValidationError> {
        Self::with_acoustic_threshold(unit_cell, kpoints, ACOUSTIC_PHONON_THRESHOLD)
    }

    /// Validates k-points and filters out modes with frequency `<= acoustic_threshold`.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the list is empty, a weight is negative or not
    /// finite, the atom count differs between k-points, or the number of displacement
    /// modes of an atom does not match the number of frequencies.
    pub fn with_acoustic_threshold(
        unit_cell: [[f64; 3]; 3],
        kpoints: Vec<RawKpoint>,
        acoustic_threshold: f64,
    ) -> Result<Self, ValidationError> {
        if unit_cell.iter().flatten().any(|v| !v.is_finite()) {
            return Err(ValidationError::InvalidValue {
                field: "unit_cell",
                message: "all components must be finite".to_string(),
            });
        }
        if !acoustic_threshold.is_finite() || acoustic_threshold < 0.0 {
            return Err(ValidationError::InvalidValue {
                field: "acoustic_threshold",
                message: format!("{acoustic_threshold} is not a valid frequency threshold"),
            });
        }
        let num_atoms = kpoints
            .first()
            .map(|k| k.atomic_displacements.len())
            .ok_or_else(|| ValidationError::InvalidValue {
                field: "kpoints",
                message: "at least one k-point is required".to_string(),
            })?;

        let kpoints = kpoints
            .into_iter()
            .enumerate()
            .map(|(index, raw)| validate_kpoint(index, raw, num_atoms, acoustic_threshold))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            unit_cell,
            acoustic_threshold,
            kpoints,
            num_atoms,
        })
    }

    #[inline]
    pub fn unit_cell(&self) -> [[f64; 3]; 3] {
        self.unit_cell
    }

    #[inline]
    pub fn acoustic_threshold(&self) -> f64 {
        self.acoustic_threshold
    }

    #[inline]
    pub fn num_atoms(&self) -> usize {
        self.num_atoms
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.kpoints.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.kpoints.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&KpointData> {
        self.kpoints.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &KpointData> {
        self.kpoints.iter()
    }
}

fn validate_kpoint(
    index: usize,
    raw: RawKpoint,
    num_atoms: usize,
    acoustic_threshold: f64,
) -> Result<KpointData, ValidationError> {
    if !raw.weight.is_finite() || raw.weight < 0.0 {
        return Err(ValidationError::InvalidWeight {
            kpoint: index,
            weight: raw.weight,
        });
    }
    if raw.k_vector.iter().any(|v| !v.is_finite()) {
        return Err(ValidationError::InvalidValue {
            field: "k_vector",
            message: format!("k-point {index} has a non-finite component"),
        });
    }
    if raw.frequencies.iter().any(|f| !f.is_finite()) {
        return Err(ValidationError::InvalidValue {
            field: "frequencies",
            message: format!("k-point {index} has a non-finite frequency"),
        });
    }
    if raw.atomic_displacements.len() != num_atoms {
        return Err(ValidationError::AtomCountMismatch {
            context: format!("displacements of k-point {index}"),
            expected: num_atoms,
            found: raw.atomic_displacements.len(),
        });
    }
    let num_modes = raw.frequencies.len();
    for (atom, modes) in raw.atomic_displacements.iter().enumerate() {
        if modes.len() != num_modes {
            return Err(ValidationError::ModeCountMismatch {
                context: format!("displacements of atom {atom} at k-point {index}"),
                expected: num_modes,
                found: modes.len(),
            });
        }
    }

    let retained: Vec<usize> = raw
        .frequencies
        .iter()
        .enumerate()
        .filter(|&(_, &freq)| freq > acoustic_threshold)
        .map(|(mode, _)| mode)
        .collect();

    let frequencies = retained.iter().map(|&m| raw.frequencies[m]).collect();
    let atomic_displacements = raw
        .atomic_displacements
        .iter()
        .map(|modes| retained.iter().map(|&m| modes[m]).collect())
        .collect();

    Ok(KpointData {
        weight: raw.weight,
        k_vector: raw.k_vector,
        frequencies,
        atomic_displacements,
    })
}

impl TryFrom<KpointsRepr> for KpointsData {
    type Error = ValidationError;

    fn try_from(repr: KpointsRepr) -> Result<Self, Self::Error> {
        Self::with_acoustic_threshold(repr.unit_cell, repr.kpoints, repr.acoustic_threshold)
    }
}

impl From<KpointsData> for KpointsRepr {
    fn from(data: KpointsData) -> Self {
        Self {
            unit_cell: data.unit_cell,
            acoustic_threshold: data.acoustic_threshold,
            kpoints: data
                .kpoints
                .into_iter()
                .map(|k| RawKpoint {
                    weight: k.weight,
                    k_vector: k.k_vector,
                    frequencies: k.frequencies,
                    atomic_displacements: k.atomic_displacements,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CELL: [[f64; 3]; 3] = [[5.0, 0.0, 0.0], [0.0, 5.0, 0.0], [0.0, 0.0, 5.0]];

    fn displacement(x: f64) -> Displacement {
        [
            Complex64::new(x, 0.0),
            Complex64::new(0.0, x),
            Complex64::new(0.5 * x, 0.0),
        ]
    }

    fn raw_kpoint(frequencies: Vec<f64>, num_atoms: usize) -> RawKpoint {
        let modes = frequencies.len();
        RawKpoint {
            weight: 1.0,
            k_vector: [0.0, 0.0, 0.0],
            atomic_displacements: (0..num_atoms)
                .map(|atom| {
                    (0..modes)
                        .map(|mode| displacement((atom + mode + 1) as f64 * 0.1))
                        .collect()
                })
                .collect(),
            frequencies,
        }
    }

    #[test]
    fn new_filters_acoustic_modes_and_matching_displacements() {
        let raw = raw_kpoint(vec![0.0, 5.0, 10.0, 120.0, 480.0], 2);
        let expected_displacements: Vec<_> = raw.atomic_displacements[1][3..].to_vec();

        let data = KpointsData::new(CELL, vec![raw]).unwrap();
        let k = data.get(0).unwrap();

        assert_eq!(k.frequencies(), &[120.0, 480.0]);
        assert_eq!(k.num_modes(), 2);
        assert_eq!(k.displacements(1).unwrap(), expected_displacements.as_slice());
        assert_eq!(data.num_atoms(), 2);
    }

    #[test]
    fn custom_threshold_is_respected() {
        let raw = raw_kpoint(vec![3.0, 8.0, 50.0], 1);
        let data = KpointsData::with_acoustic_threshold(CELL, vec![raw], 5.0).unwrap();
        assert_eq!(data.get(0).unwrap().frequencies(), &[8.0, 50.0]);
    }

    #[test]
    fn new_rejects_negative_weight() {
        let mut raw = raw_kpoint(vec![100.0], 1);
        raw.weight = -0.5;
        assert!(matches!(
            KpointsData::new(CELL, vec![raw]),
            Err(ValidationError::InvalidWeight { kpoint: 0, .. })
        ));
    }

    #[test]
    fn new_rejects_inconsistent_atom_counts() {
        let first = raw_kpoint(vec![100.0, 200.0], 2);
        let second = raw_kpoint(vec![100.0, 200.0], 3);
        assert!(matches!(
            KpointsData::new(CELL, vec![first, second]),
            Err(ValidationError::AtomCountMismatch {
                expected: 2,
                found: 3,
                ..
            })
        ));
    }

    #[test]
    fn new_rejects_mode_count_mismatch() {
        let mut raw = raw_kpoint(vec![100.0, 200.0], 2);
        raw.atomic_displacements[1].pop();
        assert!(matches!(
            KpointsData::new(CELL, vec![raw]),
            Err(ValidationError::ModeCountMismatch {
                expected: 2,
                found: 1,
                ..
            })
        ));
    }

    #[test]
    fn new_rejects_empty_kpoint_list() {
        assert!(matches!(
            KpointsData::new(CELL, vec![]),
            Err(ValidationError::InvalidValue { field: "kpoints", .. })
        ));
    }

    #[test]
    fn serde_round_trip_preserves_filtered_data() {
        let raw = raw_kpoint(vec![2.0, 150.0, 300.0], 2);
        let data = KpointsData::new(CELL, vec![raw]).unwrap();

        let json = serde_json::to_string(&data).unwrap();
        let restored: KpointsData = serde_json::from_str(&json).unwrap();

        assert_eq!(restored, data);
    }
}
