use super::elements::is_valid_symbol;
use super::error::ValidationError;
use serde::{Deserialize, Serialize};

/// A single atom of the simulated structure.
///
/// Atoms are identified by their position in [`AtomsData`]; the `sort` field groups
/// symmetry-equivalent atoms (or simply atoms of the same species) as reported by the
/// vibrational code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Atom {
    /// The chemical element symbol (e.g. "C", "H", "D").
    pub symbol: String,
    /// The atomic mass in amu.
    pub mass: f64,
    /// The sort (species group) index of the atom.
    pub sort: usize,
    /// The fractional or Cartesian coordinate reported by the source calculation.
    pub coordinate: [f64; 3],
}

impl Atom {
    /// Creates a new `Atom` without validating it.
    ///
    /// Validation happens when the atom is placed into [`AtomsData`].
    pub fn new(symbol: &str, mass: f64, sort: usize, coordinate: [f64; 3]) -> Self {
        Self {
            symbol: symbol.to_string(),
            mass,
            sort,
            coordinate,
        }
    }

    fn validate(&self, index: usize) -> Result<(), ValidationError> {
        if !is_valid_symbol(&self.symbol) {
            return Err(ValidationError::UnknownElement {
                atom: index,
                symbol: self.symbol.clone(),
            });
        }
        if !self.mass.is_finite() || self.mass <= 0.0 {
            return Err(ValidationError::InvalidMass {
                atom: index,
                mass: self.mass,
            });
        }
        if self.coordinate.iter().any(|c| !c.is_finite()) {
            return Err(ValidationError::InvalidCoordinate { atom: index });
        }
        Ok(())
    }
}

/// The validated, immutable set of atoms of one vibrational calculation.
///
/// `atom_i` in the rest of the engine refers to the `i`-th entry of this collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Atom>", into = "Vec<Atom>")]
pub struct AtomsData {
    atoms: Vec<Atom>,
}

impl AtomsData {
    /// Validates and wraps a list of atoms.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if any atom has an unknown element symbol, a
    /// non-positive or non-finite mass, or a non-finite coordinate.
    pub fn new(atoms: Vec<Atom>) -> Result<Self, ValidationError> {
        for (index, atom) in atoms.iter().enumerate() {
            atom.validate(index)?;
        }
        Ok(Self { atoms })
    }

    /// Returns a copy of the atoms, suitable for reconstructing an identical `AtomsData`.
    pub fn extract(&self) -> Vec<Atom> {
        self.atoms.clone()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Atom> {
        self.atoms.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Atom> {
        self.atoms.iter()
    }

    pub fn masses(&self) -> Vec<f64> {
        self.atoms.iter().map(|atom| atom.mass).collect()
    }
}

impl TryFrom<Vec<Atom>> for AtomsData {
    type Error = ValidationError;

    fn try_from(atoms: Vec<Atom>) -> Result<Self, Self::Error> {
        Self::new(atoms)
    }
}

impl From<AtomsData> for Vec<Atom> {
    fn from(data: AtomsData) -> Self {
        data.atoms
    }
}
