use super::atoms::AtomsData;
use super::error::ValidationError;
use super::kpoints::KpointsData;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Format tag carried by serialized [`AbinsData`] documents.
pub const ABINS_DATA_FORMAT: &str = "inscat-abins-data";

/// Current version of the serialized [`AbinsData`] document layout.
pub const ABINS_DATA_VERSION: u32 = 1;

/// The complete, validated vibrational data of one ab-initio calculation.
///
/// `AbinsData` exclusively owns its [`KpointsData`] and [`AtomsData`]. It is the
/// contract between external loaders and the engine: once constructed, the engine
/// never re-validates it.
#[derive(Debug, Clone, PartialEq)]
pub struct AbinsData {
    kpoints: KpointsData,
    atoms: AtomsData,
}

/// The JSON-compatible, versioned form of [`AbinsData`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbinsDataDocument {
    pub format: String,
    pub version: u32,
    pub atoms: AtomsData,
    pub kpoints: KpointsData,
}

impl AbinsData {
    /// Combines atoms and k-points after checking that they describe the same structure.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::AtomCountMismatch`] if the k-point displacements do not
    /// cover exactly the atoms in `atoms`.
    pub fn new(atoms: AtomsData, kpoints: KpointsData) -> Result<Self, ValidationError> {
        if kpoints.num_atoms() != atoms.len() {
            return Err(ValidationError::AtomCountMismatch {
                context: "atomic displacements".to_string(),
                expected: atoms.len(),
                found: kpoints.num_atoms(),
            });
        }
        Ok(Self { kpoints, atoms })
    }

    #[inline]
    pub fn get_kpoints_data(&self) -> &KpointsData {
        &self.kpoints
    }

    #[inline]
    pub fn get_atoms_data(&self) -> &AtomsData {
        &self.atoms
    }

    pub fn to_document(&self) -> AbinsDataDocument {
        AbinsDataDocument {
            format: ABINS_DATA_FORMAT.to_string(),
            version: ABINS_DATA_VERSION,
            atoms: self.atoms.clone(),
            kpoints: self.kpoints.clone(),
        }
    }

    /// Rebuilds `AbinsData` from a document, checking its format tag and version.
    pub fn from_document(document: AbinsDataDocument) -> Result<Self, ValidationError> {
        if document.format != ABINS_DATA_FORMAT || document.version != ABINS_DATA_VERSION {
            return Err(ValidationError::UnsupportedFormat {
                format: document.format,
                version: document.version,
            });
        }
        Self::new(document.atoms, document.kpoints)
    }

    pub fn to_json_value(&self) -> Result<Value, ValidationError> {
        serde_json::to_value(self.to_document())
            .map_err(|e| ValidationError::Malformed(e.to_string()))
    }

    pub fn from_json_value(value: Value) -> Result<Self, ValidationError> {
        let document: AbinsDataDocument =
            serde_json::from_value(value).map_err(|e| ValidationError::Malformed(e.to_string()))?;
        Self::from_document(document)
    }
}
