use crate::core::constants::TEMPERATURE_TOLERANCE;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

const CACHE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Cache serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cache group '{0}' not found")]
    MissingGroup(String),

    #[error("Cached {field} '{cached}' does not match the current '{expected}'")]
    Inconsistent {
        field: &'static str,
        cached: String,
        expected: String,
    },

    #[error("Unsupported cache format version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },
}

/// Key attributes stored with every cache group.
///
/// A cached group is only served when every attribute set on the expected side matches
/// the stored one; temperatures compare within [`TEMPERATURE_TOLERANCE`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CacheAttributes {
    /// Content hash of the source input file.
    pub hash: String,
    /// Serialized fingerprint of the parameters that influence the result.
    pub advanced_parameters: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoconvolution: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_form: Option<String>,
}

impl CacheAttributes {
    pub fn new(hash: impl Into<String>, advanced_parameters: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            advanced_parameters: advanced_parameters.into(),
            ..Default::default()
        }
    }

    pub fn with_instrument(mut self, label: impl Into<String>) -> Self {
        self.instrument = Some(label.into());
        self
    }

    pub fn with_autoconvolution(mut self, enabled: bool) -> Self {
        self.autoconvolution = Some(enabled);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_sample_form(mut self, sample_form: impl Into<String>) -> Self {
        self.sample_form = Some(sample_form.into());
        self
    }

    /// Checks stored attributes (`self`) against the ones the caller expects.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Inconsistent`] naming the first mismatching attribute.
    pub fn check(&self, expected: &CacheAttributes) -> Result<(), CacheError> {
        fn mismatch<T: std::fmt::Debug>(field: &'static str, cached: T, expected: T) -> CacheError {
            CacheError::Inconsistent {
                field,
                cached: format!("{cached:?}"),
                expected: format!("{expected:?}"),
            }
        }

        if self.hash != expected.hash {
            return Err(mismatch("hash", &self.hash, &expected.hash));
        }
        if self.advanced_parameters != expected.advanced_parameters {
            return Err(mismatch(
                "advanced_parameters",
                &self.advanced_parameters,
                &expected.advanced_parameters,
            ));
        }
        if expected.instrument.is_some() && self.instrument != expected.instrument {
            return Err(mismatch("instrument", &self.instrument, &expected.instrument));
        }
        if expected.autoconvolution.is_some() && self.autoconvolution != expected.autoconvolution {
            return Err(mismatch(
                "autoconvolution",
                &self.autoconvolution,
                &expected.autoconvolution,
            ));
        }
        if expected.sample_form.is_some() && self.sample_form != expected.sample_form {
            return Err(mismatch("sample_form", &self.sample_form, &expected.sample_form));
        }
        if let Some(t) = expected.temperature {
            let same = self
                .temperature
                .is_some_and(|cached| (cached - t).abs() < TEMPERATURE_TOLERANCE);
            if !same {
                return Err(mismatch("temperature", &self.temperature, &expected.temperature));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheGroup {
    attributes: CacheAttributes,
    data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    groups: BTreeMap<String, CacheGroup>,
}

impl Default for CacheFile {
    fn default() -> Self {
        Self {
            version: CACHE_FORMAT_VERSION,
            groups: BTreeMap::new(),
        }
    }
}

/// A per-input cache file holding named groups of attributed data.
///
/// One writer per cache file is assumed; concurrent writers are not coordinated.
#[derive(Debug, Clone)]
pub struct StructuredCache {
    path: PathBuf,
}

impl StructuredCache {
    /// The cache for input `input_name`, stored as one JSON file inside `cache_dir`.
    pub fn for_input(cache_dir: impl AsRef<Path>, input_name: &str) -> Self {
        let stem: String = input_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        Self {
            path: cache_dir.as_ref().join(format!("{stem}.cache.json")),
        }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stores `data` under `group`, replacing any previous content of that group.
    pub fn save<T: Serialize>(
        &self,
        group: &str,
        attributes: &CacheAttributes,
        data: &T,
    ) -> Result<(), CacheError> {
        let mut file = match self.read_file() {
            Ok(file) => file,
            Err(e) => {
                debug!(path = %self.path.display(), "Starting a new cache file ({e}).");
                CacheFile::default()
            }
        };
        file.groups.insert(
            group.to_string(),
            CacheGroup {
                attributes: attributes.clone(),
                data: serde_json::to_value(data)?,
            },
        );

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(&file)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Loads `group` if its stored attributes match `expected`.
    ///
    /// # Errors
    ///
    /// Any missing file, missing group, attribute mismatch or undecodable payload is an
    /// error; callers treat all of them as a cache miss.
    pub fn load<T: DeserializeOwned>(
        &self,
        group: &str,
        expected: &CacheAttributes,
    ) -> Result<T, CacheError> {
        let mut file = self.read_file()?;
        let stored = file
            .groups
            .remove(group)
            .ok_or_else(|| CacheError::MissingGroup(group.to_string()))?;
        stored.attributes.check(expected)?;
        Ok(serde_json::from_value(stored.data)?)
    }

    /// Removes the cache file if it exists.
    pub fn erase(&self) -> Result<(), CacheError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn read_file(&self) -> Result<CacheFile, CacheError> {
        let bytes = fs::read(&self.path)?;
        let file: CacheFile = serde_json::from_slice(&bytes)?;
        if file.version != CACHE_FORMAT_VERSION {
            return Err(CacheError::Version {
                found: file.version,
                expected: CACHE_FORMAT_VERSION,
            });
        }
        Ok(file)
    }
}

/// Hex-encoded SHA-256 digest of `bytes`.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Hex-encoded SHA-256 digest of the file at `path`.
pub fn hash_file(path: impl AsRef<Path>) -> Result<String, CacheError> {
    Ok(hash_bytes(&fs::read(path)?))
}
