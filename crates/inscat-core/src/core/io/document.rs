use crate::core::io::traits::DataFile;
use crate::core::models::abins_data::{AbinsData, AbinsDataDocument};
use crate::core::models::error::ValidationError;
use std::io::{self, BufRead, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid document: {0}")]
    Validation(#[from] ValidationError),
}

/// The versioned JSON document form of [`AbinsData`].
pub struct AbinsJsonFile;

impl DataFile for AbinsJsonFile {
    type Value = AbinsData;
    type Error = DocumentError;

    fn read_from(reader: &mut impl BufRead) -> Result<AbinsData, DocumentError> {
        let document: AbinsDataDocument = serde_json::from_reader(reader)?;
        Ok(AbinsData::from_document(document)?)
    }

    fn write_to(value: &AbinsData, writer: &mut impl Write) -> Result<(), DocumentError> {
        serde_json::to_writer_pretty(&mut *writer, &value.to_document())?;
        writeln!(writer)?;
        Ok(())
    }
}

pub fn load_json<P: AsRef<Path>>(path: P) -> Result<AbinsData, DocumentError> {
    AbinsJsonFile::read_from_path(path)
}

pub fn save_json<P: AsRef<Path>>(data: &AbinsData, path: P) -> Result<(), DocumentError> {
    AbinsJsonFile::write_to_path(data, path)
}
