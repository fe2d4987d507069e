//! Error types for mapdl-io

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MapdlError>;

#[derive(Error, Debug)]
pub enum MapdlError {
    #[error("{path}: unable to determine endian type, possibly not an ANSYS binary file")]
    NotAnAnsysBinaryFile { path: String },

    #[error("unexpected end of file while reading {context}")]
    TruncatedFile { context: String },

    #[error(
        "record uses {compression} storage which is not supported; \
         re-export the file without sparse/compressed records"
    )]
    UnsupportedRecordFormat { compression: &'static str },

    #[error("unsupported matrix form: {0}")]
    UnsupportedMatrixForm(String),

    #[error("ANSYS binary \"{label}\" (format code {code}) not supported")]
    UnsupportedFileFormat { code: i32, label: String },

    #[error("invalid harmonic index {hindex}; available indices: {available:?}")]
    InvalidHarmonicIndex { hindex: i32, available: Vec<i32> },

    #[error("invalid mode {mode} for harmonic index {hindex}; available modes: {available:?}")]
    InvalidMode {
        hindex: i32,
        mode: usize,
        available: Vec<usize>,
    },

    #[error("harmonic index {hindex} and mode {mode} match results {matches:?}")]
    AmbiguousMode {
        hindex: i32,
        mode: usize,
        matches: Vec<usize>,
    },

    #[error(
        "result {result} (harmonic index {hindex}) pairs with result {partner} \
         whose frequency differs ({frequency} vs {partner_frequency})"
    )]
    InconsistentHarmonicPair {
        result: usize,
        partner: usize,
        hindex: i32,
        frequency: f64,
        partner_frequency: f64,
    },

    #[error("result is not a cyclic model (nSector = {0})")]
    NotCyclic(i32),

    #[error("unsupported analysis: {0}")]
    UnsupportedAnalysis(String),

    #[error("{operation} assumes 3 DOF per node, file has {numdof}")]
    UnsupportedDofLayout {
        operation: &'static str,
        numdof: i64,
    },

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MapdlError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        MapdlError::InvalidData(message.into())
    }
}
