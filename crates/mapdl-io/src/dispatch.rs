//! Open any supported MAPDL binary file by its file type code.

use std::path::Path;

use tracing::debug;

use crate::cyclic::CyclicResult;
use crate::emat::EmatFile;
use crate::error::{MapdlError, Result};
use crate::full::FullFile;
use crate::rst::{ResultSource, RstFile};
use crate::standard_header::read_file_code;

/// Binary file types, keyed by the file unit number stored in the standard
/// header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    ElementMatrix,
    ElementSaveData,
    FullMatrix,
    Substructure,
    ModalResults,
    ReducedDisplacement,
    Result,
    Database,
    ComponentModeSynthesis,
}

impl FileKind {
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            2 => FileKind::ElementMatrix,
            3 => FileKind::ElementSaveData,
            4 => FileKind::FullMatrix,
            8 => FileKind::Substructure,
            9 => FileKind::ModalResults,
            10 => FileKind::ReducedDisplacement,
            12 => FileKind::Result,
            16 => FileKind::Database,
            45 => FileKind::ComponentModeSynthesis,
            _ => return None,
        })
    }

    pub fn code(self) -> i32 {
        match self {
            FileKind::ElementMatrix => 2,
            FileKind::ElementSaveData => 3,
            FileKind::FullMatrix => 4,
            FileKind::Substructure => 8,
            FileKind::ModalResults => 9,
            FileKind::ReducedDisplacement => 10,
            FileKind::Result => 12,
            FileKind::Database => 16,
            FileKind::ComponentModeSynthesis => 45,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FileKind::ElementMatrix => "Element matrix file",
            FileKind::ElementSaveData => "Element saved data file",
            FileKind::FullMatrix => "Full stiffness-mass matrix File",
            FileKind::Substructure => "Substructure Matrices File",
            FileKind::ModalResults => "Modal Results File",
            FileKind::ReducedDisplacement => "Reduced Displacement File",
            FileKind::Result => "Result file",
            FileKind::Database => "Database file",
            FileKind::ComponentModeSynthesis => "Component Mode Synthesis Matrices (CMS) File",
        }
    }
}

/// Options for [`read_binary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadOptions {
    /// Return cyclic result files as plain [`RstFile`]s.
    pub ignore_cyclic: bool,
}

/// A decoded binary file.
#[derive(Debug, Clone)]
pub enum BinaryFile {
    Emat(EmatFile),
    Full(FullFile),
    Result(RstFile),
    Cyclic(CyclicResult<RstFile>),
}

impl BinaryFile {
    pub fn kind(&self) -> FileKind {
        match self {
            BinaryFile::Emat(_) => FileKind::ElementMatrix,
            BinaryFile::Full(_) => FileKind::FullMatrix,
            BinaryFile::Result(_) | BinaryFile::Cyclic(_) => FileKind::Result,
        }
    }

    pub fn as_emat(&mut self) -> Option<&mut EmatFile> {
        match self {
            BinaryFile::Emat(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_full(&self) -> Option<&FullFile> {
        match self {
            BinaryFile::Full(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_cyclic(&self) -> Option<&CyclicResult<RstFile>> {
        match self {
            BinaryFile::Cyclic(f) => Some(f),
            _ => None,
        }
    }

    /// The result source behind result and cyclic files.
    pub fn as_result(&self) -> Option<&RstFile> {
        match self {
            BinaryFile::Result(f) => Some(f),
            BinaryFile::Cyclic(c) => Some(c.source()),
            _ => None,
        }
    }
}

/// Open `path` with the reader matching its file type code.
///
/// # Errors
///
/// Returns [`MapdlError::UnsupportedFileFormat`] for file types without a
/// reader, naming the file type when it is known.
pub fn read_binary<P: AsRef<Path>>(path: P, options: ReadOptions) -> Result<BinaryFile> {
    let path = path.as_ref();
    let (_, code) = read_file_code(path)?;
    let kind = FileKind::from_code(code);
    debug!(path = %path.display(), code, ?kind, "dispatching binary file");

    match kind {
        Some(FileKind::ElementMatrix) => Ok(BinaryFile::Emat(EmatFile::from_file(path)?)),
        Some(FileKind::FullMatrix) => Ok(BinaryFile::Full(FullFile::from_file(path)?)),
        Some(FileKind::Result) => {
            let rst = RstFile::from_file(path)?;
            if rst.result_header().is_cyclic() && !options.ignore_cyclic {
                Ok(BinaryFile::Cyclic(CyclicResult::new(rst)?))
            } else {
                Ok(BinaryFile::Result(rst))
            }
        }
        Some(other) => Err(MapdlError::UnsupportedFileFormat {
            code,
            label: other.label().to_string(),
        }),
        None => Err(MapdlError::UnsupportedFileFormat {
            code,
            label: format!("unknown file type {code}"),
        }),
    }
}
