//! Readers for MAPDL binary files.
//!
//! This crate provides:
//! - **Record codec** for the Fortran-style record framing (flag word, sparse
//!   and integer payloads, 64-bit pointer pairs)
//! - **Standard header** decoding shared by every binary file
//! - **EMAT** element matrix reader with global applied force assembly
//! - **FULL** stiffness and mass matrix reader (sparse or dense output)
//! - **RST** result file reader for nodal solutions
//! - **Cyclic symmetry** expansion of master sector results to the full rotor
//! - [`read_binary`] to open any of the above by file type code

pub mod error;
pub mod record;
pub mod header;
pub mod standard_header;
pub mod dof;
pub mod emat;
pub mod full;
pub mod rst;
pub mod cyclic;
pub mod dispatch;

pub use error::{MapdlError, Result};
pub use record::{Dtype, Endian, RecordData, RecordFlags, RecordReader};
pub use header::{Header, HeaderValue, PointerPair, long_to_two_ints, two_ints_to_long};
pub use standard_header::{StandardHeader, Units, read_file_code, read_standard_header};
pub use dof::{dof_code, dof_label};
pub use emat::{ElementData, ElementDataKind, ElementMatrixHeader, EmatFile};
pub use full::{CooTriplets, FullFile, KmMatrices, KmOptions, MatrixStorage};
pub use rst::{ResultHeader, ResultSource, RstFile};
pub use cyclic::{CyclicOptions, CyclicResult, CyclicSolution, CyclicValues};
pub use dispatch::{BinaryFile, FileKind, ReadOptions, read_binary};
