//! Full stiffness/mass matrix (`.full`) file reader.
//!
//! The FULL file holds the assembled global matrices of a symmetric
//! (symbolic-assembly) solution. Each matrix is stored row by row: for every
//! equation an integer record of 1-based column indices is followed by a
//! floating point record with the matching coefficients. Only one triangle is
//! stored.
//!
//! Lumped mass and unsymmetric matrices use a different layout and are
//! rejected when the file is opened.

use std::cmp::Ordering;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use tracing::{debug, warn};

use crate::error::{MapdlError, Result};
use crate::header::{Header, PointerPair};
use crate::record::{Endian, RecordReader};
use crate::standard_header::{FILE_HEADER_WORD, detect_endian};

pub const SYMBOLIC_FULL_HEADER_KEYS: [&str; 84] = [
    "fun04", "neqn", "nmrow", "nmatrx", "kan", "wfmax", "lenbac", "numdof", "ntermKl", "ntermKh",
    "lumpm", "nmrow", "ntermK_", "keyuns", "extopt", "keyse", "sclstf", "nxrows", "ptrSTFl",
    "ptrSTFh", "ncefull", "ntermMh", "ptrENDl", "ptrENDh", "ptrIRHSl", "ptrIRHSh", "ptrMASl",
    "ptrMASh", "ptrDMPl", "ptrDMPh", "ptrCEl", "ptrCEh", "nNodes", "ntermMl", "ntermDl",
    "ptrDOFl", "ptrDOFh", "ptrRHSl", "ptrRHSh", "ntermDh", "ngMaxNZ", "ptrNGPHl", "ptrNGPHh",
    "minKdiag", "maxKdiag", "minMdiag", "maxMdiag", "minDdiag", "maxDdiag", "ngTerml", "ngTermh",
    "ngTermCl", "ngTermCh", "ptrDIAGKl", "ptrDIAGKh", "ptrDIAGMl", "ptrDIAGMh", "ptrDIAGCl",
    "ptrDIAGCh", "ptrSCLKl", "ptrSCLKh", "Glbneqn", "distKey", "ngTermFl", "ngTermFh",
    "GlbnNodes", "GlbnVars", "GlbfAcCE", "lcAcLen", "GlbfCE", "ptrGmtl", "ptrGmth", "nceGprime",
    "numA12A11", "strctChg", "ntermGl", "ntermGh", "ptrDensel", "ptrDenseh", "nVirtBCs",
    "ptrVrtBCl", "ptrVrtBCh", "ptrMRKl", "ptrMRKh",
];

/// File pointers and term counts split into two words.
pub const FULL_POINTER_PAIRS: [PointerPair; 24] = [
    PointerPair::new("ntermK", "ntermKl", "ntermKh"),
    PointerPair::new("ntermM", "ntermMl", "ntermMh"),
    PointerPair::new("ntermD", "ntermDl", "ntermDh"),
    PointerPair::new("ngTerm", "ngTerml", "ngTermh"),
    PointerPair::new("ngTermC", "ngTermCl", "ngTermCh"),
    PointerPair::new("ngTermF", "ngTermFl", "ngTermFh"),
    PointerPair::new("ntermG", "ntermGl", "ntermGh"),
    PointerPair::new("ptrSTF", "ptrSTFl", "ptrSTFh"),
    PointerPair::new("ptrEND", "ptrENDl", "ptrENDh"),
    PointerPair::new("ptrIRHS", "ptrIRHSl", "ptrIRHSh"),
    PointerPair::new("ptrMAS", "ptrMASl", "ptrMASh"),
    PointerPair::new("ptrDMP", "ptrDMPl", "ptrDMPh"),
    PointerPair::new("ptrCE", "ptrCEl", "ptrCEh"),
    PointerPair::new("ptrDOF", "ptrDOFl", "ptrDOFh"),
    PointerPair::new("ptrRHS", "ptrRHSl", "ptrRHSh"),
    PointerPair::new("ptrNGPH", "ptrNGPHl", "ptrNGPHh"),
    PointerPair::new("ptrDIAGK", "ptrDIAGKl", "ptrDIAGKh"),
    PointerPair::new("ptrDIAGM", "ptrDIAGMl", "ptrDIAGMh"),
    PointerPair::new("ptrDIAGC", "ptrDIAGCl", "ptrDIAGCh"),
    PointerPair::new("ptrSCLK", "ptrSCLKl", "ptrSCLKh"),
    PointerPair::new("ptrGmt", "ptrGmtl", "ptrGmth"),
    PointerPair::new("ptrDense", "ptrDensel", "ptrDenseh"),
    PointerPair::new("ptrVrtBC", "ptrVrtBCl", "ptrVrtBCh"),
    PointerPair::new("ptrMRK", "ptrMRKl", "ptrMRKh"),
];

/// Options for [`FullFile::load_km`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KmOptions {
    /// Build `CscMatrix` output instead of dense matrices.
    pub as_sparse: bool,
    /// Renumber rows/columns in (node, dof) order and sort `dof_ref`.
    pub sort: bool,
}

impl Default for KmOptions {
    fn default() -> Self {
        Self {
            as_sparse: true,
            sort: false,
        }
    }
}

/// Coordinate-format entries of one global matrix.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CooTriplets {
    pub rows: Vec<usize>,
    pub cols: Vec<usize>,
    pub values: Vec<f64>,
}

impl CooTriplets {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn push(&mut self, row: usize, col: usize, value: f64) {
        self.rows.push(row);
        self.cols.push(col);
        self.values.push(value);
    }

    fn retain_unconstrained(&mut self, constrained: &[bool]) {
        let mut kept = CooTriplets::default();
        for ((&r, &c), &v) in self.rows.iter().zip(&self.cols).zip(&self.values) {
            if !constrained[r] && !constrained[c] {
                kept.push(r, c, v);
            }
        }
        *self = kept;
    }

    /// Map rows and columns through `index` and keep each entry in the upper
    /// triangle.
    fn renumber_upper(&mut self, index: &[usize]) {
        for (r, c) in self.rows.iter_mut().zip(self.cols.iter_mut()) {
            let (a, b) = (index[*r], index[*c]);
            *r = a.min(b);
            *c = a.max(b);
        }
    }

    fn to_csc(&self, n: usize) -> Result<CscMatrix<f64>> {
        let coo = CooMatrix::try_from_triplets(
            n,
            n,
            self.rows.clone(),
            self.cols.clone(),
            self.values.clone(),
        )
        .map_err(|e| MapdlError::invalid(format!("failed to build sparse matrix: {e}")))?;
        Ok(CscMatrix::from(&coo))
    }

    fn to_dense(&self, n: usize) -> DMatrix<f64> {
        let mut matrix = DMatrix::zeros(n, n);
        for ((&r, &c), &v) in self.rows.iter().zip(&self.cols).zip(&self.values) {
            matrix[(r, c)] += v;
        }
        matrix
    }
}

/// A global matrix in the requested storage.
#[derive(Debug, Clone, PartialEq)]
pub enum MatrixStorage {
    Sparse(CscMatrix<f64>),
    Dense(DMatrix<f64>),
}

impl MatrixStorage {
    pub fn nrows(&self) -> usize {
        match self {
            MatrixStorage::Sparse(m) => m.nrows(),
            MatrixStorage::Dense(m) => m.nrows(),
        }
    }

    pub fn to_dense(&self) -> DMatrix<f64> {
        match self {
            MatrixStorage::Sparse(m) => DMatrix::from(m),
            MatrixStorage::Dense(m) => m.clone(),
        }
    }

    pub fn as_sparse(&self) -> Option<&CscMatrix<f64>> {
        match self {
            MatrixStorage::Sparse(m) => Some(m),
            MatrixStorage::Dense(_) => None,
        }
    }
}

/// Output of [`FullFile::load_km`].
#[derive(Debug, Clone)]
pub struct KmMatrices {
    /// `[node, dof]` of each equation. Sorted when requested.
    pub dof_ref: Vec<[i32; 2]>,
    pub stiffness: Option<MatrixStorage>,
    pub mass: Option<MatrixStorage>,
    /// `[node, dof]` of every constrained equation.
    pub constrained: Vec<[i32; 2]>,
    pub stiffness_triplets: Option<CooTriplets>,
    pub mass_triplets: Option<CooTriplets>,
}

/// Full matrix file.
#[derive(Debug, Clone)]
pub struct FullFile {
    path: PathBuf,
    endian: Endian,
    header: Header,
}

impl FullFile {
    /// Open a FULL file, rejecting lumped mass and unsymmetric storage.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let endian = detect_endian(path)?;
        let mut reader = RecordReader::open(path, endian)?;
        reader.seek_word(FILE_HEADER_WORD)?;
        let values = reader.read_int_record()?;
        let header = Header::parse(&values, &SYMBOLIC_FULL_HEADER_KEYS, &FULL_POINTER_PAIRS);

        if header.int("lumpm").unwrap_or(0) != 0 {
            return Err(MapdlError::UnsupportedMatrixForm(
                "unable to read a lumped mass matrix".into(),
            ));
        }
        if header.int("keyuns").unwrap_or(0) != 0 {
            return Err(MapdlError::UnsupportedMatrixForm(
                "unable to read an unsymmetric mass/stiffness matrix".into(),
            ));
        }
        debug!(path = %path.display(), neqn = header.int("neqn"), "opened FULL file");

        Ok(Self {
            path: path.to_path_buf(),
            endian,
            header,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Number of equations (matrix dimension).
    pub fn neqn(&self) -> usize {
        self.header.int("neqn").unwrap_or(0).max(0) as usize
    }

    pub fn n_nodes(&self) -> usize {
        self.header.int("nNodes").unwrap_or(0).max(0) as usize
    }

    pub fn n_dof(&self) -> usize {
        self.header.int("numdof").unwrap_or(0).max(0) as usize
    }

    /// Nonzero terms stored for the stiffness matrix.
    pub fn nterm_k(&self) -> i64 {
        self.header.int("ntermK").unwrap_or(0)
    }

    pub fn nterm_m(&self) -> i64 {
        self.header.int("ntermM").unwrap_or(0)
    }

    /// Load the stiffness and mass matrices.
    ///
    /// Rows and columns of constrained equations are dropped from both
    /// matrices; the matrix dimension stays `neqn`. A matrix with no stored
    /// terms comes back as `None`.
    ///
    /// # Errors
    ///
    /// Propagates record decoding failures and reports inconsistent DOF
    /// tables as [`MapdlError::InvalidData`].
    pub fn load_km(&self, options: KmOptions) -> Result<KmMatrices> {
        let neqn = self.neqn();
        let mut reader = RecordReader::open(&self.path, self.endian)?;

        // standard header, full header, DOF list
        for _ in 0..3 {
            reader.skip_record()?;
        }
        let neqv = reader.read_int_record()?;

        reader.seek_word(self.header.require("ptrDOF")?)?;
        let ndof = reader.read_int_record()?;
        let constraints = reader.read_int_record()?;

        let total: i64 = ndof.iter().map(|&n| i64::from(n)).sum();
        if total != neqn as i64 {
            return Err(MapdlError::invalid(format!(
                "DOF counts sum to {total}, header declares {neqn} equations"
            )));
        }
        if constraints.len() < neqn {
            return Err(MapdlError::invalid(format!(
                "constraint table has {} entries for {neqn} equations",
                constraints.len()
            )));
        }
        let constrained: Vec<bool> = constraints[..neqn].iter().map(|&c| c < 0).collect();

        let mut stiffness = self.read_matrix(&mut reader, "stiffness", "ptrSTF", self.nterm_k())?;
        let mut mass = self.read_matrix(&mut reader, "mass", "ptrMAS", self.nterm_m())?;
        if constrained.iter().any(|&c| c) {
            for triplets in [&mut stiffness, &mut mass].into_iter().flatten() {
                triplets.retain_unconstrained(&constrained);
            }
        }

        let unsorted = dof_reference(&neqv, &ndof)?;
        let constrained_ref = unsorted
            .iter()
            .zip(&constrained)
            .filter(|(_, c)| **c)
            .map(|(pair, _)| *pair)
            .collect();

        let dof_ref = if options.sort {
            let (sorted, index) = sort_dof_reference(&unsorted);
            for triplets in [&mut stiffness, &mut mass].into_iter().flatten() {
                triplets.renumber_upper(&index);
            }
            sorted
        } else {
            unsorted
        };

        let build = |triplets: &Option<CooTriplets>| -> Result<Option<MatrixStorage>> {
            triplets
                .as_ref()
                .map(|t| {
                    if options.as_sparse {
                        t.to_csc(neqn).map(MatrixStorage::Sparse)
                    } else {
                        Ok(MatrixStorage::Dense(t.to_dense(neqn)))
                    }
                })
                .transpose()
        };

        Ok(KmMatrices {
            dof_ref,
            stiffness: build(&stiffness)?,
            mass: build(&mass)?,
            constrained: constrained_ref,
            stiffness_triplets: stiffness,
            mass_triplets: mass,
        })
    }

    fn read_matrix<R: Read + Seek>(
        &self,
        reader: &mut RecordReader<R>,
        name: &str,
        pointer_key: &str,
        nterm: i64,
    ) -> Result<Option<CooTriplets>> {
        if nterm == 0 {
            warn!(matrix = name, path = %self.path.display(), "missing {name} matrix");
            return Ok(None);
        }
        reader.seek_word(self.header.require(pointer_key)?)?;
        let triplets = read_row_storage(reader, self.neqn())?;
        if triplets.len() as i64 != nterm {
            warn!(
                matrix = name,
                expected = nterm,
                found = triplets.len(),
                "stored term count differs from header"
            );
        }
        debug!(matrix = name, terms = triplets.len(), "read matrix");
        Ok(Some(triplets))
    }
}

/// Read `neqn` (columns, values) record pairs. Row `i` is equation `i`.
fn read_row_storage<R: Read + Seek>(
    reader: &mut RecordReader<R>,
    neqn: usize,
) -> Result<CooTriplets> {
    let mut triplets = CooTriplets::default();
    for row in 0..neqn {
        let columns = reader.read_record(None, None)?.into_i32()?;
        let values = reader.read_record(None, None)?.into_f64();
        if columns.len() != values.len() {
            return Err(MapdlError::invalid(format!(
                "row {row} has {} column indices and {} values",
                columns.len(),
                values.len()
            )));
        }
        for (&col, &value) in columns.iter().zip(&values) {
            let col = usize::try_from(col - 1)
                .ok()
                .filter(|c| *c < neqn)
                .ok_or_else(|| {
                    MapdlError::invalid(format!("column {col} of row {row} outside 1..={neqn}"))
                })?;
            triplets.push(row, col, value);
        }
    }
    Ok(triplets)
}

/// `[node, dof]` for each equation, in storage order.
fn dof_reference(neqv: &[i32], ndof: &[i32]) -> Result<Vec<[i32; 2]>> {
    if neqv.len() < ndof.len() {
        return Err(MapdlError::invalid(format!(
            "nodal equivalence table has {} entries for {} nodes",
            neqv.len(),
            ndof.len()
        )));
    }
    Ok(neqv
        .iter()
        .zip(ndof)
        .flat_map(|(&node, &count)| (0..count.max(0)).map(move |dof| [node, dof]))
        .collect())
}

/// Sort `[node, dof]` pairs; returns the sorted pairs and, for each storage
/// position, its position in sorted order.
fn sort_dof_reference(dof_ref: &[[i32; 2]]) -> (Vec<[i32; 2]>, Vec<usize>) {
    let mut order: Vec<usize> = (0..dof_ref.len()).collect();
    order.sort_by(|&a, &b| match dof_ref[a][0].cmp(&dof_ref[b][0]) {
        Ordering::Equal => dof_ref[a][1].cmp(&dof_ref[b][1]),
        other => other,
    });
    let mut index = vec![0; dof_ref.len()];
    for (sorted_pos, &original) in order.iter().enumerate() {
        index[original] = sorted_pos;
    }
    let sorted = order.iter().map(|&i| dof_ref[i]).collect();
    (sorted, index)
}
