//! Element matrix (`.emat`) file reader.
//!
//! The EMAT file stores every element's stiffness, mass, damping and
//! stress-stiffening matrices plus its load vectors before assembly. After the
//! standard header comes a 40-word EMAT header at word 103, followed by the
//! DOF, nodal/element equivalence and index tables. Each element's data is a
//! run of records starting at the offset stored in the index table:
//!
//! ```text
//! [10-word element header][dof index table][K][M][C][SS][F][NR][I]
//! ```
//!
//! Only the records whose presence key in the element header is nonzero are
//! written, always in that order.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mapdl_io::{ElementDataKind, EmatFile};
//!
//! let mut emat = EmatFile::from_file("file.emat")?;
//! let element = emat.read_element(0, ElementDataKind::ALL)?;
//! let stiffness = element.get(ElementDataKind::Stiffness);
//! println!("{} dofs, stiffness present: {}", element.dof_idx.len(), stiffness.is_some());
//! # Ok::<(), mapdl_io::MapdlError>(())
//! ```

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::{Path, PathBuf};

use nalgebra::DMatrix;
use serde::Serialize;
use tracing::debug;

use crate::dof::dof_label;
use crate::error::{MapdlError, Result};
use crate::header::{Header, PointerPair, two_ints_to_long};
use crate::record::{Endian, RecordReader};
use crate::standard_header::{FILE_HEADER_WORD, detect_endian};

pub const EMAT_HEADER_KEYS: [&str; 40] = [
    "fun02", "nume", "numdof", "lenu", "lenbac", "maxn", "nlgeEMA", "sstEMAT", "nodref", "lumpm",
    "kygst", "kygm", "kycd", "kygss", "kygaf", "kygrf", "0", "Glblenbac", "ptrGBkl", "ptrGBkh",
    "ptrElmh", "ptrFSTh", "ptrLSTh", "ptrBITh", "ptrEHDh", "ptrIDXh", "numCE", "maxLeng", "ptrCEl",
    "ptrCEh", "ptrDOF", "ptrBAC", "ptrElml", "ptrFSTl", "ptrLSTl", "ptrBITl", "ptrEHDl", "ptrIDXl",
    "ptrendH", "ptrendL",
];

pub const EMAT_POINTER_PAIRS: [PointerPair; 8] = [
    PointerPair::new("ptrGBk", "ptrGBkl", "ptrGBkh"),
    PointerPair::new("ptrElm", "ptrElml", "ptrElmh"),
    PointerPair::new("ptrFST", "ptrFSTl", "ptrFSTh"),
    PointerPair::new("ptrLST", "ptrLSTl", "ptrLSTh"),
    PointerPair::new("ptrBIT", "ptrBITl", "ptrBITh"),
    PointerPair::new("ptrEHD", "ptrEHDl", "ptrEHDh"),
    PointerPair::new("ptrIDX", "ptrIDXl", "ptrIDXh"),
    PointerPair::new("ptrCE", "ptrCEl", "ptrCEh"),
];

pub const ELEMENT_HEADER_KEYS: [&str; 10] = [
    "stkey", "mkey", "dkey", "sskey", "akey", "nrkey", "ikey", "_", "_", "nmrow",
];

/// Sub-records stored per element, in on-disk order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ElementDataKind {
    Stiffness,
    Mass,
    Damping,
    StressStiffening,
    AppliedForce,
    NewtonRaphson,
    ImaginaryLoad,
}

impl ElementDataKind {
    pub const ALL: &'static [ElementDataKind] = &[
        ElementDataKind::Stiffness,
        ElementDataKind::Mass,
        ElementDataKind::Damping,
        ElementDataKind::StressStiffening,
        ElementDataKind::AppliedForce,
        ElementDataKind::NewtonRaphson,
        ElementDataKind::ImaginaryLoad,
    ];

    /// Name used for this record in decoded element data. The stiffness
    /// matrix is keyed `"stress"` for compatibility with existing tooling.
    pub fn key(self) -> &'static str {
        match self {
            ElementDataKind::Stiffness => "stress",
            ElementDataKind::Mass => "mass",
            ElementDataKind::Damping => "damping",
            ElementDataKind::StressStiffening => "stress_stiff",
            ElementDataKind::AppliedForce => "applied_force",
            ElementDataKind::NewtonRaphson => "newton_raphson",
            ElementDataKind::ImaginaryLoad => "imaginary_load",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.key() == key)
    }

    /// Presence key in the element header.
    fn header_key(self) -> &'static str {
        match self {
            ElementDataKind::Stiffness => "stkey",
            ElementDataKind::Mass => "mkey",
            ElementDataKind::Damping => "dkey",
            ElementDataKind::StressStiffening => "sskey",
            ElementDataKind::AppliedForce => "akey",
            ElementDataKind::NewtonRaphson => "nrkey",
            ElementDataKind::ImaginaryLoad => "ikey",
        }
    }

    /// Load vectors have `nmrow` entries; matrices are square or packed.
    pub fn is_vector(self) -> bool {
        matches!(
            self,
            ElementDataKind::AppliedForce
                | ElementDataKind::NewtonRaphson
                | ElementDataKind::ImaginaryLoad
        )
    }
}

/// The 10-word header in front of each element's records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ElementMatrixHeader {
    present: BTreeMap<ElementDataKind, bool>,
    /// Signed row count; negative means lower-triangular storage.
    pub nmrow: i32,
}

impl ElementMatrixHeader {
    pub fn from_header(header: &Header) -> Result<Self> {
        let present = ElementDataKind::ALL
            .iter()
            .map(|kind| Ok((*kind, header.require(kind.header_key())? != 0)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        let nmrow = header.require("nmrow")? as i32;
        Ok(Self { present, nmrow })
    }

    pub fn is_present(&self, kind: ElementDataKind) -> bool {
        self.present.get(&kind).copied().unwrap_or(false)
    }

    pub fn n_rows(&self) -> usize {
        self.nmrow.unsigned_abs() as usize
    }

    pub fn is_lower_triangular(&self) -> bool {
        self.nmrow < 0
    }

    /// Number of doubles stored for `kind`.
    pub fn record_len(&self, kind: ElementDataKind) -> Result<usize> {
        let n = self.n_rows();
        let len = if kind.is_vector() {
            Some(n)
        } else if self.is_lower_triangular() {
            n.checked_mul(n + 1).map(|v| v / 2)
        } else {
            n.checked_mul(n)
        };
        len.ok_or_else(|| MapdlError::invalid(format!("{n}-row element matrix overflows")))
    }
}

/// Decoded records of one element.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElementData {
    pub header: ElementMatrixHeader,
    /// Zero-based global DOF index of each matrix row,
    /// `(node_position * numdof) + dof - 1`.
    pub dof_idx: Vec<i32>,
    pub records: BTreeMap<ElementDataKind, Vec<f64>>,
}

impl ElementData {
    pub fn get(&self, kind: ElementDataKind) -> Option<&[f64]> {
        self.records.get(&kind).map(Vec::as_slice)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        ElementDataKind::from_key(key).is_some_and(|kind| self.records.contains_key(&kind))
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.records.keys().map(|kind| kind.key())
    }
}

/// Element matrix file with lazily loaded lookup tables.
#[derive(Debug, Clone)]
pub struct EmatFile {
    path: PathBuf,
    endian: Endian,
    header: Header,
    index_table: Option<Vec<i64>>,
    neqv: Option<Vec<i32>>,
    nnum: Option<Vec<i32>>,
    eeqv: Option<Vec<i32>>,
    enum_sorted: Option<Vec<i32>>,
}

impl EmatFile {
    /// Open an EMAT file and decode its header.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let endian = detect_endian(path)?;
        let header = read_emat_header(path, endian)?;
        debug!(
            path = %path.display(),
            nume = header.int("nume"),
            numdof = header.int("numdof"),
            "opened EMAT file"
        );
        Ok(Self {
            path: path.to_path_buf(),
            endian,
            header,
            index_table: None,
            neqv: None,
            nnum: None,
            eeqv: None,
            enum_sorted: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Number of DOFs per node.
    pub fn n_dof(&self) -> usize {
        self.header.int("numdof").unwrap_or(0).max(0) as usize
    }

    pub fn n_nodes(&self) -> usize {
        self.header.int("lenbac").unwrap_or(0).max(0) as usize
    }

    pub fn n_elements(&self) -> usize {
        self.header.int("nume").unwrap_or(0).max(0) as usize
    }

    fn open_reader(&self) -> Result<RecordReader<BufReader<File>>> {
        RecordReader::open(&self.path, self.endian)
    }

    fn read_int_table(&self, pointer_key: &str) -> Result<Vec<i32>> {
        let mut reader = self.open_reader()?;
        reader.seek_word(self.header.require(pointer_key)?)?;
        reader.read_int_record()
    }

    /// Word offset of each element's data, indexed by storage position.
    pub fn element_matrices_index_table(&mut self) -> Result<&[i64]> {
        let table = match self.index_table.take() {
            Some(table) => table,
            None => {
                let raw = self.read_int_table("ptrIDX")?;
                combine_index_table(&raw, self.n_elements())
            }
        };
        Ok(self.index_table.insert(table).as_slice())
    }

    /// Nodal equivalence table: storage position → node number.
    pub fn neqv(&mut self) -> Result<&[i32]> {
        let table = match self.neqv.take() {
            Some(table) => table,
            None => self.read_int_table("ptrBAC")?,
        };
        Ok(self.neqv.insert(table).as_slice())
    }

    /// Sorted node numbers.
    pub fn nnum(&mut self) -> Result<&[i32]> {
        let sorted = match self.nnum.take() {
            Some(sorted) => sorted,
            None => sorted_copy(self.neqv()?),
        };
        Ok(self.nnum.insert(sorted).as_slice())
    }

    /// Element equivalence table: solution order → element number.
    pub fn eeqv(&mut self) -> Result<&[i32]> {
        let table = match self.eeqv.take() {
            Some(table) => table,
            None => self.read_int_table("ptrElm")?,
        };
        Ok(self.eeqv.insert(table).as_slice())
    }

    /// Sorted element numbers.
    pub fn enum_(&mut self) -> Result<&[i32]> {
        let sorted = match self.enum_sorted.take() {
            Some(sorted) => sorted,
            None => sorted_copy(self.eeqv()?),
        };
        Ok(self.enum_sorted.insert(sorted).as_slice())
    }

    /// DOF reference numbers used in the model, with their labels.
    pub fn dof_labels(&self) -> Result<Vec<(i32, Option<&'static str>)>> {
        let codes = self.read_int_table("ptrDOF")?;
        let n = self.n_dof().min(codes.len());
        Ok(codes[..n].iter().map(|&c| (c, dof_label(c))).collect())
    }

    /// Decode element `index` (storage position, not element number).
    ///
    /// Only the kinds listed in `kinds` are decoded; the others are skipped
    /// without reading their payload.
    ///
    /// # Errors
    ///
    /// Returns [`MapdlError::InvalidData`] when `index` is outside the index
    /// table, and propagates record decoding failures.
    pub fn read_element(&mut self, index: usize, kinds: &[ElementDataKind]) -> Result<ElementData> {
        let offset = self.element_offset(index)?;
        let mut reader = self.open_reader()?;
        read_element_at(&mut reader, offset, kinds)
    }

    fn element_offset(&mut self, index: usize) -> Result<i64> {
        let table = self.element_matrices_index_table()?;
        table.get(index).copied().ok_or_else(|| {
            MapdlError::invalid(format!(
                "element index {index} out of range for {} elements",
                table.len()
            ))
        })
    }

    /// Applied force at each node, averaged over the elements sharing it.
    ///
    /// Rows follow the sorted node numbers ([`EmatFile::nnum`]), columns are
    /// the three translational DOFs.
    ///
    /// # Errors
    ///
    /// Fails with [`MapdlError::UnsupportedDofLayout`] unless the file has
    /// exactly three DOFs per node.
    pub fn global_applied_force(&mut self) -> Result<DMatrix<f64>> {
        let numdof = self.n_dof();
        if numdof != 3 {
            return Err(MapdlError::UnsupportedDofLayout {
                operation: "global_applied_force",
                numdof: numdof as i64,
            });
        }

        let n_nodes = self.n_nodes();
        let size = n_nodes * numdof;
        let mut force = vec![0.0; size];
        let mut hits = vec![0u32; size];

        let offsets = self.element_matrices_index_table()?.to_vec();
        let mut reader = self.open_reader()?;
        for &offset in offsets.iter().take(self.n_elements()) {
            let element = read_element_at(&mut reader, offset, &[ElementDataKind::AppliedForce])?;
            let Some(applied) = element.get(ElementDataKind::AppliedForce) else {
                continue;
            };
            for (&slot, &value) in element.dof_idx.iter().zip(applied) {
                let slot = usize::try_from(slot)
                    .ok()
                    .filter(|s| *s < size)
                    .ok_or_else(|| {
                        MapdlError::invalid(format!("DOF index {slot} outside {size} model DOFs"))
                    })?;
                force[slot] += value;
                hits[slot] += 1;
            }
        }

        for (value, &count) in force.iter_mut().zip(&hits) {
            if count > 0 {
                *value /= f64::from(count);
            }
        }

        let neqv = self.neqv()?;
        if neqv.len() != n_nodes {
            return Err(MapdlError::invalid(format!(
                "nodal equivalence table has {} entries, header declares {n_nodes} nodes",
                neqv.len()
            )));
        }
        let dof_eqv: Vec<i64> = neqv
            .iter()
            .flat_map(|&node| (0..3).map(move |c| i64::from(node) * 3 + c))
            .collect();
        let mut order: Vec<usize> = (0..size).collect();
        order.sort_by_key(|&i| dof_eqv[i]);
        let sorted: Vec<f64> = order.iter().map(|&i| force[i]).collect();

        Ok(DMatrix::from_row_slice(n_nodes, 3, &sorted))
    }
}

fn read_emat_header(path: &Path, endian: Endian) -> Result<Header> {
    let mut reader = RecordReader::open(path, endian)?;
    reader.seek_word(FILE_HEADER_WORD)?;
    let values = reader.read_int_record()?;
    Ok(Header::parse(&values, &EMAT_HEADER_KEYS, &EMAT_POINTER_PAIRS))
}

fn read_element_at<R: Read + Seek>(
    reader: &mut RecordReader<R>,
    offset: i64,
    kinds: &[ElementDataKind],
) -> Result<ElementData> {
    reader.seek_word(offset)?;
    let raw = reader.read_int_record()?;
    let header = ElementMatrixHeader::from_header(&Header::parse(&raw, &ELEMENT_HEADER_KEYS, &[]))?;

    // 1-based in the file
    let dof_idx: Vec<i32> = reader.read_int_record()?.into_iter().map(|d| d - 1).collect();
    if dof_idx.len() != header.n_rows() {
        return Err(MapdlError::invalid(format!(
            "element at word {offset} has {} DOF indices for {} matrix rows",
            dof_idx.len(),
            header.n_rows()
        )));
    }

    let mut records = BTreeMap::new();
    for &kind in ElementDataKind::ALL {
        if !header.is_present(kind) {
            continue;
        }
        let len = header.record_len(kind)?;
        if kinds.contains(&kind) {
            records.insert(kind, reader.read_double_record(len)?);
        } else {
            reader.skip_bytes(skipped_bytes(len)?)?;
        }
    }

    Ok(ElementData {
        header,
        dof_idx,
        records,
    })
}

/// Bytes occupied by a record of `len` doubles: payload plus the two
/// envelopes around it.
fn skipped_bytes(len: usize) -> Result<i64> {
    len.checked_mul(8)
        .and_then(|b| b.checked_add(12))
        .and_then(|b| i64::try_from(b).ok())
        .ok_or_else(|| MapdlError::invalid(format!("record of {len} doubles overflows")))
}

/// Combine `nume` low words and `nume` high words into 64-bit offsets.
fn combine_index_table(raw: &[i32], nume: usize) -> Vec<i64> {
    if nume > 0 && raw.len() >= 2 * nume {
        (0..nume)
            .map(|i| two_ints_to_long(raw[i], raw[nume + i]))
            .collect()
    } else {
        raw.iter().map(|&w| i64::from(w)).collect()
    }
}

fn sorted_copy(values: &[i32]) -> Vec<i32> {
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element_header(keys: [i32; 7], nmrow: i32) -> ElementMatrixHeader {
        let mut raw = keys.to_vec();
        raw.extend([0, 0, nmrow]);
        ElementMatrixHeader::from_header(&Header::parse(&raw, &ELEMENT_HEADER_KEYS, &[]))
            .expect("complete element header")
    }

    #[test]
    fn packed_and_full_record_lengths() {
        let packed = element_header([1, 1, 0, 0, 1, 0, 0], -24);
        assert!(packed.is_lower_triangular());
        assert_eq!(packed.record_len(ElementDataKind::Stiffness).unwrap(), 24 * 25 / 2);
        assert_eq!(packed.record_len(ElementDataKind::AppliedForce).unwrap(), 24);

        let full = element_header([1, 0, 0, 0, 0, 0, 0], 6);
        assert_eq!(full.record_len(ElementDataKind::Mass).unwrap(), 36);
        assert!(full.is_present(ElementDataKind::Stiffness));
        assert!(!full.is_present(ElementDataKind::Mass));
    }

    #[test]
    fn huge_row_count_does_not_overflow_skip() {
        let header = element_header([1, 0, 0, 0, 0, 0, 0], i32::MIN);
        assert_eq!(header.n_rows(), 1 << 31);
        let err = header
            .record_len(ElementDataKind::Stiffness)
            .and_then(skipped_bytes)
            .expect_err("must fail");
        assert!(matches!(err, MapdlError::InvalidData(_)));
        assert_eq!(skipped_bytes(2).unwrap(), 28);
    }

    #[test]
    fn index_table_combines_halves() {
        let raw = [10, 20, 30, 0, 1, 0];
        assert_eq!(combine_index_table(&raw, 3), vec![10, (1 << 32) + 20, 30]);
        assert_eq!(combine_index_table(&[7, 8], 2), vec![7, 8]);
    }

    #[test]
    fn element_kind_keys() {
        assert_eq!(ElementDataKind::Stiffness.key(), "stress");
        assert_eq!(
            ElementDataKind::from_key("stress_stiff"),
            Some(ElementDataKind::StressStiffening)
        );
        assert_eq!(ElementDataKind::from_key("bogus"), None);
    }

    #[test]
    fn header_pairs_cover_every_split_pointer() {
        for key in EMAT_HEADER_KEYS {
            if key.starts_with("ptr") && key.ends_with('h') {
                let base = &key[..key.len() - 1];
                assert!(
                    EMAT_POINTER_PAIRS.iter().any(|p| p.name == base),
                    "{key} has no pair"
                );
            }
        }
    }
}
