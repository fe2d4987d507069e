//! Minimal result (`.rst`) file reader.
//!
//! Only the parts needed to locate result sets and read the nodal DOF
//! solution are decoded: the result header at word 103, the nodal and element
//! equivalence tables, the data set index table, time values, the load step
//! table and the harmonic index table of cyclic models. Geometry, element
//! results and coordinate transformations are left to other tools, so nodal
//! solutions are returned in the nodal coordinate system.

use std::path::{Path, PathBuf};

use nalgebra::DMatrix;
use serde::Serialize;
use tracing::debug;

use crate::error::{MapdlError, Result};
use crate::header::{Header, PointerPair, two_ints_to_long};
use crate::record::{Endian, RecordReader};
use crate::standard_header::{FILE_HEADER_WORD, StandardHeader, read_standard_header};

pub const RESULT_HEADER_KEYS: [&str; 56] = [
    "fun12", "maxn", "nnod", "resmax", "numdof", "maxe", "nelm", "kan", "nsets", "ptrend",
    "ptrDSIl", "ptrTIMl", "ptrLSPl", "ptrELMl", "ptrNODl", "ptrGEOl", "ptrCYCl", "CMSflg", "csEls",
    "units", "nSector", "csCord", "ptrEnd8", "ptrEnd8", "fsiflag", "pmeth", "noffst", "eoffst",
    "nTrans", "ptrTRANl", "PrecKey", "csNds", "cpxrst", "extopt", "nlgeom", "AvailData", "mmass",
    "kPerturb", "XfemKey", "rstsprs", "ptrDSIh", "ptrTIMh", "ptrLSPh", "ptrCYCh", "ptrELMh",
    "ptrNODh", "ptrGEOh", "ptrTRANh", "Glbnnod", "ptrGNODl", "ptrGNODh", "qrDmpKy", "MSUPkey",
    "PSDkey", "cycMSUPkey", "XfemCrkPropTech",
];

pub const RESULT_POINTER_PAIRS: [PointerPair; 9] = [
    PointerPair::new("ptrDSI", "ptrDSIl", "ptrDSIh"),
    PointerPair::new("ptrTIM", "ptrTIMl", "ptrTIMh"),
    PointerPair::new("ptrLSP", "ptrLSPl", "ptrLSPh"),
    PointerPair::new("ptrELM", "ptrELMl", "ptrELMh"),
    PointerPair::new("ptrNOD", "ptrNODl", "ptrNODh"),
    PointerPair::new("ptrGEO", "ptrGEOl", "ptrGEOh"),
    PointerPair::new("ptrCYC", "ptrCYCl", "ptrCYCh"),
    PointerPair::new("ptrTRAN", "ptrTRANl", "ptrTRANh"),
    PointerPair::new("ptrGNOD", "ptrGNODl", "ptrGNODh"),
];

const DOFS: [&str; 30] = ["DOFS"; 30];
const TITLE: [&str; 20] = ["title"; 20];
const STITLE: [&str; 20] = ["stitle"; 20];

const SOLUTION_HEADER_HEAD: [&str; 20] = [
    "pv3num", "nelm", "nnod", "mask", "itime", "iter", "ncumit", "nrf", "cs_LSC", "nmast",
    "ptrNSL", "ptrESL", "ptrRF", "ptrMST", "ptrBC", "rxtrap", "mode", "isym", "kcmplx", "numdof",
];

const SOLUTION_HEADER_TAIL: [&str; 60] = [
    "dbmtim", "dbmdat", "dbfncl", "soltim", "soldat", "ptrOND", "ptrOEL", "nfldof", "ptrEXA",
    "ptrEXT", "ptrEXAl", "ptrEXAh", "ptrEXTl", "ptrEXTh", "ptrNSLl", "ptrNSLh", "ptrRFl", "ptrRFh",
    "ptrMSTl", "ptrMSTh", "ptrBCl", "ptrBCh", "ptrTRFl", "ptrTRFh", "ptrONDl", "ptrONDh",
    "ptrOELl", "ptrOELh", "ptrESLl", "ptrESLh", "ptrOSLl", "ptrOSLh", "sizeDEAD", "ptrDEADl",
    "ptrDEADh", "PrinKey", "numvdof", "numadof", "0", "0", "ptrVSLl", "ptrVSLh", "ptrASLl",
    "ptrASLh", "0", "0", "0", "0", "numRotCmp", "0", "ptrRCMl", "ptrRCMh", "nNodStr", "0",
    "ptrNDSTRl", "ptrNDSTRh", "AvailData", "geomID", "ptrGEOl", "ptrGEOh",
];

/// Keys of the per-set solution data header, in record order.
pub fn solution_header_keys() -> Vec<&'static str> {
    SOLUTION_HEADER_HEAD
        .iter()
        .chain(&DOFS)
        .chain(&TITLE)
        .chain(&STITLE)
        .chain(&SOLUTION_HEADER_TAIL)
        .copied()
        .collect()
}

pub const SOLUTION_POINTER_PAIRS: [PointerPair; 17] = [
    PointerPair::new("ptrEXA", "ptrEXAl", "ptrEXAh"),
    PointerPair::new("ptrEXT", "ptrEXTl", "ptrEXTh"),
    PointerPair::new("ptrNSL", "ptrNSLl", "ptrNSLh"),
    PointerPair::new("ptrRF", "ptrRFl", "ptrRFh"),
    PointerPair::new("ptrMST", "ptrMSTl", "ptrMSTh"),
    PointerPair::new("ptrBC", "ptrBCl", "ptrBCh"),
    PointerPair::new("ptrTRF", "ptrTRFl", "ptrTRFh"),
    PointerPair::new("ptrOND", "ptrONDl", "ptrONDh"),
    PointerPair::new("ptrOEL", "ptrOELl", "ptrOELh"),
    PointerPair::new("ptrESL", "ptrESLl", "ptrESLh"),
    PointerPair::new("ptrOSL", "ptrOSLl", "ptrOSLh"),
    PointerPair::new("ptrDEAD", "ptrDEADl", "ptrDEADh"),
    PointerPair::new("ptrVSL", "ptrVSLl", "ptrVSLh"),
    PointerPair::new("ptrASL", "ptrASLl", "ptrASLh"),
    PointerPair::new("ptrRCM", "ptrRCMl", "ptrRCMh"),
    PointerPair::new("ptrNDSTR", "ptrNDSTRl", "ptrNDSTRh"),
    PointerPair::new("ptrGEO", "ptrGEOl", "ptrGEOh"),
];

/// Placeholder MAPDL writes for values that were never computed.
const INVALID_VALUE: f64 = 1_267_650_600_228_229_401_496_703_205_376.0; // 2^100

/// `numpy.isclose` with its default tolerances.
pub(crate) fn isclose(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-8 + 1e-5 * b.abs()
}

/// Result header together with the tables it points to.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultHeader {
    pub fields: Header,
    /// Analysis type: 0 static, 1 buckling, 2 modal, 3 harmonic, 4 transient.
    pub kan: i32,
    pub n_sector: i32,
    pub cs_cord: i32,
    /// Nodes in the master sector of a cyclic model.
    pub cs_nds: i32,
    /// Elements in the master sector of a cyclic model.
    pub cs_els: i32,
    pub nsets: usize,
    /// Time (or frequency) of each result set.
    pub time_values: Vec<f64>,
    /// Harmonic index of each result set, empty for non-cyclic models.
    pub harmonic_indices: Vec<i32>,
    /// `[load step, substep, cumulative]` of each result set.
    pub ls_table: Vec<[i32; 3]>,
    /// Word offset of each result set.
    pub rpointers: Vec<i64>,
}

impl ResultHeader {
    pub fn is_cyclic(&self) -> bool {
        self.n_sector > 1
    }
}

/// Source of per-set nodal results, implemented by [`RstFile`] and by
/// anything else that can feed cyclic expansion.
pub trait ResultSource {
    fn result_header(&self) -> &ResultHeader;

    /// Sorted node numbers of the model.
    fn node_numbers(&self) -> &[i32];

    /// Sorted element numbers of the model.
    fn element_numbers(&self) -> &[i32];

    /// Node numbers and the `(n, numdof)` DOF solution of result set `index`.
    fn nodal_solution(&self, index: usize) -> Result<(Vec<i32>, DMatrix<f64>)>;

    /// Node numbers and `[SX SY SZ SXY SYZ SXZ]` per node.
    fn nodal_stress(&self, index: usize) -> Result<(Vec<i32>, DMatrix<f64>)> {
        let _ = index;
        Err(MapdlError::UnsupportedAnalysis(
            "nodal stress is not available from this result source".into(),
        ))
    }
}

/// Result file opened for nodal solution access.
#[derive(Debug, Clone)]
pub struct RstFile {
    path: PathBuf,
    endian: Endian,
    standard_header: StandardHeader,
    header: ResultHeader,
    neqv: Vec<i32>,
    eeqv: Vec<i32>,
    /// Storage positions in node-number order.
    sidx: Vec<usize>,
    nnum: Vec<i32>,
    enum_sorted: Vec<i32>,
}

impl RstFile {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let standard_header = read_standard_header(path)?;
        let endian = standard_header.endian;
        let mut reader = RecordReader::open(path, endian)?;

        reader.seek_word(FILE_HEADER_WORD)?;
        let raw = reader.read_int_record()?;
        let fields = Header::parse(&raw, &RESULT_HEADER_KEYS, &RESULT_POINTER_PAIRS);

        let int = |key: &str| -> Result<i32> { Ok(fields.require(key)? as i32) };
        let nsets = fields.require("nsets")?.max(0) as usize;
        let resmax = fields.require("resmax")?.max(0) as usize;

        reader.seek_word(fields.require("ptrNOD")?)?;
        let neqv = reader.read_int_record()?;
        reader.seek_word(fields.require("ptrELM")?)?;
        let eeqv = reader.read_int_record()?;

        reader.seek_word(fields.require("ptrDSI")?)?;
        let dsi = reader.read_int_record()?;
        let rpointers = combine_set_pointers(&dsi, resmax, nsets)?;

        reader.seek_word(fields.require("ptrTIM")?)?;
        let mut time_values = reader.read_record(None, None)?.into_f64();
        time_values.truncate(nsets);

        let harmonic_indices = match fields.int("ptrCYC").unwrap_or(0) {
            0 => Vec::new(),
            ptr => {
                reader.seek_word(ptr)?;
                let mut hindex = reader.read_int_record()?;
                hindex.truncate(nsets);
                sign_repeated_harmonics(&mut hindex, &time_values);
                hindex
            }
        };

        reader.seek_word(fields.require("ptrLSP")?)?;
        let ls_raw = reader.read_int_record()?;
        let ls_table = ls_raw
            .chunks_exact(3)
            .take(nsets)
            .map(|c| [c[0], c[1], c[2]])
            .collect();

        let (kan, n_sector) = (int("kan")?, int("nSector")?);
        let (cs_cord, cs_nds, cs_els) = (int("csCord")?, int("csNds")?, int("csEls")?);
        let header = ResultHeader {
            kan,
            n_sector,
            cs_cord,
            cs_nds,
            cs_els,
            nsets,
            time_values,
            harmonic_indices,
            ls_table,
            rpointers,
            fields,
        };

        let sidx = argsort(&neqv);
        let nnum = sidx.iter().map(|&i| neqv[i]).collect();
        let mut enum_sorted = eeqv.clone();
        enum_sorted.sort_unstable();

        debug!(
            path = %path.display(),
            nsets = header.nsets,
            n_sector = header.n_sector,
            "opened result file"
        );

        Ok(Self {
            path: path.to_path_buf(),
            endian,
            standard_header,
            header,
            neqv,
            eeqv,
            sidx,
            nnum,
            enum_sorted,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn standard_header(&self) -> &StandardHeader {
        &self.standard_header
    }

    pub fn n_results(&self) -> usize {
        self.header.time_values.len()
    }

    pub fn n_sector(&self) -> i32 {
        self.header.n_sector
    }

    /// Nodal equivalence table in storage order.
    pub fn neqv(&self) -> &[i32] {
        &self.neqv
    }

    pub fn eeqv(&self) -> &[i32] {
        &self.eeqv
    }

    fn set_pointer(&self, index: usize) -> Result<i64> {
        self.header.rpointers.get(index).copied().ok_or_else(|| {
            MapdlError::invalid(format!(
                "result index {index} out of range for {} result sets",
                self.header.rpointers.len()
            ))
        })
    }

    /// Solution data header of result set `index`.
    pub fn solution_header(&self, index: usize) -> Result<Header> {
        let ptr = self.set_pointer(index)?;
        let mut reader = RecordReader::open(&self.path, self.endian)?;
        reader.seek_word(ptr)?;
        let raw = reader.read_int_record()?;
        Ok(Header::parse(&raw, &solution_header_keys(), &SOLUTION_POINTER_PAIRS))
    }
}

impl ResultSource for RstFile {
    fn result_header(&self) -> &ResultHeader {
        &self.header
    }

    fn node_numbers(&self) -> &[i32] {
        &self.nnum
    }

    fn element_numbers(&self) -> &[i32] {
        &self.enum_sorted
    }

    fn nodal_solution(&self, index: usize) -> Result<(Vec<i32>, DMatrix<f64>)> {
        let ptr_set = self.set_pointer(index)?;
        let solution = self.solution_header(index)?;
        let nnod = solution.require("nnod")?.max(0) as usize;
        let sumdof = (solution.require("numdof")? + solution.int("nfldof").unwrap_or(0)) as usize;
        if sumdof == 0 {
            return Err(MapdlError::invalid("solution header declares no DOFs"));
        }
        let ptr = solution.int("ptrNSL").unwrap_or(0);
        if ptr == 0 {
            return Err(MapdlError::invalid(format!(
                "result set {index} has no nodal solution"
            )));
        }

        let mut reader = RecordReader::open(&self.path, self.endian)?;
        reader.seek_word(ptr_set + ptr)?;
        let mut values = reader.read_record(None, None)?.into_f64();
        let nrows = (values.len() / sumdof).min(nnod);
        values.truncate(nrows * sumdof);

        let (nnum, order) = if nrows < nnod {
            // only a subset of nodes was written; the next record lists them
            let positions = reader.read_int_record()?;
            let unsorted = positions
                .iter()
                .take(nrows)
                .map(|&p| {
                    usize::try_from(p - 1)
                        .ok()
                        .and_then(|i| self.neqv.get(i).copied())
                        .ok_or_else(|| MapdlError::invalid(format!("node position {p} out of range")))
                })
                .collect::<Result<Vec<i32>>>()?;
            let order = argsort(&unsorted);
            (order.iter().map(|&i| unsorted[i]).collect(), order)
        } else {
            (self.nnum.clone(), self.sidx.clone())
        };

        let mut sorted = Vec::with_capacity(values.len());
        for &row in &order {
            sorted.extend(
                values[row * sumdof..(row + 1) * sumdof]
                    .iter()
                    .map(|&v| if v == INVALID_VALUE { 0.0 } else { v }),
            );
        }
        Ok((nnum, DMatrix::from_row_slice(order.len(), sumdof, &sorted)))
    }
}

/// `resmax` low words followed by `resmax` high words.
fn combine_set_pointers(dsi: &[i32], resmax: usize, nsets: usize) -> Result<Vec<i64>> {
    if nsets > resmax || dsi.len() < resmax + nsets {
        return Err(MapdlError::invalid(format!(
            "data set index table of {} words cannot hold {nsets} sets (resmax {resmax})",
            dsi.len()
        )));
    }
    let pointers: Vec<i64> = (0..nsets)
        .map(|i| two_ints_to_long(dsi[i], dsi[resmax + i]))
        .collect();
    if let Some(bad) = pointers.iter().find(|&&p| p < 0) {
        return Err(MapdlError::invalid(format!(
            "data set index table has negative pointer {bad}"
        )));
    }
    Ok(pointers)
}

/// Older files store both members of a harmonic pair with the same positive
/// index; the second of two results at the same frequency is the negative one.
fn sign_repeated_harmonics(hindex: &mut [i32], time_values: &[f64]) {
    if hindex.iter().any(|&h| h < -1) {
        return;
    }
    let n = hindex.len().min(time_values.len());
    for i in 0..n.saturating_sub(1) {
        if isclose(time_values[i], time_values[i + 1]) {
            hindex[i + 1] *= -1;
        }
    }
}

pub(crate) fn argsort<T: Ord>(values: &[T]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].cmp(&values[b]));
    order
}
