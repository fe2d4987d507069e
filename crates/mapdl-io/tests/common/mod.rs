//! Byte-exact writers for small MAPDL binary fixtures.
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use mapdl_io::emat::EMAT_HEADER_KEYS;
use mapdl_io::full::SYMBOLIC_FULL_HEADER_KEYS;
use mapdl_io::rst::{RESULT_HEADER_KEYS, solution_header_keys};
use mapdl_io::standard_header::FILE_HEADER_WORD;
use mapdl_io::{Dtype, Endian, RecordFlags, long_to_two_ints};
use tempfile::TempDir;

/// Word offset of the first payload word of the record starting at `start`.
fn payload_word(start: i64) -> usize {
    (start + 2) as usize
}

/// Pack `text` into `nblocks` four-character words.
pub fn text_words(text: &str, nblocks: usize) -> Vec<i32> {
    let mut bytes = text.as_bytes().to_vec();
    bytes.resize(nblocks * 4, b' ');
    bytes
        .chunks_exact(4)
        .map(|c| i32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Absolute word of field `key` in the file-specific header record.
pub fn file_header_word(keys: &[&str], key: &str) -> usize {
    let index = keys
        .iter()
        .position(|k| *k == key)
        .unwrap_or_else(|| panic!("no header key {key}"));
    payload_word(FILE_HEADER_WORD) + index
}

/// Overwrite one word of a fixture that has already been saved.
pub fn patch_saved_word(path: &Path, endian: Endian, word: usize, value: i32) {
    let mut bytes = std::fs::read(path).expect("read fixture");
    bytes[word * 4..word * 4 + 4].copy_from_slice(&endian.i32_bytes(value));
    std::fs::write(path, bytes).expect("write fixture");
}

/// A header record whose fields can be filled in after the data they point
/// to has been written.
pub struct HeaderSlot {
    start: i64,
    keys: Vec<&'static str>,
}

pub struct FixtureWriter {
    endian: Endian,
    bytes: Vec<u8>,
}

impl FixtureWriter {
    pub fn new(endian: Endian) -> Self {
        Self {
            endian,
            bytes: Vec::new(),
        }
    }

    /// Current position in words.
    pub fn word_pos(&self) -> i64 {
        (self.bytes.len() / 4) as i64
    }

    fn word(&mut self, value: i32) {
        let bytes = self.endian.i32_bytes(value);
        self.bytes.extend_from_slice(&bytes);
    }

    fn record(&mut self, nwords: usize, dtype: Dtype, payload: &[u8]) -> i64 {
        let start = self.word_pos();
        self.word(nwords as i32);
        self.word(RecordFlags::for_dtype(dtype).to_flag_word());
        self.bytes.extend_from_slice(payload);
        self.word(nwords as i32);
        start
    }

    pub fn int_record(&mut self, values: &[i32]) -> i64 {
        let payload: Vec<u8> = values
            .iter()
            .flat_map(|v| self.endian.i32_bytes(*v))
            .collect();
        self.record(values.len(), Dtype::Int32, &payload)
    }

    pub fn double_record(&mut self, values: &[f64]) -> i64 {
        let payload: Vec<u8> = values
            .iter()
            .flat_map(|v| self.endian.f64_bytes(*v))
            .collect();
        self.record(values.len() * 2, Dtype::Float64, &payload)
    }

    /// The 100-item standard header. Must be the first record.
    pub fn standard_header(&mut self, file_code: i32) {
        let mut items = vec![0i32; 100];
        items[0] = file_code;
        items[2] = 93015;
        items[3] = 20240115;
        items[4] = 1;
        items[9..10].copy_from_slice(&text_words("21.2", 1));
        items[14..16].copy_from_slice(&text_words("rotor", 2));
        items[25] = 8192;
        items[40..60].copy_from_slice(&text_words("Fixture model", 20));
        self.int_record(&items);
    }

    /// Write an all-zero header record laid out by `keys`.
    pub fn header_record(&mut self, keys: &[&'static str]) -> HeaderSlot {
        let start = self.int_record(&vec![0; keys.len()]);
        HeaderSlot {
            start,
            keys: keys.to_vec(),
        }
    }

    fn patch(&mut self, word: usize, value: i32) {
        let bytes = self.endian.i32_bytes(value);
        self.bytes[word * 4..word * 4 + 4].copy_from_slice(&bytes);
    }

    /// Set the first slot named `key`.
    pub fn set(&mut self, slot: &HeaderSlot, key: &str, value: i32) {
        let index = slot
            .keys
            .iter()
            .position(|k| *k == key)
            .unwrap_or_else(|| panic!("no header key {key}"));
        self.patch(payload_word(slot.start) + index, value);
    }

    /// Split `value` over the `{base}l` / `{base}h` slots.
    pub fn set_split(&mut self, slot: &HeaderSlot, base: &str, value: i64) {
        let (low, high) = long_to_two_ints(value);
        self.set(slot, &format!("{base}l"), low);
        self.set(slot, &format!("{base}h"), high);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Write the fixture into `dir` under `name`.
    pub fn save(self, dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, self.bytes).expect("write fixture");
        path
    }
}

/// One element of an EMAT fixture.
pub struct EmatElement {
    pub dof_idx: Vec<i32>,
    pub nmrow: i32,
    pub stiffness: Option<Vec<f64>>,
    pub mass: Option<Vec<f64>>,
    pub applied_force: Option<Vec<f64>>,
}

/// Three nodes stored as `[30, 10, 20]`, two elements numbered `[5, 4]`.
///
/// Element 0 couples storage positions 0 and 1 with full 6x6 matrices and a
/// force `1..=6`. Element 1 couples positions 1 and 2 with a packed
/// stiffness and a force `10, 20, .., 60`.
pub fn two_element_emat(endian: Endian, numdof: i32) -> FixtureWriter {
    let elements = vec![
        EmatElement {
            dof_idx: (1..=6).collect(),
            nmrow: 6,
            stiffness: Some((0..36).map(f64::from).collect()),
            mass: Some(vec![0.5; 36]),
            applied_force: Some(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
        },
        EmatElement {
            dof_idx: (4..=9).collect(),
            nmrow: -6,
            stiffness: Some((0..21).map(|v| f64::from(v) + 100.0).collect()),
            mass: None,
            applied_force: Some(vec![10.0, 20.0, 30.0, 40.0, 50.0, 60.0]),
        },
    ];
    emat_fixture(endian, numdof, &[30, 10, 20], &[5, 4], &elements)
}

pub fn emat_fixture(
    endian: Endian,
    numdof: i32,
    neqv: &[i32],
    eeqv: &[i32],
    elements: &[EmatElement],
) -> FixtureWriter {
    let mut w = FixtureWriter::new(endian);
    w.standard_header(2);
    let header = w.header_record(&EMAT_HEADER_KEYS);
    w.set(&header, "fun02", 2);
    w.set(&header, "nume", elements.len() as i32);
    w.set(&header, "numdof", numdof);
    w.set(&header, "lenbac", neqv.len() as i32);

    let ptr_dof = w.int_record(&(1..=numdof).collect::<Vec<_>>());
    w.set(&header, "ptrDOF", ptr_dof as i32);
    let ptr_bac = w.int_record(neqv);
    w.set(&header, "ptrBAC", ptr_bac as i32);
    let ptr_elm = w.int_record(eeqv);
    w.set_split(&header, "ptrElm", ptr_elm);

    // offsets are patched in once the elements are written
    let nume = elements.len();
    let idx = w.int_record(&vec![0; 2 * nume]);
    w.set_split(&header, "ptrIDX", idx);

    for (i, element) in elements.iter().enumerate() {
        let offset = w.word_pos();
        let (low, high) = long_to_two_ints(offset);
        w.patch(payload_word(idx) + i, low);
        w.patch(payload_word(idx) + nume + i, high);

        let flag = |v: &Option<Vec<f64>>| i32::from(v.is_some());
        w.int_record(&[
            flag(&element.stiffness),
            flag(&element.mass),
            0,
            0,
            flag(&element.applied_force),
            0,
            0,
            0,
            0,
            element.nmrow,
        ]);
        w.int_record(&element.dof_idx);
        for values in [&element.stiffness, &element.mass, &element.applied_force]
            .into_iter()
            .flatten()
        {
            w.double_record(values);
        }
    }
    w
}

/// Upper-triangle rows of a FULL matrix: `(1-based columns, values)` per
/// equation.
pub type FullRows = Vec<(Vec<i32>, Vec<f64>)>;

pub struct FullModel {
    pub neqv: Vec<i32>,
    pub ndof: Vec<i32>,
    pub constraints: Vec<i32>,
    pub stiffness: FullRows,
    pub mass: Option<FullRows>,
    pub lumpm: i32,
    pub keyuns: i32,
}

impl FullModel {
    /// Nodes stored as `[3, 1, 2]` with one DOF each; node 1 is constrained.
    pub fn three_springs() -> Self {
        Self {
            neqv: vec![3, 1, 2],
            ndof: vec![1, 1, 1],
            constraints: vec![0, -1, 0],
            stiffness: vec![
                (vec![1, 2, 3], vec![4.0, -1.0, -2.0]),
                (vec![2, 3], vec![5.0, -3.0]),
                (vec![3], vec![6.0]),
            ],
            mass: Some(vec![
                (vec![1], vec![1.0]),
                (vec![2], vec![2.0]),
                (vec![3], vec![3.0]),
            ]),
            lumpm: 0,
            keyuns: 0,
        }
    }
}

pub fn full_fixture(model: &FullModel) -> FixtureWriter {
    let neqn: i32 = model.ndof.iter().sum();
    let mut w = FixtureWriter::new(Endian::Little);
    w.standard_header(4);
    let header = w.header_record(&SYMBOLIC_FULL_HEADER_KEYS);
    w.set(&header, "fun04", 4);
    w.set(&header, "neqn", neqn);
    w.set(&header, "numdof", 1);
    w.set(&header, "lenbac", model.neqv.len() as i32);
    w.set(&header, "nNodes", model.neqv.len() as i32);
    w.set(&header, "lumpm", model.lumpm);
    w.set(&header, "keyuns", model.keyuns);

    w.int_record(&[1]);
    w.int_record(&model.neqv);

    let ptr_dof = w.word_pos();
    w.int_record(&model.ndof);
    w.int_record(&model.constraints);
    w.set_split(&header, "ptrDOF", ptr_dof);

    let nterm = |rows: &FullRows| rows.iter().map(|(c, _)| c.len() as i64).sum::<i64>();

    let ptr_stf = w.word_pos();
    for (cols, values) in &model.stiffness {
        w.int_record(cols);
        w.double_record(values);
    }
    w.set_split(&header, "ptrSTF", ptr_stf);
    w.set_split(&header, "ntermK", nterm(&model.stiffness));

    if let Some(mass) = &model.mass {
        let ptr_mas = w.word_pos();
        for (cols, values) in mass {
            w.int_record(cols);
            w.double_record(values);
        }
        w.set_split(&header, "ptrMAS", ptr_mas);
        w.set_split(&header, "ntermM", nterm(mass));
    }
    w
}

/// One result set of an RST fixture.
pub struct ResultSet {
    pub time: f64,
    pub harmonic_index: i32,
    /// `(nnod, numdof)` values in storage order.
    pub values: Vec<f64>,
}

pub struct RstModel {
    pub kan: i32,
    pub n_sector: i32,
    pub cs_nds: i32,
    pub numdof: i32,
    pub neqv: Vec<i32>,
    pub eeqv: Vec<i32>,
    pub sets: Vec<ResultSet>,
}

impl RstModel {
    /// Four-sector rotor modal result with two master nodes stored as
    /// `[2, 1]`; harmonic indices `0, 1, 1, 2` (the second `1` is the pair
    /// member at the same frequency).
    pub fn four_sector_modal() -> Self {
        let set = |time, harmonic_index, values: [f64; 6]| ResultSet {
            time,
            harmonic_index,
            values: values.to_vec(),
        };
        Self {
            kan: 2,
            n_sector: 4,
            cs_nds: 2,
            numdof: 3,
            neqv: vec![2, 1],
            eeqv: vec![1],
            sets: vec![
                set(10.0, 0, [0.0, 1.0, 0.0, 1.0, 0.0, 0.0]),
                set(20.0, 1, [4.0, 5.0, 6.0, 1.0, 2.0, 3.0]),
                set(20.0, 1, [0.0, 0.0, 2.0, 0.0, 1.0, 0.0]),
                set(30.0, 2, [1.0, 1.0, 1.0, 2.0, 2.0, 2.0]),
            ],
        }
    }
}

pub fn rst_fixture(model: &RstModel) -> FixtureWriter {
    let nsets = model.sets.len();
    let resmax = nsets + 2;
    let mut w = FixtureWriter::new(Endian::Little);
    w.standard_header(12);
    let header = w.header_record(&RESULT_HEADER_KEYS);
    w.set(&header, "fun12", 12);
    w.set(&header, "nnod", model.neqv.len() as i32);
    w.set(&header, "resmax", resmax as i32);
    w.set(&header, "numdof", model.numdof);
    w.set(&header, "nelm", model.eeqv.len() as i32);
    w.set(&header, "kan", model.kan);
    w.set(&header, "nsets", nsets as i32);
    w.set(&header, "nSector", model.n_sector);
    w.set(&header, "csCord", 1);
    w.set(&header, "csNds", model.cs_nds);
    w.set(&header, "csEls", model.eeqv.len() as i32);

    let ptr = w.int_record(&model.neqv);
    w.set_split(&header, "ptrNOD", ptr);
    let ptr = w.int_record(&model.eeqv);
    w.set_split(&header, "ptrELM", ptr);

    let mut times: Vec<f64> = model.sets.iter().map(|s| s.time).collect();
    times.resize(resmax, 0.0);
    let ptr = w.double_record(&times);
    w.set_split(&header, "ptrTIM", ptr);

    let ls: Vec<i32> = (1..=nsets as i32).flat_map(|i| [1, i, i]).collect();
    let ptr = w.int_record(&ls);
    w.set_split(&header, "ptrLSP", ptr);

    if model.n_sector > 1 {
        let hindex: Vec<i32> = model.sets.iter().map(|s| s.harmonic_index).collect();
        let ptr = w.int_record(&hindex);
        w.set_split(&header, "ptrCYC", ptr);
    }

    let dsi = w.int_record(&vec![0; 2 * resmax]);
    w.set_split(&header, "ptrDSI", dsi);

    let keys = solution_header_keys();
    for (i, set) in model.sets.iter().enumerate() {
        let start = w.word_pos();
        let (low, high) = long_to_two_ints(start);
        w.patch(payload_word(dsi) + i, low);
        w.patch(payload_word(dsi) + resmax + i, high);

        let solution = w.header_record(&keys);
        w.set(&solution, "nnod", model.neqv.len() as i32);
        w.set(&solution, "numdof", model.numdof);
        let nsl = w.word_pos() - start;
        w.set_split(&solution, "ptrNSL", nsl);
        w.double_record(&set.values);
    }
    w
}
