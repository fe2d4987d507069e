//! Cyclic symmetry expansion of single-sector results.
//!
//! A cyclic model stores one sector (the master sector) of a rotor made of
//! `N` identical sectors. Static results are expanded by rigid rotation about
//! the Z axis. Modal results of harmonic index `h` need a second, out of phase
//! solution `u_r` to describe a travelling wave:
//!
//! - files written with a duplicate sector carry it as nodes `n + csNds`;
//! - newer files store the pair as two result sets sharing `|h|` and the same
//!   frequency (typically `h` and `-h`);
//! - `h = 0` and `h = N/2` are standing waves and have no companion.
//!
//! The sector field is `u + i u_r`, rotated by the requested phase. A full
//! rotor copy `k` is that field rotated by `k 2π/N + phase` and multiplied by
//! the harmonic factor `e^(2πihk/N) (cos φ - i sin φ)`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mapdl_io::{CyclicOptions, CyclicResult, RstFile};
//!
//! let cyclic = CyclicResult::new(RstFile::from_file("rotor.rst")?)?;
//! let rnum = cyclic.harmonic_index_to_cumulative(2, 0)?;
//! let options = CyclicOptions { full_rotor: true, ..Default::default() };
//! let solution = cyclic.nodal_solution(rnum, options)?;
//! println!("{} sectors", solution.values.len());
//! # Ok::<(), mapdl_io::MapdlError>(())
//! ```

use std::collections::HashMap;
use std::f64::consts::PI;

use nalgebra::{DMatrix, Matrix3, Rotation3, Vector3};
use rustfft::{Fft, FftPlanner};
use rustfft::num_complex::Complex64;
use tracing::{debug, warn};

use crate::error::{MapdlError, Result};
use crate::rst::{ResultSource, isclose};

const STATIC: i32 = 0;
const MODAL: i32 = 2;

/// Options for cyclic expansion.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CyclicOptions {
    /// Phase in radians.
    pub phase: f64,
    /// Expand to all `N` sectors instead of returning the master sector.
    pub full_rotor: bool,
    /// Keep the complex field instead of its real part.
    pub as_complex: bool,
    /// Scale full-rotor modal results to the vendor's amplitudes, see
    /// [`full_rotor_scale`].
    pub normalize: bool,
}

/// Expanded values, one matrix per sector (a single entry unless the full
/// rotor was requested).
#[derive(Debug, Clone, PartialEq)]
pub enum CyclicValues {
    Real(Vec<DMatrix<f64>>),
    Complex(Vec<DMatrix<Complex64>>),
}

impl CyclicValues {
    /// Number of sectors held.
    pub fn len(&self) -> usize {
        match self {
            CyclicValues::Real(v) => v.len(),
            CyclicValues::Complex(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_real(&self) -> Option<&[DMatrix<f64>]> {
        match self {
            CyclicValues::Real(v) => Some(v),
            CyclicValues::Complex(_) => None,
        }
    }

    pub fn as_complex(&self) -> Option<&[DMatrix<Complex64>]> {
        match self {
            CyclicValues::Complex(v) => Some(v),
            CyclicValues::Real(_) => None,
        }
    }
}

/// Master-sector node numbers and the expanded values.
#[derive(Debug, Clone, PartialEq)]
pub struct CyclicSolution {
    pub node_numbers: Vec<i32>,
    pub values: CyclicValues,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Vector,
    Tensor,
}

/// Master and duplicate rows of one raw result.
struct SectorSplit {
    node_numbers: Vec<i32>,
    master: DMatrix<f64>,
    duplicate: Option<DMatrix<f64>>,
}

/// Cyclic expansion wrapper around a single-sector [`ResultSource`].
#[derive(Debug, Clone)]
pub struct CyclicResult<S> {
    source: S,
    n_sector: usize,
    master_node_index: Vec<usize>,
    duplicate_node_index: Option<Vec<usize>>,
    master_sector_mask: Vec<bool>,
    mode_table: Vec<usize>,
}

impl<S: ResultSource> CyclicResult<S> {
    /// Wrap `source`.
    ///
    /// # Errors
    ///
    /// Returns [`MapdlError::NotCyclic`] when the source reports fewer than
    /// two sectors.
    pub fn new(source: S) -> Result<Self> {
        let header = source.result_header();
        if header.n_sector < 2 {
            return Err(MapdlError::NotCyclic(header.n_sector));
        }
        let n_sector = header.n_sector as usize;
        if header.cs_cord != 1 {
            warn!(
                cs_cord = header.cs_cord,
                "cyclic coordinate system is not the global cylindrical system, \
                 expanding about the global Z axis"
            );
        }

        let cs_nds = header.cs_nds;
        let nnum = source.node_numbers();
        let master_node_index: Vec<usize> = nnum
            .iter()
            .enumerate()
            .filter(|(_, n)| **n <= cs_nds)
            .map(|(i, _)| i)
            .collect();
        let duplicate_node_index = if nnum.iter().any(|&n| n > cs_nds) {
            let position: HashMap<i32, usize> =
                nnum.iter().enumerate().map(|(i, &n)| (n, i)).collect();
            let duplicates: Option<Vec<usize>> = master_node_index
                .iter()
                .map(|&i| position.get(&(nnum[i] + cs_nds)).copied())
                .collect();
            if duplicates.is_none() {
                warn!("duplicate sector is incomplete and will be ignored");
            }
            duplicates
        } else {
            None
        };

        let cs_els = header.cs_els;
        let master_sector_mask = source
            .element_numbers()
            .iter()
            .map(|&e| e <= cs_els)
            .collect();
        let mode_table = mode_table(&header.harmonic_indices, &header.time_values);

        debug!(
            n_sector = header.n_sector,
            master_nodes = master_node_index.len(),
            duplicate_sector = duplicate_node_index.is_some(),
            "wrapped cyclic result"
        );

        Ok(Self {
            n_sector,
            source,
            master_node_index,
            duplicate_node_index,
            master_sector_mask,
            mode_table,
        })
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn into_inner(self) -> S {
        self.source
    }

    pub fn n_sector(&self) -> usize {
        self.n_sector
    }

    /// Harmonic index of each result set.
    pub fn harmonic_indices(&self) -> &[i32] {
        &self.source.result_header().harmonic_indices
    }

    /// Zero-based mode number of each result set within its harmonic index.
    pub fn mode_table(&self) -> &[usize] {
        &self.mode_table
    }

    /// Positions (in sorted node order) of the master sector nodes.
    pub fn master_node_index(&self) -> &[usize] {
        &self.master_node_index
    }

    /// Positions of the duplicate of each master node, when the file has a
    /// duplicate sector.
    pub fn duplicate_node_index(&self) -> Option<&[usize]> {
        self.duplicate_node_index.as_deref()
    }

    /// `true` for each (sorted) element in the master sector.
    pub fn master_sector_mask(&self) -> &[bool] {
        &self.master_sector_mask
    }

    pub fn has_duplicate_sector(&self) -> bool {
        self.duplicate_node_index.is_some()
    }

    /// Cumulative result index of harmonic index `hindex` and mode `mode`.
    ///
    /// `hindex` is signed: the two members of a harmonic pair are addressed
    /// as `h` and `-h`.
    pub fn harmonic_index_to_cumulative(&self, hindex: i32, mode: usize) -> Result<usize> {
        let table = self.harmonic_indices();
        if !table.iter().any(|h| h.abs() == hindex.abs()) {
            let mut available = table.to_vec();
            available.sort_unstable();
            available.dedup();
            return Err(MapdlError::InvalidHarmonicIndex { hindex, available });
        }

        let matches: Vec<usize> = table
            .iter()
            .zip(&self.mode_table)
            .enumerate()
            .filter(|(_, (h, m))| **h == hindex && **m == mode)
            .map(|(i, _)| i)
            .collect();
        match matches.as_slice() {
            [] => {
                let mut available: Vec<usize> = table
                    .iter()
                    .zip(&self.mode_table)
                    .filter(|(h, _)| h.abs() == hindex.abs())
                    .map(|(_, m)| *m)
                    .collect();
                available.sort_unstable();
                available.dedup();
                Err(MapdlError::InvalidMode {
                    hindex,
                    mode,
                    available,
                })
            }
            [single] => Ok(*single),
            _ => Err(MapdlError::AmbiguousMode {
                hindex,
                mode,
                matches,
            }),
        }
    }

    /// DOF solution of result set `index`, expanded per `options`.
    pub fn nodal_solution(&self, index: usize, options: CyclicOptions) -> Result<CyclicSolution> {
        self.expand(index, options, FieldKind::Vector, |i| {
            self.source.nodal_solution(i)
        })
    }

    /// Nodal `[SX SY SZ SXY SYZ SXZ]` stress of result set `index`, expanded
    /// per `options`.
    pub fn nodal_stress(&self, index: usize, options: CyclicOptions) -> Result<CyclicSolution> {
        self.expand(index, options, FieldKind::Tensor, |i| self.source.nodal_stress(i))
    }

    /// Copy sector `points` (one `[x, y, z]` row per node) around the rotor.
    pub fn expand_sector_points(&self, points: &DMatrix<f64>) -> Vec<DMatrix<f64>> {
        (0..self.n_sector)
            .map(|k| rotate_vectors(points, self.sector_angle(k)))
            .collect()
    }

    fn sector_angle(&self, k: usize) -> f64 {
        2.0 * PI * k as f64 / self.n_sector as f64
    }

    fn expand<F>(
        &self,
        index: usize,
        options: CyclicOptions,
        kind: FieldKind,
        read: F,
    ) -> Result<CyclicSolution>
    where
        F: Fn(usize) -> Result<(Vec<i32>, DMatrix<f64>)>,
    {
        let header = self.source.result_header();
        let (nnum, values) = read(index)?;
        let SectorSplit {
            node_numbers,
            master,
            duplicate,
        } = self.split_sectors(&nnum, &values);

        let values = match header.kan {
            STATIC => self.expand_static(master, options.full_rotor, kind),
            MODAL => {
                let companion = match duplicate {
                    Some(duplicate) => duplicate,
                    None => self.harmonic_companion(index, &node_numbers, &master, &read)?,
                };
                self.expand_modal(index, &master, &companion, options, kind)?
            }
            kan => {
                return Err(MapdlError::UnsupportedAnalysis(format!(
                    "cyclic expansion of analysis type {kan}"
                )));
            }
        };

        Ok(CyclicSolution {
            node_numbers,
            values,
        })
    }

    /// Separate master rows from duplicate-sector rows of one raw result.
    fn split_sectors(&self, nnum: &[i32], values: &DMatrix<f64>) -> SectorSplit {
        let cs_nds = self.source.result_header().cs_nds;
        let master_rows: Vec<usize> = (0..nnum.len()).filter(|&i| nnum[i] <= cs_nds).collect();
        let node_numbers: Vec<i32> = master_rows.iter().map(|&i| nnum[i]).collect();
        let master = values.select_rows(&master_rows);

        let duplicate = if self.has_duplicate_sector() {
            let position: HashMap<i32, usize> =
                nnum.iter().enumerate().map(|(i, &n)| (n, i)).collect();
            let rows: Option<Vec<usize>> = node_numbers
                .iter()
                .map(|n| position.get(&(n + cs_nds)).copied())
                .collect();
            if rows.is_none() {
                warn!("result is missing duplicate sector nodes, using harmonic pair instead");
            }
            rows.map(|rows| values.select_rows(&rows))
        } else {
            None
        };

        SectorSplit {
            node_numbers,
            master,
            duplicate,
        }
    }

    /// Out of phase solution paired with result `index`.
    fn harmonic_companion<F>(
        &self,
        index: usize,
        node_numbers: &[i32],
        master: &DMatrix<f64>,
        read: &F,
    ) -> Result<DMatrix<f64>>
    where
        F: Fn(usize) -> Result<(Vec<i32>, DMatrix<f64>)>,
    {
        let header = self.source.result_header();
        let hindex = *header.harmonic_indices.get(index).ok_or_else(|| {
            MapdlError::invalid(format!("no harmonic index recorded for result {index}"))
        })?;
        let zeros = || DMatrix::zeros(master.nrows(), master.ncols());

        let n = self.n_sector as i32;
        if hindex == 0 || (n % 2 == 0 && hindex.abs() == n / 2) {
            return Ok(zeros());
        }

        let Some(partner) = harmonic_partner(&header.harmonic_indices, index) else {
            warn!(result = index, hindex, "no harmonic pair found, using a zero companion");
            return Ok(zeros());
        };

        let frequency = header.time_values.get(index).copied().unwrap_or(f64::NAN);
        let partner_frequency = header.time_values.get(partner).copied().unwrap_or(f64::NAN);
        if !isclose(frequency, partner_frequency) {
            return Err(MapdlError::InconsistentHarmonicPair {
                result: index,
                partner,
                hindex,
                frequency,
                partner_frequency,
            });
        }

        let (nnum, values) = read(partner)?;
        let companion = self.split_sectors(&nnum, &values);
        if companion.node_numbers != node_numbers {
            return Err(MapdlError::invalid(format!(
                "results {index} and {partner} cover different master nodes"
            )));
        }
        Ok(companion.master)
    }

    fn expand_static(&self, master: DMatrix<f64>, full_rotor: bool, kind: FieldKind) -> CyclicValues {
        if !full_rotor {
            return CyclicValues::Real(vec![master]);
        }
        CyclicValues::Real(
            (0..self.n_sector)
                .map(|k| rotate_field(&master, self.sector_angle(k), kind))
                .collect(),
        )
    }

    fn expand_modal(
        &self,
        index: usize,
        master: &DMatrix<f64>,
        companion: &DMatrix<f64>,
        options: CyclicOptions,
        kind: FieldKind,
    ) -> Result<CyclicValues> {
        if master.shape() != companion.shape() {
            return Err(MapdlError::invalid(format!(
                "sector solution {:?} and companion {:?} differ in shape",
                master.shape(),
                companion.shape()
            )));
        }
        let CyclicOptions {
            phase,
            full_rotor,
            as_complex,
            normalize,
        } = options;

        if !full_rotor && !as_complex {
            return Ok(CyclicValues::Real(vec![
                master * phase.cos() - companion * phase.sin(),
            ]));
        }

        let combined = combine(master, companion, phase);
        if !full_rotor {
            return Ok(CyclicValues::Complex(vec![combined]));
        }

        let hindex = self
            .harmonic_indices()
            .get(index)
            .copied()
            .ok_or_else(|| MapdlError::invalid(format!("no harmonic index recorded for result {index}")))?;
        let scale = if normalize {
            full_rotor_scale(hindex, self.n_sector)
        } else {
            1.0
        };
        let factors: Vec<Complex64> = harmonic_phase_factors(hindex, self.n_sector, phase)
            .into_iter()
            .map(|f| f * scale)
            .collect();

        let sectors: Vec<DMatrix<Complex64>> = factors
            .iter()
            .enumerate()
            .map(|(k, &factor)| match kind {
                FieldKind::Vector => {
                    rotate_complex(&combined, self.sector_angle(k) + phase, kind) * factor
                }
                FieldKind::Tensor => {
                    rotate_complex(&(combined.clone() * factor), self.sector_angle(k), kind)
                }
            })
            .collect();

        Ok(if as_complex {
            CyclicValues::Complex(sectors)
        } else {
            CyclicValues::Real(sectors.iter().map(|s| s.map(|z| z.re)).collect())
        })
    }
}

/// `(u + i u_r) (cos φ - i sin φ)`.
pub fn combine(master: &DMatrix<f64>, companion: &DMatrix<f64>, phase: f64) -> DMatrix<Complex64> {
    let rotation = Complex64::new(phase.cos(), -phase.sin());
    DMatrix::from_fn(master.nrows(), master.ncols(), |i, j| {
        Complex64::new(master[(i, j)], companion[(i, j)]) * rotation
    })
}

/// Per-sector factor `e^(2πihk/N) (cos φ - i sin φ)`, computed as the
/// unnormalised inverse DFT of a unit impulse at `h mod N`.
pub fn harmonic_phase_factors(hindex: i32, n_sector: usize, phase: f64) -> Vec<Complex64> {
    let mut buffer = vec![Complex64::new(0.0, 0.0); n_sector];
    if n_sector == 0 {
        return buffer;
    }
    buffer[hindex.rem_euclid(n_sector as i32) as usize] = Complex64::new(1.0, 0.0);

    let mut planner = FftPlanner::new();
    let ifft = planner.plan_fft_inverse(n_sector);
    ifft.process(&mut buffer);

    let rotation = Complex64::new(phase.cos(), -phase.sin());
    buffer.iter().map(|f| f * rotation).collect()
}

/// Amplitude scale of a full-rotor modal expansion: `1/√N` for standing
/// waves (`h = 0` or `h = N/2`), `1/√(N/2)` for travelling pairs.
pub fn full_rotor_scale(hindex: i32, n_sector: usize) -> f64 {
    let n = n_sector as f64;
    let h = hindex.unsigned_abs() as usize;
    if h == 0 || 2 * h == n_sector {
        1.0 / n.sqrt()
    } else {
        1.0 / (n / 2.0).sqrt()
    }
}

/// Zero-based mode number of each result within its harmonic index.
///
/// The counter restarts whenever `|h|` changes and stays put for results at
/// the same frequency (the two members of a harmonic pair).
pub fn mode_table(harmonic_indices: &[i32], frequencies: &[f64]) -> Vec<usize> {
    let n = harmonic_indices.len().min(frequencies.len());
    let mut table = Vec::with_capacity(n);
    let mut mode = 0;
    for i in 0..n {
        if i > 0 {
            if harmonic_indices[i].abs() != harmonic_indices[i - 1].abs() {
                mode = 0;
            } else if !isclose(frequencies[i], frequencies[i - 1]) {
                mode += 1;
            }
        }
        table.push(mode);
    }
    table
}

/// Partner of result `index` among the results sharing its `|h|`: the next
/// one from an even position, the previous one from an odd position.
fn harmonic_partner(harmonic_indices: &[i32], index: usize) -> Option<usize> {
    let h = harmonic_indices.get(index)?.abs();
    let group: Vec<usize> = (0..harmonic_indices.len())
        .filter(|&i| harmonic_indices[i].abs() == h)
        .collect();
    let position = group.iter().position(|&i| i == index)?;
    let partner = if position % 2 == 0 {
        position + 1
    } else {
        position - 1
    };
    group.get(partner).copied()
}

fn rotate_field(values: &DMatrix<f64>, angle: f64, kind: FieldKind) -> DMatrix<f64> {
    match kind {
        FieldKind::Vector => rotate_vectors(values, angle),
        FieldKind::Tensor => rotate_tensors(values, angle),
    }
}

fn rotate_complex(values: &DMatrix<Complex64>, angle: f64, kind: FieldKind) -> DMatrix<Complex64> {
    let re = rotate_field(&values.map(|z| z.re), angle, kind);
    let im = rotate_field(&values.map(|z| z.im), angle, kind);
    re.zip_map(&im, Complex64::new)
}

/// Rotate the translational (and, with six or more columns, rotational)
/// components about Z.
pub fn rotate_vectors(values: &DMatrix<f64>, angle: f64) -> DMatrix<f64> {
    let (s, c) = angle.sin_cos();
    let mut rotated = values.clone();
    let mut pairs = vec![(0, 1)];
    if values.ncols() >= 6 {
        pairs.push((3, 4));
    }
    for (a, b) in pairs {
        if values.ncols() <= b {
            continue;
        }
        for i in 0..values.nrows() {
            let (x, y) = (values[(i, a)], values[(i, b)]);
            rotated[(i, a)] = x * c - y * s;
            rotated[(i, b)] = x * s + y * c;
        }
    }
    rotated
}

/// Rotate `[SX SY SZ SXY SYZ SXZ]` rows about Z as `R S Rᵀ`.
pub fn rotate_tensors(values: &DMatrix<f64>, angle: f64) -> DMatrix<f64> {
    if values.ncols() < 6 {
        return values.clone();
    }
    let r = Rotation3::from_axis_angle(&Vector3::z_axis(), angle).into_inner();
    let mut rotated = values.clone();
    for i in 0..values.nrows() {
        let v = |j: usize| values[(i, j)];
        let s = Matrix3::new(
            v(0), v(3), v(5), //
            v(3), v(1), v(4), //
            v(5), v(4), v(2),
        );
        let t = r * s * r.transpose();
        for (j, value) in [t[(0, 0)], t[(1, 1)], t[(2, 2)], t[(0, 1)], t[(1, 2)], t[(0, 2)]]
            .into_iter()
            .enumerate()
        {
            rotated[(i, j)] = value;
        }
    }
    rotated
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn mode_table_resets_on_harmonic_change() {
        let hindex = [0, 0, 1, -1, 1, -1, 2, -2];
        let freqs = [1.0, 2.0, 3.0, 3.0, 4.0, 4.0, 5.0, 5.0];
        assert_eq!(mode_table(&hindex, &freqs), vec![0, 1, 0, 0, 1, 1, 0, 0]);
    }

    #[test]
    fn partner_alternates_within_harmonic_group() {
        let hindex = [0, 1, -1, 1, -1, 3];
        assert_eq!(harmonic_partner(&hindex, 1), Some(2));
        assert_eq!(harmonic_partner(&hindex, 2), Some(1));
        assert_eq!(harmonic_partner(&hindex, 3), Some(4));
        assert_eq!(harmonic_partner(&hindex, 5), None);
    }

    #[test]
    fn phase_factors_are_roots_of_unity() {
        let n = 6;
        let h = -2;
        let factors = harmonic_phase_factors(h, n, 0.0);
        for (k, f) in factors.iter().enumerate() {
            let angle = 2.0 * PI * (h as f64) * (k as f64) / n as f64;
            assert_relative_eq!(f.re, angle.cos(), epsilon = 1e-12);
            assert_relative_eq!(f.im, angle.sin(), epsilon = 1e-12);
        }
    }

    #[test]
    fn quarter_turn_maps_x_to_y() {
        let v = DMatrix::from_row_slice(1, 3, &[1.0, 0.0, 5.0]);
        let r = rotate_vectors(&v, PI / 2.0);
        assert_relative_eq!(r[(0, 0)], 0.0, epsilon = 1e-12);
        assert_relative_eq!(r[(0, 1)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(r[(0, 2)], 5.0);
    }

    #[test]
    fn tensor_rotation_swaps_normal_stresses() {
        let s = DMatrix::from_row_slice(1, 6, &[10.0, 2.0, 3.0, 0.0, 1.0, 0.0]);
        let r = rotate_tensors(&s, PI / 2.0);
        assert_relative_eq!(r[(0, 0)], 2.0, epsilon = 1e-12);
        assert_relative_eq!(r[(0, 1)], 10.0, epsilon = 1e-12);
        assert_relative_eq!(r[(0, 2)], 3.0, epsilon = 1e-12);
        // shear in YZ becomes shear in XZ
        assert_relative_eq!(r[(0, 4)], 0.0, epsilon = 1e-12);
        assert_relative_eq!(r[(0, 5)].abs(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn combine_applies_phase() {
        let u = DMatrix::from_row_slice(1, 1, &[1.0]);
        let ur = DMatrix::from_row_slice(1, 1, &[0.0]);
        let z = combine(&u, &ur, PI / 2.0);
        assert_relative_eq!(z[(0, 0)].re, 0.0, epsilon = 1e-12);
        assert_relative_eq!(z[(0, 0)].im, -1.0, epsilon = 1e-12);
    }
}
