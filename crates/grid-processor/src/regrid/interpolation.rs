//! Source-grid lookup and interpolation weights.
//!
//! Destination cells are resolved once into a [`Stencil`] (source indices
//! and weights), which is then applied to every time step.

use crate::error::{GridProcessorError, Result};

const FULL_CIRCLE: f64 = 360.0;
const EPSILON: f64 = 1e-9;

/// A monotonic axis of cell-centre coordinates.
#[derive(Debug, Clone)]
pub struct Axis {
    coords: Vec<f64>,
    descending: bool,
    /// Longitude-like axes compare values modulo 360.
    angular: bool,
    /// The axis spans the full circle, so the last cell neighbours the first.
    wraps: bool,
}

impl Axis {
    pub fn new(coords: &[f64]) -> Result<Self> {
        if coords.is_empty() || coords.iter().any(|c| !c.is_finite()) {
            return Err(GridProcessorError::grid("axis must be non-empty and finite"));
        }
        let descending = coords.len() > 1 && coords[1] < coords[0];
        let monotonic = coords
            .windows(2)
            .all(|w| if descending { w[1] < w[0] } else { w[1] > w[0] });
        if !monotonic {
            return Err(GridProcessorError::grid("axis is not strictly monotonic"));
        }
        Ok(Self {
            coords: coords.to_vec(),
            descending,
            angular: false,
            wraps: false,
        })
    }

    /// A longitude axis; it wraps when its cells cover all 360 degrees.
    pub fn longitude(coords: &[f64]) -> Result<Self> {
        let mut axis = Self::new(coords)?;
        let (min, max) = axis.bounds();
        if max - min > FULL_CIRCLE + 1e-6 {
            return Err(GridProcessorError::grid(format!(
                "longitude axis spans {} degrees",
                max - min
            )));
        }
        axis.angular = true;
        axis.wraps = coords.len() > 1 && max - min + axis.step() >= FULL_CIRCLE - 1e-6;
        Ok(axis)
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    pub fn wraps(&self) -> bool {
        self.wraps
    }

    /// Mean spacing between cell centres (zero for a single cell).
    pub fn step(&self) -> f64 {
        let n = self.coords.len();
        if n < 2 {
            return 0.0;
        }
        (self.coords[n - 1] - self.coords[0]).abs() / (n - 1) as f64
    }

    /// Smallest and largest cell centre.
    pub fn bounds(&self) -> (f64, f64) {
        let (a, b) = (self.coords[0], self.coords[self.coords.len() - 1]);
        (a.min(b), a.max(b))
    }

    /// Whether the cells of this axis reach `[lo, hi]`, allowing half a cell
    /// beyond the outermost centres.
    pub fn covers(&self, lo: f64, hi: f64) -> bool {
        if self.wraps {
            return true;
        }
        let half = self.step() / 2.0;
        let (min, max) = self.bounds();
        let fits = |shift: f64| lo + shift >= min - half - EPSILON && hi + shift <= max + half + EPSILON;
        if self.angular {
            [-FULL_CIRCLE, 0.0, FULL_CIRCLE].iter().any(|&s| fits(s))
        } else {
            fits(0.0)
        }
    }

    fn ascending(&self, i: usize) -> f64 {
        if self.descending {
            self.coords[self.coords.len() - 1 - i]
        } else {
            self.coords[i]
        }
    }

    /// Fractional index of `value` along the axis, or `None` when it lies
    /// more than half a cell outside. For wrapping axes the result may fall
    /// in `(-1, 0)` or `(n - 1, n)`, between the last and first cells.
    pub fn fractional_index(&self, value: f64) -> Option<f64> {
        let n = self.coords.len();
        let (min, max) = self.bounds();
        let half = self.step() / 2.0;

        let mut v = value;
        if self.angular {
            let base = if self.wraps { min } else { min - half };
            v = base + (value - base).rem_euclid(FULL_CIRCLE);
        }

        let ascending_index = if self.wraps && v > max {
            // In the gap between the last centre and the first one + 360
            (n - 1) as f64 + (v - max) / (min + FULL_CIRCLE - max)
        } else {
            if v < min - half - EPSILON || v > max + half + EPSILON {
                return None;
            }
            if n == 1 {
                0.0
            } else {
                let v = v.clamp(min, max);
                let (mut lo, mut hi) = (0usize, n - 1);
                while hi - lo > 1 {
                    let mid = (lo + hi) / 2;
                    if self.ascending(mid) <= v {
                        lo = mid;
                    } else {
                        hi = mid;
                    }
                }
                let (a, b) = (self.ascending(lo), self.ascending(hi));
                lo as f64 + ((v - a) / (b - a)).clamp(0.0, 1.0)
            }
        };

        Some(if self.descending {
            (n - 1) as f64 - ascending_index
        } else {
            ascending_index
        })
    }

    /// Resolve a (possibly negative or past-the-end) integer index.
    fn resolve(&self, index: i64) -> usize {
        let n = self.coords.len() as i64;
        if self.wraps {
            index.rem_euclid(n) as usize
        } else {
            index.clamp(0, n - 1) as usize
        }
    }
}

/// Index of the nearest source cell for a fractional position.
pub fn nearest_index(rows: &Axis, cols: &Axis, row: f64, col: f64) -> usize {
    let r = rows.resolve(row.round() as i64);
    let c = cols.resolve(col.round() as i64);
    r * cols.len() + c
}

/// The four corner indices and weights of a bilinear interpolation.
pub fn bilinear_weights(rows: &Axis, cols: &Axis, row: f64, col: f64) -> [(usize, f64); 4] {
    let r0 = row.floor();
    let c0 = col.floor();
    let yf = if rows.len() > 1 { (row - r0).clamp(0.0, 1.0) } else { 0.0 };
    let xf = if cols.len() > 1 { (col - c0).clamp(0.0, 1.0) } else { 0.0 };

    let (r0i, r1i) = (rows.resolve(r0 as i64), rows.resolve(r0 as i64 + 1));
    let (c0i, c1i) = (cols.resolve(c0 as i64), cols.resolve(c0 as i64 + 1));
    let width = cols.len();

    [
        (r0i * width + c0i, (1.0 - xf) * (1.0 - yf)),
        (r0i * width + c1i, xf * (1.0 - yf)),
        (r1i * width + c0i, (1.0 - xf) * yf),
        (r1i * width + c1i, xf * yf),
    ]
}

/// How missing source values affect a destination cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NanPolicy {
    /// Any missing contributor makes the cell missing (interpolation).
    Propagate,
    /// Missing contributors are left out of the weighted mean (averaging).
    Skip,
}

/// Precomputed source contributions for every destination cell, stored
/// compressed-row style.
#[derive(Debug, Clone)]
pub struct Stencil {
    offsets: Vec<usize>,
    indices: Vec<u32>,
    weights: Vec<f64>,
    nan_policy: NanPolicy,
}

impl Stencil {
    pub fn new(nan_policy: NanPolicy) -> Self {
        Self {
            offsets: vec![0],
            indices: Vec::new(),
            weights: Vec::new(),
            nan_policy,
        }
    }

    /// Append the next destination cell. Zero-weight entries are dropped;
    /// an empty cell is always missing.
    pub fn push_cell(&mut self, entries: impl IntoIterator<Item = (usize, f64)>) {
        for (index, weight) in entries {
            if weight > 0.0 {
                self.indices.push(index as u32);
                self.weights.push(weight);
            }
        }
        self.offsets.push(self.indices.len());
    }

    pub fn append(&mut self, other: Stencil) {
        let base = self.indices.len();
        self.offsets
            .extend(other.offsets.iter().skip(1).map(|o| o + base));
        self.indices.extend(other.indices);
        self.weights.extend(other.weights);
    }

    pub fn cells(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Evaluate the stencil over one source slice.
    pub fn apply(&self, source: &[f32]) -> Vec<f32> {
        (0..self.cells())
            .map(|cell| {
                let range = self.offsets[cell]..self.offsets[cell + 1];
                if range.is_empty() {
                    return f32::NAN;
                }
                let mut sum = 0.0f64;
                let mut total = 0.0f64;
                for (&index, &weight) in self.indices[range.clone()].iter().zip(&self.weights[range]) {
                    let v = source[index as usize];
                    if v.is_nan() {
                        match self.nan_policy {
                            NanPolicy::Propagate => return f32::NAN,
                            NanPolicy::Skip => continue,
                        }
                    }
                    sum += weight * v as f64;
                    total += weight;
                }
                if total > 0.0 {
                    (sum / total) as f32
                } else {
                    f32::NAN
                }
            })
            .collect()
    }
}
