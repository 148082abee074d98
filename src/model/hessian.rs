//! Hessian storage and normalization.
//!
//! The engine-internal form is triangular: each column stores its diagonal
//! entry first, followed by the entries strictly below the diagonal in
//! ascending row order. Read row-wise this is the upper triangle of the
//! symmetric matrix. Square input is symmetrized on assessment: mirrored
//! off-diagonal entries are averaged, one-sided entries halved, and exact
//! cancellations dropped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{ModelError, ObjSense};
use crate::options::Options;
use crate::{E, I, Status};

/// Storage layout of a [`Hessian`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HessianFormat {
    /// Full square matrix; symmetrized on assessment.
    #[default]
    Square,
    /// Canonical form: per column the diagonal first, then the strict
    /// triangle below it, row-sorted, duplicate-free.
    Triangular,
}

/// Sparse symmetric quadratic term `1/2 x^T Q x` in CSC arrays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hessian {
    pub dim: I,
    pub format: HessianFormat,
    pub q_start: Vec<I>,
    pub q_index: Vec<I>,
    pub q_value: Vec<E>,
}

impl Hessian {
    pub fn num_nz(&self) -> I {
        *self.q_start.last().unwrap_or(&0)
    }

    /// Evaluates `1/2 x^T Q x`.
    pub fn quadratic_form(&self, x: &[E]) -> E {
        let mut value = 0.0;
        for col in 0..self.dim {
            for k in self.q_start[col]..self.q_start[col + 1] {
                let row = self.q_index[k];
                let q = self.q_value[k];
                if row == col {
                    value += 0.5 * q * x[col] * x[col];
                } else if self.format == HessianFormat::Triangular {
                    // Triangular entries stand for both mirror positions.
                    value += q * x[row] * x[col];
                } else {
                    value += 0.5 * q * x[row] * x[col];
                }
            }
        }
        value
    }

    /// Mirrors the triangular form back to a full square matrix.
    pub fn to_square(&self) -> Hessian {
        assert_eq!(self.format, HessianFormat::Triangular);
        let mut columns: Vec<Vec<(I, E)>> = vec![Vec::new(); self.dim];
        for col in 0..self.dim {
            for k in self.q_start[col]..self.q_start[col + 1] {
                let row = self.q_index[k];
                columns[col].push((row, self.q_value[k]));
                if row != col {
                    columns[row].push((col, self.q_value[k]));
                }
            }
        }
        let mut q_start = vec![0];
        let mut q_index = Vec::new();
        let mut q_value = Vec::new();
        for column in &mut columns {
            column.sort_by_key(|&(row, _)| row);
            for &(row, value) in column.iter() {
                q_index.push(row);
                q_value.push(value);
            }
            q_start.push(q_index.len());
        }
        Hessian {
            dim: self.dim,
            format: HessianFormat::Square,
            q_start,
            q_index,
            q_value,
        }
    }
}

/// Structural validation shared by both formats.
fn assess_structure(hessian: &Hessian) -> Result<(), ModelError> {
    if hessian.q_start.len() != hessian.dim + 1 || hessian.q_start.first() != Some(&0) {
        return Err(ModelError::DimensionMismatch(format!(
            "Hessian starts have length {}, expected {}",
            hessian.q_start.len(),
            hessian.dim + 1
        )));
    }
    let num_nz = hessian.num_nz();
    if hessian.q_index.len() != num_nz || hessian.q_value.len() != num_nz {
        return Err(ModelError::DimensionMismatch(
            "Hessian index/value lengths disagree with starts".to_string(),
        ));
    }
    let mut seen = vec![usize::MAX; hessian.dim];
    for col in 0..hessian.dim {
        if hessian.q_start[col] > hessian.q_start[col + 1] {
            return Err(ModelError::DimensionMismatch(
                "Hessian starts must be non-decreasing".to_string(),
            ));
        }
        for k in hessian.q_start[col]..hessian.q_start[col + 1] {
            let row = hessian.q_index[k];
            if row >= hessian.dim {
                return Err(ModelError::IndexOutOfRange);
            }
            if seen[row] == col {
                return Err(ModelError::DuplicateIndex);
            }
            seen[row] = col;
            if !hessian.q_value[k].is_finite() {
                return Err(ModelError::LargeCoefficient);
            }
        }
    }
    Ok(())
}

/// Converts a square Hessian into the canonical triangular form.
///
/// Each off-diagonal position takes the value `(Q_ij + Q_ji) / 2`: the
/// average when both mirror entries exist, half the value when only one
/// does. Pairs that differ beyond the agreement tolerance are retained at
/// their average and reported with a warning. Combined values below the
/// small-matrix threshold are dropped.
pub fn extract_triangular_hessian(
    hessian: &mut Hessian,
    options: &Options,
) -> Result<Status, ModelError> {
    if hessian.format == HessianFormat::Triangular {
        return Ok(Status::Ok);
    }

    let dim = hessian.dim;
    let mut diagonal: Vec<Option<E>> = vec![None; dim];
    // Key is (column, row) of the triangular target with row >= column;
    // values are the below/above contributions.
    let mut pairs: BTreeMap<(I, I), (Option<E>, Option<E>)> = BTreeMap::new();

    for col in 0..dim {
        for k in hessian.q_start[col]..hessian.q_start[col + 1] {
            let row = hessian.q_index[k];
            let value = hessian.q_value[k];
            if row == col {
                diagonal[col] = Some(value);
            } else if row > col {
                pairs.entry((col, row)).or_default().0 = Some(value);
            } else {
                pairs.entry((row, col)).or_default().1 = Some(value);
            }
        }
    }

    let mut status = Status::Ok;
    let mut columns: Vec<Vec<(I, E)>> = vec![Vec::new(); dim];
    for col in 0..dim {
        if let Some(diag) = diagonal[col] {
            if diag.abs() >= options.small_matrix_value {
                columns[col].push((col, diag));
            }
        }
    }
    for (&(col, row), &(below, above)) in &pairs {
        if let (Some(a), Some(b)) = (below, above) {
            let scale = 1.0 + a.abs().max(b.abs());
            if (a - b).abs() > 1e-10 * scale {
                status = Status::Warning;
            }
        }
        let value = (below.unwrap_or(0.0) + above.unwrap_or(0.0)) / 2.0;
        if value.abs() >= options.small_matrix_value {
            columns[col].push((row, value));
        }
    }

    let mut q_start = vec![0];
    let mut q_index = Vec::new();
    let mut q_value = Vec::new();
    for column in &columns {
        // Diagonal-first order is already guaranteed: the diagonal was
        // pushed before any strict entry and strict entries arrive
        // row-sorted from the BTreeMap.
        for &(row, value) in column {
            q_index.push(row);
            q_value.push(value);
        }
        q_start.push(q_index.len());
    }

    hessian.format = HessianFormat::Triangular;
    hessian.q_start = q_start;
    hessian.q_index = q_index;
    hessian.q_value = q_value;
    Ok(status)
}

/// Validates the Hessian, converts it to triangular form, and checks the
/// diagonal sign against the objective sense.
pub fn assess_hessian(
    hessian: &mut Hessian,
    options: &Options,
    sense: ObjSense,
) -> Result<Status, ModelError> {
    assess_structure(hessian)?;

    let status = match hessian.format {
        HessianFormat::Square => extract_triangular_hessian(hessian, options)?,
        HessianFormat::Triangular => {
            normalize_triangular(hessian)?;
            Status::Ok
        }
    };

    // Non-negative diagonal is necessary for convexity when minimizing,
    // non-positive when maximizing. Indefiniteness is reported, never
    // corrected.
    for col in 0..hessian.dim {
        let start = hessian.q_start[col];
        if start == hessian.q_start[col + 1] || hessian.q_index[start] != col {
            continue;
        }
        let diag = hessian.q_value[start];
        let bad = match sense {
            ObjSense::Minimize => diag < 0.0,
            ObjSense::Maximize => diag > 0.0,
        };
        if bad {
            return Err(ModelError::HessianIndefinite);
        }
    }

    Ok(status)
}

/// Sorts each triangular column diagonal-first and rejects entries above the
/// diagonal.
fn normalize_triangular(hessian: &mut Hessian) -> Result<(), ModelError> {
    for col in 0..hessian.dim {
        let range = hessian.q_start[col]..hessian.q_start[col + 1];
        for k in range.clone() {
            if hessian.q_index[k] < col {
                return Err(ModelError::IndexOutOfRange);
            }
        }
        let mut entries: Vec<(I, E)> = range
            .clone()
            .map(|k| (hessian.q_index[k], hessian.q_value[k]))
            .collect();
        entries.sort_by_key(|&(row, _)| row);
        for (k, (row, value)) in range.zip(entries) {
            hessian.q_index[k] = row;
            hessian.q_value[k] = value;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_hessian() -> Hessian {
        Hessian {
            dim: 5,
            format: HessianFormat::Square,
            q_start: vec![0, 4, 7, 9, 12, 15],
            q_index: vec![0, 1, 3, 4, 0, 1, 4, 2, 3, 0, 2, 3, 0, 1, 4],
            q_value: vec![
                5.0, 1.0, -1.0, 2.0, 1.0, 4.0, 1.0, 3.0, -1.0, -1.0, -1.0, 4.0, 2.0, 1.0, 5.0,
            ],
        }
    }

    fn triangular_hessian() -> Hessian {
        Hessian {
            dim: 5,
            format: HessianFormat::Triangular,
            q_start: vec![0, 4, 6, 8, 9, 10],
            q_index: vec![0, 1, 3, 4, 1, 4, 2, 3, 3, 4],
            q_value: vec![5.0, 1.0, -1.0, 2.0, 4.0, 1.0, 3.0, -1.0, 4.0, 5.0],
        }
    }

    #[test]
    fn square_extracts_to_triangular() {
        let options = Options::default();
        let mut hessian = square_hessian();
        let status = assess_hessian(&mut hessian, &options, ObjSense::Minimize).unwrap();
        assert_eq!(status, Status::Ok);
        assert_eq!(hessian, triangular_hessian());
    }

    #[test]
    fn triangular_assessment_is_idempotent() {
        let options = Options::default();
        let mut hessian = triangular_hessian();
        assert_eq!(
            assess_hessian(&mut hessian, &options, ObjSense::Minimize),
            Ok(Status::Ok)
        );
        assert_eq!(hessian, triangular_hessian());

        let mut again = hessian.clone();
        assess_hessian(&mut again, &options, ObjSense::Minimize).unwrap();
        assert_eq!(again, hessian);
    }

    #[test]
    fn doubled_one_sided_entries_are_halved() {
        // Square matrix storing only the upper triangle with doubled strict
        // entries; halving reproduces the canonical triangular form.
        let options = Options::default();
        let mut hessian = Hessian {
            dim: 5,
            format: HessianFormat::Square,
            q_start: vec![0, 1, 3, 4, 7, 10],
            q_index: vec![0, 0, 1, 2, 0, 2, 3, 0, 1, 4],
            q_value: vec![5.0, 2.0, 4.0, 3.0, -2.0, -2.0, 4.0, 4.0, 2.0, 5.0],
        };
        let status = assess_hessian(&mut hessian, &options, ObjSense::Minimize).unwrap();
        assert_eq!(status, Status::Ok);
        assert_eq!(hessian, triangular_hessian());
    }

    #[test]
    fn asymmetric_entries_average_with_warning() {
        // Mirror pairs disagree, one pair cancels exactly and disappears.
        let options = Options::default();
        let mut hessian = Hessian {
            dim: 5,
            format: HessianFormat::Square,
            q_start: vec![0, 3, 5, 7, 10, 14],
            q_index: vec![0, 3, 4, 0, 1, 2, 4, 0, 2, 3, 0, 1, 2, 4],
            q_value: vec![
                5.0, -5.0, 1.0, 2.0, 4.0, 3.0, 1.0, 3.0, -2.0, 4.0, 3.0, 2.0, -1.0, 5.0,
            ],
        };
        let status = assess_hessian(&mut hessian, &options, ObjSense::Minimize).unwrap();
        assert_eq!(status, Status::Warning);
        assert_eq!(hessian, triangular_hessian());
    }

    #[test]
    fn negative_diagonal_matches_maximization_only() {
        let options = Options::default();
        let mut negated = triangular_hessian();
        for value in &mut negated.q_value {
            *value = -*value;
        }
        let mut for_max = negated.clone();
        assert!(assess_hessian(&mut for_max, &options, ObjSense::Maximize).is_ok());
        assert_eq!(
            assess_hessian(&mut negated, &options, ObjSense::Minimize),
            Err(ModelError::HessianIndefinite)
        );
    }

    #[test]
    fn triangular_mirrors_back_to_symmetrized_square() {
        let options = Options::default();
        let mut hessian = square_hessian();
        assess_hessian(&mut hessian, &options, ObjSense::Minimize).unwrap();
        let square = hessian.to_square();

        // The square Hessian in this fixture is symmetric already, so the
        // round trip reproduces it entry for entry.
        assert_eq!(square.q_start, square_hessian().q_start);
        assert_eq!(square.q_index, square_hessian().q_index);
        assert_eq!(square.q_value, square_hessian().q_value);
    }

    #[test]
    fn quadratic_form_matches_dense_evaluation() {
        let mut hessian = square_hessian();
        let x = [1.0, 2.0, -1.0, 0.5, 1.5];
        let square_value = hessian.quadratic_form(&x);
        assess_hessian(&mut hessian, &Options::default(), ObjSense::Minimize).unwrap();
        let triangular_value = hessian.quadratic_form(&x);
        assert!((square_value - triangular_value).abs() < 1e-12);
    }
}
