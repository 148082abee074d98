//! Model storage: objective, bounds, constraint matrix, integrality marks,
//! and the optional Hessian.

pub mod assess;
pub mod hessian;

use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};

use crate::{E, I, INFTY};

pub use hessian::{Hessian, HessianFormat};

/// Objective sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ObjSense {
    #[default]
    Minimize,
    Maximize,
}

impl ObjSense {
    /// `+1` for minimization, `-1` for maximization.
    pub fn sign(self) -> E {
        match self {
            ObjSense::Minimize => 1.0,
            ObjSense::Maximize => -1.0,
        }
    }
}

/// Per-column integrality mark accepted at the facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Integrality {
    #[default]
    Continuous,
    Integer,
}

/// Matrix orientation tag for batched facade calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MatrixFormat {
    /// Compressed sparse column.
    #[default]
    ColWise,
    /// Compressed sparse row.
    RowWise,
}

/// Validation and model-editing errors surfaced at the facade boundary.
#[derive(Debug, Display, Error, PartialEq, Clone)]
pub enum ModelError {
    #[display("Dimension mismatch: {_0}")]
    DimensionMismatch(#[error(not(source))] String),

    #[display("Illegal bound for {entity} {index}")]
    BadBound { entity: &'static str, index: I },

    #[display("Infinite cost for column {_0} with infinite costs disallowed")]
    InfiniteCost(#[error(not(source))] I),

    #[display("Matrix coefficient magnitude outside the allowed band")]
    LargeCoefficient,

    #[display("Index out of range")]
    IndexOutOfRange,

    #[display("Duplicate index within a column")]
    DuplicateIndex,

    #[display("Hessian is not symmetric")]
    HessianAsymmetric,

    #[display("Hessian diagonal is inconsistent with the objective sense")]
    HessianIndefinite,

    #[display("Operation not supported: {_0}")]
    NotSupported(#[error(not(source))] &'static str),
}

/// A linear or mixed-integer model, optionally with a quadratic term:
///
/// ```text
/// min  c^T x + 1/2 x^T Q x + offset
/// s.t. row_lower <= A x <= row_upper
///      col_lower <=  x  <= col_upper
///      x_j integer for marked j
/// ```
///
/// The constraint matrix is stored column-wise (CSC). Structural invariants
/// (monotone `a_start`, in-range unique indices per column, ordered bounds up
/// to warning coercion) are established by [`assess::assess_model`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Model {
    pub num_col: I,
    pub num_row: I,
    pub sense: ObjSense,
    pub offset: E,

    pub col_cost: Vec<E>,
    pub col_lower: Vec<E>,
    pub col_upper: Vec<E>,
    pub row_lower: Vec<E>,
    pub row_upper: Vec<E>,

    pub a_start: Vec<I>,
    pub a_index: Vec<I>,
    pub a_value: Vec<E>,

    /// Empty means every column is continuous.
    pub integrality: Vec<Integrality>,

    pub hessian: Option<Hessian>,
}

impl Model {
    /// Creates an empty model.
    pub fn new() -> Self {
        Self {
            a_start: vec![0],
            ..Self::default()
        }
    }

    /// Number of constraint matrix nonzeros.
    pub fn num_nz(&self) -> I {
        *self.a_start.last().unwrap_or(&0)
    }

    /// Whether the model has both an integrality mark and at least one
    /// integer column.
    pub fn is_mip(&self) -> bool {
        self.integrality.iter().any(|&v| v == Integrality::Integer)
    }

    /// Whether the model carries a nonempty quadratic term.
    pub fn is_qp(&self) -> bool {
        self.hessian.as_ref().is_some_and(|h| h.num_nz() > 0)
    }

    /// Column `col` as (index, value) pairs.
    pub fn col(&self, col: I) -> impl Iterator<Item = (I, E)> + '_ {
        let range = self.a_start[col]..self.a_start[col + 1];
        range.map(move |k| (self.a_index[k], self.a_value[k]))
    }

    /// Looks up the coefficient at (`row`, `col`), zero when absent.
    pub fn coeff(&self, row: I, col: I) -> E {
        self.col(col)
            .find(|&(i, _)| i == row)
            .map_or(0.0, |(_, v)| v)
    }

    /// Whether any finite bound pair is inverted, making the model trivially
    /// infeasible.
    pub fn has_infeasible_bounds(&self) -> bool {
        let col_bad = (0..self.num_col)
            .any(|j| self.col_lower[j] > self.col_upper[j]);
        let row_bad = (0..self.num_row)
            .any(|i| self.row_lower[i] > self.row_upper[i]);
        col_bad || row_bad
    }

    /// Objective value of a primal point, including the offset and the
    /// quadratic term.
    pub fn objective_value(&self, x: &[E]) -> E {
        let mut value = self.offset;
        for j in 0..self.num_col {
            value += self.col_cost[j] * x[j];
        }
        if let Some(hessian) = &self.hessian {
            value += hessian.quadratic_form(x);
        }
        value
    }

    /// Normalizes a bound value: magnitudes above the free-side threshold
    /// collapse to the infinity sentinel.
    pub(crate) fn normalize_bound(value: E) -> E {
        if crate::is_pos_infinite(value) {
            INFTY
        } else if crate::is_neg_infinite(value) {
            -INFTY
        } else {
            value
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_by_two() -> Model {
        Model {
            num_col: 2,
            num_row: 2,
            col_cost: vec![1.0, 2.0],
            col_lower: vec![0.0, 0.0],
            col_upper: vec![INFTY, INFTY],
            row_lower: vec![-INFTY, -INFTY],
            row_upper: vec![4.0, 6.0],
            a_start: vec![0, 2, 4],
            a_index: vec![0, 1, 0, 1],
            a_value: vec![1.0, 2.0, 3.0, 4.0],
            ..Model::new()
        }
    }

    #[test]
    fn coeff_lookup() {
        let model = two_by_two();
        assert_eq!(model.coeff(0, 1), 3.0);
        assert_eq!(model.coeff(1, 0), 2.0);
        assert_eq!(model.num_nz(), 4);
    }

    #[test]
    fn objective_includes_offset() {
        let mut model = two_by_two();
        model.offset = 10.0;
        assert_eq!(model.objective_value(&[1.0, 1.0]), 13.0);
    }

    #[test]
    fn mip_detection_requires_integer_mark() {
        let mut model = two_by_two();
        assert!(!model.is_mip());
        model.integrality = vec![Integrality::Continuous, Integrality::Integer];
        assert!(model.is_mip());
    }
}
