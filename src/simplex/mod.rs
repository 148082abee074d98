//! Revised dual simplex engine.
//!
//! The engine works on the full variable space: `num_col` structural columns
//! followed by `num_row` logical columns with unit coefficients, so the
//! constraint system is `A x + s = 0` with the logical variable for row `i`
//! bounded by `[-row_upper[i], -row_lower[i]]` and the all-logical basis
//! equal to the identity.

pub mod basis;
pub mod dual;
pub mod parallel;
pub mod pricing;
pub mod rhs;
pub mod row;

pub use basis::{Basis, BasisStatus};
pub use dual::DualSimplex;

use crate::model::{Model, ObjSense};
use crate::sparse::SparseMatrix;
use crate::{E, I, INFTY, ModelStatus};

/// Why the iteration loop must return to the driver for a rebuild.
///
/// Inner routines set the reason and return; the driver checks it at a
/// single point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildReason {
    /// Row/column pivot disagreement or a failed factor update.
    NumericalTrouble,
    /// The eta file hit its update limit.
    UpdateLimit,
    /// CHUZR found no infeasible row; optimality must be confirmed on a
    /// fresh factorization.
    PossiblyOptimal,
    /// CHUZC found no admissible pivot; primal infeasibility must be
    /// confirmed on a fresh factorization.
    PossiblyInfeasible,
    /// Cost perturbation must be removed before declaring optimality.
    Cleanup,
    /// The synthetic clock says a refactorization is cheaper than more
    /// updates.
    SyntheticClock,
}

/// The LP as the engine sees it: minimization over the full variable space.
#[derive(Debug, Clone)]
pub(crate) struct SimplexLp {
    pub num_col: I,
    pub num_row: I,
    pub num_tot: I,
    pub matrix: SparseMatrix,
    /// Sense-adjusted costs over all variables (zero for logicals).
    pub cost: Vec<E>,
    pub lower: Vec<E>,
    pub upper: Vec<E>,
    pub sense_sign: E,
    pub offset: E,
}

impl SimplexLp {
    pub fn from_model(model: &Model) -> Self {
        Self::with_bounds(model, &model.col_lower, &model.col_upper)
    }

    /// Builds the engine form with overridden column bounds (used by the
    /// search for node relaxations).
    pub fn with_bounds(model: &Model, col_lower: &[E], col_upper: &[E]) -> Self {
        let num_col = model.num_col;
        let num_row = model.num_row;
        let num_tot = num_col + num_row;
        let sign = model.sense.sign();

        let mut cost = vec![0.0; num_tot];
        let mut lower = vec![0.0; num_tot];
        let mut upper = vec![0.0; num_tot];
        for j in 0..num_col {
            cost[j] = sign * model.col_cost[j];
            lower[j] = Model::normalize_bound(col_lower[j]);
            upper[j] = Model::normalize_bound(col_upper[j]);
        }
        for i in 0..num_row {
            lower[num_col + i] = -Model::normalize_bound(model.row_upper[i]);
            upper[num_col + i] = -Model::normalize_bound(model.row_lower[i]);
        }

        Self {
            num_col,
            num_row,
            num_tot,
            matrix: SparseMatrix::from_csc(
                num_row,
                num_col,
                model.a_start.clone(),
                model.a_index.clone(),
                model.a_value.clone(),
            ),
            cost,
            lower,
            upper,
            sense_sign: sign,
            offset: model.offset,
        }
    }

    /// Column of the full matrix: structural or logical unit column.
    pub fn col_entries(&self, var: I) -> Vec<(I, E)> {
        if var < self.num_col {
            self.matrix.col(var).collect()
        } else {
            vec![(var - self.num_col, 1.0)]
        }
    }
}

/// Primal-dual solution of an LP solve, in the model's original sense.
#[derive(Debug, Clone, Default)]
pub struct LpSolution {
    pub status: ModelStatus,
    pub objective: E,
    pub iterations: I,
    pub col_value: Vec<E>,
    pub col_dual: Vec<E>,
    pub row_value: Vec<E>,
    pub row_dual: Vec<E>,
    pub col_status: Vec<BasisStatus>,
    pub row_status: Vec<BasisStatus>,
    /// Dual unboundedness certificate rows, present when `Infeasible`.
    pub dual_ray: Option<Vec<E>>,
    /// Primal direction certificate, present when unbounded.
    pub primal_ray: Option<Vec<E>>,
    /// The final simplex basis, reusable as a warm start.
    pub basis: Option<Basis>,
}

impl LpSolution {
    pub(crate) fn with_status(status: ModelStatus) -> Self {
        Self {
            status,
            objective: match status {
                ModelStatus::ModelEmpty | ModelStatus::Optimal => 0.0,
                _ => INFTY,
            },
            ..Self::default()
        }
    }
}

/// Solves a trivially empty model (no rows): every column goes to its best
/// bound.
pub(crate) fn solve_unconstrained(model: &Model) -> LpSolution {
    let sign = model.sense.sign();
    let mut col_value = vec![0.0; model.num_col];
    let mut col_status = vec![BasisStatus::Lower; model.num_col];
    for j in 0..model.num_col {
        let cost = sign * model.col_cost[j];
        let lower = Model::normalize_bound(model.col_lower[j]);
        let upper = Model::normalize_bound(model.col_upper[j]);
        if lower > upper {
            return LpSolution::with_status(ModelStatus::Infeasible);
        }
        let (value, status) = if cost > 0.0 {
            (lower, BasisStatus::Lower)
        } else if cost < 0.0 {
            (upper, BasisStatus::Upper)
        } else if lower > -crate::INFTY_THRESHOLD {
            (lower, BasisStatus::Lower)
        } else if upper < crate::INFTY_THRESHOLD {
            (upper, BasisStatus::Upper)
        } else {
            (0.0, BasisStatus::Zero)
        };
        if value.abs() >= crate::INFTY_THRESHOLD {
            let mut solution = LpSolution::with_status(ModelStatus::Unbounded);
            let mut ray = vec![0.0; model.num_col];
            ray[j] = -cost.signum();
            solution.primal_ray = Some(ray);
            return solution;
        }
        col_value[j] = value;
        col_status[j] = status;
    }
    let objective = model.objective_value(&col_value);
    LpSolution {
        status: ModelStatus::Optimal,
        objective,
        col_value,
        col_dual: model.col_cost.clone(),
        col_status,
        ..LpSolution::default()
    }
}

/// Internal objective bound: converts a bound in original-sense units into
/// the engine's minimization units. An infinite bound is disabled in either
/// sense.
pub(crate) fn internal_bound(bound: E, sense: ObjSense, offset: E) -> E {
    if bound.abs() >= crate::INFTY_THRESHOLD {
        INFTY
    } else {
        sense.sign() * (bound - offset)
    }
}
