//! Mixed-integer programming engine: LP-relaxation-driven branch-and-bound
//! with root cutting planes, domain propagation, pseudocost branching,
//! reduced-cost fixing and large-neighborhood heuristics.

pub mod cuts;
pub mod domain;
pub mod nodequeue;
pub mod pseudocost;
pub mod redcost;
pub mod search;

use crate::callback::Callback;
use crate::model::{Integrality, Model};
use crate::options::Options;
use crate::simplex::{DualSimplex, LpSolution};
use crate::sparse::SparseMatrix;
use crate::terminators::Terminator;
use crate::{E, I, INFTY, ModelStatus};

use cuts::{CutGeneration, CutPool};
use search::Search;

/// Engine-side variable type. The public interface accepts the two-valued
/// [`Integrality`]; the engine keeps room for derived kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarType {
    Continuous,
    Integer,
    /// Continuous in the input but provably integral in every vertex;
    /// reserved for presolve-style derivations.
    #[allow(dead_code)]
    ImplicitInteger,
}

impl From<Integrality> for VarType {
    fn from(integrality: Integrality) -> Self {
        match integrality {
            Integrality::Continuous => VarType::Continuous,
            Integrality::Integer => VarType::Integer,
        }
    }
}

/// Result of a MIP solve, in the model's original sense.
#[derive(Debug, Clone)]
pub struct MipSolution {
    pub status: ModelStatus,
    /// Incumbent objective; infinite when no incumbent was found.
    pub objective: E,
    /// Best proven dual bound.
    pub dual_bound: E,
    pub col_value: Vec<E>,
    pub nodes: I,
    pub lp_iterations: I,
    pub incumbent_found: bool,
}

impl MipSolution {
    fn with_status(status: ModelStatus, sense_sign: E) -> Self {
        Self {
            status,
            objective: sense_sign * INFTY,
            dual_bound: -sense_sign * INFTY,
            col_value: Vec::new(),
            nodes: 0,
            lp_iterations: 0,
            incumbent_found: false,
        }
    }
}

pub struct MipSolver<'a> {
    model: &'a Model,
    options: &'a Options,
}

impl<'a> MipSolver<'a> {
    pub fn new(model: &'a Model, options: &'a Options) -> Self {
        Self { model, options }
    }

    pub fn solve(
        &mut self,
        terminator: &mut dyn Terminator,
        callback: &mut dyn Callback,
    ) -> MipSolution {
        let sign = self.model.sense.sign();
        let var_type: Vec<VarType> = if self.model.integrality.is_empty() {
            vec![VarType::Continuous; self.model.num_col]
        } else {
            self.model.integrality.iter().map(|&m| m.into()).collect()
        };

        terminator.initialize();

        // Root relaxation.
        let mut relaxation = self.model.clone();
        relaxation.integrality.clear();
        let mut root = self.solve_root(&relaxation, terminator, callback);
        match root.status {
            ModelStatus::Optimal => {}
            ModelStatus::Infeasible => {
                return MipSolution::with_status(ModelStatus::Infeasible, sign);
            }
            ModelStatus::Unbounded | ModelStatus::UnboundedOrInfeasible => {
                return MipSolution::with_status(root.status, sign);
            }
            other => return MipSolution::with_status(other, sign),
        }

        // Root cutting-plane rounds: separate every row of the current
        // relaxation against its optimum, rebuild, re-solve.
        let mut pool = CutPool::new(self.options.mip_cut_age_limit);
        let mut generator = CutGeneration::new(self.options);
        let mut lp_iterations = root.iterations;
        for _ in 0..4 {
            let added = self.separate(&relaxation, &root, &var_type, &mut generator, &mut pool);
            if added == 0 {
                break;
            }
            relaxation = model_with_cuts(self.model, &pool);
            root = self.solve_root(&relaxation, terminator, callback);
            lp_iterations += root.iterations;
            if root.status != ModelStatus::Optimal {
                return MipSolution::with_status(root.status, sign);
            }
            let active: Vec<bool> = pool
                .cuts()
                .iter()
                .map(|cut| {
                    let mut activity = 0.0;
                    for (&col, &value) in cut.index.iter().zip(&cut.value) {
                        activity += value * root.col_value[col];
                    }
                    (activity - cut.rhs).abs() <= self.options.mip_feasibility_tolerance
                })
                .collect();
            pool.age_cuts(|k| active[k]);
        }

        // Branch and bound on the cut-strengthened relaxation.
        let mut search = Search::new(&relaxation, self.options, var_type, &root, false);
        let result = search.run(terminator, callback);
        for conflict in search.take_conflicts() {
            let _ = pool.add_cut(conflict);
        }

        let incumbent_found = result.incumbent.is_some();
        let status = match result.status {
            ModelStatus::Optimal if !incumbent_found => ModelStatus::Infeasible,
            other => other,
        };
        MipSolution {
            status,
            objective: if incumbent_found {
                sign * result.incumbent_objective + self.model.offset
            } else {
                sign * INFTY
            },
            dual_bound: sign * result.dual_bound + self.model.offset,
            col_value: result.incumbent.unwrap_or_default(),
            nodes: result.nodes,
            lp_iterations: lp_iterations + result.lp_iterations,
            incumbent_found,
        }
    }

    fn solve_root(
        &self,
        relaxation: &Model,
        terminator: &mut dyn Terminator,
        callback: &mut dyn Callback,
    ) -> LpSolution {
        let mut engine = DualSimplex::new(relaxation, self.options);
        engine.solve(terminator, callback)
    }

    /// One separation sweep over every row of the relaxation. Returns the
    /// number of cuts that entered the pool.
    fn separate(
        &self,
        relaxation: &Model,
        root: &LpSolution,
        var_type: &[VarType],
        generator: &mut CutGeneration<'_>,
        pool: &mut CutPool,
    ) -> I {
        let matrix = SparseMatrix::from_csc(
            relaxation.num_row,
            relaxation.num_col,
            relaxation.a_start.clone(),
            relaxation.a_index.clone(),
            relaxation.a_value.clone(),
        );
        let mut added = 0;
        for row in 0..relaxation.num_row {
            let mut inds = Vec::new();
            let mut vals = Vec::new();
            for (col, value) in matrix.row(row) {
                inds.push(col);
                vals.push(value);
            }
            if inds.is_empty() {
                continue;
            }
            // The <= side.
            if !crate::is_pos_infinite(relaxation.row_upper[row])
                && generator.generate_cut(
                    &inds,
                    &vals,
                    relaxation.row_upper[row],
                    &relaxation.col_lower,
                    &relaxation.col_upper,
                    &root.col_value,
                    var_type,
                    pool,
                )
            {
                added += 1;
            }
            // The >= side, negated into <= form.
            if !crate::is_neg_infinite(relaxation.row_lower[row]) {
                let negated: Vec<E> = vals.iter().map(|&v| -v).collect();
                if generator.generate_cut(
                    &inds,
                    &negated,
                    -relaxation.row_lower[row],
                    &relaxation.col_lower,
                    &relaxation.col_upper,
                    &root.col_value,
                    var_type,
                    pool,
                ) {
                    added += 1;
                }
            }
        }
        added
    }
}

/// The base model with the pooled cuts appended as extra `<=` rows.
fn model_with_cuts(base: &Model, pool: &CutPool) -> Model {
    let mut model = base.clone();
    let extra = pool.len();
    if extra == 0 {
        return model;
    }

    // Column-wise rebuild: count the new entries per column first.
    let num_col = base.num_col;
    let mut counts = vec![0usize; num_col];
    for cut in pool.cuts() {
        for &col in &cut.index {
            counts[col] += 1;
        }
    }
    let mut a_start = vec![0; num_col + 1];
    for col in 0..num_col {
        let old = base.a_start[col + 1] - base.a_start[col];
        a_start[col + 1] = a_start[col] + old + counts[col];
    }
    let num_nz = a_start[num_col];
    let mut a_index = vec![0; num_nz];
    let mut a_value = vec![0.0; num_nz];
    let mut fill: Vec<usize> = a_start[..num_col].to_vec();
    for col in 0..num_col {
        for k in base.a_start[col]..base.a_start[col + 1] {
            a_index[fill[col]] = base.a_index[k];
            a_value[fill[col]] = base.a_value[k];
            fill[col] += 1;
        }
    }
    for (cut_row, cut) in pool.cuts().iter().enumerate() {
        for (&col, &value) in cut.index.iter().zip(&cut.value) {
            a_index[fill[col]] = base.num_row + cut_row;
            a_value[fill[col]] = value;
            fill[col] += 1;
        }
    }

    model.a_start = a_start;
    model.a_index = a_index;
    model.a_value = a_value;
    model.num_row = base.num_row + extra;
    model.row_lower.extend(std::iter::repeat(-INFTY).take(extra));
    model
        .row_upper
        .extend(pool.cuts().iter().map(|cut| cut.rhs));
    model
}
