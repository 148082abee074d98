//! The user-visible optimizer facade.
//!
//! Owns the model, options, callback and solver results, and exposes the
//! incremental model-editing operations. Every edit is atomic: the candidate
//! model is validated in full before anything visible changes, so a failed
//! operation leaves the facade exactly as it was.

use serde::{Deserialize, Serialize};

use crate::callback::{Callback, IterationOutput};
use crate::mip::MipSolver;
use crate::model::assess::{assess_bounds, assess_cost, assess_model};
use crate::model::{Integrality, MatrixFormat, Model, ModelError};
use crate::options::Options;
use crate::qp::MehrotraPredictorCorrector;
use crate::simplex::{Basis, BasisStatus, DualSimplex, solve_unconstrained};
use crate::terminators::{InterruptFlag, SolveLimits};
use crate::{E, I, ModelStatus, Status};

/// Primal–dual solution snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Solution {
    pub col_value: Vec<E>,
    pub col_dual: Vec<E>,
    pub row_value: Vec<E>,
    pub row_dual: Vec<E>,
    pub objective: E,
    /// Best proven dual bound; equals the objective outside the MIP path.
    pub dual_bound: E,
    pub iterations: I,
    pub nodes: I,
}

/// The optimizer: model container, editor, and solve dispatcher.
pub struct Optimizer {
    model: Model,
    options: Options,
    callback: Box<dyn Callback>,
    model_status: ModelStatus,
    solution: Option<Solution>,
    basis: Option<(Vec<BasisStatus>, Vec<BasisStatus>)>,
    warm_basis: Option<Basis>,
    dual_ray: Option<Vec<E>>,
    primal_ray: Option<Vec<E>>,
    last_error: Option<ModelError>,
    interrupt: InterruptFlag,
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Optimizer {
    pub fn new() -> Self {
        Self::with_options(Options::default())
    }

    pub fn with_options(options: Options) -> Self {
        let callback = Box::new(IterationOutput::new(&options));
        Self {
            model: Model::new(),
            options,
            callback,
            model_status: ModelStatus::NotSet,
            solution: None,
            basis: None,
            warm_basis: None,
            dual_ray: None,
            primal_ray: None,
            last_error: None,
            interrupt: InterruptFlag::new(),
        }
    }

    /// A clone of the solve's interrupt signal. Raising it from any thread
    /// stops a running solve at its next cancellation point with
    /// [`ModelStatus::Interrupted`]; [`InterruptFlag::install_ctrlc`] routes
    /// Ctrl-C to it.
    pub fn interrupt_flag(&self) -> InterruptFlag {
        self.interrupt.clone()
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut Options {
        &mut self.options
    }

    pub fn set_callback(&mut self, callback: Box<dyn Callback>) {
        self.callback = callback;
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn num_col(&self) -> I {
        self.model.num_col
    }

    pub fn num_row(&self) -> I {
        self.model.num_row
    }

    pub fn model_status(&self) -> ModelStatus {
        self.model_status
    }

    /// The error behind the most recent `Status::Error` return, if any.
    pub fn last_error(&self) -> Option<&ModelError> {
        self.last_error.as_ref()
    }

    fn reset_solver_state(&mut self) {
        self.model_status = ModelStatus::NotSet;
        self.solution = None;
        self.basis = None;
        self.warm_basis = None;
        self.dual_ray = None;
        self.primal_ray = None;
    }

    /// Validates `candidate` and commits it on success.
    fn commit(&mut self, mut candidate: Model) -> Status {
        match assess_model(&mut candidate, &self.options) {
            Ok(status) => {
                self.model = candidate;
                self.reset_solver_state();
                self.last_error = None;
                status
            }
            Err(error) => {
                self.last_error = Some(error);
                Status::Error
            }
        }
    }

    // ----- model loading and editing -------------------------------------

    /// Replaces the incumbent model, validating and copying it.
    pub fn pass_model(&mut self, model: Model) -> Status {
        self.commit(model)
    }

    /// Like [`Optimizer::pass_model`], with the constraint matrix arrays in
    /// the given orientation.
    pub fn pass_model_with_format(&mut self, mut model: Model, format: MatrixFormat) -> Status {
        Self::ensure_col_wise(&mut model, format);
        self.commit(model)
    }

    /// Appends a batch of columns with their matrix entries (CSC slices).
    /// All-or-nothing: on error the model is unchanged.
    pub fn add_cols(
        &mut self,
        costs: &[E],
        lower: &[E],
        upper: &[E],
        starts: &[I],
        index: &[I],
        value: &[E],
    ) -> Status {
        let new_cols = costs.len();
        if lower.len() != new_cols
            || upper.len() != new_cols
            || (new_cols > 0 && starts.len() != new_cols && starts.len() != new_cols + 1)
        {
            self.last_error = Some(ModelError::DimensionMismatch(
                "column batch slices disagree in length".to_string(),
            ));
            return Status::Error;
        }
        let mut candidate = self.model.clone();
        candidate.col_cost.extend_from_slice(costs);
        candidate.col_lower.extend_from_slice(lower);
        candidate.col_upper.extend_from_slice(upper);
        for k in 0..new_cols {
            let begin = starts.get(k).copied().unwrap_or(index.len());
            let end = starts.get(k + 1).copied().unwrap_or(index.len());
            if begin > end || end > index.len() {
                self.last_error = Some(ModelError::DimensionMismatch(
                    "column starts are not monotone".to_string(),
                ));
                return Status::Error;
            }
            candidate.a_index.extend_from_slice(&index[begin..end]);
            candidate.a_value.extend_from_slice(&value[begin..end]);
            candidate.a_start.push(candidate.a_index.len());
        }
        debug_assert_eq!(candidate.a_start.len(), candidate.num_col + new_cols + 1);
        candidate.num_col += new_cols;
        if !candidate.integrality.is_empty() {
            candidate
                .integrality
                .extend(std::iter::repeat(Integrality::Continuous).take(new_cols));
        }
        self.commit(candidate)
    }

    /// Appends a batch of rows with their matrix entries (CSR slices).
    pub fn add_rows(
        &mut self,
        lower: &[E],
        upper: &[E],
        starts: &[I],
        index: &[I],
        value: &[E],
    ) -> Status {
        let new_rows = lower.len();
        if upper.len() != new_rows {
            self.last_error = Some(ModelError::DimensionMismatch(
                "row batch slices disagree in length".to_string(),
            ));
            return Status::Error;
        }
        let mut candidate = self.model.clone();
        let base_rows = candidate.num_row;
        candidate.row_lower.extend_from_slice(lower);
        candidate.row_upper.extend_from_slice(upper);
        candidate.num_row += new_rows;

        // Scatter the row-wise entries into the columns.
        let mut per_col: Vec<Vec<(I, E)>> = vec![Vec::new(); candidate.num_col];
        for k in 0..new_rows {
            let begin = starts.get(k).copied().unwrap_or(index.len());
            let end = starts.get(k + 1).copied().unwrap_or(index.len());
            if begin > end || end > index.len() {
                self.last_error = Some(ModelError::DimensionMismatch(
                    "row starts are not monotone".to_string(),
                ));
                return Status::Error;
            }
            for e in begin..end {
                let col = index[e];
                if col >= candidate.num_col {
                    self.last_error = Some(ModelError::IndexOutOfRange);
                    return Status::Error;
                }
                per_col[col].push((base_rows + k, value[e]));
            }
        }
        let mut a_start = vec![0];
        let mut a_index = Vec::new();
        let mut a_value = Vec::new();
        for col in 0..candidate.num_col {
            for k in candidate.a_start[col]..candidate.a_start[col + 1] {
                a_index.push(candidate.a_index[k]);
                a_value.push(candidate.a_value[k]);
            }
            for &(row, coeff) in &per_col[col] {
                a_index.push(row);
                a_value.push(coeff);
            }
            a_start.push(a_index.len());
        }
        candidate.a_start = a_start;
        candidate.a_index = a_index;
        candidate.a_value = a_value;
        self.commit(candidate)
    }

    pub fn change_col_cost(&mut self, col: I, cost: E) -> Status {
        self.change_col_costs_by_set(&[col], &[cost])
    }

    pub fn change_col_costs_by_set(&mut self, cols: &[I], costs: &[E]) -> Status {
        if cols.len() != costs.len() {
            self.last_error = Some(ModelError::DimensionMismatch(
                "cost set and index set disagree".to_string(),
            ));
            return Status::Error;
        }
        for (&col, &cost) in cols.iter().zip(costs) {
            if col >= self.model.num_col {
                self.last_error = Some(ModelError::IndexOutOfRange);
                return Status::Error;
            }
            if let Err(error) = assess_cost(col, cost, &self.options) {
                self.last_error = Some(error);
                return Status::Error;
            }
        }
        for (&col, &cost) in cols.iter().zip(costs) {
            self.model.col_cost[col] = cost;
        }
        self.reset_solver_state();
        Status::Ok
    }

    pub fn change_col_costs_by_mask(&mut self, mask: &[bool], costs: &[E]) -> Status {
        let cols: Vec<I> = mask
            .iter()
            .enumerate()
            .filter_map(|(col, &set)| set.then_some(col))
            .collect();
        let values: Vec<E> = cols.iter().map(|&col| costs[col]).collect();
        self.change_col_costs_by_set(&cols, &values)
    }

    pub fn change_col_bounds(&mut self, col: I, lower: E, upper: E) -> Status {
        self.change_col_bounds_by_set(&[col], &[lower], &[upper])
    }

    pub fn change_col_bounds_by_set(&mut self, cols: &[I], lower: &[E], upper: &[E]) -> Status {
        self.change_bounds_by_set(cols, lower, upper, true)
    }

    pub fn change_row_bounds(&mut self, row: I, lower: E, upper: E) -> Status {
        self.change_row_bounds_by_set(&[row], &[lower], &[upper])
    }

    pub fn change_row_bounds_by_set(&mut self, rows: &[I], lower: &[E], upper: &[E]) -> Status {
        self.change_bounds_by_set(rows, lower, upper, false)
    }

    fn change_bounds_by_set(
        &mut self,
        entities: &[I],
        lower: &[E],
        upper: &[E],
        is_col: bool,
    ) -> Status {
        if entities.len() != lower.len() || entities.len() != upper.len() {
            self.last_error = Some(ModelError::DimensionMismatch(
                "bound set and index set disagree".to_string(),
            ));
            return Status::Error;
        }
        let limit = if is_col {
            self.model.num_col
        } else {
            self.model.num_row
        };
        let entity = if is_col { "column" } else { "row" };
        let mut normalized = Vec::with_capacity(entities.len());
        let mut status = Status::Ok;
        for k in 0..entities.len() {
            if entities[k] >= limit {
                self.last_error = Some(ModelError::IndexOutOfRange);
                return Status::Error;
            }
            match assess_bounds(entity, entities[k], lower[k], upper[k]) {
                Ok((lo, up, bound_status)) => {
                    status = status.worst(bound_status);
                    normalized.push((lo, up));
                }
                Err(error) => {
                    self.last_error = Some(error);
                    return Status::Error;
                }
            }
        }
        for (k, &index) in entities.iter().enumerate() {
            let (lo, up) = normalized[k];
            if is_col {
                self.model.col_lower[index] = lo;
                self.model.col_upper[index] = up;
            } else {
                self.model.row_lower[index] = lo;
                self.model.row_upper[index] = up;
            }
        }
        self.reset_solver_state();
        status
    }

    pub fn change_col_integrality(&mut self, col: I, integrality: Integrality) -> Status {
        self.change_col_integrality_by_set(&[col], &[integrality])
    }

    pub fn change_col_integrality_by_set(
        &mut self,
        cols: &[I],
        integrality: &[Integrality],
    ) -> Status {
        if cols.len() != integrality.len() {
            self.last_error = Some(ModelError::DimensionMismatch(
                "integrality set and index set disagree".to_string(),
            ));
            return Status::Error;
        }
        if cols.iter().any(|&col| col >= self.model.num_col) {
            self.last_error = Some(ModelError::IndexOutOfRange);
            return Status::Error;
        }
        if self.model.integrality.is_empty() {
            self.model.integrality = vec![Integrality::Continuous; self.model.num_col];
        }
        for (&col, &mark) in cols.iter().zip(integrality) {
            self.model.integrality[col] = mark;
        }
        self.reset_solver_state();
        Status::Ok
    }

    /// Modifies an existing entry or inserts a new one.
    pub fn change_coeff(&mut self, row: I, col: I, value: E) -> Status {
        if row >= self.model.num_row || col >= self.model.num_col {
            self.last_error = Some(ModelError::IndexOutOfRange);
            return Status::Error;
        }
        if value.abs() > self.options.large_matrix_value || !value.is_finite() {
            self.last_error = Some(ModelError::LargeCoefficient);
            return Status::Error;
        }
        let range = self.model.a_start[col]..self.model.a_start[col + 1];
        for k in range.clone() {
            if self.model.a_index[k] == row {
                self.model.a_value[k] = value;
                self.reset_solver_state();
                return Status::Ok;
            }
        }
        // Insert at the end of the column.
        let insert_at = range.end;
        self.model.a_index.insert(insert_at, row);
        self.model.a_value.insert(insert_at, value);
        for start in self.model.a_start[col + 1..].iter_mut() {
            *start += 1;
        }
        self.reset_solver_state();
        Status::Ok
    }

    /// Read-only coefficient lookup; absent entries read as zero.
    pub fn get_coeff(&self, row: I, col: I) -> Result<E, ModelError> {
        if row >= self.model.num_row || col >= self.model.num_col {
            return Err(ModelError::IndexOutOfRange);
        }
        Ok(self.model.coeff(row, col))
    }

    /// Cost, bounds and matrix entries of one column.
    pub fn get_col(&self, col: I) -> Result<(E, E, E, Vec<(I, E)>), ModelError> {
        if col >= self.model.num_col {
            return Err(ModelError::IndexOutOfRange);
        }
        Ok((
            self.model.col_cost[col],
            self.model.col_lower[col],
            self.model.col_upper[col],
            self.model.col(col).collect(),
        ))
    }

    /// Bounds and matrix entries of one row.
    pub fn get_row(&self, row: I) -> Result<(E, E, Vec<(I, E)>), ModelError> {
        if row >= self.model.num_row {
            return Err(ModelError::IndexOutOfRange);
        }
        let mut entries = Vec::new();
        for col in 0..self.model.num_col {
            let coeff = self.model.coeff(row, col);
            if coeff != 0.0 {
                entries.push((col, coeff));
            }
        }
        Ok((self.model.row_lower[row], self.model.row_upper[row], entries))
    }

    pub fn delete_cols(&mut self, range: std::ops::Range<I>) -> Status {
        let mask: Vec<bool> = (0..self.model.num_col)
            .map(|col| range.contains(&col))
            .collect();
        self.delete_cols_by_mask(&mask)
    }

    pub fn delete_cols_by_set(&mut self, cols: &[I]) -> Status {
        if cols.iter().any(|&col| col >= self.model.num_col) {
            self.last_error = Some(ModelError::IndexOutOfRange);
            return Status::Error;
        }
        let mut mask = vec![false; self.model.num_col];
        for &col in cols {
            mask[col] = true;
        }
        self.delete_cols_by_mask(&mask)
    }

    /// Deletes the masked columns; the remaining ones are renumbered
    /// densely.
    pub fn delete_cols_by_mask(&mut self, delete: &[bool]) -> Status {
        if delete.len() != self.model.num_col {
            self.last_error = Some(ModelError::DimensionMismatch(
                "delete mask length disagrees with the column count".to_string(),
            ));
            return Status::Error;
        }
        let model = &mut self.model;
        let mut a_start = vec![0];
        let mut a_index = Vec::new();
        let mut a_value = Vec::new();
        let mut kept = 0;
        for col in 0..model.num_col {
            if delete[col] {
                continue;
            }
            for k in model.a_start[col]..model.a_start[col + 1] {
                a_index.push(model.a_index[k]);
                a_value.push(model.a_value[k]);
            }
            a_start.push(a_index.len());
            model.col_cost[kept] = model.col_cost[col];
            model.col_lower[kept] = model.col_lower[col];
            model.col_upper[kept] = model.col_upper[col];
            if !model.integrality.is_empty() {
                model.integrality[kept] = model.integrality[col];
            }
            kept += 1;
        }
        model.col_cost.truncate(kept);
        model.col_lower.truncate(kept);
        model.col_upper.truncate(kept);
        if !model.integrality.is_empty() {
            model.integrality.truncate(kept);
        }
        model.a_start = a_start;
        model.a_index = a_index;
        model.a_value = a_value;
        model.num_col = kept;
        // Deleting columns invalidates a quadratic term over the old space.
        model.hessian = None;
        self.reset_solver_state();
        Status::Ok
    }

    pub fn delete_rows(&mut self, range: std::ops::Range<I>) -> Status {
        let mask: Vec<bool> = (0..self.model.num_row)
            .map(|row| range.contains(&row))
            .collect();
        self.delete_rows_by_mask(&mask)
    }

    pub fn delete_rows_by_set(&mut self, rows: &[I]) -> Status {
        if rows.iter().any(|&row| row >= self.model.num_row) {
            self.last_error = Some(ModelError::IndexOutOfRange);
            return Status::Error;
        }
        let mut mask = vec![false; self.model.num_row];
        for &row in rows {
            mask[row] = true;
        }
        self.delete_rows_by_mask(&mask)
    }

    pub fn delete_rows_by_mask(&mut self, delete: &[bool]) -> Status {
        if delete.len() != self.model.num_row {
            self.last_error = Some(ModelError::DimensionMismatch(
                "delete mask length disagrees with the row count".to_string(),
            ));
            return Status::Error;
        }
        let model = &mut self.model;
        // Dense renumbering of the surviving rows.
        let mut new_row = vec![usize::MAX; model.num_row];
        let mut kept = 0;
        for row in 0..model.num_row {
            if !delete[row] {
                new_row[row] = kept;
                model.row_lower[kept] = model.row_lower[row];
                model.row_upper[kept] = model.row_upper[row];
                kept += 1;
            }
        }
        model.row_lower.truncate(kept);
        model.row_upper.truncate(kept);

        let mut a_start = vec![0];
        let mut a_index = Vec::new();
        let mut a_value = Vec::new();
        for col in 0..model.num_col {
            for k in model.a_start[col]..model.a_start[col + 1] {
                let row = model.a_index[k];
                if new_row[row] != usize::MAX {
                    a_index.push(new_row[row]);
                    a_value.push(model.a_value[k]);
                }
            }
            a_start.push(a_index.len());
        }
        model.a_start = a_start;
        model.a_index = a_index;
        model.a_value = a_value;
        model.num_row = kept;
        self.reset_solver_state();
        Status::Ok
    }

    /// Loads a Hessian (and validates it against the incumbent model).
    pub fn pass_hessian(
        &mut self,
        dim: I,
        format: crate::HessianFormat,
        q_start: Vec<I>,
        q_index: Vec<I>,
        q_value: Vec<E>,
    ) -> Status {
        let mut candidate = self.model.clone();
        candidate.hessian = Some(crate::Hessian {
            dim,
            format,
            q_start,
            q_index,
            q_value,
        });
        self.commit(candidate)
    }

    /// Loads a matrix batch in either orientation (for `pass_model`-style
    /// callers that hold CSR data).
    pub fn ensure_col_wise(model: &mut Model, format: MatrixFormat) {
        if format == MatrixFormat::ColWise {
            return;
        }
        let matrix = crate::sparse::SparseMatrix::from_csc(
            model.num_col,
            model.num_row,
            model.a_start.clone(),
            model.a_index.clone(),
            model.a_value.clone(),
        );
        // The row-wise view of the transposed storage is the column-wise
        // form of the model.
        let mut a_start = vec![0];
        let mut a_index = Vec::new();
        let mut a_value = Vec::new();
        for col in 0..model.num_col {
            for (row, value) in matrix.row(col) {
                a_index.push(row);
                a_value.push(value);
            }
            a_start.push(a_index.len());
        }
        model.a_start = a_start;
        model.a_index = a_index;
        model.a_value = a_value;
    }

    // ----- solving --------------------------------------------------------

    /// Runs the appropriate engine for the incumbent model.
    pub fn run(&mut self) -> Status {
        // The previous basis survives a re-run (it is discarded on edits
        // that change the model's shape through reset_solver_state).
        let warm_basis = self.warm_basis.take();
        self.reset_solver_state();
        self.warm_basis = warm_basis;

        if self.model.num_col == 0 && self.model.num_row == 0 {
            self.model_status = ModelStatus::ModelEmpty;
            return Status::Ok;
        }

        // Bound-infeasible models short-circuit before any solver is built,
        // so even otherwise-illegal data (within the loaded model) yields a
        // clean answer.
        if self.model.has_infeasible_bounds() {
            self.model_status = ModelStatus::Infeasible;
            return Status::Ok;
        }

        let mut candidate = self.model.clone();
        match assess_model(&mut candidate, &self.options) {
            Ok(_) => self.model = candidate,
            Err(error) => {
                self.last_error = Some(error);
                self.model_status = ModelStatus::ModelError;
                return Status::Error;
            }
        }

        if self.model.is_mip() && self.model.is_qp() {
            self.last_error = Some(ModelError::NotSupported(
                "integrality combined with a quadratic objective",
            ));
            self.model_status = ModelStatus::ModelError;
            return Status::Error;
        }

        // A stale interrupt from a previous run must not kill this one.
        self.interrupt.clear();
        let mut terminator =
            SolveLimits::from_options(&self.options).with_interrupt(self.interrupt.clone());
        let mut callback = self.callback.clone();

        if self.model.num_row == 0 && !self.model.is_mip() && !self.model.is_qp() {
            let lp_solution = solve_unconstrained(&self.model);
            self.store_lp_solution(lp_solution);
            return Status::Ok;
        }

        if self.model.is_mip() {
            let mut solver = MipSolver::new(&self.model, &self.options);
            let solution = solver.solve(&mut terminator, callback.as_mut());
            self.model_status = solution.status;
            self.solution = Some(Solution {
                col_value: solution.col_value.clone(),
                col_dual: Vec::new(),
                row_value: self.row_activity(&solution.col_value),
                row_dual: Vec::new(),
                objective: solution.objective,
                dual_bound: solution.dual_bound,
                iterations: solution.lp_iterations,
                nodes: solution.nodes,
            });
            return Status::Ok;
        }

        if self.model.is_qp() {
            let mut engine = MehrotraPredictorCorrector::new(&self.model, &self.options);
            let lp_solution = engine.solve(&self.model, &mut terminator, callback.as_mut());
            self.store_lp_solution(lp_solution);
            return Status::Ok;
        }

        let mut engine = DualSimplex::new(&self.model, &self.options);
        if let Some(basis) = &self.warm_basis {
            engine.install_basis(basis.clone());
        }
        let lp_solution = engine.solve(&mut terminator, callback.as_mut());
        self.store_lp_solution(lp_solution);
        Status::Ok
    }

    fn row_activity(&self, col_value: &[E]) -> Vec<E> {
        let mut activity = vec![0.0; self.model.num_row];
        if col_value.len() < self.model.num_col {
            return activity;
        }
        for col in 0..self.model.num_col {
            for (row, value) in self.model.col(col) {
                activity[row] += value * col_value[col];
            }
        }
        activity
    }

    fn store_lp_solution(&mut self, solution: crate::simplex::LpSolution) {
        self.model_status = solution.status;
        self.dual_ray = solution.dual_ray.clone();
        self.primal_ray = solution.primal_ray.clone();
        self.warm_basis = solution.basis.clone();
        if !solution.col_status.is_empty() {
            self.basis = Some((solution.col_status.clone(), solution.row_status.clone()));
        }
        self.solution = Some(Solution {
            col_value: solution.col_value,
            col_dual: solution.col_dual,
            row_value: solution.row_value,
            row_dual: solution.row_dual,
            objective: solution.objective,
            dual_bound: solution.objective,
            iterations: solution.iterations,
            nodes: 0,
        });
    }

    // ----- result access --------------------------------------------------

    /// The solution, defined once a solve produced one.
    pub fn get_solution(&self) -> Option<&Solution> {
        if self.model_status.has_primal_solution() {
            self.solution.as_ref()
        } else {
            None
        }
    }

    /// The final simplex basis, defined after a basic solve.
    pub fn get_basis(&self) -> Option<(&[BasisStatus], &[BasisStatus])> {
        self.basis
            .as_ref()
            .map(|(cols, rows)| (cols.as_slice(), rows.as_slice()))
    }

    /// Dual unboundedness certificate, defined when the model is infeasible.
    pub fn get_dual_ray(&self) -> Option<&[E]> {
        if self.model_status == ModelStatus::Infeasible {
            self.dual_ray.as_deref()
        } else {
            None
        }
    }

    /// Primal unboundedness certificate.
    pub fn get_primal_ray(&self) -> Option<&[E]> {
        if matches!(
            self.model_status,
            ModelStatus::Unbounded | ModelStatus::UnboundedOrInfeasible
        ) {
            self.primal_ray.as_deref()
        } else {
            None
        }
    }

    pub fn objective_value(&self) -> Option<E> {
        self.solution.as_ref().map(|solution| solution.objective)
    }
}
