//! Serial two-phase dual simplex driver.
//!
//! Phase 1 minimizes the sum of dual infeasibilities through the
//! auxiliary-bound subproblem; phase 2 minimizes the true objective while
//! maintaining dual feasibility. Every inner routine that hits trouble sets
//! `rebuild_reason` and returns; the driver reacts at a single point per
//! phase loop.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::callback::{Callback, Progress};
use crate::model::Model;
use crate::numeric::DDouble;
use crate::options::{Options, SimplexStrategy};
use crate::simplex::basis::{Basis, BasisStatus};
use crate::simplex::pricing::{Devex, Pricing, PricingRule, WeightContext};
use crate::simplex::rhs;
use crate::simplex::row::{self, Candidate};
use crate::simplex::{LpSolution, RebuildReason, SimplexLp, internal_bound};
use crate::sparse::{Factor, SparseVector};
use crate::terminators::Terminator;
use crate::{E, I, INFTY, ModelStatus, is_neg_infinite, is_pos_infinite};

/// Outcome of one phase loop.
enum PhaseOutcome {
    /// The phase finished and `solve_phase` was switched; keep driving.
    Continue,
    /// The solve is over.
    Done(ModelStatus),
}

/// The dual simplex engine. Owns every piece of scratch state by value;
/// algorithms borrow views of it for the duration of a call.
pub struct DualSimplex<'a> {
    pub(crate) lp: SimplexLp,
    pub(crate) options: &'a Options,
    rng: SmallRng,

    pub(crate) basis: Basis,
    pub(crate) factor: Factor,
    pub(crate) pricing: Pricing,

    // Working arrays over the full variable space.
    pub(crate) work_cost: Vec<E>,
    pub(crate) cost_perturbation: Vec<E>,
    pub(crate) work_lower: Vec<E>,
    pub(crate) work_upper: Vec<E>,
    pub(crate) work_value: Vec<E>,
    pub(crate) work_dual: Vec<E>,

    // Per-row (basis position) arrays.
    pub(crate) base_lower: Vec<E>,
    pub(crate) base_upper: Vec<E>,
    pub(crate) base_value: Vec<E>,
    pub(crate) edge_weight: Vec<E>,
    dual_pi: Vec<E>,

    // Scratch vectors.
    pub(crate) row_ep: SparseVector,
    row_ap: SparseVector,
    pub(crate) col_aq: SparseVector,
    col_bfrt: SparseVector,
    col_dse: SparseVector,
    pub(crate) row_pack: Vec<(I, E)>,

    // Pivotal information for the current iteration.
    pub(crate) row_out: I,
    pub(crate) sigma: E,
    pub(crate) delta: E,
    pub(crate) variable_in: I,
    pub(crate) variable_out: I,
    pub(crate) theta_dual: E,
    pub(crate) theta_primal: E,
    pub(crate) alpha_row: E,
    pub(crate) alpha_col: E,
    computed_weight: E,
    chuzc_flips: Vec<I>,

    pub(crate) solve_phase: I,
    pub(crate) iterations: I,
    pub(crate) iterations_since_rebuild: I,
    pub(crate) rebuild_reason: Option<RebuildReason>,
    pub(crate) perturbed: bool,
    dual_infeas_count: I,
    pub(crate) dual_objective: E,
    objective_bound_internal: E,
    total_synthetic_tick: f64,

    dual_ray: Option<Vec<E>>,
    primal_ray: Option<Vec<E>>,

    // Column slices for the slice-parallel PRICE/CHUZC.
    pub(crate) slices: Vec<std::ops::Range<I>>,
    pub(crate) pool: Option<rayon::ThreadPool>,
}

impl<'a> DualSimplex<'a> {
    pub fn new(model: &Model, options: &'a Options) -> Self {
        Self::with_lp(SimplexLp::from_model(model), options)
    }

    /// Engine over a node relaxation: the model with overridden column
    /// bounds.
    pub fn new_with_bounds(
        model: &Model,
        col_lower: &[E],
        col_upper: &[E],
        options: &'a Options,
    ) -> Self {
        Self::with_lp(SimplexLp::with_bounds(model, col_lower, col_upper), options)
    }

    pub(crate) fn with_lp(lp: SimplexLp, options: &'a Options) -> Self {
        let num_row = lp.num_row;
        let num_col = lp.num_col;
        let num_tot = lp.num_tot;

        let parallel = !matches!(options.simplex_strategy, SimplexStrategy::DualPlain);
        let threads = options.resolved_threads();
        let pool = if parallel && threads > 1 {
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .ok()
        } else {
            None
        };
        let slices = if matches!(options.simplex_strategy, SimplexStrategy::DualSip) {
            let num_slices = threads.saturating_sub(2).clamp(1, options.slice_limit.max(1));
            lp.matrix.slice_columns(num_slices)
        } else {
            vec![0..num_col]
        };

        // PAMI relies on Devex-style weight maintenance for the candidate
        // set, so steepest edge is demoted up front.
        let pricing = if matches!(options.simplex_strategy, SimplexStrategy::DualPami) {
            Pricing::Devex(Devex::new(options))
        } else {
            Pricing::from_options(options)
        };

        let objective_bound_internal = internal_bound(
            options.objective_bound,
            if lp.sense_sign > 0.0 {
                crate::model::ObjSense::Minimize
            } else {
                crate::model::ObjSense::Maximize
            },
            lp.offset,
        );

        Self {
            options,
            rng: SmallRng::seed_from_u64(options.random_seed),
            basis: Basis::logical(num_col, num_row),
            factor: Factor::new(num_row, options.pivot_tolerance, options.refactor_interval),
            pricing,

            work_cost: vec![0.0; num_tot],
            cost_perturbation: vec![0.0; num_tot],
            work_lower: vec![0.0; num_tot],
            work_upper: vec![0.0; num_tot],
            work_value: vec![0.0; num_tot],
            work_dual: vec![0.0; num_tot],

            base_lower: vec![0.0; num_row],
            base_upper: vec![0.0; num_row],
            base_value: vec![0.0; num_row],
            edge_weight: vec![1.0; num_row],
            dual_pi: vec![0.0; num_row],

            row_ep: SparseVector::new(num_row),
            row_ap: SparseVector::new(num_col),
            col_aq: SparseVector::new(num_row),
            col_bfrt: SparseVector::new(num_row),
            col_dse: SparseVector::new(num_row),
            row_pack: Vec::new(),

            row_out: 0,
            sigma: 0.0,
            delta: 0.0,
            variable_in: 0,
            variable_out: 0,
            theta_dual: 0.0,
            theta_primal: 0.0,
            alpha_row: 0.0,
            alpha_col: 0.0,
            computed_weight: 0.0,
            chuzc_flips: Vec::new(),

            solve_phase: 2,
            iterations: 0,
            iterations_since_rebuild: 0,
            rebuild_reason: None,
            perturbed: false,
            dual_infeas_count: 0,
            dual_objective: -INFTY,
            objective_bound_internal,
            total_synthetic_tick: 0.0,

            dual_ray: None,
            primal_ray: None,

            slices,
            pool,
            lp,
        }
    }

    /// Installs a warm-start basis; an inconsistent basis falls back to the
    /// all-logical one.
    pub fn install_basis(&mut self, basis: Basis) {
        if basis.num_col == self.lp.num_col
            && basis.num_row == self.lp.num_row
            && basis.is_consistent()
        {
            self.basis = basis;
        }
    }

    pub fn iterations(&self) -> I {
        self.iterations
    }

    /// Solves the LP, polling `terminator` at the cancellation points.
    pub fn solve(
        &mut self,
        terminator: &mut dyn Terminator,
        callback: &mut dyn Callback,
    ) -> LpSolution {
        for j in 0..self.lp.num_tot {
            if self.lp.lower[j] > self.lp.upper[j] {
                return LpSolution::with_status(ModelStatus::Infeasible);
            }
        }

        terminator.initialize();
        let status = self.run_phases(terminator, callback);
        self.extract_solution(status)
    }

    fn run_phases(
        &mut self,
        terminator: &mut dyn Terminator,
        callback: &mut dyn Callback,
    ) -> ModelStatus {
        // Initial factorization and dual values decide the starting phase.
        self.apply_phase_bounds(2);
        if self.rebuild(callback).is_err() {
            return ModelStatus::SolveError;
        }
        self.solve_phase = if self.dual_infeas_count > 0 { 1 } else { 2 };

        for _ in 0..50 {
            let outcome = match self.solve_phase {
                1 => self.solve_phase1(terminator, callback),
                _ => self.solve_phase2(terminator, callback),
            };
            match outcome {
                PhaseOutcome::Continue => continue,
                PhaseOutcome::Done(status) => return status,
            }
        }
        ModelStatus::SolveError
    }

    // ----- phase loops ----------------------------------------------------

    fn solve_phase1(
        &mut self,
        terminator: &mut dyn Terminator,
        callback: &mut dyn Callback,
    ) -> PhaseOutcome {
        self.apply_phase_bounds(1);
        if self.rebuild(callback).is_err() {
            return PhaseOutcome::Done(ModelStatus::SolveError);
        }
        loop {
            loop {
                if let Some(status) = terminator.terminate(self.iterations) {
                    return PhaseOutcome::Done(status);
                }
                if !self.iterate(callback) {
                    break;
                }
            }
            let fresh = self.iterations_since_rebuild == 0;
            match self.rebuild_reason.take() {
                Some(RebuildReason::PossiblyOptimal) => {
                    if fresh {
                        // Auxiliary optimum: residual dual infeasibility on
                        // the real bounds decides the outcome.
                        if self.unfixable_dual_infeasibility()
                            <= self.options.dual_feasibility_tolerance
                        {
                            self.solve_phase = 2;
                            return PhaseOutcome::Continue;
                        }
                        return PhaseOutcome::Done(self.conclude_dual_infeasible(callback));
                    }
                }
                Some(RebuildReason::PossiblyInfeasible) => {
                    if fresh {
                        // No admissible pivot in the auxiliary problem.
                        return PhaseOutcome::Done(self.conclude_dual_infeasible(callback));
                    }
                }
                _ => {}
            }
            if self.rebuild(callback).is_err() {
                return PhaseOutcome::Done(ModelStatus::SolveError);
            }
        }
    }

    fn solve_phase2(
        &mut self,
        terminator: &mut dyn Terminator,
        callback: &mut dyn Callback,
    ) -> PhaseOutcome {
        self.apply_phase_bounds(2);
        if self.options.perturb_costs && !self.perturbed {
            self.perturb_costs();
        }
        if self.rebuild(callback).is_err() {
            return PhaseOutcome::Done(ModelStatus::SolveError);
        }
        loop {
            loop {
                if let Some(status) = terminator.terminate(self.iterations) {
                    return PhaseOutcome::Done(status);
                }
                if self.bailout_on_dual_objective() {
                    return PhaseOutcome::Done(ModelStatus::ObjectiveBound);
                }
                let keep_going = match self.options.simplex_strategy {
                    SimplexStrategy::DualPami => self.iterate_multi(callback),
                    _ => self.iterate(callback),
                };
                if !keep_going {
                    break;
                }
            }
            let fresh = self.iterations_since_rebuild == 0;
            match self.rebuild_reason.take() {
                Some(RebuildReason::PossiblyOptimal) => {
                    if fresh {
                        if self.perturbed {
                            self.cleanup(callback);
                            if self.unfixable_dual_infeasibility()
                                > self.options.dual_feasibility_tolerance
                            {
                                self.solve_phase = 1;
                                return PhaseOutcome::Continue;
                            }
                            continue;
                        }
                        return PhaseOutcome::Done(ModelStatus::Optimal);
                    }
                }
                Some(RebuildReason::PossiblyInfeasible) => {
                    if fresh {
                        if self.perturbed {
                            self.cleanup(callback);
                            continue;
                        }
                        self.save_dual_ray();
                        return PhaseOutcome::Done(ModelStatus::Infeasible);
                    }
                }
                Some(RebuildReason::Cleanup) => {
                    self.cleanup(callback);
                    continue;
                }
                _ => {}
            }
            if self.rebuild(callback).is_err() {
                return PhaseOutcome::Done(ModelStatus::SolveError);
            }
        }
    }

    // ----- one serial iteration ------------------------------------------

    /// Performs a single dual simplex iteration. Returns false once
    /// `rebuild_reason` is set.
    pub(crate) fn iterate(&mut self, callback: &mut dyn Callback) -> bool {
        if !self.choose_row() {
            return false;
        }
        if !self.choose_column() {
            return false;
        }
        if !self.update_ftran() {
            return false;
        }
        self.update_dual();
        self.update_primal();
        self.update_pivots(callback)
    }

    /// CHUZR plus the BTRAN of the chosen row.
    fn choose_row(&mut self) -> bool {
        let choice = match rhs::choose_row(
            &self.base_value,
            &self.base_lower,
            &self.base_upper,
            &self.edge_weight,
            self.options.primal_feasibility_tolerance,
        ) {
            Some(choice) => choice,
            None => {
                self.rebuild_reason = Some(RebuildReason::PossiblyOptimal);
                return false;
            }
        };
        self.row_out = choice.row;
        self.delta = choice.delta;
        self.sigma = choice.sigma;

        self.row_ep.clear();
        self.row_ep.set(self.row_out, 1.0);
        self.factor.btran(&mut self.row_ep);
        self.row_ep.pack();

        self.computed_weight = self.row_ep.norm2();
        self.pricing
            .observe_weight(self.edge_weight[self.row_out], self.computed_weight);
        true
    }

    /// PRICE (row-wise against the BTRAN result) followed by CHUZC.
    fn choose_column(&mut self) -> bool {
        let candidates = if matches!(self.options.simplex_strategy, SimplexStrategy::DualSip)
            && self.pool.is_some()
        {
            self.price_and_chuzc_sliced()
        } else {
            self.price();
            self.build_candidates_full()
        };
        let choice = match row::choose_column(
            candidates,
            self.sigma,
            self.delta,
            &self.work_dual,
            self.options.dual_feasibility_tolerance,
        ) {
            Some(choice) => choice,
            None => {
                self.rebuild_reason = Some(RebuildReason::PossiblyInfeasible);
                return false;
            }
        };

        self.variable_in = choice.variable_in;
        self.alpha_row = choice.alpha_row;
        self.theta_dual = choice.theta_dual;
        self.chuzc_flips = choice.flips;
        self.delta = choice.remaining_delta;

        // A ratio with the wrong sign is degenerate noise within the Harris
        // tolerance: shift the entering cost so the dual step is exactly
        // zero.
        if self.sigma * self.theta_dual < 0.0 {
            let amount = -self.work_dual[self.variable_in];
            self.work_cost[self.variable_in] += amount;
            self.work_dual[self.variable_in] = 0.0;
            self.theta_dual = 0.0;
        }
        true
    }

    /// Computes the pivotal row over the nonbasic variables into `row_pack`.
    pub(crate) fn price(&mut self) {
        self.row_ap.clear();
        self.row_pack.clear();

        let row_ap = &mut self.row_ap;
        let matrix = &self.lp.matrix;
        self.row_ep.for_each_nonzero(|i, rho| {
            for (col, value) in matrix.row(i) {
                row_ap.add(col, rho * value);
            }
        });
        let pack = &mut self.row_pack;
        let basis = &self.basis;
        self.row_ap.for_each_nonzero(|col, pi| {
            if basis.nonbasic_flag[col] == 1 && pi.abs() > 1e-12 {
                pack.push((col, pi));
            }
        });

        // Logical columns price directly from the BTRAN result.
        let num_col = self.lp.num_col;
        self.row_ep.for_each_nonzero(|i, rho| {
            if basis.nonbasic_flag[num_col + i] == 1 && rho.abs() > 1e-12 {
                pack.push((num_col + i, rho));
            }
        });
    }

    /// Slice-parallel PRICE and per-slice CHUZC candidate construction.
    ///
    /// Each slice owns its pack and candidate list; there are no cross-slice
    /// writes during the parallel phase. The serial driver merges the slice
    /// candidates and picks the best globally.
    fn price_and_chuzc_sliced(&mut self) -> Vec<Candidate> {
        use rayon::prelude::*;

        let pool = self.pool.as_ref().unwrap();
        let matrix = &self.lp.matrix;
        let row_ep = &self.row_ep;
        let basis = &self.basis;
        let slices = &self.slices;
        let work_dual = &self.work_dual;
        let work_lower = &self.work_lower;
        let work_upper = &self.work_upper;
        let sigma = self.sigma;
        let pivot_tolerance = self.options.pivot_tolerance.max(1e-9);

        let partial: Vec<(Vec<(I, E)>, Vec<Candidate>)> = pool.install(|| {
            slices
                .par_iter()
                .map(|slice| {
                    let mut pack = Vec::new();
                    for col in slice.clone() {
                        if basis.nonbasic_flag[col] != 1 {
                            continue;
                        }
                        let mut pi = 0.0;
                        for (i, value) in matrix.col(col) {
                            pi += value * row_ep.array[i];
                        }
                        if pi.abs() > 1e-12 {
                            pack.push((col, pi));
                        }
                    }
                    let candidates = row::build_candidates(
                        &pack,
                        sigma,
                        work_dual,
                        &basis.nonbasic_move,
                        work_lower,
                        work_upper,
                        pivot_tolerance,
                    );
                    (pack, candidates)
                })
                .collect()
        });

        self.row_pack.clear();
        let mut merged = Vec::new();
        for (mut pack, mut candidates) in partial {
            self.row_pack.append(&mut pack);
            merged.append(&mut candidates);
        }

        // Logical columns are priced and screened serially.
        let num_col = self.lp.num_col;
        let mut logical_pack = Vec::new();
        self.row_ep.for_each_nonzero(|i, rho| {
            if self.basis.nonbasic_flag[num_col + i] == 1 && rho.abs() > 1e-12 {
                logical_pack.push((num_col + i, rho));
            }
        });
        let mut logical_candidates = row::build_candidates(
            &logical_pack,
            sigma,
            &self.work_dual,
            &self.basis.nonbasic_move,
            &self.work_lower,
            &self.work_upper,
            pivot_tolerance,
        );
        merged.append(&mut logical_candidates);
        self.row_pack.append(&mut logical_pack);
        merged
    }

    /// PRICE of an arbitrary BTRANned row, used by the multi-pivot variant.
    pub(crate) fn price_rho(&self, rho: &SparseVector) -> Vec<(I, E)> {
        let mut row_ap = SparseVector::new(self.lp.num_col);
        rho.for_each_nonzero(|i, value| {
            for (col, coeff) in self.lp.matrix.row(i) {
                row_ap.add(col, value * coeff);
            }
        });
        let mut pack = Vec::new();
        row_ap.for_each_nonzero(|col, pi| {
            if self.basis.nonbasic_flag[col] == 1 && pi.abs() > 1e-12 {
                pack.push((col, pi));
            }
        });
        let num_col = self.lp.num_col;
        rho.for_each_nonzero(|i, value| {
            if self.basis.nonbasic_flag[num_col + i] == 1 && value.abs() > 1e-12 {
                pack.push((num_col + i, value));
            }
        });
        pack
    }

    /// Builds CHUZC candidates; SIP fans the construction out per slice.
    fn build_candidates_full(&self) -> Vec<Candidate> {
        row::build_candidates(
            &self.row_pack,
            self.sigma,
            &self.work_dual,
            &self.basis.nonbasic_move,
            &self.work_lower,
            &self.work_upper,
            self.options.pivot_tolerance.max(1e-9),
        )
    }

    /// FTRAN of the entering column, the accumulated bound flips, and the
    /// steepest-edge auxiliary, then the row/column pivot verify.
    fn update_ftran(&mut self) -> bool {
        self.col_aq.clear();
        self.col_aq
            .scatter(self.lp.col_entries(self.variable_in).into_iter());
        self.factor.ftran(&mut self.col_aq);
        self.col_aq.pack();
        self.alpha_col = self.col_aq.array[self.row_out];

        // FTRAN-BFRT: one extra solve for the summed flip direction.
        self.col_bfrt.clear();
        if !self.chuzc_flips.is_empty() {
            for k in 0..self.chuzc_flips.len() {
                let var = self.chuzc_flips[k];
                let mv = self.basis.nonbasic_move[var] as E;
                let range = self.work_upper[var] - self.work_lower[var];
                for (i, value) in self.lp.col_entries(var) {
                    self.col_bfrt.add(i, value * mv * range);
                }
            }
            self.factor.ftran(&mut self.col_bfrt);
            self.col_bfrt.pack();
        }

        if self.pricing.needs_dse_ftran() {
            self.col_dse.clear();
            self.col_dse.copy_from(&self.row_ep);
            self.factor.ftran(&mut self.col_dse);
        }

        // Numerical guard: the pivot computed row-wise and column-wise must
        // agree.
        let scale = self.alpha_row.abs().max(self.alpha_col.abs());
        let mismatch = (self.alpha_row - self.alpha_col).abs() / scale.max(1e-30);
        if !self.alpha_col.is_finite()
            || self.alpha_col.abs() <= self.options.pivot_tolerance
            || mismatch > self.options.pivot_verify_tolerance
        {
            self.rebuild_reason = Some(RebuildReason::NumericalTrouble);
            return false;
        }
        true
    }

    /// Applies the bound flips and the dual step.
    ///
    /// Flips are booked first so their objective gain uses the pre-update
    /// duals: the gain of a bound flip is `d_j * move_j * range_j`, and the
    /// pivot itself adds `theta_dual` times the post-flip residual.
    fn update_dual(&mut self) {
        let flips = std::mem::take(&mut self.chuzc_flips);
        for &var in &flips {
            let mv = self.basis.nonbasic_move[var];
            let range = self.work_upper[var] - self.work_lower[var];
            self.dual_objective += self.work_dual[var] * mv as E * range;
            if mv == 1 {
                self.work_value[var] = self.work_upper[var];
                self.basis.nonbasic_move[var] = -1;
            } else {
                self.work_value[var] = self.work_lower[var];
                self.basis.nonbasic_move[var] = 1;
            }
        }
        self.chuzc_flips = flips;

        let theta = self.theta_dual;
        if theta != 0.0 {
            for &(var, pi) in &self.row_pack {
                self.work_dual[var] -= theta * pi;
            }
        }
        self.dual_objective += theta * self.delta;
    }

    /// Applies the primal step and the edge-weight recurrence.
    fn update_primal(&mut self) {
        self.theta_primal = self.delta / self.alpha_col;
        let theta = self.theta_primal;
        let base_value = &mut self.base_value;
        self.col_aq.for_each_nonzero(|i, alpha| {
            base_value[i] -= theta * alpha;
        });
        self.col_bfrt.for_each_nonzero(|i, shift| {
            base_value[i] -= shift;
        });

        let ctx = WeightContext {
            row_out: self.row_out,
            pivot: self.alpha_col,
            computed_weight: self.computed_weight,
            col_aq: &self.col_aq,
            col_dse: if self.pricing.needs_dse_ftran() {
                Some(&self.col_dse)
            } else {
                None
            },
        };
        self.pricing.update_weights(&ctx, &mut self.edge_weight);
    }

    /// Splices the entering variable into the basis, updates the factor, and
    /// decides whether the synthetic clock asks for a rebuild.
    fn update_pivots(&mut self, callback: &mut dyn Callback) -> bool {
        self.variable_out = self.basis.basic_index[self.row_out];

        // The leaving variable exits at its violated bound.
        let (leave_value, leave_move) = if self.sigma < 0.0 {
            let lower = self.work_lower[self.variable_out];
            (lower, if lower == self.work_upper[self.variable_out] { 0 } else { 1 })
        } else {
            let upper = self.work_upper[self.variable_out];
            (upper, if upper == self.work_lower[self.variable_out] { 0 } else { -1 })
        };
        self.basis.nonbasic_flag[self.variable_out] = 1;
        self.basis.nonbasic_move[self.variable_out] = leave_move;
        self.work_value[self.variable_out] = leave_value;
        self.work_dual[self.variable_out] = -self.theta_dual;

        let entering_value = self.work_value[self.variable_in] + self.theta_primal;
        self.basis.basic_index[self.row_out] = self.variable_in;
        self.basis.nonbasic_flag[self.variable_in] = 0;
        self.basis.nonbasic_move[self.variable_in] = 0;
        self.work_dual[self.variable_in] = 0.0;
        self.base_value[self.row_out] = entering_value;
        self.base_lower[self.row_out] = self.work_lower[self.variable_in];
        self.base_upper[self.row_out] = self.work_upper[self.variable_in];

        self.iterations += 1;
        self.iterations_since_rebuild += 1;
        self.total_synthetic_tick +=
            self.row_ep.synthetic_tick + self.col_aq.synthetic_tick + self.col_bfrt.synthetic_tick;

        if self.options.output_flag {
            callback.call(&Progress {
                iterations: self.iterations,
                phase: self.solve_phase,
                objective: self.lp.sense_sign * self.dual_objective + self.lp.offset,
                ..Progress::default()
            });
        }

        if self.factor.update(&self.col_aq, self.row_out).is_err() {
            self.rebuild_reason = Some(RebuildReason::UpdateLimit);
            return false;
        }
        // Synthetic clock: refactorizing is cheaper than dragging a long
        // eta file through every solve.
        let clock_limit = 4.0 * (self.lp.matrix.num_nz() + self.lp.num_row) as f64;
        if self.total_synthetic_tick > clock_limit * (1 + self.factor.update_count()) as f64
            && self.factor.update_count() > 8
        {
            self.rebuild_reason = Some(RebuildReason::SyntheticClock);
            return false;
        }
        true
    }

    // ----- rebuild machinery ---------------------------------------------

    /// Refactorizes and recomputes every derived quantity from the basis.
    pub(crate) fn rebuild(&mut self, callback: &mut dyn Callback) -> Result<(), ()> {
        let mut reset_attempted = false;
        loop {
            match self.factor.refactor(&self.lp.matrix, &self.basis.basic_index) {
                Ok(()) => break,
                Err(_) if !reset_attempted => {
                    // One automatic retry from the all-logical basis.
                    reset_attempted = true;
                    self.basis = Basis::logical(self.lp.num_col, self.lp.num_row);
                }
                Err(_) => return Err(()),
            }
        }

        self.compute_work_cost();
        self.compute_dual();
        self.align_nonbasic();
        self.compute_primal();
        self.compute_dual_objective();
        self.total_synthetic_tick = 0.0;
        self.iterations_since_rebuild = 0;
        self.rebuild_reason = None;

        if self.pricing.wants_devex_switch() {
            self.pricing = Pricing::Devex(Devex::new(self.options));
            self.pricing.reset(&mut self.edge_weight);
        } else if self.pricing.wants_reset() {
            self.pricing.reset(&mut self.edge_weight);
        }

        let (num_infeas, sum_infeas) = rhs::measure_primal_infeasibilities(
            &self.base_value,
            &self.base_lower,
            &self.base_upper,
            self.options.primal_feasibility_tolerance,
        );
        if self.options.output_flag {
            callback.call(&Progress {
                iterations: self.iterations,
                phase: self.solve_phase,
                objective: self.lp.sense_sign * self.dual_objective + self.lp.offset,
                num_primal_infeasibility: num_infeas,
                sum_dual_infeasibility: sum_infeas,
                ..Progress::default()
            });
        }
        Ok(())
    }

    /// Removes perturbation and shifts, then recomputes the dual solution.
    fn cleanup(&mut self, callback: &mut dyn Callback) {
        self.perturbed = false;
        self.cost_perturbation.iter_mut().for_each(|p| *p = 0.0);
        let _ = self.rebuild(callback);
    }

    fn compute_work_cost(&mut self) {
        for j in 0..self.lp.num_tot {
            self.work_cost[j] = self.lp.cost[j] + self.cost_perturbation[j];
        }
    }

    /// Uniform small random cost perturbation, biased to preserve the dual
    /// feasibility of the current nonbasic moves.
    fn perturb_costs(&mut self) {
        self.perturbed = true;
        for j in 0..self.lp.num_col {
            let magnitude =
                5e-6 * self.options.dual_feasibility_tolerance.max(1e-7).sqrt().min(1.0);
            let noise: E = self.rng.random_range(0.5..1.0);
            let direction = self.basis.nonbasic_move[j] as E;
            if direction != 0.0 {
                self.cost_perturbation[j] =
                    direction * magnitude * noise * (1.0 + self.lp.cost[j].abs());
            }
        }
    }

    /// Duals from the basic costs: `pi = B^-T c_B`, `d_j = c_j - a_j' pi`.
    fn compute_dual(&mut self) {
        let mut pi = SparseVector::new(self.lp.num_row);
        for p in 0..self.lp.num_row {
            let cost = self.work_cost[self.basis.basic_index[p]];
            if cost != 0.0 {
                pi.set(p, cost);
            }
        }
        self.factor.btran(&mut pi);
        for i in 0..self.lp.num_row {
            self.dual_pi[i] = pi.array[i];
        }

        for j in 0..self.lp.num_tot {
            if self.basis.nonbasic_flag[j] == 0 {
                self.work_dual[j] = 0.0;
            } else if j < self.lp.num_col {
                self.work_dual[j] = self.work_cost[j] - self.lp.matrix.col_dot(j, &self.dual_pi);
            } else {
                self.work_dual[j] = self.work_cost[j] - self.dual_pi[j - self.lp.num_col];
            }
        }
    }

    /// Resets nonbasic moves and values against the working bounds, flipping
    /// boxed variables onto their dual-feasible side.
    fn align_nonbasic(&mut self) {
        let tolerance = self.options.dual_feasibility_tolerance;
        self.dual_infeas_count = 0;
        for j in 0..self.lp.num_tot {
            if self.basis.nonbasic_flag[j] == 0 {
                continue;
            }
            let lower = self.work_lower[j];
            let upper = self.work_upper[j];
            let dual = self.work_dual[j];

            if lower == upper {
                self.basis.nonbasic_move[j] = 0;
                self.work_value[j] = lower;
            } else if !is_neg_infinite(lower) && !is_pos_infinite(upper) {
                // Boxed: always flippable onto the feasible side.
                let mv = if dual > tolerance {
                    1
                } else if dual < -tolerance {
                    -1
                } else if self.basis.nonbasic_move[j] != 0 {
                    self.basis.nonbasic_move[j]
                } else {
                    1
                };
                self.basis.nonbasic_move[j] = mv;
                self.work_value[j] = if mv == 1 { lower } else { upper };
            } else if !is_neg_infinite(lower) {
                self.basis.nonbasic_move[j] = 1;
                self.work_value[j] = lower;
                if dual < -tolerance {
                    self.dual_infeas_count += 1;
                }
            } else if !is_pos_infinite(upper) {
                self.basis.nonbasic_move[j] = -1;
                self.work_value[j] = upper;
                if dual > tolerance {
                    self.dual_infeas_count += 1;
                }
            } else {
                self.basis.nonbasic_move[j] = 0;
                if dual.abs() > tolerance {
                    self.dual_infeas_count += 1;
                }
            }
        }
    }

    /// Basic values from the nonbasic ones: `x_B = -B^-1 N x_N`.
    fn compute_primal(&mut self) {
        let mut work = SparseVector::new(self.lp.num_row);
        for j in 0..self.lp.num_tot {
            if self.basis.nonbasic_flag[j] == 1 && self.work_value[j] != 0.0 {
                let value = self.work_value[j];
                for (i, coeff) in self.lp.col_entries(j) {
                    work.add(i, -coeff * value);
                }
            }
        }
        self.factor.ftran(&mut work);
        for p in 0..self.lp.num_row {
            self.base_value[p] = work.array[p];
            let var = self.basis.basic_index[p];
            self.base_lower[p] = self.work_lower[var];
            self.base_upper[p] = self.work_upper[var];
        }
    }

    /// Exact extended-precision dual objective.
    fn compute_dual_objective(&mut self) {
        let mut objective = DDouble::ZERO;
        for j in 0..self.lp.num_tot {
            if self.basis.nonbasic_flag[j] == 1 {
                objective = objective + DDouble::from(self.work_dual[j]) * self.work_value[j];
            }
        }
        self.dual_objective = objective.to_f64();
    }

    /// Sets the working bounds for the given phase. Phase 1 swaps in the
    /// auxiliary bounds that make every variable boxed.
    fn apply_phase_bounds(&mut self, phase: I) {
        self.solve_phase = phase;
        for j in 0..self.lp.num_tot {
            let lower = self.lp.lower[j];
            let upper = self.lp.upper[j];
            let (work_lower, work_upper) = if phase == 2 {
                (lower, upper)
            } else {
                match (is_neg_infinite(lower), is_pos_infinite(upper)) {
                    (false, false) => (0.0, 0.0),
                    (false, true) => (0.0, 1.0),
                    (true, false) => (-1.0, 0.0),
                    (true, true) => (-1000.0, 1000.0),
                }
            };
            self.work_lower[j] = work_lower;
            self.work_upper[j] = work_upper;
        }
    }

    /// Residual dual infeasibility that no bound flip can repair, measured
    /// against the real bounds.
    fn unfixable_dual_infeasibility(&self) -> E {
        let tolerance = self.options.dual_feasibility_tolerance;
        let mut sum = 0.0;
        for j in 0..self.lp.num_tot {
            if self.basis.nonbasic_flag[j] == 0 {
                continue;
            }
            let lower = self.lp.lower[j];
            let upper = self.lp.upper[j];
            let dual = self.work_dual[j];
            if lower == upper || (!is_neg_infinite(lower) && !is_pos_infinite(upper)) {
                continue;
            }
            if !is_neg_infinite(lower) {
                if dual < -tolerance {
                    sum += -dual;
                }
            } else if !is_pos_infinite(upper) {
                if dual > tolerance {
                    sum += dual;
                }
            } else if dual.abs() > tolerance {
                sum += dual.abs();
            }
        }
        sum
    }

    /// Dual infeasibility established: distinguish unbounded from
    /// unbounded-or-infeasible by checking primal feasibility on the real
    /// bounds, and save a primal ray from the worst offending column.
    fn conclude_dual_infeasible(&mut self, callback: &mut dyn Callback) -> ModelStatus {
        // Locate the worst unfixable dual infeasibility, measured against
        // the real bounds (the current moves may still reflect the
        // auxiliary ones).
        let mut worst = self.options.dual_feasibility_tolerance;
        let mut worst_var = None;
        for j in 0..self.lp.num_tot {
            if self.basis.nonbasic_flag[j] == 0 {
                continue;
            }
            let lower = self.lp.lower[j];
            let upper = self.lp.upper[j];
            if lower == upper || (!is_neg_infinite(lower) && !is_pos_infinite(upper)) {
                continue;
            }
            let dual = self.work_dual[j];
            let infeas = if !is_neg_infinite(lower) {
                (-dual).max(0.0)
            } else if !is_pos_infinite(upper) {
                dual.max(0.0)
            } else {
                dual.abs()
            };
            if infeas > worst {
                worst = infeas;
                worst_var = Some(j);
            }
        }

        self.apply_phase_bounds(2);
        if self.rebuild(callback).is_err() {
            return ModelStatus::SolveError;
        }
        let (num_infeas, _) = rhs::measure_primal_infeasibilities(
            &self.base_value,
            &self.base_lower,
            &self.base_upper,
            self.options.primal_feasibility_tolerance,
        );

        if let Some(var) = worst_var {
            self.save_primal_ray(var);
        }
        if num_infeas == 0 {
            ModelStatus::Unbounded
        } else {
            ModelStatus::UnboundedOrInfeasible
        }
    }

    /// Unboundedness direction: push the offending variable in its
    /// objective-improving direction and compensate through the basis.
    fn save_primal_ray(&mut self, var: I) {
        let direction = -self.work_dual[var].signum();
        let mut ray = vec![0.0; self.lp.num_col];
        if var < self.lp.num_col {
            ray[var] = direction;
        }
        let mut work = SparseVector::new(self.lp.num_row);
        work.scatter(self.lp.col_entries(var).into_iter());
        self.factor.ftran(&mut work);
        for p in 0..self.lp.num_row {
            let basic_var = self.basis.basic_index[p];
            if basic_var < self.lp.num_col && work.array[p] != 0.0 {
                ray[basic_var] = -direction * work.array[p];
            }
        }
        self.primal_ray = Some(ray);
    }

    /// Stores the BTRANned row as the dual unboundedness certificate.
    fn save_dual_ray(&mut self) {
        let mut ray = vec![0.0; self.lp.num_row];
        self.row_ep.for_each_nonzero(|i, rho| {
            ray[i] = self.sigma * rho;
        });
        self.dual_ray = Some(ray);
    }

    /// Stops early once the dual bound proves the objective bound
    /// unreachable, confirming with the exact recomputation first.
    fn bailout_on_dual_objective(&mut self) -> bool {
        if self.solve_phase != 2 || self.objective_bound_internal >= INFTY {
            return false;
        }
        if self.dual_objective <= self.objective_bound_internal {
            return false;
        }
        self.compute_dual_objective();
        self.dual_objective > self.objective_bound_internal
    }

    // ----- solution assembly ---------------------------------------------

    fn extract_solution(&mut self, status: ModelStatus) -> LpSolution {
        let num_col = self.lp.num_col;
        let num_row = self.lp.num_row;
        let sign = self.lp.sense_sign;

        let mut var_value = self.work_value.clone();
        for p in 0..num_row {
            var_value[self.basis.basic_index[p]] = self.base_value[p];
        }

        let col_value: Vec<E> = var_value[..num_col].to_vec();
        let row_value: Vec<E> = (0..num_row).map(|i| -var_value[num_col + i]).collect();
        let col_dual: Vec<E> = (0..num_col).map(|j| sign * self.work_dual[j]).collect();
        let row_dual: Vec<E> = (0..num_row).map(|i| sign * self.dual_pi[i]).collect();

        let col_status: Vec<BasisStatus> = (0..num_col)
            .map(|j| self.basis.status_of(j, self.lp.lower[j], self.lp.upper[j]))
            .collect();
        let row_status: Vec<BasisStatus> = (0..num_row)
            .map(|i| {
                let var = num_col + i;
                match self.basis.status_of(var, self.lp.lower[var], self.lp.upper[var]) {
                    BasisStatus::Basic => BasisStatus::Basic,
                    // The logical at its lower bound pins the row activity to
                    // the row's upper bound, and vice versa.
                    BasisStatus::Lower => BasisStatus::Upper,
                    BasisStatus::Upper => BasisStatus::Lower,
                    BasisStatus::Zero => BasisStatus::Zero,
                }
            })
            .collect();

        let mut internal = 0.0;
        for j in 0..num_col {
            internal += self.lp.cost[j] * col_value[j];
        }
        let objective = match status {
            ModelStatus::Infeasible | ModelStatus::UnboundedOrInfeasible => INFTY,
            ModelStatus::Unbounded => -sign * INFTY,
            _ => sign * internal + self.lp.offset,
        };

        LpSolution {
            status,
            objective,
            iterations: self.iterations,
            col_value,
            col_dual,
            row_value,
            row_dual,
            col_status,
            row_status,
            dual_ray: self.dual_ray.clone(),
            primal_ray: self.primal_ray.clone(),
            basis: Some(self.basis.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::NoOpCallback;
    use crate::model::Model;
    use crate::options::EdgeWeightStrategy;
    use crate::terminators::IterationTerminator;

    fn solve_model(model: &Model, options: &Options) -> LpSolution {
        let mut engine = DualSimplex::new(model, options);
        let mut terminator = IterationTerminator::new(options.simplex_iteration_limit);
        let mut callback = NoOpCallback {};
        engine.solve(&mut terminator, &mut callback)
    }

    /// max x1 + x2 st x1 + x2 <= 5, x1 <= 3, x2 <= 4 as rows, x >= 0.
    fn capacity_model() -> Model {
        Model {
            num_col: 2,
            num_row: 3,
            col_cost: vec![-1.0, -1.0],
            col_lower: vec![0.0, 0.0],
            col_upper: vec![INFTY, INFTY],
            row_lower: vec![-INFTY, -INFTY, -INFTY],
            row_upper: vec![5.0, 3.0, 4.0],
            a_start: vec![0, 2, 4],
            a_index: vec![0, 1, 0, 2],
            a_value: vec![1.0, 1.0, 1.0, 1.0],
            ..Model::new()
        }
    }

    #[test]
    fn minimizes_over_capacity_rows() {
        let options = Options::default();
        let solution = solve_model(&capacity_model(), &options);
        assert_eq!(solution.status, ModelStatus::Optimal);
        assert!((solution.objective + 5.0).abs() < 1e-8);
        let activity = solution.col_value[0] + solution.col_value[1];
        assert!((activity - 5.0).abs() < 1e-8);
    }

    #[test]
    fn every_pricing_strategy_agrees() {
        for strategy in [
            EdgeWeightStrategy::SteepestEdge,
            EdgeWeightStrategy::Devex,
            EdgeWeightStrategy::Dantzig,
        ] {
            let mut options = Options::default();
            options.edge_weight_strategy = strategy;
            let solution = solve_model(&capacity_model(), &options);
            assert_eq!(solution.status, ModelStatus::Optimal, "{strategy:?}");
            assert!((solution.objective + 5.0).abs() < 1e-8, "{strategy:?}");
        }
    }

    #[test]
    fn equality_rows_are_respected() {
        // min x1 + 2 x2 st x1 + x2 = 3, x1 - x2 = 1.
        let model = Model {
            num_col: 2,
            num_row: 2,
            col_cost: vec![1.0, 2.0],
            col_lower: vec![-INFTY, -INFTY],
            col_upper: vec![INFTY, INFTY],
            row_lower: vec![3.0, 1.0],
            row_upper: vec![3.0, 1.0],
            a_start: vec![0, 2, 4],
            a_index: vec![0, 1, 0, 1],
            a_value: vec![1.0, 1.0, 1.0, -1.0],
            ..Model::new()
        };
        let options = Options::default();
        let solution = solve_model(&model, &options);
        assert_eq!(solution.status, ModelStatus::Optimal);
        assert!((solution.col_value[0] - 2.0).abs() < 1e-8);
        assert!((solution.col_value[1] - 1.0).abs() < 1e-8);
        assert!((solution.objective - 4.0).abs() < 1e-8);
    }

    #[test]
    fn conflicting_rows_are_infeasible() {
        // x <= 1 and x >= 2 through two rows on the same column.
        let model = Model {
            num_col: 1,
            num_row: 2,
            col_cost: vec![0.0],
            col_lower: vec![-INFTY],
            col_upper: vec![INFTY],
            row_lower: vec![-INFTY, 2.0],
            row_upper: vec![1.0, INFTY],
            a_start: vec![0, 2],
            a_index: vec![0, 1],
            a_value: vec![1.0, 1.0],
            ..Model::new()
        };
        let options = Options::default();
        let solution = solve_model(&model, &options);
        assert_eq!(solution.status, ModelStatus::Infeasible);
        assert!(solution.dual_ray.is_some());
    }

    #[test]
    fn unbounded_direction_is_detected() {
        // min -x1 with x1 - x2 <= 1 and both nonnegative: x can grow along
        // the ray (1, 1).
        let model = Model {
            num_col: 2,
            num_row: 1,
            col_cost: vec![-1.0, 0.0],
            col_lower: vec![0.0, 0.0],
            col_upper: vec![INFTY, INFTY],
            row_lower: vec![-INFTY],
            row_upper: vec![1.0],
            a_start: vec![0, 1, 2],
            a_index: vec![0, 0],
            a_value: vec![1.0, -1.0],
            ..Model::new()
        };
        let options = Options::default();
        let solution = solve_model(&model, &options);
        assert!(matches!(
            solution.status,
            ModelStatus::Unbounded | ModelStatus::UnboundedOrInfeasible
        ));
    }

    #[test]
    fn maximization_reports_original_sense() {
        // max 3x + 2y st x + y <= 4, x + 3y <= 6, x,y >= 0 -> (4, 0), 12.
        let model = Model {
            num_col: 2,
            num_row: 2,
            sense: crate::model::ObjSense::Maximize,
            col_cost: vec![3.0, 2.0],
            col_lower: vec![0.0, 0.0],
            col_upper: vec![INFTY, INFTY],
            row_lower: vec![-INFTY, -INFTY],
            row_upper: vec![4.0, 6.0],
            a_start: vec![0, 2, 4],
            a_index: vec![0, 1, 0, 1],
            a_value: vec![1.0, 1.0, 1.0, 3.0],
            ..Model::new()
        };
        let options = Options::default();
        let solution = solve_model(&model, &options);
        assert_eq!(solution.status, ModelStatus::Optimal);
        assert!((solution.objective - 12.0).abs() < 1e-8);
        assert!((solution.col_value[0] - 4.0).abs() < 1e-8);
    }

    #[test]
    fn boxed_columns_exercise_bound_flips() {
        // min -x1 - 2x2 - x3 st x1 + x2 + x3 <= 2 with x in [0, 1]^3.
        let model = Model {
            num_col: 3,
            num_row: 1,
            col_cost: vec![-1.0, -2.0, -1.0],
            col_lower: vec![0.0, 0.0, 0.0],
            col_upper: vec![1.0, 1.0, 1.0],
            row_lower: vec![-INFTY],
            row_upper: vec![2.0],
            a_start: vec![0, 1, 2, 3],
            a_index: vec![0, 0, 0],
            a_value: vec![1.0, 1.0, 1.0],
            ..Model::new()
        };
        let options = Options::default();
        let solution = solve_model(&model, &options);
        assert_eq!(solution.status, ModelStatus::Optimal);
        assert!((solution.objective + 3.0).abs() < 1e-8);
        assert!((solution.col_value[1] - 1.0).abs() < 1e-8);
    }

    #[test]
    fn dual_solution_satisfies_stationarity() {
        let options = Options::default();
        let model = capacity_model();
        let solution = solve_model(&model, &options);
        // c - A' y - z = 0 columnwise.
        for j in 0..model.num_col {
            let mut aty = 0.0;
            for (i, v) in model.col(j) {
                aty += v * solution.row_dual[i];
            }
            let residual = model.col_cost[j] - aty - solution.col_dual[j];
            assert!(residual.abs() < 1e-8, "column {j}: {residual}");
        }
    }

    #[test]
    fn warm_start_reuses_final_basis() {
        let options = Options::default();
        let model = capacity_model();
        let first = solve_model(&model, &options);

        let mut engine = DualSimplex::new(&model, &options);
        engine.install_basis(first.basis.clone().unwrap());
        let mut terminator = IterationTerminator::new(1000);
        let mut callback = NoOpCallback {};
        let second = engine.solve(&mut terminator, &mut callback);
        assert_eq!(second.status, ModelStatus::Optimal);
        // Re-solving from the optimal basis takes no pivots.
        assert_eq!(second.iterations, 0);
    }

    #[test]
    fn iteration_limit_surfaces_best_state() {
        let mut options = Options::default();
        options.perturb_costs = false;
        let model = capacity_model();
        let mut engine = DualSimplex::new(&model, &options);
        let mut terminator = IterationTerminator::new(0);
        let mut callback = NoOpCallback {};
        let solution = engine.solve(&mut terminator, &mut callback);
        assert_eq!(solution.status, ModelStatus::IterationLimit);
    }
}
