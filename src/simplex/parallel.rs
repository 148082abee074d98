//! Multi-pivot (PAMI) dual simplex iterations.
//!
//! A major iteration selects up to `M` candidate leaving rows and BTRANs
//! them in one parallel batch. Minor iterations then pivot on these
//! candidates serially, maintaining each remaining candidate's BTRAN row and
//! basic value through the rank-one recurrences, while the factor stays at
//! its major-start state. The closing major update runs the deferred FTRANs
//! in parallel against that state, finalizes them serially through the etas
//! committed so far, and verifies each pivot before committing it to the
//! factor. A failed verify rolls back that pivot and every later one, then
//! forces a refactorization; minor iterations therefore commit in major
//! order, exactly like the serial driver.

use rayon::prelude::*;

use crate::callback::{Callback, Progress};
use crate::simplex::RebuildReason;
use crate::simplex::dual::DualSimplex;
use crate::simplex::pricing::{PricingRule, WeightContext};
use crate::simplex::rhs;
use crate::simplex::row;
use crate::sparse::SparseVector;
use crate::{E, I};

/// One candidate leaving row of a major iteration.
struct Choice {
    row: I,
    /// BTRAN of the row's unit vector, kept exact through the minors.
    rho: SparseVector,
    /// Exact squared norm of `rho`.
    weight: E,
    /// Running basic value of the row.
    value: E,
}

/// A minor pivot awaiting its deferred FTRAN.
struct Finish {
    row_out: I,
    variable_in: I,
    variable_out: I,
    alpha_row: E,
    theta_primal: E,
    /// Value the entering variable takes at this pivot.
    entering_value: E,
    /// Exact weight of the pivot row at selection time.
    weight: E,
    /// Variables flipped by this pivot's ratio test.
    flips: Vec<I>,
    /// The summed flip direction in constraint space, recorded at pivot
    /// time: a later minor may flip the same variable back, so it cannot be
    /// reconstructed from the final moves.
    flip_column: Vec<(I, E)>,
    // State needed to roll the pivot back.
    move_in_before: i8,
    value_in_before: E,
}

impl<'a> DualSimplex<'a> {
    /// Performs one PAMI major iteration (a batch of minor pivots). Returns
    /// false once `rebuild_reason` is set.
    pub(crate) fn iterate_multi(&mut self, callback: &mut dyn Callback) -> bool {
        let mut choices = self.major_choose_row();
        if choices.is_empty() {
            self.rebuild_reason = Some(RebuildReason::PossiblyOptimal);
            return false;
        }

        let mut finished: Vec<Finish> = Vec::new();
        let max_minor = choices.len();
        for _ in 0..max_minor {
            if !self.minor_iterate(&mut choices, &mut finished) {
                break;
            }
        }

        if finished.is_empty() {
            // Either every candidate became feasible through earlier flips
            // (retry from CHUZR) or CHUZC failed on the first minor.
            if self.rebuild_reason.is_none() {
                self.rebuild_reason = Some(RebuildReason::SyntheticClock);
            }
            return false;
        }

        if !self.major_update(finished, callback) {
            return false;
        }
        self.rebuild_reason.is_none()
    }

    /// CHUZR over the whole basis, returning the best rows by weighted
    /// infeasibility with their batched BTRANs.
    fn major_choose_row(&mut self) -> Vec<Choice> {
        let tolerance = self.options.primal_feasibility_tolerance;
        let candidates = if self.options.pami_candidates > 0 {
            self.options.pami_candidates
        } else {
            self.options.resolved_threads().clamp(2, 8)
        };

        let mut merits: Vec<(E, I)> = (0..self.lp.num_row)
            .filter_map(|row| {
                let delta = rhs::primal_infeasibility(
                    self.base_value[row],
                    self.base_lower[row],
                    self.base_upper[row],
                    tolerance,
                );
                if delta == 0.0 {
                    None
                } else {
                    Some((delta * delta / self.edge_weight[row], row))
                }
            })
            .collect();
        merits.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
        merits.truncate(candidates);

        let factor = &self.factor;
        let num_row = self.lp.num_row;
        let rows: Vec<I> = merits.iter().map(|&(_, row)| row).collect();
        let btran_rows: Vec<SparseVector> = match &self.pool {
            Some(pool) => pool.install(|| {
                rows.par_iter()
                    .map(|&row| {
                        let mut rho = SparseVector::new(num_row);
                        rho.set(row, 1.0);
                        factor.btran(&mut rho);
                        rho.pack();
                        rho
                    })
                    .collect()
            }),
            None => rows
                .iter()
                .map(|&row| {
                    let mut rho = SparseVector::new(num_row);
                    rho.set(row, 1.0);
                    factor.btran(&mut rho);
                    rho.pack();
                    rho
                })
                .collect(),
        };

        rows.into_iter()
            .zip(btran_rows)
            .map(|(row, rho)| {
                let weight = rho.norm2();
                Choice {
                    row,
                    weight,
                    value: self.base_value[row],
                    rho,
                }
            })
            .collect()
    }

    /// One minor iteration: CHUZR-MI over the candidate set, serial CHUZC,
    /// state update, and maintenance of the remaining candidates.
    fn minor_iterate(&mut self, choices: &mut Vec<Choice>, finished: &mut Vec<Finish>) -> bool {
        let tolerance = self.options.primal_feasibility_tolerance;

        // CHUZR-MI: best remaining candidate by current value and weight.
        let mut best: Option<(E, usize)> = None;
        for (k, choice) in choices.iter().enumerate() {
            let delta = rhs::primal_infeasibility(
                choice.value,
                self.base_lower[choice.row],
                self.base_upper[choice.row],
                tolerance,
            );
            if delta == 0.0 {
                continue;
            }
            let merit = delta * delta / choice.weight.max(1e-10);
            if best.is_none() || merit > best.unwrap().0 {
                best = Some((merit, k));
            }
        }
        let Some((_, chosen)) = best else {
            return false;
        };
        let choice = choices.swap_remove(chosen);
        let delta = rhs::primal_infeasibility(
            choice.value,
            self.base_lower[choice.row],
            self.base_upper[choice.row],
            tolerance,
        );
        let sigma = if delta > 0.0 { 1.0 } else { -1.0 };

        // Serial PRICE and CHUZC on the candidate's exact row. The row also
        // becomes the dual-ray candidate should CHUZC fail.
        self.row_ep.copy_from(&choice.rho);
        self.sigma = sigma;
        let pack = self.price_rho(&choice.rho);
        let candidates = row::build_candidates(
            &pack,
            sigma,
            &self.work_dual,
            &self.basis.nonbasic_move,
            &self.work_lower,
            &self.work_upper,
            self.options.pivot_tolerance.max(1e-9),
        );
        let Some(chuzc) = row::choose_column(
            candidates,
            sigma,
            delta,
            &self.work_dual,
            self.options.dual_feasibility_tolerance,
        ) else {
            self.rebuild_reason = Some(RebuildReason::PossiblyInfeasible);
            return false;
        };

        let variable_in = chuzc.variable_in;
        let variable_out = self.basis.basic_index[choice.row];
        let alpha_row = chuzc.alpha_row;
        let mut theta_dual = chuzc.theta_dual;
        if sigma * theta_dual < 0.0 {
            let amount = -self.work_dual[variable_in];
            self.work_cost[variable_in] += amount;
            self.work_dual[variable_in] = 0.0;
            theta_dual = 0.0;
        }
        let theta_primal = chuzc.remaining_delta / alpha_row;

        // Flips first, so their objective gain books against the pre-update
        // duals; recorded for replay and rollback.
        let mut flip_column: Vec<(I, E)> = Vec::new();
        for &var in &chuzc.flips {
            let mv = self.basis.nonbasic_move[var];
            let range = self.work_upper[var] - self.work_lower[var];
            self.dual_objective += self.work_dual[var] * mv as E * range;
            for (i, coeff) in self.lp.col_entries(var) {
                flip_column.push((i, coeff * mv as E * range));
            }
            if mv == 1 {
                self.work_value[var] = self.work_upper[var];
                self.basis.nonbasic_move[var] = -1;
            } else {
                self.work_value[var] = self.work_lower[var];
                self.basis.nonbasic_move[var] = 1;
            }
        }

        // Dual update over the packed row.
        if theta_dual != 0.0 {
            for &(var, pi) in &pack {
                self.work_dual[var] -= theta_dual * pi;
            }
        }
        self.dual_objective += theta_dual * chuzc.remaining_delta;

        // Maintain the remaining candidates: alpha against the entering
        // column and the flip column fall out of the kept BTRAN rows.
        let entering_column = self.lp.col_entries(variable_in);
        let pivot_rho = &choice.rho;
        for other in choices.iter_mut() {
            let mut alpha = 0.0;
            for &(i, coeff) in &entering_column {
                alpha += coeff * other.rho.array[i];
            }
            let mut flip_shift = 0.0;
            for &(i, coeff) in &flip_column {
                flip_shift += coeff * other.rho.array[i];
            }
            other.value -= theta_primal * alpha + flip_shift;

            if alpha != 0.0 {
                let scale = alpha / alpha_row;
                let mut updated = SparseVector::new(other.rho.size);
                other.rho.for_each_nonzero(|i, v| updated.set(i, v));
                pivot_rho.for_each_nonzero(|i, v| updated.add(i, -scale * v));
                updated.pack();
                other.weight = updated.norm2();
                other.rho = updated;
            }
        }

        let entering_value = self.work_value[variable_in] + theta_primal;
        let finish = Finish {
            row_out: choice.row,
            variable_in,
            variable_out,
            alpha_row,
            theta_primal,
            entering_value,
            weight: choice.weight,
            flips: chuzc.flips.clone(),
            flip_column,
            move_in_before: self.basis.nonbasic_move[variable_in],
            value_in_before: self.work_value[variable_in],
        };

        // Splice the basis immediately; rollback information lives in the
        // finish record.
        let (leave_value, leave_move) = if sigma < 0.0 {
            let lower = self.work_lower[variable_out];
            (
                lower,
                if lower == self.work_upper[variable_out] { 0 } else { 1 },
            )
        } else {
            let upper = self.work_upper[variable_out];
            (
                upper,
                if upper == self.work_lower[variable_out] { 0 } else { -1 },
            )
        };
        self.basis.nonbasic_flag[variable_out] = 1;
        self.basis.nonbasic_move[variable_out] = leave_move;
        self.work_value[variable_out] = leave_value;
        self.work_dual[variable_out] = -theta_dual;
        self.basis.basic_index[choice.row] = variable_in;
        self.basis.nonbasic_flag[variable_in] = 0;
        self.basis.nonbasic_move[variable_in] = 0;
        self.work_dual[variable_in] = 0.0;
        self.base_lower[choice.row] = self.work_lower[variable_in];
        self.base_upper[choice.row] = self.work_upper[variable_in];

        finished.push(finish);
        true
    }

    /// Deferred FTRANs, verification, factor updates and the primal replay.
    fn major_update(&mut self, finished: Vec<Finish>, callback: &mut dyn Callback) -> bool {
        let update_mark = self.factor.update_count();
        let factor = &self.factor;
        let lp = &self.lp;

        // Parallel part: FTRAN every entering column and flip column against
        // the major-start factor.
        let work: Vec<(SparseVector, Option<SparseVector>)> = {
            let solve_one = |finish: &Finish| {
                let mut col_aq = SparseVector::new(lp.num_row);
                col_aq.scatter(lp.col_entries(finish.variable_in).into_iter());
                factor.ftran(&mut col_aq);
                let col_flip = if finish.flip_column.is_empty() {
                    None
                } else {
                    let mut col = SparseVector::new(lp.num_row);
                    for &(i, shift) in &finish.flip_column {
                        col.add(i, shift);
                    }
                    factor.ftran(&mut col);
                    Some(col)
                };
                (col_aq, col_flip)
            };
            match &self.pool {
                Some(pool) => pool.install(|| finished.par_iter().map(solve_one).collect()),
                None => finished.iter().map(solve_one).collect(),
            }
        };

        // Serial part: finalize in commit order, verify, update the factor.
        let mut rollback_from = None;
        for (k, (finish, (mut col_aq, col_flip))) in
            finished.iter().zip(work.into_iter()).enumerate()
        {
            self.factor.ftran_updates_from(&mut col_aq, update_mark);
            col_aq.pack();
            let alpha_col = col_aq.array[finish.row_out];

            let scale = finish.alpha_row.abs().max(alpha_col.abs());
            let mismatch = (finish.alpha_row - alpha_col).abs() / scale.max(1e-30);
            if !alpha_col.is_finite()
                || alpha_col.abs() <= self.options.pivot_tolerance
                || alpha_col.signum() != finish.alpha_row.signum()
                || mismatch > self.options.pivot_verify_tolerance
            {
                rollback_from = Some(k);
                break;
            }
            if self.factor.update(&col_aq, finish.row_out).is_err() {
                rollback_from = Some(k);
                break;
            }

            // Primal replay in pivot order reproduces the serial update.
            let theta = finish.theta_primal;
            let base_value = &mut self.base_value;
            col_aq.for_each_nonzero(|i, alpha| {
                base_value[i] -= theta * alpha;
            });
            if let Some(mut col_flip) = col_flip {
                self.factor.ftran_updates_from(&mut col_flip, update_mark);
                let base_value = &mut self.base_value;
                col_flip.for_each_nonzero(|i, shift| {
                    base_value[i] -= shift;
                });
            }
            self.base_value[finish.row_out] = finish.entering_value;

            let ctx = WeightContext {
                row_out: finish.row_out,
                pivot: alpha_col,
                computed_weight: finish.weight,
                col_aq: &col_aq,
                col_dse: None,
            };
            self.pricing.update_weights(&ctx, &mut self.edge_weight);

            self.iterations += 1;
            self.iterations_since_rebuild += 1;
            if self.options.output_flag {
                callback.call(&Progress {
                    iterations: self.iterations,
                    phase: self.solve_phase,
                    objective: self.lp.sense_sign * self.dual_objective + self.lp.offset,
                    ..Progress::default()
                });
            }
        }

        if let Some(from) = rollback_from {
            self.major_rollback(&finished[from..]);
            self.rebuild_reason = Some(RebuildReason::NumericalTrouble);
            return false;
        }
        if self.factor.update_count() + finished.len() >= self.options.refactor_interval {
            self.rebuild_reason = Some(RebuildReason::UpdateLimit);
            return false;
        }
        true
    }

    /// Rolls back the uncommitted minor pivots in reverse order. Duals and
    /// primals are left to the forced rebuild.
    fn major_rollback(&mut self, discarded: &[Finish]) {
        for finish in discarded.iter().rev() {
            self.basis.basic_index[finish.row_out] = finish.variable_out;
            self.basis.nonbasic_flag[finish.variable_out] = 0;
            self.basis.nonbasic_flag[finish.variable_in] = 1;
            self.basis.nonbasic_move[finish.variable_in] = finish.move_in_before;
            self.work_value[finish.variable_in] = finish.value_in_before;
            self.base_lower[finish.row_out] = self.work_lower[finish.variable_out];
            self.base_upper[finish.row_out] = self.work_upper[finish.variable_out];

            for &var in &finish.flips {
                let mv = self.basis.nonbasic_move[var];
                if mv == 1 {
                    self.work_value[var] = self.work_upper[var];
                    self.basis.nonbasic_move[var] = -1;
                } else {
                    self.work_value[var] = self.work_lower[var];
                    self.basis.nonbasic_move[var] = 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::callback::NoOpCallback;
    use crate::model::Model;
    use crate::options::{Options, SimplexStrategy};
    use crate::simplex::DualSimplex;
    use crate::terminators::IterationTerminator;
    use crate::{INFTY, ModelStatus};

    fn transport_model() -> Model {
        // min sum of shipping costs over a 2x3 transportation problem posed
        // with supply rows (<=) and demand rows (>=).
        Model {
            num_col: 6,
            num_row: 5,
            col_cost: vec![4.0, 6.0, 9.0, 5.0, 3.0, 8.0],
            col_lower: vec![0.0; 6],
            col_upper: vec![INFTY; 6],
            row_lower: vec![-INFTY, -INFTY, 4.0, 5.0, 3.0],
            row_upper: vec![7.0, 6.0, INFTY, INFTY, INFTY],
            // Columns x_ij: supply row i in {0,1}, demand row 2+j.
            a_start: vec![0, 2, 4, 6, 8, 10, 12],
            a_index: vec![0, 2, 0, 3, 0, 4, 1, 2, 1, 3, 1, 4],
            a_value: vec![1.0; 12],
            ..Model::new()
        }
    }

    #[test]
    fn pami_matches_serial_optimum() {
        let serial_options = Options::default();
        let mut serial = DualSimplex::new(&transport_model(), &serial_options);
        let serial_solution = serial.solve(
            &mut IterationTerminator::new(10_000),
            &mut NoOpCallback {},
        );
        assert_eq!(serial_solution.status, ModelStatus::Optimal);

        let mut pami_options = Options::default();
        pami_options.simplex_strategy = SimplexStrategy::DualPami;
        pami_options.threads = 2;
        let mut pami = DualSimplex::new(&transport_model(), &pami_options);
        let pami_solution = pami.solve(
            &mut IterationTerminator::new(10_000),
            &mut NoOpCallback {},
        );
        assert_eq!(pami_solution.status, ModelStatus::Optimal);
        assert!((pami_solution.objective - serial_solution.objective).abs() < 1e-7);
    }

    #[test]
    fn sip_matches_serial_optimum() {
        let serial_options = Options::default();
        let mut serial = DualSimplex::new(&transport_model(), &serial_options);
        let serial_solution = serial.solve(
            &mut IterationTerminator::new(10_000),
            &mut NoOpCallback {},
        );

        let mut sip_options = Options::default();
        sip_options.simplex_strategy = SimplexStrategy::DualSip;
        sip_options.threads = 3;
        let mut sip = DualSimplex::new(&transport_model(), &sip_options);
        let sip_solution = sip.solve(
            &mut IterationTerminator::new(10_000),
            &mut NoOpCallback {},
        );
        assert_eq!(sip_solution.status, ModelStatus::Optimal);
        assert!((sip_solution.objective - serial_solution.objective).abs() < 1e-7);
    }
}
