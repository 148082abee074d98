//! Convex quadratic programming by a Mehrotra predictor–corrector
//! interior-point method.
//!
//! The model's rows are folded into slack variables exactly like the simplex
//! engine does (`A x + s = 0`, slack bounds negated row bounds), so the
//! method works on one box-constrained variable vector with a single
//! equality block. Each iteration assembles the regularized augmented KKT
//! system, factorizes it once, and reuses the factorization for the
//! predictor and the corrector solve.

pub mod kkt;

use faer::sparse::Triplet;

use crate::callback::{Callback, Progress};
use crate::model::{Model, hessian::HessianFormat};
use crate::options::Options;
use crate::simplex::LpSolution;
use crate::sparse::SparseMatrix;
use crate::terminators::Terminator;
use crate::{E, I, ModelStatus, is_neg_infinite, is_pos_infinite};

use kkt::KktSolver;

/// Fraction-to-boundary scaling.
const STEP_SCALE: E = 0.995;
/// Static regularization of the KKT diagonal.
const REGULARIZATION: E = 1e-10;

struct QpWorkspace {
    num_col: I,
    num_row: I,
    num_tot: I,
    sign: E,
    matrix: SparseMatrix,
    cost: Vec<E>,
    lower: Vec<E>,
    upper: Vec<E>,
    /// Triangular Hessian entries (row, col, value), sense-adjusted.
    hessian: Vec<(I, I, E)>,
}

impl QpWorkspace {
    fn build(model: &Model) -> Self {
        let num_col = model.num_col;
        let num_row = model.num_row;
        let num_tot = num_col + num_row;
        let sign = model.sense.sign();

        let mut cost = vec![0.0; num_tot];
        let mut lower = vec![0.0; num_tot];
        let mut upper = vec![0.0; num_tot];
        for j in 0..num_col {
            cost[j] = sign * model.col_cost[j];
            lower[j] = Model::normalize_bound(model.col_lower[j]);
            upper[j] = Model::normalize_bound(model.col_upper[j]);
        }
        for i in 0..num_row {
            lower[num_col + i] = -Model::normalize_bound(model.row_upper[i]);
            upper[num_col + i] = -Model::normalize_bound(model.row_lower[i]);
        }

        let mut hessian = Vec::new();
        if let Some(h) = &model.hessian {
            debug_assert_eq!(h.format, HessianFormat::Triangular);
            for col in 0..h.dim {
                for k in h.q_start[col]..h.q_start[col + 1] {
                    hessian.push((h.q_index[k], col, sign * h.q_value[k]));
                }
            }
        }

        Self {
            num_col,
            num_row,
            num_tot,
            sign,
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
            hessian,
        }
    }

    /// `y += Q x` using the triangular representation.
    fn add_hessian_product(&self, x: &[E], y: &mut [E]) {
        for &(row, col, value) in &self.hessian {
            y[col] += value * x[row];
            if row != col {
                y[row] += value * x[col];
            }
        }
    }
}

/// Interior-point solver state.
pub struct MehrotraPredictorCorrector<'a> {
    options: &'a Options,
    work: QpWorkspace,
    iterations: I,
}

impl<'a> MehrotraPredictorCorrector<'a> {
    pub fn new(model: &Model, options: &'a Options) -> Self {
        Self {
            options,
            work: QpWorkspace::build(model),
            iterations: 0,
        }
    }

    pub fn solve(
        &mut self,
        model: &Model,
        terminator: &mut dyn Terminator,
        callback: &mut dyn Callback,
    ) -> LpSolution {
        let num_tot = self.work.num_tot;
        let num_row = self.work.num_row;
        let kkt_dim = num_tot + num_row;
        let tolerance = self.options.qp_tolerance;

        for j in 0..num_tot {
            if self.work.lower[j] > self.work.upper[j] {
                return LpSolution::with_status(ModelStatus::Infeasible);
            }
        }

        let has_lower: Vec<bool> = (0..num_tot)
            .map(|j| !is_neg_infinite(self.work.lower[j]))
            .collect();
        let has_upper: Vec<bool> = (0..num_tot)
            .map(|j| !is_pos_infinite(self.work.upper[j]))
            .collect();

        // Strictly interior start.
        let mut z = vec![0.0; num_tot];
        for j in 0..num_tot {
            z[j] = match (has_lower[j], has_upper[j]) {
                (true, true) => 0.5 * (self.work.lower[j] + self.work.upper[j]),
                (true, false) => self.work.lower[j] + 1.0,
                (false, true) => self.work.upper[j] - 1.0,
                (false, false) => 0.0,
            };
        }
        let mut y = vec![0.0; num_row];
        let mut zl: Vec<E> = has_lower.iter().map(|&h| if h { 1.0 } else { 0.0 }).collect();
        let mut zu: Vec<E> = has_upper.iter().map(|&h| if h { 1.0 } else { 0.0 }).collect();

        // Keep fixed variables strictly interior by widening them a hair.
        let mut lower = self.work.lower.clone();
        let mut upper = self.work.upper.clone();
        for j in 0..num_tot {
            if has_lower[j] && has_upper[j] && upper[j] - lower[j] < 1e-12 {
                lower[j] -= 5e-7;
                upper[j] += 5e-7;
            }
        }

        terminator.initialize();
        let mut status = ModelStatus::IterationLimit;
        let mut solver = KktSolver::new();

        for _ in 0..self.options.qp_iteration_limit {
            if let Some(limit_status) = terminator.terminate(self.iterations) {
                status = limit_status;
                break;
            }

            // Residuals and the barrier parameter.
            let (r_d, r_p) = self.residuals(&z, &y, &zl, &zu);
            let mut mu = 0.0;
            let mut mu_terms = 0;
            for j in 0..num_tot {
                if has_lower[j] {
                    mu += (z[j] - lower[j]) * zl[j];
                    mu_terms += 1;
                }
                if has_upper[j] {
                    mu += (upper[j] - z[j]) * zu[j];
                    mu_terms += 1;
                }
            }
            if mu_terms > 0 {
                mu /= mu_terms as E;
            }

            let norm_d = r_d.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
            let norm_p = r_p.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
            if norm_d <= tolerance && norm_p <= tolerance && mu <= tolerance {
                status = ModelStatus::Optimal;
                break;
            }

            // Assemble and factorize the augmented system once per
            // iteration.
            let mut triplets: Vec<Triplet<I, I, E>> = Vec::new();
            for &(row, col, value) in &self.work.hessian {
                triplets.push(Triplet::new(col, row, value));
                if row != col {
                    triplets.push(Triplet::new(row, col, value));
                }
            }
            for j in 0..num_tot {
                let mut diag = REGULARIZATION;
                if has_lower[j] {
                    diag += zl[j] / (z[j] - lower[j]).max(1e-14);
                }
                if has_upper[j] {
                    diag += zu[j] / (upper[j] - z[j]).max(1e-14);
                }
                triplets.push(Triplet::new(j, j, diag));
            }
            for col in 0..self.work.num_col {
                for (row, value) in self.work.matrix.col(col) {
                    triplets.push(Triplet::new(num_tot + row, col, value));
                    triplets.push(Triplet::new(col, num_tot + row, value));
                }
            }
            for i in 0..num_row {
                let slack = self.work.num_col + i;
                triplets.push(Triplet::new(num_tot + i, slack, 1.0));
                triplets.push(Triplet::new(slack, num_tot + i, 1.0));
                triplets.push(Triplet::new(num_tot + i, num_tot + i, -REGULARIZATION));
            }
            if solver.factorize(kkt_dim, &triplets).is_err() {
                status = ModelStatus::SolveError;
                break;
            }

            // Predictor: pure Newton step on the affine system.
            let affine = self.kkt_step(
                &solver, &r_d, &r_p, &z, &zl, &zu, &lower, &upper, &has_lower, &has_upper, 0.0,
                None,
            );
            let Some((dz_aff, _dy_aff, dzl_aff, dzu_aff)) = affine else {
                status = ModelStatus::SolveError;
                break;
            };

            let (alpha_p_aff, alpha_d_aff) = step_lengths(
                &z, &dz_aff, &zl, &dzl_aff, &zu, &dzu_aff, &lower, &upper, &has_lower, &has_upper,
            );
            let mut mu_aff = 0.0;
            for j in 0..num_tot {
                if has_lower[j] {
                    mu_aff += (z[j] + alpha_p_aff * dz_aff[j] - lower[j])
                        * (zl[j] + alpha_d_aff * dzl_aff[j]);
                }
                if has_upper[j] {
                    mu_aff += (upper[j] - z[j] - alpha_p_aff * dz_aff[j])
                        * (zu[j] + alpha_d_aff * dzu_aff[j]);
                }
            }
            if mu_terms > 0 {
                mu_aff /= mu_terms as E;
            }
            let sigma = if mu > 0.0 {
                ((mu_aff / mu).powi(3)).clamp(0.0, 1.0)
            } else {
                0.0
            };

            // Corrector reuses the factorization.
            let corrected = self.kkt_step(
                &solver,
                &r_d,
                &r_p,
                &z,
                &zl,
                &zu,
                &lower,
                &upper,
                &has_lower,
                &has_upper,
                sigma * mu,
                Some((&dz_aff, &dzl_aff, &dzu_aff)),
            );
            let Some((dz, dy, dzl, dzu)) = corrected else {
                status = ModelStatus::SolveError;
                break;
            };

            let (alpha_p, alpha_d) = step_lengths(
                &z, &dz, &zl, &dzl, &zu, &dzu, &lower, &upper, &has_lower, &has_upper,
            );

            for j in 0..num_tot {
                z[j] += alpha_p * dz[j];
                if has_lower[j] {
                    zl[j] = (zl[j] + alpha_d * dzl[j]).max(0.0);
                }
                if has_upper[j] {
                    zu[j] = (zu[j] + alpha_d * dzu[j]).max(0.0);
                }
            }
            for i in 0..num_row {
                y[i] += alpha_d * dy[i];
            }

            self.iterations += 1;
            if self.options.output_flag {
                callback.call(&Progress {
                    iterations: self.iterations,
                    objective: model.objective_value(&z[..self.work.num_col]),
                    sum_dual_infeasibility: norm_d,
                    ..Progress::default()
                });
            }
        }

        self.assemble_solution(model, status, &z, &y, &zl, &zu)
    }

    /// Dual and primal residuals of the current iterate.
    fn residuals(&self, z: &[E], y: &[E], zl: &[E], zu: &[E]) -> (Vec<E>, Vec<E>) {
        let num_tot = self.work.num_tot;
        let num_col = self.work.num_col;

        let mut r_d = vec![0.0; num_tot];
        self.work.add_hessian_product(z, &mut r_d);
        for j in 0..num_tot {
            r_d[j] += self.work.cost[j] - zl[j] + zu[j];
        }
        for col in 0..num_col {
            let mut aty = 0.0;
            for (row, value) in self.work.matrix.col(col) {
                aty += value * y[row];
            }
            r_d[col] -= aty;
        }
        for i in 0..self.work.num_row {
            r_d[num_col + i] -= y[i];
        }

        let mut r_p = vec![0.0; self.work.num_row];
        for col in 0..num_col {
            for (row, value) in self.work.matrix.col(col) {
                r_p[row] += value * z[col];
            }
        }
        for i in 0..self.work.num_row {
            r_p[i] += z[num_col + i];
        }
        (r_d, r_p)
    }

    /// One KKT solve: affine when `target_mu` is zero and no corrector data
    /// is given, corrector otherwise.
    #[allow(clippy::too_many_arguments)]
    fn kkt_step(
        &self,
        solver: &KktSolver,
        r_d: &[E],
        r_p: &[E],
        z: &[E],
        zl: &[E],
        zu: &[E],
        lower: &[E],
        upper: &[E],
        has_lower: &[bool],
        has_upper: &[bool],
        target_mu: E,
        corrector: Option<(&[E], &[E], &[E])>,
    ) -> Option<(Vec<E>, Vec<E>, Vec<E>, Vec<E>)> {
        let num_tot = self.work.num_tot;
        let num_row = self.work.num_row;

        let mut rhs = vec![0.0; num_tot + num_row];
        for j in 0..num_tot {
            let mut value = -r_d[j];
            if has_lower[j] {
                let sl = (z[j] - lower[j]).max(1e-14);
                let corr = corrector.map_or(0.0, |(dz, dzl, _)| dz[j] * dzl[j]);
                value += -zl[j] + (target_mu - corr) / sl;
            }
            if has_upper[j] {
                let su = (upper[j] - z[j]).max(1e-14);
                let corr = corrector.map_or(0.0, |(dz, _, dzu)| -dz[j] * dzu[j]);
                value += zu[j] - (target_mu - corr) / su;
            }
            rhs[j] = value;
        }
        for i in 0..num_row {
            rhs[num_tot + i] = -r_p[i];
        }

        let sol = solver.solve(&rhs).ok()?;
        let dz: Vec<E> = sol[..num_tot].to_vec();
        let dy: Vec<E> = sol[num_tot..].iter().map(|&lambda| -lambda).collect();

        let mut dzl = vec![0.0; num_tot];
        let mut dzu = vec![0.0; num_tot];
        for j in 0..num_tot {
            if has_lower[j] {
                let sl = (z[j] - lower[j]).max(1e-14);
                let corr = corrector.map_or(0.0, |(dz_aff, dzl_aff, _)| dz_aff[j] * dzl_aff[j]);
                dzl[j] = -zl[j] + (target_mu - corr) / sl - zl[j] / sl * dz[j];
            }
            if has_upper[j] {
                let su = (upper[j] - z[j]).max(1e-14);
                let corr = corrector.map_or(0.0, |(dz_aff, _, dzu_aff)| -dz_aff[j] * dzu_aff[j]);
                dzu[j] = -zu[j] + (target_mu - corr) / su + zu[j] / su * dz[j];
            }
        }
        Some((dz, dy, dzl, dzu))
    }

    fn assemble_solution(
        &self,
        model: &Model,
        status: ModelStatus,
        z: &[E],
        y: &[E],
        zl: &[E],
        zu: &[E],
    ) -> LpSolution {
        let num_col = self.work.num_col;
        let num_row = self.work.num_row;
        let sign = self.work.sign;

        let col_value: Vec<E> = z[..num_col].to_vec();
        let row_value: Vec<E> = (0..num_row).map(|i| -z[num_col + i]).collect();
        let col_dual: Vec<E> = (0..num_col).map(|j| sign * (zl[j] - zu[j])).collect();
        let row_dual: Vec<E> = (0..num_row).map(|i| sign * y[i]).collect();
        let objective = model.objective_value(&col_value);

        LpSolution {
            status,
            objective,
            iterations: self.iterations,
            col_value,
            col_dual,
            row_value,
            row_dual,
            ..LpSolution::default()
        }
    }
}

fn step_lengths(
    z: &[E],
    dz: &[E],
    zl: &[E],
    dzl: &[E],
    zu: &[E],
    dzu: &[E],
    lower: &[E],
    upper: &[E],
    has_lower: &[bool],
    has_upper: &[bool],
) -> (E, E) {
    let mut alpha_p: E = 1.0;
    let mut alpha_d: E = 1.0;
    for j in 0..z.len() {
        if has_lower[j] {
            let sl = z[j] - lower[j];
            if dz[j] < 0.0 {
                alpha_p = alpha_p.min(-STEP_SCALE * sl / dz[j]);
            }
            if dzl[j] < 0.0 {
                alpha_d = alpha_d.min(-STEP_SCALE * zl[j] / dzl[j]);
            }
        }
        if has_upper[j] {
            let su = upper[j] - z[j];
            if dz[j] > 0.0 {
                alpha_p = alpha_p.min(STEP_SCALE * su / dz[j]);
            }
            if dzu[j] < 0.0 {
                alpha_d = alpha_d.min(-STEP_SCALE * zu[j] / dzu[j]);
            }
        }
    }
    (alpha_p.clamp(0.0, 1.0), alpha_d.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::INFTY;
    use crate::callback::NoOpCallback;
    use crate::model::assess;
    use crate::model::hessian::Hessian;
    use crate::terminators::IterationTerminator;

    fn solve(model: &Model) -> LpSolution {
        let options = Options::default();
        let mut engine = MehrotraPredictorCorrector::new(model, &options);
        engine.solve(
            model,
            &mut IterationTerminator::new(10_000),
            &mut NoOpCallback {},
        )
    }

    #[test]
    fn separable_qp_with_equality_row() {
        // min x^2 + y^2 - 2x st x + y = 1, 0 <= x, y <= 10: solution (1, 0).
        let mut model = Model {
            num_col: 2,
            num_row: 1,
            col_cost: vec![-2.0, 0.0],
            col_lower: vec![0.0, 0.0],
            col_upper: vec![10.0, 10.0],
            row_lower: vec![1.0],
            row_upper: vec![1.0],
            a_start: vec![0, 1, 2],
            a_index: vec![0, 0],
            a_value: vec![1.0, 1.0],
            hessian: Some(Hessian {
                dim: 2,
                format: HessianFormat::Triangular,
                q_start: vec![0, 1, 2],
                q_index: vec![0, 1],
                q_value: vec![2.0, 2.0],
            }),
            ..Model::new()
        };
        assess::assess_model(&mut model, &Options::default()).unwrap();

        let solution = solve(&model);
        assert_eq!(solution.status, ModelStatus::Optimal);
        assert!((solution.col_value[0] - 1.0).abs() < 1e-5);
        assert!(solution.col_value[1].abs() < 1e-5);
        assert!((solution.objective + 1.0).abs() < 1e-5);
    }

    #[test]
    fn active_bound_shows_in_row_dual() {
        // min x^2 - 4x (= (x-2)^2 - 4) with x <= 1 through a row: optimum at
        // the bound, negative multiplier on the active <= row.
        let model = Model {
            num_col: 1,
            num_row: 1,
            col_cost: vec![-4.0],
            col_lower: vec![-10.0],
            col_upper: vec![INFTY],
            row_lower: vec![-INFTY],
            row_upper: vec![1.0],
            a_start: vec![0, 1],
            a_index: vec![0],
            a_value: vec![1.0],
            hessian: Some(Hessian {
                dim: 1,
                format: HessianFormat::Triangular,
                q_start: vec![0, 1],
                q_index: vec![0],
                q_value: vec![2.0],
            }),
            ..Model::new()
        };
        let solution = solve(&model);
        assert_eq!(solution.status, ModelStatus::Optimal);
        assert!((solution.col_value[0] - 1.0).abs() < 1e-5);
        assert!(solution.row_dual[0] < -1e-6);
    }

    #[test]
    fn interior_optimum_of_shifted_paraboloid() {
        // min (x-1)^2 + (y+2)^2 over a wide box with one loose row.
        let model = Model {
            num_col: 2,
            num_row: 1,
            col_cost: vec![-2.0, 4.0],
            col_lower: vec![-100.0, -100.0],
            col_upper: vec![100.0, 100.0],
            row_lower: vec![-1e4],
            row_upper: vec![1e4],
            a_start: vec![0, 1, 2],
            a_index: vec![0, 0],
            a_value: vec![1.0, 1.0],
            hessian: Some(Hessian {
                dim: 2,
                format: HessianFormat::Triangular,
                q_start: vec![0, 1, 2],
                q_index: vec![0, 1],
                q_value: vec![2.0, 2.0],
            }),
            ..Model::new()
        };
        let solution = solve(&model);
        assert_eq!(solution.status, ModelStatus::Optimal);
        assert!((solution.col_value[0] - 1.0).abs() < 1e-4);
        assert!((solution.col_value[1] + 2.0).abs() < 1e-4);
    }
}
