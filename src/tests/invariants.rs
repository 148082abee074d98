//! Invariant checks over reachable solver states: residual bounds,
//! complementary slackness, monotone dual objective, and search bound
//! ordering.

use std::cell::RefCell;
use std::rc::Rc;

use crate::callback::{Callback, NoOpCallback, Progress};
use crate::mip::MipSolver;
use crate::model::{Integrality, Model};
use crate::options::Options;
use crate::simplex::DualSimplex;
use crate::terminators::IterationTerminator;
use crate::{E, INFTY, ModelStatus};

fn production_model() -> Model {
    // A small production LP with two-sided rows and boxed columns.
    Model {
        num_col: 3,
        num_row: 3,
        col_cost: vec![-3.0, -5.0, -4.0],
        col_lower: vec![0.0, 0.0, 0.0],
        col_upper: vec![4.0, 6.0, 10.0],
        row_lower: vec![-INFTY, 2.0, -INFTY],
        row_upper: vec![8.0, 10.0, 15.0],
        a_start: vec![0, 2, 4, 6],
        a_index: vec![0, 1, 0, 2, 1, 2],
        a_value: vec![2.0, 1.0, 1.0, 2.0, 3.0, 2.0],
        ..Model::new()
    }
}

/// Optimal basic solutions satisfy primal and dual residual bounds and
/// complementary slackness.
#[test]
fn optimal_solution_satisfies_kkt_residuals() {
    let options = Options::default();
    let model = production_model();
    let mut engine = DualSimplex::new(&model, &options);
    let solution = engine.solve(
        &mut IterationTerminator::new(100_000),
        &mut NoOpCallback {},
    );
    assert_eq!(solution.status, ModelStatus::Optimal);

    let tolerance = 1e-7;
    // Primal: row activity matches the reported row values and respects the
    // row bounds; columns respect their bounds.
    for i in 0..model.num_row {
        let mut activity = 0.0;
        for j in 0..model.num_col {
            activity += model.coeff(i, j) * solution.col_value[j];
        }
        assert!((activity - solution.row_value[i]).abs() <= tolerance * (1.0 + activity.abs()));
        assert!(activity >= model.row_lower[i] - tolerance);
        assert!(activity <= model.row_upper[i] + tolerance);
    }
    for j in 0..model.num_col {
        assert!(solution.col_value[j] >= model.col_lower[j] - tolerance);
        assert!(solution.col_value[j] <= model.col_upper[j] + tolerance);
    }

    // Dual: stationarity c - A'y - z = 0.
    for j in 0..model.num_col {
        let mut aty = 0.0;
        for (i, v) in model.col(j) {
            aty += v * solution.row_dual[i];
        }
        let residual = model.col_cost[j] - aty - solution.col_dual[j];
        assert!(residual.abs() <= tolerance * (1.0 + model.col_cost[j].abs()));
    }

    // Complementary slackness: interior columns carry zero reduced cost,
    // inactive rows carry zero duals.
    for j in 0..model.num_col {
        let value = solution.col_value[j];
        let interior = value > model.col_lower[j] + tolerance
            && value < model.col_upper[j] - tolerance;
        if interior {
            assert!(solution.col_dual[j].abs() <= 1e-6, "column {j}");
        }
    }
    for i in 0..model.num_row {
        let activity = solution.row_value[i];
        let inactive = activity > model.row_lower[i] + 1e-6
            && activity < model.row_upper[i] - 1e-6;
        if inactive {
            assert!(solution.row_dual[i].abs() <= 1e-6, "row {i}");
        }
    }
}

/// Records the phase-2 objective reports emitted through the callback.
#[derive(Clone)]
struct ObjectiveRecorder {
    phase2: Rc<RefCell<Vec<E>>>,
}

impl Callback for ObjectiveRecorder {
    fn new(_options: &Options) -> Self {
        Self {
            phase2: Rc::new(RefCell::new(Vec::new())),
        }
    }

    fn call(&mut self, progress: &Progress) {
        if progress.phase == 2 {
            self.phase2.borrow_mut().push(progress.objective);
        }
    }
}

/// The dual objective of a minimization never degrades across phase-2
/// iterations (up to perturbation and tolerance).
#[test]
fn phase2_dual_objective_is_monotone() {
    let mut options = Options::default();
    options.output_flag = true;
    options.perturb_costs = false;
    let model = production_model();

    let mut recorder = ObjectiveRecorder::new(&options);
    let history = recorder.phase2.clone();
    let mut engine = DualSimplex::new(&model, &options);
    let solution = engine.solve(&mut IterationTerminator::new(100_000), &mut recorder);
    assert_eq!(solution.status, ModelStatus::Optimal);

    let history = history.borrow();
    for pair in history.windows(2) {
        assert!(
            pair[1] >= pair[0] - 1e-6,
            "dual objective degraded: {} -> {}",
            pair[0],
            pair[1]
        );
    }
}

/// The search keeps its global dual bound at or below the incumbent.
#[test]
fn search_bound_never_exceeds_incumbent() {
    let model = Model {
        num_col: 5,
        num_row: 2,
        col_cost: vec![3.0, 4.0, 5.0, 6.0, 7.0],
        col_lower: vec![0.0; 5],
        col_upper: vec![1.0; 5],
        row_lower: vec![2.0, -INFTY],
        row_upper: vec![INFTY, 3.0],
        a_start: vec![0, 2, 4, 6, 8, 10],
        a_index: vec![0, 1, 0, 1, 0, 1, 0, 1, 0, 1],
        a_value: vec![1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0],
        integrality: vec![Integrality::Integer; 5],
        ..Model::new()
    };
    let options = Options::default();
    let mut solver = MipSolver::new(&model, &options);
    let solution = solver.solve(
        &mut IterationTerminator::new(1_000_000),
        &mut NoOpCallback {},
    );
    assert_eq!(solution.status, ModelStatus::Optimal);
    // Minimization: dual bound <= incumbent objective.
    assert!(solution.dual_bound <= solution.objective + 1e-6);
    assert!((solution.objective - 7.0).abs() < 1e-6);
}

/// Warm starting from the optimal basis of an edited model converges in a
/// handful of pivots.
#[test]
fn reoptimization_after_bound_change_is_cheap() {
    let options = Options::default();
    let model = production_model();
    let mut engine = DualSimplex::new(&model, &options);
    let first = engine.solve(
        &mut IterationTerminator::new(100_000),
        &mut NoOpCallback {},
    );
    assert_eq!(first.status, ModelStatus::Optimal);

    // Tighten one row and re-solve from the old basis.
    let mut tightened = model.clone();
    tightened.row_upper[0] = 7.0;
    let mut warm = DualSimplex::new(&tightened, &options);
    warm.install_basis(first.basis.clone().unwrap());
    let second = warm.solve(
        &mut IterationTerminator::new(100_000),
        &mut NoOpCallback {},
    );
    assert_eq!(second.status, ModelStatus::Optimal);
    assert!(second.iterations <= 10, "took {} pivots", second.iterations);
    assert!(second.objective >= first.objective - 1e-9);
}
