//! Branch-and-bound search: depth-first dives with periodic backtracks to a
//! best-bound node queue.

use rand::Rng;
use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::callback::{Callback, Progress};
use crate::mip::domain::{Clique, Domain, Propagator, Reason, TightenResult};
use crate::mip::nodequeue::{NodeQueue, OpenNode};
use crate::mip::pseudocost::Pseudocost;
use crate::mip::redcost::RedcostFixing;
use crate::mip::{MipSolver, VarType};
use crate::model::Model;
use crate::options::{ChildSelectionRule, Options};
use crate::simplex::{Basis, DualSimplex, LpSolution};
use crate::sparse::SparseMatrix;
use crate::terminators::{IterationTerminator, Terminator};
use crate::{E, I, INFTY, ModelStatus};

/// A subproblem on the active dive.
struct Frame {
    /// Domain stack mark taken at frame entry; restored on exit.
    mark: usize,
    lower_bound: E,
    estimate: E,
    /// Branching decision taken at this node, once evaluated.
    branch: Option<Branch>,
    open_subtrees: u8,
    lp_solved: bool,
    /// Basis after this node's relaxation, warm start for the children.
    basis: Option<Basis>,
    /// How this frame was created: (column, went up, fraction, parent bound).
    created_by: Option<(I, bool, E, E)>,
    depth: I,
}

#[derive(Clone, Copy)]
struct Branch {
    col: I,
    /// Fractional LP value the branch splits on.
    point: E,
    /// Direction explored first.
    first_up: bool,
}

/// Result of the search, in internal minimization units.
pub struct SearchResult {
    pub status: ModelStatus,
    pub incumbent: Option<Vec<E>>,
    pub incumbent_objective: E,
    pub dual_bound: E,
    pub nodes: I,
    pub lp_iterations: I,
}

pub struct Search<'a> {
    model: &'a Model,
    options: &'a Options,
    /// Per-node LP options; the objective bound tracks the cutoff.
    node_options: Options,
    matrix: SparseMatrix,
    var_type: Vec<VarType>,
    cliques: Vec<Clique>,
    pub domain: Domain,
    pseudocost: Pseudocost,
    queue: NodeQueue,
    stack: Vec<Frame>,
    redcost: RedcostFixing,
    rng: SmallRng,

    root_solution: Vec<E>,
    root_reduced_cost: Vec<E>,
    root_objective: E,
    root_basis: Option<Basis>,

    incumbent: Option<Vec<E>>,
    /// Internal minimization units.
    cutoff: E,
    lurking_pending: bool,
    rins_pending: bool,
    nodes: I,
    lp_iterations: I,
    backtracks_since_flush: I,
    in_heuristic: bool,
    /// No-good rows learned from pruned-infeasible dives, handed back to
    /// the cut pool.
    conflicts: Vec<crate::mip::cuts::Cut>,
}

impl<'a> Search<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model: &'a Model,
        options: &'a Options,
        var_type: Vec<VarType>,
        root: &LpSolution,
        in_heuristic: bool,
    ) -> Self {
        let matrix = SparseMatrix::from_csc(
            model.num_row,
            model.num_col,
            model.a_start.clone(),
            model.a_index.clone(),
            model.a_value.clone(),
        );
        let lower: Vec<E> = model.col_lower.iter().map(|&b| Model::normalize_bound(b)).collect();
        let upper: Vec<E> = model.col_upper.iter().map(|&b| Model::normalize_bound(b)).collect();
        let domain = Domain::new(
            lower,
            upper,
            var_type.clone(),
            options.mip_feasibility_tolerance,
        );
        let cliques = Propagator::detect_cliques(&matrix, &model.row_upper, &domain);

        let sign = model.sense.sign();
        let root_objective = sign * (root.objective - model.offset);
        let root_reduced_cost: Vec<E> = root.col_dual.iter().map(|&d| sign * d).collect();

        let mut node_options = options.clone();
        node_options.perturb_costs = false;

        Self {
            model,
            options,
            node_options,
            matrix,
            var_type,
            cliques,
            domain,
            pseudocost: Pseudocost::new(model.num_col, options.mip_min_reliable),
            queue: NodeQueue::new(),
            stack: Vec::new(),
            redcost: RedcostFixing::new(),
            rng: SmallRng::seed_from_u64(options.random_seed ^ 0x5deece66d),
            root_solution: root.col_value.clone(),
            root_reduced_cost,
            root_objective,
            root_basis: root.basis.clone(),
            incumbent: None,
            cutoff: INFTY,
            lurking_pending: false,
            rins_pending: false,
            nodes: 0,
            lp_iterations: 0,
            backtracks_since_flush: 0,
            in_heuristic,
            conflicts: Vec::new(),
        }
    }

    /// Conflicts learned during the search, for the owning cut pool.
    pub fn take_conflicts(&mut self) -> Vec<crate::mip::cuts::Cut> {
        std::mem::take(&mut self.conflicts)
    }

    fn internal_to_original(&self, value: E) -> E {
        self.model.sense.sign() * value + self.model.offset
    }

    /// Drives the search to completion or a limit.
    pub fn run(
        &mut self,
        terminator: &mut dyn Terminator,
        callback: &mut dyn Callback,
    ) -> SearchResult {
        // The root frame reuses the already-solved root relaxation bound.
        self.stack.push(Frame {
            mark: self.domain.mark(),
            lower_bound: self.root_objective,
            estimate: self.root_objective,
            branch: None,
            open_subtrees: 0,
            lp_solved: false,
            basis: self.root_basis.clone(),
            created_by: None,
            depth: 0,
        });

        // RENS from the root relaxation before diving.
        if self.options.mip_heuristics && !self.in_heuristic {
            self.rens_dive(terminator);
        }

        let mut status = ModelStatus::Unknown;
        loop {
            if let Some(limit) = terminator.terminate(self.lp_iterations) {
                status = limit;
                break;
            }
            if self.nodes >= self.options.mip_node_limit {
                status = ModelStatus::IterationLimit;
                break;
            }
            if self.gap_closed() {
                status = ModelStatus::Optimal;
                break;
            }
            if self.rins_pending && self.options.mip_heuristics && !self.in_heuristic {
                self.rins_pending = false;
                let root_solution = self.root_solution.clone();
                self.rins_dive(&root_solution, terminator);
            }

            let Some(frame_index) = self.stack.len().checked_sub(1) else {
                // Dive exhausted: pull the best open node.
                self.apply_pending_lurking();
                match self.queue.pop() {
                    Some(node) => {
                        if node.lower_bound >= self.cutoff {
                            continue;
                        }
                        self.install_node(node);
                        continue;
                    }
                    None => {
                        status = if self.incumbent.is_some() {
                            ModelStatus::Optimal
                        } else {
                            ModelStatus::Infeasible
                        };
                        break;
                    }
                }
            };

            if !self.stack[frame_index].lp_solved {
                match self.evaluate_node(frame_index, terminator, callback) {
                    Ok(()) => {}
                    Err(limit) => {
                        status = limit;
                        break;
                    }
                }
                continue;
            }

            let open = self.stack[frame_index].open_subtrees;
            if open == 1 {
                self.descend_second_child(frame_index);
            } else {
                self.close_frame();
            }
        }

        let dual_bound = self.global_dual_bound();
        SearchResult {
            status,
            incumbent: self.incumbent.clone(),
            incumbent_objective: self.cutoff,
            dual_bound,
            nodes: self.nodes,
            lp_iterations: self.lp_iterations,
        }
    }

    fn gap_closed(&self) -> bool {
        if self.incumbent.is_none() {
            return false;
        }
        let bound = self.global_dual_bound();
        let gap = self.cutoff - bound;
        gap <= self.options.mip_abs_gap
            || gap <= self.options.mip_rel_gap * self.cutoff.abs().max(1.0)
    }

    /// Best dual bound over the active dive and the parked nodes.
    fn global_dual_bound(&self) -> E {
        let mut bound = match self.incumbent {
            Some(_) => self.cutoff,
            None => INFTY,
        };
        if let Some(queued) = self.queue.best_bound() {
            bound = bound.min(queued);
        }
        for frame in &self.stack {
            bound = bound.min(frame.lower_bound);
        }
        bound
    }

    // ----- node lifecycle -------------------------------------------------

    fn evaluate_node(
        &mut self,
        frame_index: usize,
        terminator: &mut dyn Terminator,
        callback: &mut dyn Callback,
    ) -> Result<(), ModelStatus> {
        self.stack[frame_index].lp_solved = true;
        self.nodes += 1;

        // Propagate the local domain before paying for an LP.
        let propagator = Propagator::new(
            &self.matrix,
            &self.model.row_lower,
            &self.model.row_upper,
            &self.cliques,
        );
        if !propagator.propagate(&mut self.domain) {
            self.learn_conflict();
            self.stack[frame_index].open_subtrees = 0;
            return Ok(());
        }

        let warm_basis = self.stack[frame_index].basis.clone();
        let solution = self.solve_relaxation(&warm_basis, self.options.simplex_iteration_limit);
        self.lp_iterations += solution.iterations;

        // Cancellation point after every relaxation solve.
        if let Some(limit) = terminator.terminate(self.lp_iterations) {
            return Err(limit);
        }

        match solution.status {
            ModelStatus::Infeasible | ModelStatus::UnboundedOrInfeasible => {
                self.learn_conflict();
                self.stack[frame_index].open_subtrees = 0;
                return Ok(());
            }
            ModelStatus::ObjectiveBound => {
                // Pruned by the cutoff.
                self.stack[frame_index].open_subtrees = 0;
                return Ok(());
            }
            ModelStatus::Optimal => {}
            limit_status @ (ModelStatus::TimeLimit
            | ModelStatus::IterationLimit
            | ModelStatus::Interrupted) => return Err(limit_status),
            _ => return Err(ModelStatus::SolveError),
        }

        let sign = self.model.sense.sign();
        let objective = sign * (solution.objective - self.model.offset);
        let parent_bound = self.stack[frame_index].lower_bound;
        let lower_bound = objective.max(parent_bound);
        self.stack[frame_index].lower_bound = lower_bound;
        self.stack[frame_index].basis = solution.basis.clone();

        // Pseudocost learning from the branch that created this node.
        if let Some((col, up, fraction, bound_before)) = self.stack[frame_index].created_by {
            let unit = if up { 1.0 - fraction } else { fraction };
            if unit > 1e-9 {
                self.pseudocost
                    .observe(col, up, (objective - bound_before).max(0.0) / unit);
            }
        }

        if lower_bound >= self.cutoff {
            self.stack[frame_index].open_subtrees = 0;
            return Ok(());
        }

        // Local reduced-cost fixing against the current cutoff.
        if self.incumbent.is_some() {
            let reduced: Vec<E> = solution.col_dual.iter().map(|&d| sign * d).collect();
            RedcostFixing::propagate_redcost(objective, &reduced, &mut self.domain, self.cutoff);
            if self.domain.in_conflict() {
                self.stack[frame_index].open_subtrees = 0;
                return Ok(());
            }
        }

        if self.is_integral(&solution.col_value) {
            self.update_incumbent(&solution.col_value, objective, callback);
            self.stack[frame_index].open_subtrees = 0;
            return Ok(());
        }

        // Branch.
        match self.select_branching(&solution, terminator) {
            Selection::Tightened => {
                // Strong branching proved a bound; re-solve this node.
                self.stack[frame_index].lp_solved = false;
                Ok(())
            }
            Selection::NoCandidate => {
                // Fractionality within tolerance after all: accept.
                self.update_incumbent(&solution.col_value, objective, callback);
                self.stack[frame_index].open_subtrees = 0;
                Ok(())
            }
            Selection::Branch(col, fraction) => {
                let point = solution.col_value[col];
                let first_up = self.pick_first_child(col, point, fraction);
                self.stack[frame_index].branch = Some(Branch {
                    col,
                    point,
                    first_up,
                });
                self.stack[frame_index].open_subtrees = 2;
                self.descend_child(frame_index, first_up);
                Ok(())
            }
        }
    }

    fn descend_child(&mut self, frame_index: usize, up: bool) {
        let branch = self.stack[frame_index].branch.unwrap();
        let parent_bound = self.stack[frame_index].lower_bound;
        let parent_basis = self.stack[frame_index].basis.clone();
        let depth = self.stack[frame_index].depth + 1;
        self.stack[frame_index].open_subtrees -= 1;

        let mark = self.domain.mark();
        let result = if up {
            self.domain
                .tighten_lower(branch.col, branch.point.ceil(), Reason::Branching)
        } else {
            self.domain
                .tighten_upper(branch.col, branch.point.floor(), Reason::Branching)
        };

        let fraction = branch.point - branch.point.floor();
        let estimate = parent_bound + self.pseudocost.estimate(branch.col, fraction, up);
        let mut frame = Frame {
            mark,
            lower_bound: parent_bound,
            estimate,
            branch: None,
            open_subtrees: 0,
            lp_solved: false,
            basis: parent_basis,
            created_by: Some((branch.col, up, fraction, parent_bound)),
            depth,
        };
        if result == TightenResult::Conflict {
            // Child is immediately infeasible.
            frame.lp_solved = true;
        }
        self.stack.push(frame);
    }

    fn descend_second_child(&mut self, frame_index: usize) {
        let branch = self.stack[frame_index].branch.unwrap();
        self.descend_child(frame_index, !branch.first_up);
    }

    fn close_frame(&mut self) {
        let frame = self.stack.pop().unwrap();
        self.domain.backtrack_to(frame.mark);
        if frame.branch.is_some() {
            self.backtracks_since_flush += 1;
        }
        // Periodic backtrack: park the remaining open subtrees and restart
        // from the best open node.
        if self.backtracks_since_flush >= 4 && !self.stack.is_empty() {
            self.backtracks_since_flush = 0;
            self.flush_open_to_queue();
        }
    }

    /// Unwinds the dive, parking every pending second child in the queue.
    fn flush_open_to_queue(&mut self) {
        while let Some(frame) = self.stack.pop() {
            if frame.open_subtrees == 1 {
                let branch = frame.branch.unwrap();
                let up = !branch.first_up;
                let mut col_lower = self.domain.lower.clone();
                let mut col_upper = self.domain.upper.clone();
                if up {
                    col_lower[branch.col] = branch.point.ceil();
                } else {
                    col_upper[branch.col] = branch.point.floor();
                }
                if col_lower[branch.col] <= col_upper[branch.col] {
                    self.queue.push(OpenNode {
                        lower_bound: frame.lower_bound,
                        estimate: frame.estimate,
                        col_lower,
                        col_upper,
                        basis: frame.basis.clone(),
                        depth: frame.depth + 1,
                    });
                }
            }
            self.domain.backtrack_to(frame.mark);
        }
    }

    /// Reconstitutes a parked node as the new dive root.
    fn install_node(&mut self, node: OpenNode) {
        debug_assert!(self.stack.is_empty());
        let mark = self.domain.mark();
        for col in 0..self.domain.num_col() {
            if node.col_lower[col] > self.domain.lower[col] {
                let _ = self
                    .domain
                    .tighten_lower(col, node.col_lower[col], Reason::Branching);
            }
            if node.col_upper[col] < self.domain.upper[col] {
                let _ = self
                    .domain
                    .tighten_upper(col, node.col_upper[col], Reason::Branching);
            }
        }
        self.stack.push(Frame {
            mark,
            lower_bound: node.lower_bound,
            estimate: node.estimate,
            branch: None,
            open_subtrees: 0,
            lp_solved: false,
            basis: node.basis,
            created_by: None,
            depth: node.depth,
        });
    }

    // ----- relaxations ----------------------------------------------------

    fn solve_relaxation(&mut self, basis: &Option<Basis>, iteration_limit: I) -> LpSolution {
        let mut options = self.node_options.clone();
        options.objective_bound = if self.incumbent.is_some() {
            self.internal_to_original(self.cutoff)
        } else {
            INFTY
        };
        options.simplex_iteration_limit = iteration_limit;

        let mut engine = DualSimplex::new_with_bounds(
            self.model,
            &self.domain.lower,
            &self.domain.upper,
            &options,
        );
        if let Some(basis) = basis {
            engine.install_basis(basis.clone());
        }
        let mut node_terminator = IterationTerminator::new(iteration_limit);
        let mut silent = crate::callback::NoOpCallback {};
        engine.solve(&mut node_terminator, &mut silent)
    }

    fn is_integral(&self, col_value: &[E]) -> bool {
        let tolerance = self.options.mip_feasibility_tolerance;
        (0..self.model.num_col).all(|j| {
            self.var_type[j] == VarType::Continuous
                || (col_value[j] - col_value[j].round()).abs() <= tolerance
        })
    }

    fn update_incumbent(&mut self, col_value: &[E], objective: E, callback: &mut dyn Callback) {
        if objective >= self.cutoff {
            return;
        }
        let mut rounded = col_value.to_vec();
        for j in 0..self.model.num_col {
            if self.var_type[j] != VarType::Continuous {
                rounded[j] = rounded[j].round();
            }
        }
        self.incumbent = Some(rounded);
        self.cutoff = objective;
        self.queue.prune(self.cutoff);
        self.lurking_pending = true;
        self.rins_pending = true;

        if self.options.output_flag {
            callback.call(&Progress {
                iterations: self.lp_iterations,
                nodes: self.nodes,
                incumbent: Some(self.internal_to_original(self.cutoff)),
                dual_bound: Some(self.internal_to_original(self.global_dual_bound())),
                ..Progress::default()
            });
        }
    }

    /// Root reduced-cost fixing and lurking-bound activation: valid at the
    /// root domain only, so it waits for the dive to unwind.
    fn apply_pending_lurking(&mut self) {
        if !self.lurking_pending || self.incumbent.is_none() {
            return;
        }
        self.lurking_pending = false;
        self.redcost.add_root_redcost(
            self.root_objective,
            &self.root_reduced_cost,
            &self.var_type,
            &mut self.domain,
            self.cutoff,
        );
        let _ = self.redcost.apply_lurking(self.cutoff, &mut self.domain);
    }

    // ----- branching ------------------------------------------------------

    fn select_branching(
        &mut self,
        solution: &LpSolution,
        terminator: &mut dyn Terminator,
    ) -> Selection {
        let tolerance = self.options.mip_feasibility_tolerance;
        let mut candidates: Vec<(I, E)> = (0..self.model.num_col)
            .filter_map(|j| {
                if self.var_type[j] == VarType::Continuous {
                    return None;
                }
                let value = solution.col_value[j];
                let fraction = value - value.floor();
                if fraction > tolerance && fraction < 1.0 - tolerance {
                    Some((j, fraction))
                } else {
                    None
                }
            })
            .collect();
        if candidates.is_empty() {
            return Selection::NoCandidate;
        }

        // Strong branching for unreliable candidates, best scores first.
        candidates.sort_by(|&(a, fa), &(b, fb)| {
            self.pseudocost
                .score(b, fb)
                .partial_cmp(&self.pseudocost.score(a, fa))
                .unwrap()
        });
        let mut evaluated = 0;
        for &(col, fraction) in candidates.iter() {
            if evaluated >= 4 || self.pseudocost.is_reliable(col) {
                continue;
            }
            if terminator.terminate(self.lp_iterations).is_some() {
                break;
            }
            evaluated += 1;
            if self.strong_branch(col, fraction, solution) == StrongBranchOutcome::Tightened {
                return Selection::Tightened;
            }
        }

        let (col, fraction) = candidates
            .into_iter()
            .max_by(|&(a, fa), &(b, fb)| {
                self.pseudocost
                    .score(a, fa)
                    .partial_cmp(&self.pseudocost.score(b, fb))
                    .unwrap()
            })
            .unwrap();
        Selection::Branch(col, fraction)
    }

    /// Probes both children of a candidate with a few dual simplex
    /// iterations each, feeding the observed gains into the pseudocosts.
    fn strong_branch(
        &mut self,
        col: I,
        fraction: E,
        solution: &LpSolution,
    ) -> StrongBranchOutcome {
        let value = solution.col_value[col];
        let sign = self.model.sense.sign();
        let parent_objective = sign * (solution.objective - self.model.offset);
        let probe_iterations = self.options.mip_strong_branching_iterations;
        let mut outcome = StrongBranchOutcome::Probed;

        for up in [false, true] {
            let mark = self.domain.mark();
            let result = if up {
                self.domain.tighten_lower(col, value.ceil(), Reason::Branching)
            } else {
                self.domain.tighten_upper(col, value.floor(), Reason::Branching)
            };
            let unit = if up { 1.0 - fraction } else { fraction };
            if result == TightenResult::Conflict {
                self.domain.backtrack_to(mark);
                // The probe side is infeasible: the other side is forced.
                let forced = if up {
                    self.domain.tighten_upper(col, value.floor(), Reason::Redcost)
                } else {
                    self.domain.tighten_lower(col, value.ceil(), Reason::Redcost)
                };
                if forced == TightenResult::Tightened {
                    outcome = StrongBranchOutcome::Tightened;
                }
                continue;
            }

            let probe = self.solve_relaxation(&solution.basis.clone(), probe_iterations);
            self.lp_iterations += probe.iterations;
            self.domain.backtrack_to(mark);

            match probe.status {
                ModelStatus::Infeasible | ModelStatus::ObjectiveBound => {
                    let forced = if up {
                        self.domain.tighten_upper(col, value.floor(), Reason::Redcost)
                    } else {
                        self.domain.tighten_lower(col, value.ceil(), Reason::Redcost)
                    };
                    if forced == TightenResult::Tightened {
                        outcome = StrongBranchOutcome::Tightened;
                    }
                }
                ModelStatus::Optimal | ModelStatus::IterationLimit => {
                    let objective = sign * (probe.objective - self.model.offset);
                    if unit > 1e-9 {
                        self.pseudocost
                            .observe(col, up, (objective - parent_objective).max(0.0) / unit);
                    }
                }
                _ => {}
            }
        }
        outcome
    }

    fn pick_first_child(&mut self, col: I, point: E, fraction: E) -> bool {
        match self.options.mip_child_selection {
            ChildSelectionRule::Up => true,
            ChildSelectionRule::Down => false,
            ChildSelectionRule::RootSol => self.root_solution[col] >= point,
            ChildSelectionRule::Obj => {
                self.model.sense.sign() * self.model.col_cost[col] <= 0.0
            }
            ChildSelectionRule::Random => self.rng.random_range(0..2) == 1,
            ChildSelectionRule::BestCost => {
                self.pseudocost.estimate(col, fraction, true)
                    <= self.pseudocost.estimate(col, fraction, false)
            }
            ChildSelectionRule::WorstCost => {
                self.pseudocost.estimate(col, fraction, true)
                    > self.pseudocost.estimate(col, fraction, false)
            }
        }
    }

    // ----- conflicts and heuristics --------------------------------------

    /// A pruned-infeasible node over a chain of binary branchings yields the
    /// classic no-good on that chain.
    fn learn_conflict(&mut self) {
        let mut ones = Vec::new();
        let mut zeros = Vec::new();
        for frame in &self.stack {
            let Some((col, up, _, _)) = frame.created_by else {
                continue;
            };
            if !self.domain.is_binary(col) {
                return;
            }
            if up {
                ones.push(col);
            } else {
                zeros.push(col);
            }
        }
        if ones.len() + zeros.len() < 2 {
            return;
        }
        let mut index = Vec::with_capacity(ones.len() + zeros.len());
        let mut value = Vec::with_capacity(index.capacity());
        for &col in &ones {
            index.push(col);
            value.push(1.0);
        }
        for &col in &zeros {
            index.push(col);
            value.push(-1.0);
        }
        self.conflicts.push(crate::mip::cuts::Cut {
            index,
            value,
            rhs: ones.len() as E - 1.0,
            integral_coefficients: true,
            efficacy: 0.0,
            age: 0,
        });
    }

    /// RENS: fix every integer variable already integral in the root
    /// relaxation and solve the reduced MIP with tight limits.
    fn rens_dive(&mut self, terminator: &mut dyn Terminator) {
        let tolerance = self.options.mip_feasibility_tolerance;
        let root_solution = self.root_solution.clone();
        let fix: Vec<(I, E)> = (0..self.model.num_col)
            .filter_map(|j| {
                if self.var_type[j] == VarType::Continuous {
                    return None;
                }
                let value = root_solution[j];
                let rounded = value.round();
                if (value - rounded).abs() <= tolerance {
                    Some((j, rounded))
                } else {
                    None
                }
            })
            .collect();
        // A neighborhood that fixes nothing or everything is not worth a
        // sub-MIP.
        if fix.len() < 2 || fix.len() == self.model.num_col {
            return;
        }
        self.sub_mip(&fix, terminator);
    }

    /// RINS: fix the integer variables where the relaxation and the
    /// incumbent agree.
    pub fn rins_dive(&mut self, relax_solution: &[E], terminator: &mut dyn Terminator) {
        let Some(incumbent) = self.incumbent.clone() else {
            return;
        };
        let tolerance = self.options.mip_feasibility_tolerance;
        let fix: Vec<(I, E)> = (0..self.model.num_col)
            .filter_map(|j| {
                if self.var_type[j] == VarType::Continuous {
                    return None;
                }
                if (relax_solution[j] - incumbent[j]).abs() <= tolerance {
                    Some((j, incumbent[j]))
                } else {
                    None
                }
            })
            .collect();
        if fix.len() < 2 || fix.len() == self.model.num_col {
            return;
        }
        self.sub_mip(&fix, terminator);
    }

    /// Bounded nested search over a fixing neighborhood.
    fn sub_mip(&mut self, fix: &[(I, E)], terminator: &mut dyn Terminator) {
        let mut reduced = self.model.clone();
        // The relaxation this search runs on has its integrality marks
        // stripped; the sub-MIP needs them back.
        reduced.integrality = self
            .var_type
            .iter()
            .map(|&t| match t {
                VarType::Continuous => crate::model::Integrality::Continuous,
                _ => crate::model::Integrality::Integer,
            })
            .collect();
        for &(col, value) in fix {
            reduced.col_lower[col] = value;
            reduced.col_upper[col] = value;
        }
        let mut sub_options = self.options.clone();
        sub_options.mip_heuristics = false;
        sub_options.mip_node_limit = 50;
        sub_options.output_flag = false;

        if terminator.terminate(self.lp_iterations).is_some() {
            return;
        }
        let mut solver = MipSolver::new(&reduced, &sub_options);
        let mut silent = crate::callback::NoOpCallback {};
        let mut sub_terminator = IterationTerminator::new(100_000);
        let solution = solver.solve(&mut sub_terminator, &mut silent);

        if solution.status == ModelStatus::Optimal || solution.incumbent_found {
            let sign = self.model.sense.sign();
            let objective = sign * (solution.objective - self.model.offset);
            if objective < self.cutoff && !solution.col_value.is_empty() {
                self.incumbent = Some(solution.col_value.clone());
                self.cutoff = objective;
                self.queue.prune(self.cutoff);
                self.lurking_pending = true;
            }
        }
    }
}

enum Selection {
    Branch(I, E),
    Tightened,
    NoCandidate,
}

#[derive(PartialEq)]
enum StrongBranchOutcome {
    Probed,
    Tightened,
}
