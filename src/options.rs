//! Solver options.
//!
//! All tolerances, limits and strategy choices live in a single [`Options`]
//! value owned by the [`crate::Optimizer`] facade and passed by reference to
//! every engine component. There is no global registry; a component sees
//! exactly the options it is given.

use serde::{Deserialize, Serialize};

use crate::{E, I, INFTY};

/// Simplex algorithm variant to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SimplexStrategy {
    /// Serial dual simplex.
    #[default]
    DualPlain,
    /// Dual simplex with slice-parallel PRICE/CHUZC.
    DualSip,
    /// Dual simplex with parallel multi-pivot major/minor iterations.
    DualPami,
}

/// Dual edge-weight (pricing) strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EdgeWeightStrategy {
    /// Dual steepest edge, with an accuracy-triggered switch to Devex.
    #[default]
    SteepestEdge,
    /// Devex pricing with a reference framework.
    Devex,
    /// Unit weights.
    Dantzig,
}

/// Rule for choosing which child of a branching is explored first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChildSelectionRule {
    /// Always the up child.
    Up,
    /// Always the down child.
    Down,
    /// Follow the root relaxation solution.
    #[default]
    RootSol,
    /// Follow the objective coefficient sign.
    Obj,
    /// Random choice.
    Random,
    /// The child with the better pseudocost estimate.
    BestCost,
    /// The child with the worse pseudocost estimate.
    WorstCost,
}

/// Options controlling validation, the simplex and QP engines, and the MIP
/// search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Options {
    /// Primal feasibility tolerance.
    pub primal_feasibility_tolerance: E,
    /// Dual feasibility tolerance.
    pub dual_feasibility_tolerance: E,
    /// Absolute pivot tolerance for ratio tests and factorization.
    pub pivot_tolerance: E,
    /// Relative row/column pivot agreement tolerance; a mismatch above this
    /// marks the basis for a rebuild.
    pub pivot_verify_tolerance: E,
    /// Matrix entries below this magnitude are dropped with a warning.
    pub small_matrix_value: E,
    /// Matrix entries above this magnitude are rejected.
    pub large_matrix_value: E,
    /// Whether infinite objective coefficients are accepted.
    pub allow_infinite_costs: bool,

    /// Objective sense-independent upper cutoff for the dual objective; the
    /// solve stops with `ObjectiveBound` once it is proven unreachable.
    pub objective_bound: E,
    /// Early-stop target for the primal objective.
    pub objective_target: E,
    /// Wall-clock limit in seconds.
    pub time_limit: E,
    /// Simplex iteration limit.
    pub simplex_iteration_limit: I,
    /// Basis updates between refactorizations.
    pub refactor_interval: I,
    /// Whether phase-2 costs may be perturbed to fight stalling.
    pub perturb_costs: bool,
    /// Simplex variant.
    pub simplex_strategy: SimplexStrategy,
    /// Pricing strategy.
    pub edge_weight_strategy: EdgeWeightStrategy,
    /// Devex framework is reset when the maximum weight exceeds this multiple
    /// of the initial weight.
    pub devex_reset_ratio: E,
    /// A steepest-edge weight whose updated/computed ratio leaves
    /// `[1/r, r]` counts as an error; too many errors start a Devex
    /// framework.
    pub dse_weight_error_ratio: E,
    /// Number of tolerated steepest-edge weight errors before switching to
    /// Devex.
    pub dse_weight_error_limit: I,

    /// Thread budget for SIP/PAMI. Zero means use all available cores.
    pub threads: I,
    /// Upper limit on the number of column slices used by SIP.
    pub slice_limit: I,
    /// Candidate rows per PAMI major iteration. Zero means derive from
    /// `threads`.
    pub pami_candidates: I,

    /// Integrality tolerance for the MIP search.
    pub mip_feasibility_tolerance: E,
    /// Node limit for the MIP search.
    pub mip_node_limit: I,
    /// Pseudocost observations per direction before a candidate counts as
    /// reliable.
    pub mip_min_reliable: I,
    /// Dual simplex iterations granted to each strong-branching probe.
    pub mip_strong_branching_iterations: I,
    /// Which child of a branching is explored first.
    pub mip_child_selection: ChildSelectionRule,
    /// Minimum efficacy (violation over coefficient norm) for a cut to enter
    /// the pool.
    pub mip_min_cut_efficacy: E,
    /// Cuts surviving this many rounds without being active are evicted.
    pub mip_cut_age_limit: I,
    /// Whether RINS/RENS dives are attempted.
    pub mip_heuristics: bool,
    /// Relative optimality gap at which the search stops.
    pub mip_rel_gap: E,
    /// Absolute optimality gap at which the search stops.
    pub mip_abs_gap: E,

    /// Interior-point iteration limit for the QP path.
    pub qp_iteration_limit: I,
    /// Interior-point convergence tolerance.
    pub qp_tolerance: E,

    /// Seed for all randomized decisions (perturbation, tie-breaks, c-MIR
    /// deltas, child selection).
    pub random_seed: u64,
    /// Whether iteration reports are emitted through the callback.
    pub output_flag: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            primal_feasibility_tolerance: 1e-7,
            dual_feasibility_tolerance: 1e-7,
            pivot_tolerance: 1e-9,
            pivot_verify_tolerance: 1e-7,
            small_matrix_value: 1e-9,
            large_matrix_value: 1e15,
            allow_infinite_costs: false,

            objective_bound: INFTY,
            objective_target: -INFTY,
            time_limit: INFTY,
            simplex_iteration_limit: 10_000_000,
            refactor_interval: 100,
            perturb_costs: true,
            simplex_strategy: SimplexStrategy::DualPlain,
            edge_weight_strategy: EdgeWeightStrategy::SteepestEdge,
            devex_reset_ratio: 1e3,
            dse_weight_error_ratio: 4.0,
            dse_weight_error_limit: 25,

            threads: 0,
            slice_limit: 8,
            pami_candidates: 0,

            mip_feasibility_tolerance: 1e-6,
            mip_node_limit: 1_000_000,
            mip_min_reliable: 8,
            mip_strong_branching_iterations: 50,
            mip_child_selection: ChildSelectionRule::default(),
            mip_min_cut_efficacy: 1e-4,
            mip_cut_age_limit: 30,
            mip_heuristics: true,
            mip_rel_gap: 1e-6,
            mip_abs_gap: 1e-9,

            qp_iteration_limit: 100,
            qp_tolerance: 1e-8,

            random_seed: 0,
            output_flag: false,
        }
    }
}

impl Options {
    /// Creates the default option set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the wall-clock limit in seconds.
    #[must_use]
    pub fn with_time_limit(mut self, seconds: E) -> Self {
        self.time_limit = seconds;
        self
    }

    /// Sets the simplex variant.
    #[must_use]
    pub fn with_simplex_strategy(mut self, strategy: SimplexStrategy) -> Self {
        self.simplex_strategy = strategy;
        self
    }

    /// Resolved thread budget.
    pub fn resolved_threads(&self) -> I {
        if self.threads == 0 {
            num_cpus::get()
        } else {
            self.threads
        }
    }
}
