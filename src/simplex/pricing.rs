//! Dual edge-weight strategies.
//!
//! The strategy is a tagged variant dispatched through a compile-time table;
//! nothing on the per-iteration path goes through a vtable. Steepest edge
//! tracks its own accuracy and the engine may demote it to Devex when the
//! updated weights drift too far from the exactly computed ones.

use enum_dispatch::enum_dispatch;

use crate::options::Options;
use crate::sparse::SparseVector;
use crate::{E, I};

/// Floor applied to dual steepest-edge weights.
const MIN_STEEPEST_EDGE_WEIGHT: E = 1e-4;

/// State handed to the weight update after a pivot.
pub struct WeightContext<'a> {
    /// Leaving row.
    pub row_out: I,
    /// Pivot value `alpha_col[row_out]`.
    pub pivot: E,
    /// Exact weight of the leaving row computed from the BTRAN result.
    pub computed_weight: E,
    /// FTRANned pivotal column.
    pub col_aq: &'a SparseVector,
    /// FTRAN of the BTRAN result, present only for steepest edge.
    pub col_dse: Option<&'a SparseVector>,
}

#[enum_dispatch]
pub trait PricingRule {
    /// Whether the engine must run the auxiliary FTRAN of the BTRANned row.
    fn needs_dse_ftran(&self) -> bool;

    /// Records the agreement between the updated and exactly computed weight
    /// of the chosen row.
    fn observe_weight(&mut self, updated: E, computed: E);

    /// Whether accumulated weight errors ask for a switch to Devex.
    fn wants_devex_switch(&self) -> bool;

    /// Whether the current framework should be rebuilt.
    fn wants_reset(&self) -> bool;

    /// Reinitializes the weights for a new framework.
    fn reset(&mut self, edge_weight: &mut [E]);

    /// Updates the row weights after a pivot.
    fn update_weights(&mut self, ctx: &WeightContext<'_>, edge_weight: &mut [E]);
}

/// Exact dual steepest edge via the Forrest–Goldfarb recurrence.
pub struct SteepestEdge {
    error_ratio: E,
    error_limit: I,
    error_count: I,
}

impl SteepestEdge {
    pub fn new(options: &Options) -> Self {
        Self {
            error_ratio: options.dse_weight_error_ratio,
            error_limit: options.dse_weight_error_limit,
            error_count: 0,
        }
    }
}

impl PricingRule for SteepestEdge {
    fn needs_dse_ftran(&self) -> bool {
        true
    }

    fn observe_weight(&mut self, updated: E, computed: E) {
        let ratio = updated / computed.max(MIN_STEEPEST_EDGE_WEIGHT);
        if ratio > self.error_ratio || ratio < 1.0 / self.error_ratio {
            self.error_count += 1;
        }
    }

    fn wants_devex_switch(&self) -> bool {
        self.error_count > self.error_limit
    }

    fn wants_reset(&self) -> bool {
        false
    }

    fn reset(&mut self, edge_weight: &mut [E]) {
        edge_weight.iter_mut().for_each(|w| *w = 1.0);
        self.error_count = 0;
    }

    fn update_weights(&mut self, ctx: &WeightContext<'_>, edge_weight: &mut [E]) {
        let col_dse = ctx
            .col_dse
            .expect("steepest edge update requires the DSE FTRAN");
        let pivot = ctx.pivot;
        let weight = ctx.computed_weight;
        ctx.col_aq.for_each_nonzero(|i, alpha| {
            if i != ctx.row_out {
                let ratio = alpha / pivot;
                let updated =
                    edge_weight[i] - ratio * (2.0 * col_dse.array[i] - ratio * weight);
                edge_weight[i] = updated.max(MIN_STEEPEST_EDGE_WEIGHT);
            }
        });
        edge_weight[ctx.row_out] = (weight / (pivot * pivot)).max(MIN_STEEPEST_EDGE_WEIGHT);
    }
}

/// Devex pricing over a reference framework.
pub struct Devex {
    reset_ratio: E,
    max_weight: E,
    pub num_iterations: I,
}

impl Devex {
    pub fn new(options: &Options) -> Self {
        Self {
            reset_ratio: options.devex_reset_ratio,
            max_weight: 1.0,
            num_iterations: 0,
        }
    }
}

impl PricingRule for Devex {
    fn needs_dse_ftran(&self) -> bool {
        false
    }

    fn observe_weight(&mut self, _updated: E, _computed: E) {}

    fn wants_devex_switch(&self) -> bool {
        false
    }

    fn wants_reset(&self) -> bool {
        self.max_weight > self.reset_ratio
    }

    fn reset(&mut self, edge_weight: &mut [E]) {
        edge_weight.iter_mut().for_each(|w| *w = 1.0);
        self.max_weight = 1.0;
        self.num_iterations = 0;
    }

    fn update_weights(&mut self, ctx: &WeightContext<'_>, edge_weight: &mut [E]) {
        let pivot = ctx.pivot;
        let reference_weight = edge_weight[ctx.row_out];
        let mut max_weight = self.max_weight;
        ctx.col_aq.for_each_nonzero(|i, alpha| {
            if i != ctx.row_out {
                let ratio = alpha / pivot;
                let candidate = ratio * ratio * reference_weight;
                if candidate > edge_weight[i] {
                    edge_weight[i] = candidate;
                }
                max_weight = max_weight.max(edge_weight[i]);
            }
        });
        edge_weight[ctx.row_out] = (reference_weight / (pivot * pivot)).max(1.0);
        max_weight = max_weight.max(edge_weight[ctx.row_out]);
        self.max_weight = max_weight;
        self.num_iterations += 1;
    }
}

/// Unit weights.
pub struct Dantzig {}

impl Dantzig {
    pub fn new() -> Self {
        Self {}
    }
}

impl PricingRule for Dantzig {
    fn needs_dse_ftran(&self) -> bool {
        false
    }

    fn observe_weight(&mut self, _updated: E, _computed: E) {}

    fn wants_devex_switch(&self) -> bool {
        false
    }

    fn wants_reset(&self) -> bool {
        false
    }

    fn reset(&mut self, edge_weight: &mut [E]) {
        edge_weight.iter_mut().for_each(|w| *w = 1.0);
    }

    fn update_weights(&mut self, _ctx: &WeightContext<'_>, _edge_weight: &mut [E]) {}
}

/// The pricing table resolved once per solve.
#[enum_dispatch(PricingRule)]
pub enum Pricing {
    SteepestEdge(SteepestEdge),
    Devex(Devex),
    Dantzig(Dantzig),
}

impl Pricing {
    pub fn from_options(options: &Options) -> Self {
        match options.edge_weight_strategy {
            crate::options::EdgeWeightStrategy::SteepestEdge => {
                Pricing::SteepestEdge(SteepestEdge::new(options))
            }
            crate::options::EdgeWeightStrategy::Devex => Pricing::Devex(Devex::new(options)),
            crate::options::EdgeWeightStrategy::Dantzig => Pricing::Dantzig(Dantzig::new()),
        }
    }
}
