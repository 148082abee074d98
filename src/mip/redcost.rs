//! Reduced-cost fixing against the cutoff bound.
//!
//! Given the root relaxation duals and a cutoff, a nonbasic column's bound
//! can be tightened whenever moving it across its range would already
//! exceed the cutoff. Tightenings that are not yet valid but will activate
//! once the incumbent improves are parked in an ordered multimap keyed by
//! the cutoff they require.

use std::collections::BTreeMap;

use crate::mip::VarType;
use crate::mip::domain::{Domain, Reason, TightenResult};
use crate::{E, I, is_neg_infinite, is_pos_infinite};

/// Total-order key for f64 map keys.
#[derive(Debug, Clone, Copy, PartialEq)]
struct OrdF64(E);

impl Eq for OrdF64 {}
impl PartialOrd for OrdF64 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for OrdF64 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// A parked bound change waiting for a better incumbent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LurkingBound {
    pub col: I,
    pub bound: E,
    pub is_upper: bool,
}

#[derive(Default)]
pub struct RedcostFixing {
    /// Keyed by the cutoff below which the change becomes valid.
    lurking: BTreeMap<OrdF64, Vec<LurkingBound>>,
}

impl RedcostFixing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies every reduced-cost tightening valid at `cutoff` directly to
    /// `domain` and parks the lurking ones. Objective and duals are in
    /// internal minimization units.
    pub fn add_root_redcost(
        &mut self,
        objective: E,
        reduced_cost: &[E],
        var_type: &[VarType],
        domain: &mut Domain,
        cutoff: E,
    ) {
        for col in 0..reduced_cost.len() {
            let dual = reduced_cost[col];
            let lower = domain.lower[col];
            let upper = domain.upper[col];
            if dual > 1e-9 && !is_neg_infinite(lower) {
                // At the lower bound: x can rise by at most (cutoff - z)/d.
                let new_upper = lower + (cutoff - objective) / dual;
                if new_upper < upper {
                    let _ = domain.tighten_upper(col, new_upper, Reason::Redcost);
                }
                // Park the integer steps that a better incumbent unlocks.
                if var_type[col] != VarType::Continuous && !is_pos_infinite(upper) {
                    let steps = ((upper - lower).min(64.0)) as i64;
                    for k in 0..steps {
                        let bound = lower + k as E;
                        let key = objective + dual * (k + 1) as E;
                        // Already valid at the current cutoff: the direct
                        // tightening above covers it.
                        if key > cutoff {
                            continue;
                        }
                        self.lurking.entry(OrdF64(key)).or_default().push(
                            LurkingBound {
                                col,
                                bound,
                                is_upper: true,
                            },
                        );
                    }
                }
            } else if dual < -1e-9 && !is_pos_infinite(upper) {
                let new_lower = upper + (cutoff - objective) / dual;
                if new_lower > lower {
                    let _ = domain.tighten_lower(col, new_lower, Reason::Redcost);
                }
                if var_type[col] != VarType::Continuous && !is_neg_infinite(lower) {
                    let steps = ((upper - lower).min(64.0)) as i64;
                    for k in 0..steps {
                        let bound = upper - k as E;
                        let key = objective - dual * (k + 1) as E;
                        // Already valid at the current cutoff: the direct
                        // tightening above covers it.
                        if key > cutoff {
                            continue;
                        }
                        self.lurking.entry(OrdF64(key)).or_default().push(
                            LurkingBound {
                                col,
                                bound,
                                is_upper: false,
                            },
                        );
                    }
                }
            }
        }
    }

    /// Activates every lurking bound whose key is at or above the improved
    /// cutoff. Returns the number of applied tightenings.
    pub fn apply_lurking(&mut self, cutoff: E, domain: &mut Domain) -> I {
        let activated: Vec<LurkingBound> = self
            .lurking
            .range(OrdF64(cutoff)..)
            .flat_map(|(_, bounds)| bounds.iter().copied())
            .collect();
        let _ = self.lurking.split_off(&OrdF64(cutoff));

        let mut applied = 0;
        for change in activated {
            let result = if change.is_upper {
                domain.tighten_upper(change.col, change.bound, Reason::Redcost)
            } else {
                domain.tighten_lower(change.col, change.bound, Reason::Redcost)
            };
            if result == TightenResult::Tightened {
                applied += 1;
            }
        }
        applied
    }

    /// Local reduced-cost fixing at a node: same rule against the node's
    /// own relaxation values, applied directly.
    pub fn propagate_redcost(
        objective: E,
        reduced_cost: &[E],
        domain: &mut Domain,
        cutoff: E,
    ) {
        if cutoff >= crate::INFTY_THRESHOLD {
            return;
        }
        for col in 0..reduced_cost.len() {
            let dual = reduced_cost[col];
            let lower = domain.lower[col];
            let upper = domain.upper[col];
            if dual > 1e-9 && !is_neg_infinite(lower) {
                let new_upper = lower + (cutoff - objective) / dual;
                if new_upper < upper {
                    let _ = domain.tighten_upper(col, new_upper, Reason::Redcost);
                }
            } else if dual < -1e-9 && !is_pos_infinite(upper) {
                let new_lower = upper + (cutoff - objective) / dual;
                if new_lower > lower {
                    let _ = domain.tighten_lower(col, new_lower, Reason::Redcost);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn integer_domain(n: I, upper: E) -> Domain {
        Domain::new(
            vec![0.0; n],
            vec![upper; n],
            vec![VarType::Integer; n],
            1e-6,
        )
    }

    #[test]
    fn positive_reduced_cost_tightens_upper() {
        // z = 10, d = 2, cutoff = 13: upper can drop to floor((13-10)/2) = 1.
        let mut domain = integer_domain(1, 10.0);
        let mut fixing = RedcostFixing::new();
        fixing.add_root_redcost(10.0, &[2.0], &[VarType::Integer], &mut domain, 13.0);
        assert_eq!(domain.upper[0], 1.0);
    }

    #[test]
    fn lurking_bound_activates_on_improved_incumbent() {
        let mut domain = integer_domain(1, 10.0);
        let mut fixing = RedcostFixing::new();
        fixing.add_root_redcost(10.0, &[2.0], &[VarType::Integer], &mut domain, 13.0);
        assert_eq!(domain.upper[0], 1.0);

        // Improving the incumbent to 11 unlocks u = 0.
        let applied = fixing.apply_lurking(11.0, &mut domain);
        assert!(applied >= 1);
        assert_eq!(domain.upper[0], 0.0);
    }

    #[test]
    fn negative_reduced_cost_tightens_lower() {
        let mut domain = integer_domain(1, 10.0);
        RedcostFixing::propagate_redcost(10.0, &[-3.0], &mut domain, 14.0);
        // x >= 10 + (14-10)/(-3) = 8.67 -> 9 after integer rounding.
        assert_eq!(domain.lower[0], 9.0);
    }

    #[test]
    fn infinite_cutoff_is_a_no_op() {
        let mut domain = integer_domain(1, 10.0);
        RedcostFixing::propagate_redcost(10.0, &[5.0], &mut domain, crate::INFTY);
        assert_eq!(domain.upper[0], 10.0);
    }
}
