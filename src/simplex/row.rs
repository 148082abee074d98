//! Entering-column selection (CHUZC): Harris two-pass ratio test with bound
//! flips.

use crate::{E, I, is_neg_infinite, is_pos_infinite};

/// One admissible entering candidate from the priced pivotal row.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub var: I,
    /// Pivotal row entry for this column.
    pub pi: E,
    /// Effective move direction (resolves free variables).
    pub effective_move: i8,
    /// Transformed pivot `sigma * pi * move`, positive for candidates.
    pub alpha: E,
    /// Dual ratio `max(dual * move, 0) / alpha`.
    pub ratio: E,
    /// Finite bound range for boxed variables, zero otherwise.
    pub range: E,
}

/// Outcome of CHUZC.
#[derive(Debug, Clone, Default)]
pub struct ColumnChoice {
    pub variable_in: I,
    /// Pivotal row entry of the entering column, for the row/column verify.
    pub alpha_row: E,
    /// Signed dual step `dual_in / pi_in`.
    pub theta_dual: E,
    /// Variables flipped to their opposite bound before the pivot.
    pub flips: Vec<I>,
    /// Row residual remaining after the flips.
    pub remaining_delta: E,
}

/// Builds the admissible candidate list from a packed pivotal row of
/// (variable, pi) pairs.
pub fn build_candidates(
    pack: &[(I, E)],
    sigma: E,
    work_dual: &[E],
    nonbasic_move: &[i8],
    work_lower: &[E],
    work_upper: &[E],
    pivot_tolerance: E,
) -> Vec<Candidate> {
    let mut candidates = Vec::with_capacity(pack.len());
    for &(var, pi) in pack {
        let lower = work_lower[var];
        let upper = work_upper[var];
        let mut mv = nonbasic_move[var];
        if mv == 0 {
            if lower == upper {
                continue;
            }
            if is_neg_infinite(lower) && is_pos_infinite(upper) {
                // Free variable: enters in whichever direction admits the
                // pivot.
                mv = if sigma * pi > 0.0 { 1 } else { -1 };
            } else {
                continue;
            }
        }
        let alpha = sigma * pi * mv as E;
        if alpha <= pivot_tolerance {
            continue;
        }
        let directed_dual = (work_dual[var] * mv as E).max(0.0);
        let range = if !is_neg_infinite(lower) && !is_pos_infinite(upper) {
            upper - lower
        } else {
            0.0
        };
        candidates.push(Candidate {
            var,
            pi,
            effective_move: mv,
            alpha,
            ratio: directed_dual / alpha,
            range,
        });
    }
    candidates
}

/// Harris two-pass selection with the bound-flipping ratio test.
///
/// Candidates are walked in ratio order. A boxed candidate whose flip leaves
/// the leaving row still infeasible is flipped and the walk continues; the
/// first candidate that cannot be passed over limits the ratio, and the
/// second pass picks the largest admissible pivot within the relaxed ratio
/// window. Returns `None` when no candidate admits a pivot: the dual is
/// unbounded and the model primal infeasible.
pub fn choose_column(
    mut candidates: Vec<Candidate>,
    sigma: E,
    delta: E,
    work_dual: &[E],
    dual_tolerance: E,
) -> Option<ColumnChoice> {
    if candidates.is_empty() {
        return None;
    }
    candidates.sort_by(|a, b| a.ratio.partial_cmp(&b.ratio).unwrap());

    let mut remain = delta.abs();
    let mut flips = Vec::new();
    let mut limit_index = None;
    for (k, candidate) in candidates.iter().enumerate() {
        let flip_reduction = candidate.range * candidate.alpha;
        if candidate.range > 0.0 && remain - flip_reduction > 0.0 {
            flips.push(k);
            remain -= flip_reduction;
            continue;
        }
        limit_index = Some(k);
        break;
    }
    let limit_index = limit_index?;
    let limiter = &candidates[limit_index];

    // Second pass: the largest pivot within the relaxed ratio window, among
    // candidates not flipped in the first pass.
    let theta_limit =
        ((work_dual[limiter.var] * limiter.effective_move as E).max(0.0) + dual_tolerance)
            / limiter.alpha;
    let mut chosen = limit_index;
    for (k, candidate) in candidates.iter().enumerate() {
        if flips.contains(&k) || candidate.ratio > theta_limit {
            continue;
        }
        if candidate.alpha > candidates[chosen].alpha {
            chosen = k;
        }
    }
    // If the best pivot is itself boxed it enters instead of flipping, so
    // any flip recorded for it must be dropped.
    let entering = candidates[chosen];
    let flips: Vec<I> = flips
        .iter()
        .filter(|&&k| k != chosen)
        .map(|&k| candidates[k].var)
        .collect();

    Some(ColumnChoice {
        variable_in: entering.var,
        alpha_row: entering.pi,
        theta_dual: work_dual[entering.var] / entering.pi,
        flips,
        remaining_delta: sigma * remain,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::INFTY;

    #[test]
    fn lowest_ratio_candidate_enters() {
        // Two candidates at lower bound, sigma = -1 (row below its bound).
        let pack = vec![(0, -2.0), (1, -1.0)];
        let dual = [4.0, 1.0];
        let mv = [1i8, 1];
        let lower = [0.0, 0.0];
        let upper = [INFTY, INFTY];
        let candidates = build_candidates(&pack, -1.0, &dual, &mv, &lower, &upper, 1e-9);
        assert_eq!(candidates.len(), 2);
        let choice = choose_column(candidates, -1.0, -3.0, &dual, 1e-7).unwrap();
        // Ratios: var0 -> 4/2 = 2, var1 -> 1/1 = 1.
        assert_eq!(choice.variable_in, 1);
        assert!(choice.flips.is_empty());
        // theta_dual = d/pi = 1 / -1
        assert_eq!(choice.theta_dual, -1.0);
        assert_eq!(choice.remaining_delta, -3.0);
    }

    #[test]
    fn boxed_candidate_flips_when_cheaper_than_pivot() {
        // var 0 is boxed with range 1 and best ratio; flipping it reduces the
        // violation from 3 to 1 and var 1 becomes the entering variable.
        let pack = vec![(0, -2.0), (1, -1.0)];
        let dual = [2.0, 3.0];
        let mv = [1i8, 1];
        let lower = [0.0, 0.0];
        let upper = [1.0, INFTY];
        let candidates = build_candidates(&pack, -1.0, &dual, &mv, &lower, &upper, 1e-9);
        let choice = choose_column(candidates, -1.0, -3.0, &dual, 1e-7).unwrap();
        assert_eq!(choice.flips, vec![0]);
        assert_eq!(choice.variable_in, 1);
        assert_eq!(choice.remaining_delta, -1.0);
    }

    #[test]
    fn wrong_sign_columns_are_inadmissible() {
        // pi has the wrong sign for an increase from the lower bound.
        let pack = vec![(0, 2.0)];
        let dual = [1.0];
        let mv = [1i8];
        let lower = [0.0];
        let upper = [INFTY];
        let candidates = build_candidates(&pack, -1.0, &dual, &mv, &lower, &upper, 1e-9);
        assert!(candidates.is_empty());
        assert!(choose_column(candidates, -1.0, -3.0, &dual, 1e-7).is_none());
    }

    #[test]
    fn harris_pass_prefers_larger_pivot_within_window() {
        // Ratios within the tolerance window of each other; the larger pivot
        // wins even though its ratio is nominally worse.
        let pack = vec![(0, -0.1), (1, -5.0)];
        let dual = [0.0, 1e-9];
        let mv = [1i8, 1];
        let lower = [0.0, 0.0];
        let upper = [INFTY, INFTY];
        let candidates = build_candidates(&pack, -1.0, &dual, &mv, &lower, &upper, 1e-12);
        let choice = choose_column(candidates, -1.0, -2.0, &dual, 1e-7).unwrap();
        assert_eq!(choice.variable_in, 1);
    }

    #[test]
    fn free_variable_enters_first() {
        let pack = vec![(0, 1.5), (1, -1.0)];
        let dual = [0.0, 2.0];
        let mv = [0i8, 1];
        let lower = [-INFTY, 0.0];
        let upper = [INFTY, INFTY];
        let candidates = build_candidates(&pack, 1.0, &dual, &mv, &lower, &upper, 1e-9);
        let choice = choose_column(candidates, 1.0, 2.0, &dual, 1e-7).unwrap();
        assert_eq!(choice.variable_in, 0);
    }
}
