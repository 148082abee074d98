//! Local variable domains with a backtrackable change stack and
//! propagation.
//!
//! Every tightening is recorded with the previous bound, so restoring to a
//! saved marker recovers the exact prior domain bitwise. Propagation derives
//! implied bounds from row activities (interval arithmetic over the
//! constraint rows), applies clique implications between binaries, and
//! never cycles because bounds only ever shrink.

use crate::mip::VarType;
use crate::sparse::SparseMatrix;
use crate::{E, I, is_neg_infinite, is_pos_infinite};

/// Why a bound was tightened; recorded on the change stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// Branching decision.
    Branching,
    /// Row activity propagation from the given row.
    RowActivity(I),
    /// Clique implication.
    Clique,
    /// Reduced-cost fixing.
    Redcost,
    /// Heuristic fixing (RINS/RENS neighborhoods).
    Heuristic,
}

/// Outcome of a tightening attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TightenResult {
    /// The domain became empty.
    Conflict,
    /// The bound moved.
    Tightened,
    /// The new bound was no stronger than the current one.
    Redundant,
}

/// One undo record.
#[derive(Debug, Clone, Copy)]
struct Change {
    col: I,
    old_lower: E,
    old_upper: E,
    #[allow(dead_code)]
    reason: Reason,
}

/// A set of binary columns of which at most one can be nonzero.
#[derive(Debug, Clone)]
pub struct Clique {
    pub cols: Vec<I>,
}

#[derive(Debug, Clone)]
pub struct Domain {
    pub lower: Vec<E>,
    pub upper: Vec<E>,
    var_type: Vec<VarType>,
    stack: Vec<Change>,
    conflict: bool,
    feastol: E,
}

impl Domain {
    pub fn new(lower: Vec<E>, upper: Vec<E>, var_type: Vec<VarType>, feastol: E) -> Self {
        debug_assert_eq!(lower.len(), upper.len());
        Self {
            lower,
            upper,
            var_type,
            stack: Vec::new(),
            conflict: false,
            feastol,
        }
    }

    pub fn num_col(&self) -> I {
        self.lower.len()
    }

    pub fn in_conflict(&self) -> bool {
        self.conflict
    }

    pub fn is_fixed(&self, col: I) -> bool {
        self.lower[col] == self.upper[col]
    }

    pub fn is_binary(&self, col: I) -> bool {
        self.var_type[col] != VarType::Continuous
            && self.lower[col] >= -self.feastol
            && self.upper[col] <= 1.0 + self.feastol
    }

    /// Current stack position, used as a backtracking marker.
    pub fn mark(&self) -> usize {
        self.stack.len()
    }

    /// Restores every bound changed after `mark`, in reverse order.
    pub fn backtrack_to(&mut self, mark: usize) {
        while self.stack.len() > mark {
            let change = self.stack.pop().unwrap();
            self.lower[change.col] = change.old_lower;
            self.upper[change.col] = change.old_upper;
        }
        self.conflict = false;
    }

    /// Integer-rounds a candidate lower bound.
    fn round_lower(&self, col: I, bound: E) -> E {
        if self.var_type[col] == VarType::Continuous {
            bound
        } else {
            (bound - self.feastol).ceil()
        }
    }

    fn round_upper(&self, col: I, bound: E) -> E {
        if self.var_type[col] == VarType::Continuous {
            bound
        } else {
            (bound + self.feastol).floor()
        }
    }

    pub fn tighten_lower(&mut self, col: I, bound: E, reason: Reason) -> TightenResult {
        let bound = self.round_lower(col, bound);
        if bound <= self.lower[col] || is_neg_infinite(bound) {
            return TightenResult::Redundant;
        }
        self.stack.push(Change {
            col,
            old_lower: self.lower[col],
            old_upper: self.upper[col],
            reason,
        });
        self.lower[col] = bound;
        if bound > self.upper[col] + self.feastol {
            self.conflict = true;
            return TightenResult::Conflict;
        }
        TightenResult::Tightened
    }

    pub fn tighten_upper(&mut self, col: I, bound: E, reason: Reason) -> TightenResult {
        let bound = self.round_upper(col, bound);
        if bound >= self.upper[col] || is_pos_infinite(bound) {
            return TightenResult::Redundant;
        }
        self.stack.push(Change {
            col,
            old_lower: self.lower[col],
            old_upper: self.upper[col],
            reason,
        });
        self.upper[col] = bound;
        if bound < self.lower[col] - self.feastol {
            self.conflict = true;
            return TightenResult::Conflict;
        }
        TightenResult::Tightened
    }

    pub fn fix(&mut self, col: I, value: E, reason: Reason) -> TightenResult {
        match self.tighten_lower(col, value, reason) {
            TightenResult::Conflict => TightenResult::Conflict,
            _ => self.tighten_upper(col, value, reason),
        }
    }
}

/// Propagation engine over rows and cliques.
pub struct Propagator<'a> {
    matrix: &'a SparseMatrix,
    row_lower: &'a [E],
    row_upper: &'a [E],
    cliques: &'a [Clique],
}

impl<'a> Propagator<'a> {
    pub fn new(
        matrix: &'a SparseMatrix,
        row_lower: &'a [E],
        row_upper: &'a [E],
        cliques: &'a [Clique],
    ) -> Self {
        Self {
            matrix,
            row_lower,
            row_upper,
            cliques,
        }
    }

    /// Scans every binary-looking row of a model for at-most-one structure.
    pub fn detect_cliques(
        matrix: &SparseMatrix,
        row_upper: &[E],
        domain: &Domain,
    ) -> Vec<Clique> {
        let mut cliques = Vec::new();
        for row in 0..matrix.num_row {
            if (row_upper[row] - 1.0).abs() > 1e-9 {
                continue;
            }
            let mut cols = Vec::new();
            let mut all_unit_binaries = true;
            for (col, value) in matrix.row(row) {
                if (value - 1.0).abs() > 1e-9 || !domain.is_binary(col) {
                    all_unit_binaries = false;
                    break;
                }
                cols.push(col);
            }
            if all_unit_binaries && cols.len() >= 2 {
                cliques.push(Clique { cols });
            }
        }
        cliques
    }

    /// Runs row and clique propagation to a fixed point (bounded rounds).
    /// Returns false on conflict.
    pub fn propagate(&self, domain: &mut Domain) -> bool {
        for _ in 0..10 {
            let mark = domain.mark();
            if !self.propagate_rows(domain) || !self.propagate_cliques(domain) {
                return false;
            }
            if domain.mark() == mark {
                return true;
            }
        }
        true
    }

    fn propagate_rows(&self, domain: &mut Domain) -> bool {
        for row in 0..self.matrix.num_row {
            // Activity bounds of the row under the current domain.
            let mut min_activity = 0.0;
            let mut max_activity = 0.0;
            let mut min_infinite = 0;
            let mut max_infinite = 0;
            for (col, value) in self.matrix.row(row) {
                let (low_contrib, high_contrib) = if value > 0.0 {
                    (value * domain.lower[col], value * domain.upper[col])
                } else {
                    (value * domain.upper[col], value * domain.lower[col])
                };
                if low_contrib <= -crate::INFTY_THRESHOLD {
                    min_infinite += 1;
                } else {
                    min_activity += low_contrib;
                }
                if high_contrib >= crate::INFTY_THRESHOLD {
                    max_infinite += 1;
                } else {
                    max_activity += high_contrib;
                }
            }

            let row_lower = self.row_lower[row];
            let row_upper = self.row_upper[row];
            if min_infinite == 0 && min_activity > row_upper + domain.feastol {
                domain.conflict = true;
                return false;
            }
            if max_infinite == 0 && max_activity < row_lower - domain.feastol {
                domain.conflict = true;
                return false;
            }

            for (col, value) in self.matrix.row(row) {
                // Residual activity with this column removed.
                let (self_min, self_max) = if value > 0.0 {
                    (value * domain.lower[col], value * domain.upper[col])
                } else {
                    (value * domain.upper[col], value * domain.lower[col])
                };

                // Implied upper from the row upper bound.
                if !is_pos_infinite(row_upper)
                    && min_infinite == 0
                    && self_min > -crate::INFTY_THRESHOLD
                {
                    let residual = min_activity - self_min;
                    let implied = (row_upper - residual) / value;
                    let result = if value > 0.0 {
                        domain.tighten_upper(col, implied, Reason::RowActivity(row))
                    } else {
                        domain.tighten_lower(col, implied, Reason::RowActivity(row))
                    };
                    if result == TightenResult::Conflict {
                        return false;
                    }
                }
                // Implied lower from the row lower bound.
                if !is_neg_infinite(row_lower)
                    && max_infinite == 0
                    && self_max < crate::INFTY_THRESHOLD
                {
                    let residual = max_activity - self_max;
                    let implied = (row_lower - residual) / value;
                    let result = if value > 0.0 {
                        domain.tighten_lower(col, implied, Reason::RowActivity(row))
                    } else {
                        domain.tighten_upper(col, implied, Reason::RowActivity(row))
                    };
                    if result == TightenResult::Conflict {
                        return false;
                    }
                }
            }
        }
        true
    }

    fn propagate_cliques(&self, domain: &mut Domain) -> bool {
        for clique in self.cliques {
            let fixed_one = clique
                .cols
                .iter()
                .find(|&&col| domain.lower[col] > 0.5);
            if let Some(&one) = fixed_one {
                for &col in &clique.cols {
                    if col != one
                        && domain.tighten_upper(col, 0.0, Reason::Clique) == TightenResult::Conflict
                    {
                        return false;
                    }
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::INFTY;

    fn binary_domain(n: I) -> Domain {
        Domain::new(
            vec![0.0; n],
            vec![1.0; n],
            vec![VarType::Integer; n],
            1e-6,
        )
    }

    #[test]
    fn backtrack_restores_bounds_bitwise() {
        let mut domain = Domain::new(
            vec![-1.5, 0.0, 2.25],
            vec![3.5, 10.0, 7.75],
            vec![VarType::Continuous; 3],
            1e-6,
        );
        let before_lower = domain.lower.clone();
        let before_upper = domain.upper.clone();

        let mark = domain.mark();
        domain.tighten_lower(0, 0.125, Reason::Branching);
        domain.tighten_upper(2, 5.5, Reason::Branching);
        domain.fix(1, 4.0, Reason::Heuristic);
        domain.tighten_upper(0, 0.25, Reason::Redcost);
        domain.backtrack_to(mark);

        assert_eq!(domain.lower, before_lower);
        assert_eq!(domain.upper, before_upper);
        assert!(!domain.in_conflict());
    }

    #[test]
    fn integer_bounds_are_rounded() {
        let mut domain = Domain::new(
            vec![0.0],
            vec![10.0],
            vec![VarType::Integer],
            1e-6,
        );
        domain.tighten_lower(0, 2.3, Reason::Branching);
        assert_eq!(domain.lower[0], 3.0);
        domain.tighten_upper(0, 7.9, Reason::Branching);
        assert_eq!(domain.upper[0], 7.0);
    }

    #[test]
    fn crossing_bounds_conflict() {
        let mut domain = binary_domain(1);
        assert_eq!(
            domain.tighten_lower(0, 1.0, Reason::Branching),
            TightenResult::Tightened
        );
        assert_eq!(
            domain.tighten_upper(0, 0.0, Reason::Branching),
            TightenResult::Conflict
        );
        assert!(domain.in_conflict());
    }

    #[test]
    fn row_activity_implies_bounds() {
        // x0 + x1 <= 1 with x0 fixed to 1 forces x1 <= 0.
        let matrix = SparseMatrix::from_csc(1, 2, vec![0, 1, 2], vec![0, 0], vec![1.0, 1.0]);
        let row_lower = [-INFTY];
        let row_upper = [1.0];
        let cliques = [];
        let propagator = Propagator::new(&matrix, &row_lower, &row_upper, &cliques);

        let mut domain = binary_domain(2);
        domain.fix(0, 1.0, Reason::Branching);
        assert!(propagator.propagate(&mut domain));
        assert_eq!(domain.upper[1], 0.0);
    }

    #[test]
    fn clique_fixes_siblings_to_zero() {
        let matrix = SparseMatrix::from_csc(0, 3, vec![0, 0, 0, 0], vec![], vec![]);
        let row_lower: [E; 0] = [];
        let row_upper: [E; 0] = [];
        let cliques = [Clique {
            cols: vec![0, 1, 2],
        }];
        let propagator = Propagator::new(&matrix, &row_lower, &row_upper, &cliques);

        let mut domain = binary_domain(3);
        domain.fix(1, 1.0, Reason::Branching);
        assert!(propagator.propagate(&mut domain));
        assert_eq!(domain.upper[0], 0.0);
        assert_eq!(domain.upper[2], 0.0);
    }

    #[test]
    fn infeasible_row_activity_is_a_conflict() {
        // x0 + x1 >= 3 over binaries is impossible.
        let matrix = SparseMatrix::from_csc(1, 2, vec![0, 1, 2], vec![0, 0], vec![1.0, 1.0]);
        let row_lower = [3.0];
        let row_upper = [INFTY];
        let cliques = [];
        let propagator = Propagator::new(&matrix, &row_lower, &row_upper, &cliques);

        let mut domain = binary_domain(2);
        assert!(!propagator.propagate(&mut domain));
        assert!(domain.in_conflict());
    }

    #[test]
    fn clique_detection_finds_packing_rows() {
        let matrix = SparseMatrix::from_csc(
            2,
            3,
            vec![0, 2, 4, 5],
            vec![0, 1, 0, 1, 0],
            vec![1.0, 1.0, 1.0, 2.0, 1.0],
        );
        let domain = binary_domain(3);
        let cliques = Propagator::detect_cliques(&matrix, &[1.0, 1.0], &domain);
        // Row 0 is x0 + x1 + x2 <= 1; row 1 has a coefficient of 2.
        assert_eq!(cliques.len(), 1);
        assert_eq!(cliques[0].cols, vec![0, 1, 2]);
    }
}
